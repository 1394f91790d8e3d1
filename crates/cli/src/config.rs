//! Batch configuration read from `chartmig.toml`.
//!
//! # Example
//!
//! ```toml
//! root = "../odoo/addons"
//! namespace_prefix = "l10n_"
//! header = "# Part of Odoo. See LICENSE file for full copyright and licensing details."
//! mapping_file = "mapping.toml"
//!
//! [mapping]
//! "l10n_be.l10nbe_chart_template" = "be"
//! ```
//!
//! Relative `root` and `mapping_file` paths resolve against the directory
//! of the configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use chartmig_core::MappingTable;

/// Name of the configuration file looked up in the working directory.
pub(crate) const DEFAULT_CONFIG: &str = "chartmig.toml";

const DEFAULT_PREFIX: &str = "l10n_";

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Addons directory holding one folder per namespace.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Only namespace folders starting with this prefix are read.
    #[serde(default = "default_prefix")]
    pub namespace_prefix: String,
    /// Header line(s) of every generated Python module.
    #[serde(default)]
    pub header: String,
    /// Optional TOML file holding more mapping entries.
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
    /// Legacy template id -> qualifier. Entries here win over `mapping_file`.
    #[serde(default)]
    pub mapping: MappingTable,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: default_root(),
            namespace_prefix: default_prefix(),
            header: String::new(),
            mapping_file: None,
            mapping: MappingTable::new(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_owned()
}

// ── Functions ─────────────────────────────────────────────────────────────────

/// Parse a configuration file, resolving its relative paths.
pub(crate) fn read_config(path: &Path) -> Result<Config, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    let mut config: Config = toml::from_str(&content)
        .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    if config.root.is_relative() {
        config.root = base.join(&config.root);
    }
    if let Some(file) = config.mapping_file.take() {
        config.mapping_file = Some(if file.is_relative() { base.join(file) } else { file });
    }
    Ok(config)
}

/// Resolve the configuration of a command.
///
/// An explicit `--config` must exist; otherwise `chartmig.toml` in the
/// working directory is used when present, and defaults when not.
/// `root` overrides the configured addons directory.
pub(crate) fn resolve(config: Option<&Path>, root: Option<&Path>) -> Result<Config, String> {
    let mut resolved = match config {
        Some(path) => read_config(path)?,
        None if Path::new(DEFAULT_CONFIG).is_file() => read_config(Path::new(DEFAULT_CONFIG))?,
        None => Config::default(),
    };
    if let Some(root) = root {
        resolved.root = root.to_path_buf();
    }
    Ok(resolved)
}

impl Config {
    /// The full mapping table: `mapping_file` entries, then inline ones.
    pub(crate) fn mapping_table(&self) -> Result<MappingTable, String> {
        let mut table = MappingTable::new();
        if let Some(path) = &self.mapping_file {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
            let from_file: MappingTable = toml::from_str(&content)
                .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?;
            table.extend(from_file);
        }
        table.extend(self.mapping.clone());
        Ok(table)
    }
}
