//! Source provider abstraction for batch discovery.
//!
//! The [`SourceProvider`] trait hides where the legacy sources live. The
//! default [`FileSystemProvider`] walks an addons tree;
//! [`InMemoryProvider`] serves the same layout from a map, for tests and
//! embedding.
//!
//! Both classify paths the same way, relative to their root:
//!
//! ```text
//! {namespace}/data/*.csv      tabular source, kind from the file stem
//! {namespace}/data/*.xml      tree document
//! {namespace}/demo/*.xml      tree document, records discarded
//! {namespace}/i18n*/*.po      translation catalog, locale from the stem
//! ```

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{MigrateError, Result};
use crate::record::CHART_TEMPLATE_KIND;

/// Kinds accepted from tabular sources, in processing order.
pub const TABULAR_KINDS: &[&str] = &[
    "account.fiscal.position",
    "account.fiscal.position.tax",
    "account.fiscal.position.account",
    "account.tax",
    "account.account",
    "account.group",
    "account.tax.group",
    CHART_TEMPLATE_KIND,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum SourceFormat {
    Tree,
    Tabular { kind: String },
}

/// One input document of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub namespace: String,
    pub path: PathBuf,
    pub format: SourceFormat,
    /// Demonstration data: decoded for its side effects only.
    pub demo: bool,
}

impl Source {
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// A translation catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogSource {
    pub namespace: String,
    pub locale: String,
    pub path: PathBuf,
}

/// Trait that abstracts discovery and reading of batch sources.
pub trait SourceProvider {
    /// Every source of the batch, in processing order.
    fn sources(&self) -> Result<Vec<Source>>;

    /// Read the text of a source returned by [`SourceProvider::sources`].
    fn read_source(&self, path: &Path) -> Result<String>;

    /// Translation catalogs of `namespace`, ordered by path.
    fn catalogs(&self, namespace: &str) -> Result<Vec<CatalogSource>>;
}

/// Kind of a tabular source named `stem` (`account_tax-be.csv` has stem
/// `account_tax-be`), if it is one the batch accepts.
pub fn tabular_kind(stem: &str) -> Option<&'static str> {
    let model = stem.split('-').next().unwrap_or(stem).replace('_', ".");
    let model = if model == CHART_TEMPLATE_KIND {
        model.as_str()
    } else {
        model.strip_suffix(".template").unwrap_or(&model)
    };
    TABULAR_KINDS.iter().copied().find(|kind| *kind == model)
}

/// Classify `relative` (a path below the provider root) as a batch source.
fn classify(root: &Path, relative: &Path, namespace_prefix: &str) -> Option<Source> {
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    let [namespace, folder, file] = parts.as_slice() else {
        return None;
    };
    if !namespace.starts_with(namespace_prefix) {
        return None;
    }
    let (stem, extension) = file.rsplit_once('.')?;
    let format = match (*folder, extension) {
        ("data", "xml") | ("demo", "xml") => SourceFormat::Tree,
        ("data", "csv") => SourceFormat::Tabular {
            kind: tabular_kind(stem)?.to_owned(),
        },
        _ => return None,
    };
    Some(Source {
        namespace: (*namespace).to_owned(),
        path: root.join(relative),
        format,
        demo: *folder == "demo",
    })
}

fn classify_catalog(root: &Path, relative: &Path, namespace: &str) -> Option<CatalogSource> {
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    let [ns, folder, file] = parts.as_slice() else {
        return None;
    };
    if *ns != namespace || !folder.starts_with("i18n") {
        return None;
    }
    let locale = file.strip_suffix(".po")?;
    Some(CatalogSource {
        namespace: namespace.to_owned(),
        locale: locale.to_owned(),
        path: root.join(relative),
    })
}

/// Tabular sources first, grouped by kind, then data documents, then
/// demo documents. Ties are broken by path.
fn processing_order(sources: &mut [Source]) {
    sources.sort_by_cached_key(|source| {
        let rank = match &source.format {
            SourceFormat::Tabular { kind } => TABULAR_KINDS
                .iter()
                .position(|k| *k == kind.as_str())
                .unwrap_or(TABULAR_KINDS.len()),
            SourceFormat::Tree if !source.demo => TABULAR_KINDS.len() + 1,
            SourceFormat::Tree => TABULAR_KINDS.len() + 2,
        };
        (rank, source.path.clone())
    });
}

// ── Filesystem ───────────────────────────────────────────────────────

/// Default filesystem-backed provider rooted at an addons directory.
#[derive(Debug, Clone)]
pub struct FileSystemProvider {
    root: PathBuf,
    namespace_prefix: String,
}

impl FileSystemProvider {
    pub fn new(root: impl Into<PathBuf>, namespace_prefix: impl Into<String>) -> Self {
        FileSystemProvider {
            root: root.into(),
            namespace_prefix: namespace_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Entries of `dir`, sorted by path.
fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let io = |source| MigrateError::Io {
        path: dir.to_owned(),
        source,
    };
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io)? {
        entries.push(entry.map_err(io)?.path());
    }
    entries.sort();
    Ok(entries)
}

impl SourceProvider for FileSystemProvider {
    fn sources(&self) -> Result<Vec<Source>> {
        let mut sources = Vec::new();
        for namespace_dir in read_dir(&self.root)? {
            let Some(namespace) = namespace_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !namespace.starts_with(&self.namespace_prefix) || !namespace_dir.is_dir() {
                continue;
            }
            for folder in ["data", "demo"] {
                let dir = namespace_dir.join(folder);
                if !dir.is_dir() {
                    continue;
                }
                for path in read_dir(&dir)? {
                    let Ok(relative) = path.strip_prefix(&self.root) else {
                        continue;
                    };
                    if let Some(source) = classify(&self.root, relative, &self.namespace_prefix) {
                        sources.push(source);
                    }
                }
            }
        }
        processing_order(&mut sources);
        Ok(sources)
    }

    fn read_source(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|source| MigrateError::Io {
            path: path.to_owned(),
            source,
        })
    }

    fn catalogs(&self, namespace: &str) -> Result<Vec<CatalogSource>> {
        let namespace_dir = self.root.join(namespace);
        if !namespace_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut catalogs = Vec::new();
        for folder in read_dir(&namespace_dir)? {
            if !folder.is_dir() {
                continue;
            }
            for path in read_dir(&folder)? {
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                if let Some(catalog) = classify_catalog(&self.root, relative, namespace) {
                    catalogs.push(catalog);
                }
            }
        }
        Ok(catalogs)
    }
}

// ── In memory ────────────────────────────────────────────────────────

/// In-memory provider keyed by paths relative to a virtual root.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    files: BTreeMap<PathBuf, String>,
    namespace_prefix: String,
}

impl InMemoryProvider {
    pub fn new(namespace_prefix: impl Into<String>) -> Self {
        InMemoryProvider {
            files: BTreeMap::new(),
            namespace_prefix: namespace_prefix.into(),
        }
    }

    /// Add a file at `path`, relative to the virtual root.
    pub fn with_file(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.files.insert(path.into(), text.into());
        self
    }
}

impl SourceProvider for InMemoryProvider {
    fn sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self
            .files
            .keys()
            .filter_map(|path| classify(Path::new(""), path, &self.namespace_prefix))
            .collect();
        processing_order(&mut sources);
        Ok(sources)
    }

    fn read_source(&self, path: &Path) -> Result<String> {
        self.files.get(path).cloned().ok_or_else(|| MigrateError::Io {
            path: path.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found in memory"),
        })
    }

    fn catalogs(&self, namespace: &str) -> Result<Vec<CatalogSource>> {
        Ok(self
            .files
            .keys()
            .filter_map(|path| classify_catalog(Path::new(""), path, namespace))
            .collect())
    }
}
