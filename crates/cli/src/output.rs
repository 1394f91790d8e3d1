//! Output planning and skip-if-unchanged writes.
//!
//! A conversion is first turned into a list of [`FileAction`]s: the
//! generated tabular files and Python modules of every template unit,
//! followed by the changes the batch implies for its own sources.
//! [`apply`] then carries them out, leaving files whose content is
//! already up to date untouched.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use chartmig_codegen::{render_module, PythonConfig};
use chartmig_core::tabular;
use chartmig_core::{Conversion, SourceChange, TemplateUnit};

/// Kinds written as tabular files, in output order.
pub(crate) const TABULAR_OUTPUTS: &[&str] = &[
    "account.account",
    "account.group",
    "account.tax.group",
    "account.tax",
    "account.fiscal.position",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileAction {
    Write { path: PathBuf, text: String },
    Remove { path: PathBuf },
}

impl FileAction {
    pub(crate) fn path(&self) -> &Path {
        match self {
            FileAction::Write { path, .. } | FileAction::Remove { path } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Status {
    Written,
    Unchanged,
    Removed,
    Missing,
}

impl Status {
    pub(crate) fn label(self, dry_run: bool) -> &'static str {
        match (self, dry_run) {
            (Status::Written, false) => "wrote",
            (Status::Written, true) => "would write",
            (Status::Removed, false) => "removed",
            (Status::Removed, true) => "would remove",
            (Status::Unchanged, _) => "unchanged",
            (Status::Missing, _) => "already gone",
        }
    }
}

/// What happened (or, in a dry run, would happen) to one file.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct FileReport {
    pub path: PathBuf,
    pub status: Status,
}

/// Path of the tabular output of `kind` for one unit.
pub(crate) fn tabular_path(root: &Path, unit: &TemplateUnit, kind: &str) -> PathBuf {
    root.join(&unit.namespace)
        .join("data")
        .join("template")
        .join(format!("{}-{}.csv", kind, unit.qualifier))
}

/// Every file action implied by `conversion`.
pub(crate) fn plan(
    conversion: &Conversion,
    root: &Path,
    python: &PythonConfig,
) -> Result<Vec<FileAction>, String> {
    let mut actions = Vec::new();
    for unit in &conversion.units {
        for kind in TABULAR_OUTPUTS {
            if let Some(text) = tabular::encode(unit.records(kind)) {
                actions.push(FileAction::Write {
                    path: tabular_path(root, unit, kind),
                    text,
                });
            }
        }
        let module = render_module(unit, python).map_err(|e| {
            format!("code generation error for '{}': {}", unit.legacy_template, e)
        })?;
        actions.push(FileAction::Write {
            path: root.join(&module.namespace).join(module.relative_path()),
            text: module.text,
        });
    }

    for change in &conversion.changes {
        actions.push(match change {
            SourceChange::Remove { path } => FileAction::Remove { path: path.clone() },
            SourceChange::Rewrite { path, text } => FileAction::Write {
                path: path.clone(),
                text: text.clone(),
            },
        });
    }
    Ok(actions)
}

/// Carry out `actions`. With `dry_run`, only report what would change.
pub(crate) fn apply(actions: &[FileAction], dry_run: bool) -> Result<Vec<FileReport>, String> {
    let mut reports = Vec::with_capacity(actions.len());
    for action in actions {
        let status = match action {
            FileAction::Write { path, text } => write_if_changed(path, text, dry_run)?,
            FileAction::Remove { path } => remove(path, dry_run)?,
        };
        reports.push(FileReport {
            path: action.path().to_path_buf(),
            status,
        });
    }
    Ok(reports)
}

fn write_if_changed(path: &Path, text: &str, dry_run: bool) -> Result<Status, String> {
    if std::fs::read_to_string(path).is_ok_and(|current| current == text) {
        debug!(path = %path.display(), "content unchanged");
        return Ok(Status::Unchanged);
    }
    if dry_run {
        return Ok(Status::Written);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("could not create '{}': {}", dir.display(), e))?;
    }
    std::fs::write(path, text).map_err(|e| format!("could not write '{}': {}", path.display(), e))?;
    info!(path = %path.display(), "wrote file");
    Ok(Status::Written)
}

fn remove(path: &Path, dry_run: bool) -> Result<Status, String> {
    if !path.exists() {
        return Ok(Status::Missing);
    }
    if !dry_run {
        std::fs::remove_file(path)
            .map_err(|e| format!("could not remove '{}': {}", path.display(), e))?;
        info!(path = %path.display(), "removed file");
    }
    Ok(Status::Removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let action = FileAction::Write {
            path: path.clone(),
            text: "\"id\"\n".into(),
        };

        let first = apply(std::slice::from_ref(&action), false).unwrap();
        assert_eq!(first[0].status, Status::Written);
        assert_eq!(fs::read_to_string(&path).unwrap(), "\"id\"\n");

        let second = apply(&[action], false).unwrap();
        assert_eq!(second[0].status, Status::Unchanged);
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.xml");
        fs::write(&kept, "<odoo/>").unwrap();
        let fresh = dir.path().join("fresh.py");

        let reports = apply(
            &[
                FileAction::Write {
                    path: fresh.clone(),
                    text: "x".into(),
                },
                FileAction::Remove { path: kept.clone() },
            ],
            true,
        )
        .unwrap();
        assert_eq!(reports[0].status, Status::Written);
        assert_eq!(reports[1].status, Status::Removed);
        assert!(!fresh.exists());
        assert!(kept.exists());
    }

    #[test]
    fn removing_a_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let reports = apply(
            &[FileAction::Remove {
                path: dir.path().join("gone.csv"),
            }],
            false,
        )
        .unwrap();
        assert_eq!(reports[0].status, Status::Missing);
    }

    #[test]
    fn tabular_outputs_live_under_data_template() {
        let unit = TemplateUnit {
            namespace: "l10n_be".into(),
            legacy_template: "l10n_be.be_chart".into(),
            qualifier: "be".into(),
            records: Default::default(),
        };
        assert_eq!(
            tabular_path(Path::new("/addons"), &unit, "account.tax"),
            PathBuf::from("/addons/l10n_be/data/template/account.tax-be.csv")
        );
    }
}
