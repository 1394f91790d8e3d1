//! Batch conversion: sources -> merged graph -> template units.
//!
//! This is a thin orchestrator over the codecs, the merger and the
//! finalization step. It never writes anything: the changes the batch
//! implies for its own sources are returned as [`SourceChange`]s.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::TranslationCatalog;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::merge::Batch;
use crate::record::{Record, CHART_TEMPLATE_KIND};
use crate::registry::Context;
use crate::source::{Source, SourceFormat, SourceProvider};
use crate::tabular::{self, DecodeOptions};
use crate::template::{self, TemplateUnit};
use crate::tree::{self, Outcome};

/// Template columns of tabular sources other than chart templates.
const TEMPLATE_COLUMNS: &[&str] = &["chart_template_id/id", "chart_template_id:id"];

/// What the batch does to one of its own sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SourceChange {
    Remove { path: PathBuf },
    Rewrite { path: PathBuf, text: String },
}

/// A source left out of the batch.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// A decoded, merged and rewritten batch.
#[derive(Debug, Default)]
pub struct Loaded {
    pub batch: Batch,
    pub changes: Vec<SourceChange>,
    pub skipped: Vec<SkippedSource>,
}

/// Result of a full conversion.
#[derive(Debug, Serialize)]
pub struct Conversion {
    pub units: Vec<TemplateUnit>,
    pub changes: Vec<SourceChange>,
    pub skipped: Vec<SkippedSource>,
}

/// Decode every source of `provider`, merge the records and run the
/// rewrite passes.
pub fn load(provider: &dyn SourceProvider, mapping: &MappingTable) -> Result<Loaded> {
    let ctx = Context { mapping };
    let mut loaded = Loaded::default();

    for source in provider.sources()? {
        let text = provider.read_source(&source.path)?;
        match decode_source(&source, &text, &ctx) {
            Ok((records, change)) => {
                debug!(source = %source.name(), records = records.len(), "decoded source");
                if !source.demo {
                    for record in records {
                        loaded.batch.collect(record);
                    }
                }
                loaded.changes.extend(change);
            }
            Err(err) if err.is_source_local() => {
                warn!("skipping source: {}", err);
                loaded.skipped.push(SkippedSource {
                    path: source.path.clone(),
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    loaded.batch.rewrite()?;
    Ok(loaded)
}

fn decode_source(
    source: &Source,
    text: &str,
    ctx: &Context<'_>,
) -> Result<(Vec<Record>, Option<SourceChange>)> {
    let name = source.name();
    match &source.format {
        SourceFormat::Tabular { kind } => {
            let chart = kind == CHART_TEMPLATE_KIND;
            let opts = DecodeOptions {
                kind,
                namespace: &source.namespace,
                template_columns: if chart { &["id"] } else { TEMPLATE_COLUMNS },
                keep_template_column: chart,
            };
            let records = tabular::decode(&name, text, &opts, ctx)?;
            let change = SourceChange::Remove {
                path: source.path.clone(),
            };
            Ok((records, Some(change)))
        }
        SourceFormat::Tree => {
            let document = tree::decode(&name, text, &source.namespace, ctx)?;
            let path = source.path.clone();
            let change = match document.outcome {
                Outcome::Unchanged => None,
                Outcome::Removed => Some(SourceChange::Remove { path }),
                Outcome::Rewritten(text) => Some(SourceChange::Rewrite { path, text }),
            };
            Ok((document.records, change))
        }
    }
}

/// Read the translation catalogs of `namespaces`.
pub fn load_catalogs<'a>(
    provider: &dyn SourceProvider,
    namespaces: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<String, TranslationCatalog>> {
    let mut catalogs = HashMap::new();
    for namespace in namespaces {
        let mut catalog = TranslationCatalog::new();
        for file in provider.catalogs(namespace)? {
            let text = provider.read_source(&file.path)?;
            catalog.read_po(&file.locale, &text);
        }
        if !catalog.is_empty() {
            catalogs.insert(namespace.to_owned(), catalog);
        }
    }
    Ok(catalogs)
}

/// Run the whole batch: load, translate and finalize.
pub fn convert(provider: &dyn SourceProvider, mapping: &MappingTable) -> Result<Conversion> {
    let Loaded {
        batch,
        changes,
        skipped,
    } = load(provider, mapping)?;

    let namespaces: BTreeSet<String> = batch
        .groups()
        .filter(|(key, _)| key.template.is_some())
        .map(|(key, _)| key.namespace.clone())
        .collect();
    let catalogs = load_catalogs(provider, namespaces.iter().map(String::as_str))?;

    let units = template::finalize(batch, mapping, &catalogs)?;
    debug!(units = units.len(), "finalized template units");
    Ok(Conversion {
        units,
        changes,
        skipped,
    })
}
