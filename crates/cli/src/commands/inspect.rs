use std::path::Path;
use std::process;

use serde::Serialize;

use chartmig_core::{FileSystemProvider, KindMap, SkippedSource};

use crate::{config, report_error, OutputFormat};

/// One `(namespace, template)` group of the merged graph.
#[derive(Serialize)]
struct GroupView<'a> {
    namespace: &'a str,
    template: Option<&'a str>,
    records: &'a KindMap,
}

#[derive(Serialize)]
struct Inspection<'a> {
    groups: Vec<GroupView<'a>>,
    skipped: &'a [SkippedSource],
}

/// Decode, merge and rewrite the batch, then print the graph as JSON.
pub(crate) fn cmd_inspect(
    config_path: Option<&Path>,
    root: Option<&Path>,
    namespace: Option<&str>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = match config::resolve(config_path, root) {
        Ok(c) => c,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let mapping = match config.mapping_table() {
        Ok(m) => m,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let provider = FileSystemProvider::new(&config.root, config.namespace_prefix.as_str());
    let loaded = match chartmig_core::load(&provider, &mapping) {
        Ok(l) => l,
        Err(e) => {
            let msg = format!("conversion error: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let groups = loaded
        .batch
        .groups()
        .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
        .map(|(key, records)| GroupView {
            namespace: &key.namespace,
            template: key.template.as_deref(),
            records,
        })
        .collect();
    let inspection = Inspection {
        groups,
        skipped: &loaded.skipped,
    };
    let pretty = serde_json::to_string_pretty(&inspection)
        .unwrap_or_else(|e| format!("serialization error: {}", e));
    println!("{}", pretty);
}
