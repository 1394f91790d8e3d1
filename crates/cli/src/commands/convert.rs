use std::path::Path;
use std::process;

use serde::Serialize;

use chartmig_codegen::PythonConfig;
use chartmig_core::{FileSystemProvider, SkippedSource};

use crate::output::{self, FileReport, Status};
use crate::{config, report_error, OutputFormat};

#[derive(Serialize)]
struct UnitSummary<'a> {
    namespace: &'a str,
    template: &'a str,
    qualifier: &'a str,
}

#[derive(Serialize)]
struct ConvertSummary<'a> {
    dry_run: bool,
    units: Vec<UnitSummary<'a>>,
    files: &'a [FileReport],
    skipped: &'a [SkippedSource],
}

pub(crate) fn cmd_convert(
    config_path: Option<&Path>,
    root: Option<&Path>,
    dry_run: bool,
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
    let conversion = match chartmig_core::convert(&provider, &mapping) {
        Ok(c) => c,
        Err(e) => {
            let msg = format!("conversion error: {}", e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let python = PythonConfig {
        header: config.header.clone(),
    };
    let reports = match output::plan(&conversion, &config.root, &python)
        .and_then(|actions| output::apply(&actions, dry_run))
    {
        Ok(r) => r,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => {
            let summary = ConvertSummary {
                dry_run,
                units: conversion
                    .units
                    .iter()
                    .map(|unit| UnitSummary {
                        namespace: &unit.namespace,
                        template: &unit.legacy_template,
                        qualifier: &unit.qualifier,
                    })
                    .collect(),
                files: &reports,
                skipped: &conversion.skipped,
            };
            let pretty = serde_json::to_string_pretty(&summary)
                .unwrap_or_else(|e| format!("serialization error: {}", e));
            println!("{}", pretty);
        }
        OutputFormat::Text => {
            for report in &reports {
                if report.status != Status::Unchanged {
                    println!("{} {}", report.status.label(dry_run), report.path.display());
                }
            }
            for skipped in &conversion.skipped {
                println!("skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            let count = |status: Status| reports.iter().filter(|r| r.status == status).count();
            println!(
                "{} template unit(s): {} file(s) written, {} removed, {} unchanged, {} source(s) skipped",
                conversion.units.len(),
                count(Status::Written),
                count(Status::Removed),
                count(Status::Unchanged),
                conversion.skipped.len()
            );
        }
    }
}
