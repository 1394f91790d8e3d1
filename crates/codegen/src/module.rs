//! Generator functions and the Python module of one template unit.

use serde::Serialize;

use chartmig_core::merge::COMPANY_KIND;
use chartmig_core::{Record, TemplateUnit, CHART_TEMPLATE_KIND};

use crate::literal::{indent, render_record};
use crate::CodegenError;

/// Kinds rendered as generator functions, with their function suffix.
pub const FUNCTIONS: &[(&str, &str)] = &[
    (CHART_TEMPLATE_KIND, "template_data"),
    (COMPANY_KIND, "res_company"),
    ("account.reconcile.model", "reconcile_model"),
    ("account.reconcile.model.line", "reconcile_model_line"),
    ("account.fiscal.position.tax", "fiscal_position_tax"),
    ("account.fiscal.position.account", "fiscal_position_account"),
];

/// Options of the generated module.
#[derive(Debug, Clone, Default)]
pub struct PythonConfig {
    /// First line(s) of every generated file, without trailing newline.
    pub header: String,
}

/// A rendered Python module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedModule {
    pub namespace: String,
    /// Module name to register with the namespace's `models` package.
    pub module_name: String,
    pub text: String,
}

impl GeneratedModule {
    /// Path of the module relative to its namespace directory.
    pub fn relative_path(&self) -> String {
        format!("models/{}.py", self.module_name)
    }

    /// The `(namespace, module)` pair that needs an import.
    pub fn registration(&self) -> (&str, &str) {
        (self.namespace.as_str(), self.module_name.as_str())
    }
}

fn check_qualifier(qualifier: &str) -> Result<(), CodegenError> {
    let valid = !qualifier.is_empty()
        && qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CodegenError::InvalidQualifier(qualifier.to_owned()))
    }
}

/// Render the generator function of `kind`, or `None` when the unit has no
/// records of that kind.
pub fn render_function(
    unit: &TemplateUnit,
    kind: &str,
    suffix: &str,
) -> Result<Option<String>, CodegenError> {
    check_qualifier(&unit.qualifier)?;
    let records: Vec<&Record> = unit.records(kind).collect();
    let Some(first) = records.first() else {
        return Ok(None);
    };
    let qualifier = &unit.qualifier;

    let (decorator, body) = if kind == CHART_TEMPLATE_KIND {
        (
            format!("@template('{}')\n", qualifier),
            format!("{}\n", render_record(first, 2)),
        )
    } else {
        let mut body = String::from("{\n");
        for record in &records {
            let key = if kind == COMPANY_KIND {
                record.id.clone()
            } else {
                format!("'{}'", record.id.replace('.', "_"))
            };
            body.push_str(&indent(3));
            body.push_str(&format!("{}: {},\n", key, render_record(record, 3)));
        }
        body.push_str(&indent(2));
        body.push_str("}\n");
        (format!("@template('{}', '{}')\n", qualifier, kind), body)
    };

    Ok(Some(format!(
        "{}{}{}def _get_{}_{}(self):\n{}return {}",
        indent(1),
        decorator,
        indent(1),
        qualifier,
        suffix,
        indent(2),
        body
    )))
}

/// Render the whole Python module of `unit`.
pub fn render_module(unit: &TemplateUnit, config: &PythonConfig) -> Result<GeneratedModule, CodegenError> {
    check_qualifier(&unit.qualifier)?;
    let mut functions = Vec::new();
    for (kind, suffix) in FUNCTIONS {
        if let Some(function) = render_function(unit, kind, suffix)? {
            functions.push(function);
        }
    }
    let content = functions.join("\n");

    let mut text = String::new();
    if !config.header.is_empty() {
        text.push_str(&config.header);
        text.push('\n');
    }
    text.push_str("from odoo import models");
    if content.contains("Command.") {
        text.push_str(", Command");
    }
    text.push('\n');
    text.push_str("from odoo.addons.account.models.chart_template import template\n");
    text.push_str("\n\n");
    text.push_str("class AccountChartTemplate(models.AbstractModel):\n");
    text.push_str(&indent(1));
    text.push_str("_inherit = 'account.chart.template'\n\n");
    text.push_str(&content);

    Ok(GeneratedModule {
        namespace: unit.namespace.clone(),
        module_name: format!("template_{}", unit.qualifier),
        text,
    })
}
