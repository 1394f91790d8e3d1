//! Record kind registry and per-kind field normalization.
//!
//! Each declared kind maps to a [`Variant`]: a static strategy entry with
//! an optional parent and a rule function. [`Variant::cleanup`] runs the
//! parent chain root-first, then the variant's own rules, so every kind
//! inherits the base rules. Kinds without an entry use [`BASE`].
//!
//! The table is built once on first use; there is no runtime discovery.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{MigrateError, Result};
use crate::mapping::MappingTable;
use crate::record::{Field, Record};
use crate::resolve::{qualify, unqualify};
use crate::value::{Edge, Payload, Value};

/// Read-only collaborators the rules consult.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub mapping: &'a MappingTable,
}

type Rules = fn(&mut Record, &mut Field, &Context<'_>) -> Result<()>;

/// Normalization behavior of one record kind.
pub struct Variant {
    pub name: &'static str,
    /// Declared kind name the variant is registered under.
    pub kind: &'static str,
    parent: Option<&'static Variant>,
    rules: Rules,
    /// Field ids whose relation edges concatenate across appends.
    accumulate: &'static [&'static str],
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Variant {
    /// Normalize `field` for a record of this kind.
    pub fn cleanup(&self, record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
        if let Some(parent) = self.parent {
            parent.cleanup(record, field, ctx)?;
        }
        (self.rules)(record, field, ctx)
    }

    pub fn accumulates(&self, field_id: &str) -> bool {
        self.accumulate.contains(&field_id)
    }
}

// ── Variant table ──────────────────────────────────────────────────────────

pub static BASE: Variant = Variant {
    name: "Record",
    kind: "",
    parent: None,
    rules: base_rules,
    accumulate: &[],
};

pub static TEMPLATE_DATA: Variant = Variant {
    name: "TemplateData",
    kind: "account.chart.template",
    parent: Some(&BASE),
    rules: template_data_rules,
    accumulate: &[],
};

static RECONCILE_MODEL: Variant = Variant {
    name: "AccountReconcileModel",
    kind: "account.reconcile.model.template",
    parent: Some(&BASE),
    rules: no_rules,
    accumulate: &[],
};

static RECONCILE_MODEL_LINE: Variant = Variant {
    name: "AccountReconcileModelLine",
    kind: "account.reconcile.model.line.template",
    parent: Some(&BASE),
    rules: reconcile_model_line_rules,
    accumulate: &[],
};

static RES_COMPANY: Variant = Variant {
    name: "ResCompany",
    kind: "res.company",
    parent: Some(&BASE),
    rules: no_rules,
    accumulate: &[],
};

static COUNTRY_GROUP: Variant = Variant {
    name: "ResCountryGroup",
    kind: "res.country.group",
    parent: Some(&BASE),
    rules: country_group_rules,
    accumulate: &[],
};

pub static ACCOUNT_TAX: Variant = Variant {
    name: "AccountTax",
    kind: "account.tax.template",
    parent: Some(&BASE),
    rules: account_tax_rules,
    accumulate: &["repartition_line_ids"],
};

pub static TAX_REPARTITION_LINE: Variant = Variant {
    name: "AccountTaxRepartitionLine",
    kind: "account.tax.repartition.line",
    parent: Some(&BASE),
    rules: repartition_line_rules,
    accumulate: &[],
};

static FISCAL_POSITION: Variant = Variant {
    name: "AccountFiscalPosition",
    kind: "account.fiscal.position",
    parent: Some(&BASE),
    rules: fiscal_position_rules,
    accumulate: &[],
};

static FISCAL_POSITION_TEMPLATE: Variant = Variant {
    name: "AccountFiscalPositionTemplate",
    kind: "account.fiscal.position.template",
    parent: Some(&FISCAL_POSITION),
    rules: no_rules,
    accumulate: &[],
};

static ACCOUNT: Variant = Variant {
    name: "AccountAccount",
    kind: "account.account",
    parent: Some(&BASE),
    rules: account_rules,
    accumulate: &[],
};

static ACCOUNT_TEMPLATE: Variant = Variant {
    name: "AccountAccountTemplate",
    kind: "account.account.template",
    parent: Some(&ACCOUNT),
    rules: no_rules,
    accumulate: &[],
};

static ACCOUNT_GROUP: Variant = Variant {
    name: "AccountGroup",
    kind: "account.group",
    parent: Some(&BASE),
    rules: no_rules,
    accumulate: &[],
};

static ACCOUNT_GROUP_TEMPLATE: Variant = Variant {
    name: "AccountGroupTemplate",
    kind: "account.group.template",
    parent: Some(&ACCOUNT),
    rules: no_rules,
    accumulate: &[],
};

static TAX_GROUP: Variant = Variant {
    name: "AccountTaxGroup",
    kind: "account.tax.group",
    parent: Some(&BASE),
    rules: no_rules,
    accumulate: &[],
};

static FISCAL_POSITION_TAX: Variant = Variant {
    name: "AccountFiscalPositionTaxTemplate",
    kind: "account.fiscal.position.tax.template",
    parent: Some(&BASE),
    rules: fiscal_position_tax_rules,
    accumulate: &[],
};

static FISCAL_POSITION_ACCOUNT: Variant = Variant {
    name: "AccountFiscalPositionAccountTemplate",
    kind: "account.fiscal.position.account.template",
    parent: Some(&BASE),
    rules: fiscal_position_account_rules,
    accumulate: &[],
};

static REPORT: Variant = Variant {
    name: "AccountReport",
    kind: "account.report",
    parent: Some(&BASE),
    rules: report_rules,
    accumulate: &[],
};

static REPORT_LINE: Variant = Variant {
    name: "AccountReportLine",
    kind: "account.report.line",
    parent: Some(&BASE),
    rules: no_rules,
    accumulate: &[],
};

static REPORT_EXPRESSION: Variant = Variant {
    name: "AccountReportExpression",
    kind: "account.report.expression",
    parent: Some(&BASE),
    rules: no_rules,
    accumulate: &[],
};

static VARIANTS: &[&Variant] = &[
    &TEMPLATE_DATA,
    &RECONCILE_MODEL,
    &RECONCILE_MODEL_LINE,
    &RES_COMPANY,
    &COUNTRY_GROUP,
    &ACCOUNT_TAX,
    &TAX_REPARTITION_LINE,
    &FISCAL_POSITION,
    &FISCAL_POSITION_TEMPLATE,
    &ACCOUNT,
    &ACCOUNT_TEMPLATE,
    &ACCOUNT_GROUP,
    &ACCOUNT_GROUP_TEMPLATE,
    &TAX_GROUP,
    &FISCAL_POSITION_TAX,
    &FISCAL_POSITION_ACCOUNT,
    &REPORT,
    &REPORT_LINE,
    &REPORT_EXPRESSION,
];

static REGISTRY: LazyLock<HashMap<&'static str, &'static Variant>> =
    LazyLock::new(|| VARIANTS.iter().map(|v| (v.kind, *v)).collect());

/// The variant registered for `kind`, or the base variant.
pub fn variant_for(kind: &str) -> &'static Variant {
    REGISTRY.get(kind).copied().unwrap_or(&BASE)
}

pub fn is_registered(kind: &str) -> bool {
    REGISTRY.contains_key(kind)
}

// ── Rules ──────────────────────────────────────────────────────────────────

fn no_rules(_: &mut Record, _: &mut Field, _: &Context<'_>) -> Result<()> {
    Ok(())
}

fn base_rules(record: &mut Record, field: &mut Field, _ctx: &Context<'_>) -> Result<()> {
    if let Value::Str(text) = &field.value {
        if text.eq_ignore_ascii_case("true") {
            field.value = Value::Bool(true);
        } else if text.eq_ignore_ascii_case("false") {
            field.value = Value::Bool(false);
        } else if text == "None" {
            field.value = Value::Null;
            return Ok(());
        }
    }

    match field.id.as_str() {
        "sequence" => field.value = to_int(&field.id, &field.value)?,
        "amount" => field.value = to_float(&field.id, &field.value)?,
        "default_pos_receivable_account_id" => {
            field.id = "account_default_pos_receivable_account_id".to_owned();
        }
        "chart_template_id" => {
            if let Some(template) = field.value.id_text() {
                record.template = Some(template);
            }
            field.deleted = true;
        }
        "note" | "nocreate" | "id" => field.deleted = true,
        _ => {}
    }
    Ok(())
}

fn template_data_rules(record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
    match field.id.as_str() {
        "spoken_languages" | "currency_id" => field.deleted = true,
        "parent_id" => {
            field.id = "parent".to_owned();
            if let Some(parent) = field.value.id_text() {
                let legacy = qualify(&parent, &record.namespace);
                field.value = Value::Str(ctx.mapping.qualifier(&legacy)?.to_owned());
            }
        }
        "name" => {
            // Two-letter qualifiers name country charts, whose label comes
            // from the country itself.
            if let Some(template) = &record.template {
                if ctx.mapping.qualifier(template)?.chars().count() == 2 {
                    field.deleted = true;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn reconcile_model_line_rules(record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
    if field.id == "tax_ids" {
        cleanup_o2m(&record.namespace, field, Some(&ACCOUNT_TAX), ctx)?;
    }
    Ok(())
}

fn country_group_rules(record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
    if field.id == "country_ids" {
        cleanup_o2m(&record.namespace, field, None, ctx)?;
    }
    Ok(())
}

fn account_tax_rules(record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
    match field.id.as_str() {
        id if id.ends_with("_id") => unqualify_value(field),
        "invoice_repartition_line_ids" | "refund_repartition_line_ids" => {
            let document_type = if field.id.starts_with("invoice") {
                "invoice"
            } else {
                "refund"
            };
            cleanup_o2m(&record.namespace, field, Some(&TAX_REPARTITION_LINE), ctx)?;
            field.id = "repartition_line_ids".to_owned();
            if let Value::Relation(edges) = &mut field.value {
                for line in edges
                    .iter_mut()
                    .filter_map(Edge::payload_mut)
                    .filter_map(Payload::as_record_mut)
                {
                    line.insert(Field::text("document_type", document_type));
                }
            }
        }
        "children_tax_ids" => cleanup_o2m(&record.namespace, field, Some(&ACCOUNT_TAX), ctx)?,
        "price_include" => field.value = Value::Bool(field.value.truthy()),
        _ => {}
    }
    Ok(())
}

fn repartition_line_rules(record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
    match field.id.as_str() {
        "account_id" if field.value.truthy() => unqualify_value(field),
        "plus_report_expression_ids" | "minus_report_expression_ids" => {
            field.value = Value::List(field.value.id_list().into_iter().map(Value::Str).collect());
        }
        "tag_ids" => cleanup_o2m(&record.namespace, field, None, ctx)?,
        _ => {}
    }
    Ok(())
}

fn fiscal_position_rules(_record: &mut Record, field: &mut Field, _ctx: &Context<'_>) -> Result<()> {
    if field.value.is_null() {
        field.deleted = true;
        return Ok(());
    }
    match field.id.as_str() {
        "country_id" | "country_group_id" => {
            if let Some(id) = field.value.id_text() {
                field.value = Value::Ref(id);
            }
        }
        "vat_required" | "auto_apply" => field.value = to_int(&field.id, &field.value)?,
        _ => {}
    }
    Ok(())
}

fn account_rules(record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
    match field.id.as_str() {
        "tax_ids" => cleanup_o2m(&record.namespace, field, Some(&ACCOUNT_TAX), ctx),
        "tag_ids" => cleanup_o2m(&record.namespace, field, None, ctx),
        _ => Ok(()),
    }
}

fn fiscal_position_tax_rules(_: &mut Record, field: &mut Field, _: &Context<'_>) -> Result<()> {
    if matches!(field.id.as_str(), "position_id" | "tax_src_id" | "tax_dest_id") {
        unqualify_value(field);
    }
    Ok(())
}

fn fiscal_position_account_rules(_: &mut Record, field: &mut Field, _: &Context<'_>) -> Result<()> {
    if matches!(
        field.id.as_str(),
        "position_id" | "account_src_id" | "account_dest_id"
    ) {
        unqualify_value(field);
    }
    Ok(())
}

fn report_rules(record: &mut Record, field: &mut Field, ctx: &Context<'_>) -> Result<()> {
    if field.id == "line_ids" {
        cleanup_o2m(&record.namespace, field, None, ctx)?;
    }
    Ok(())
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Replace an identifier-like value by its bare, unqualified id text.
fn unqualify_value(field: &mut Field) {
    if let Some(id) = field.value.id_text() {
        field.value = Value::Str(unqualify(&id).to_owned());
    }
}

fn to_int(field: &str, value: &Value) -> Result<Value> {
    let coerced = match value {
        Value::Null => Some(0),
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::Str(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    coerced.map(Value::Int).ok_or_else(|| coercion(field, value, "integer"))
}

fn to_float(field: &str, value: &Value) -> Result<Value> {
    let coerced = match value {
        Value::Null => return Ok(Value::Null),
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Str(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    coerced.map(Value::Float).ok_or_else(|| coercion(field, value, "float"))
}

fn coercion(field: &str, value: &Value, target: &'static str) -> MigrateError {
    MigrateError::Coercion {
        field: field.to_owned(),
        value: value.id_text().unwrap_or_else(|| format!("{:?}", value)),
        target,
    }
}

/// Normalize a one-to-many field value.
///
/// Plain id lists become a single replace-all edge, comma-joined text is
/// qualified element-wise, and edge sequences lose their `Clear` edges.
/// With a `satellite` variant, inline map payloads are rebuilt as records
/// of that kind and replace-all ids are unqualified.
pub fn cleanup_o2m(
    namespace: &str,
    field: &mut Field,
    satellite: Option<&'static Variant>,
    ctx: &Context<'_>,
) -> Result<()> {
    let value = std::mem::replace(&mut field.value, Value::Null);
    field.value = match value {
        Value::List(items) | Value::Tuple(items)
            if matches!(items.first(), Some(Value::Str(_) | Value::Ref(_))) =>
        {
            let ids = items
                .iter()
                .filter_map(Value::id_text)
                .filter(|id| !id.is_empty())
                .map(|id| qualify(&id, namespace))
                .collect();
            Value::Relation(vec![Edge::ReplaceAll { ids }])
        }
        Value::Str(text) => Value::Str(
            text.split(',')
                .filter(|id| !id.is_empty())
                .map(|id| qualify(id, namespace))
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Relation(edges) => Value::Relation(
            edges
                .into_iter()
                .filter(|edge| !matches!(edge, Edge::Clear))
                .map(|edge| normalize_edge(edge, namespace, satellite, ctx))
                .collect::<Result<Vec<_>>>()?,
        ),
        other => other,
    };
    Ok(())
}

fn normalize_edge(
    edge: Edge,
    namespace: &str,
    satellite: Option<&'static Variant>,
    ctx: &Context<'_>,
) -> Result<Edge> {
    Ok(match (edge, satellite) {
        (
            Edge::Create {
                payload: Payload::Map(map),
            },
            Some(variant),
        ) => {
            let mut sub = Record::new(variant.kind, "", namespace);
            for (key, value) in map {
                sub.append(Field::evaluated(key, value.without_refs()), ctx)?;
            }
            Edge::Create {
                payload: Payload::Record(Box::new(sub)),
            }
        }
        (Edge::ReplaceAll { ids }, Some(_)) => Edge::ReplaceAll {
            ids: ids.iter().map(|id| unqualify(id).to_owned()).collect(),
        },
        (Edge::ReplaceAll { ids }, None) => Edge::ReplaceAll {
            ids: ids.iter().map(|id| qualify(id, namespace)).collect(),
        },
        (Edge::Link { id }, _) => Edge::Link {
            id: qualify(&id, namespace),
        },
        (edge, _) => edge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;

    fn eval_field(id: &str, src: &str) -> Field {
        Field::evaluated(id, expr::evaluate(src).unwrap())
    }

    #[test]
    fn lookup_falls_back_to_base() {
        assert_eq!(variant_for("account.tax.template").name, "AccountTax");
        assert_eq!(variant_for("res.partner").name, "Record");
        assert!(is_registered("account.fiscal.position.tax.template"));
        assert!(!is_registered("account.fiscal.position.tax"));
    }

    #[test]
    fn numeric_fields_are_coerced() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut record = Record::new("account.tax.template", "t", "mod");
        record.append(Field::text("sequence", "10"), &ctx).unwrap();
        record.append(Field::text("amount", "21"), &ctx).unwrap();
        assert_eq!(record.value("sequence"), Some(&Value::Int(10)));
        assert_eq!(record.value("amount"), Some(&Value::Float(21.0)));

        let err = record.append(Field::text("amount", "twenty"), &ctx).unwrap_err();
        assert!(matches!(err, MigrateError::Coercion { ref field, .. } if field == "amount"));
    }

    #[test]
    fn chart_template_reference_sets_template() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut record = Record::new("account.account.template", "a", "mod");
        record
            .append(Field::reference("chart_template_id", "mod.chart"), &ctx)
            .unwrap();
        assert_eq!(record.template.as_deref(), Some("mod.chart"));
        assert!(!record.has_live("chart_template_id"));
    }

    #[test]
    fn tax_repartition_lines_accumulate_with_document_type() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut tax = Record::new("account.tax.template", "vat21", "l10n_be");
        tax.append(
            eval_field(
                "invoice_repartition_line_ids",
                "[(5, 0, 0), (0, 0, {'repartition_type': 'base', 'plus_report_expression_ids': [ref('tag_01')]}), \
                 (0, 0, {'repartition_type': 'tax', 'account_id': ref('l10n_be.a451')})]",
            ),
            &ctx,
        )
        .unwrap();
        tax.append(
            eval_field(
                "refund_repartition_line_ids",
                "[Command.create({'repartition_type': 'base'})]",
            ),
            &ctx,
        )
        .unwrap();

        let edges = match tax.value("repartition_line_ids") {
            Some(Value::Relation(edges)) => edges,
            other => panic!("expected relation, got {:?}", other),
        };
        assert_eq!(edges.len(), 3);
        let lines: Vec<&Record> = edges
            .iter()
            .filter_map(|e| e.payload().and_then(Payload::as_record))
            .collect();
        assert_eq!(lines[0].value("document_type"), Some(&Value::Str("invoice".into())));
        assert_eq!(lines[2].value("document_type"), Some(&Value::Str("refund".into())));
        assert_eq!(
            lines[0].value("plus_report_expression_ids"),
            Some(&Value::List(vec![Value::Str("tag_01".into())]))
        );
        assert_eq!(lines[1].value("account_id"), Some(&Value::Str("a451".into())));
        assert_eq!(lines[0].kind, "account.tax.repartition.line");
    }

    #[test]
    fn tax_id_fields_are_unqualified() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut tax = Record::new("account.tax.template", "vat21", "l10n_be");
        tax.append(Field::reference("tax_group_id", "l10n_be.tax_group_21"), &ctx)
            .unwrap();
        tax.append(Field::text("price_include", "1"), &ctx).unwrap();
        assert_eq!(tax.value("tax_group_id"), Some(&Value::Str("tax_group_21".into())));
        assert_eq!(tax.value("price_include"), Some(&Value::Bool(true)));
    }

    #[test]
    fn fiscal_position_rules_apply_to_template_kind() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut fpos = Record::new("account.fiscal.position.template", "fp", "mod");
        fpos.append(Field::text("country_id", "base.be"), &ctx).unwrap();
        fpos.append(Field::text("auto_apply", "1"), &ctx).unwrap();
        fpos.append(Field::text("vat_required", "True"), &ctx).unwrap();
        fpos.append(Field::text("note", ""), &ctx).unwrap();
        assert_eq!(fpos.value("country_id"), Some(&Value::Ref("base.be".into())));
        assert_eq!(fpos.value("auto_apply"), Some(&Value::Int(1)));
        assert_eq!(fpos.value("vat_required"), Some(&Value::Int(1)));
        assert!(fpos.field("note").unwrap().deleted);
    }

    #[test]
    fn id_lists_become_replace_all() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut account = Record::new("account.account.template", "a", "mod");
        account
            .append(eval_field("tag_ids", "[ref('tag_a'), ref('other.tag_b')]"), &ctx)
            .unwrap();
        account
            .append(eval_field("tax_ids", "[(6, 0, [ref('mod.vat21')])]"), &ctx)
            .unwrap();
        assert_eq!(
            account.value("tag_ids"),
            Some(&Value::Relation(vec![Edge::ReplaceAll {
                ids: vec!["mod.tag_a".into(), "other.tag_b".into()]
            }]))
        );
        assert_eq!(
            account.value("tax_ids"),
            Some(&Value::Relation(vec![Edge::ReplaceAll {
                ids: vec!["vat21".into()]
            }]))
        );
    }

    #[test]
    fn comma_joined_ids_are_qualified() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut group = Record::new("res.country.group", "eu", "mod");
        group
            .append(Field::text("country_ids", "base.be,nl,,fr"), &ctx)
            .unwrap();
        assert_eq!(
            group.value("country_ids"),
            Some(&Value::Str("base.be,mod.nl,mod.fr".into()))
        );
    }

    #[test]
    fn template_data_maps_parent_and_drops_country_name() {
        let mapping: MappingTable = [("mod.chart", "be"), ("mod.generic", "generic_coa")]
            .into_iter()
            .collect();
        let ctx = Context { mapping: &mapping };
        let mut chart = Record::new("account.chart.template", "chart", "mod");
        chart.append(Field::text("parent_id", "generic"), &ctx).unwrap();
        chart.append(Field::text("name", "Belgian PCMN"), &ctx).unwrap();
        chart.append(Field::reference("currency_id", "base.EUR"), &ctx).unwrap();
        assert_eq!(chart.value("parent"), Some(&Value::Str("generic_coa".into())));
        assert!(chart.field("name").unwrap().deleted);
        assert!(chart.field("currency_id").unwrap().deleted);

        let mut unmapped = Record::new("account.chart.template", "other", "mod");
        let err = unmapped
            .append(Field::text("name", "x"), &ctx)
            .unwrap_err();
        assert!(matches!(err, MigrateError::UnknownQualifier(_)));
    }
}
