//! Cross-source merge of a batch and the ordered rewrite passes.
//!
//! Records from every source are collected into groups keyed by
//! `(namespace, template)`, then by kind and qualified id. Two records
//! with the same identity are merged field by field, later source wins.
//!
//! [`Batch::rewrite`] then runs, in order:
//!
//! 1. split-off of company settings from the chart template,
//! 2. tag aggregation from report lines onto tax repartition lines,
//! 3. fiscal position tax/account folds,
//! 4. reconcile model line fold.
//!
//! Each pass reads the output of the previous one.

use std::collections::HashMap;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::record::{Field, Record, CHART_TEMPLATE_KIND};
use crate::resolve::{qualify, unqualify};
use crate::value::{Edge, Payload, Value};

/// Records of one group: kind -> qualified id -> record.
pub type KindMap = IndexMap<String, IndexMap<String, Record>>;

pub const COMPANY_KIND: &str = "res.company";
/// Key of the company satellite record.
pub const COMPANY_ID: &str = "self.env.company.id";

/// Chart template fields that belong to the company.
const COMPANY_FIELDS: &[&str] = &[
    "country_id",
    "bank_account_code_prefix",
    "cash_account_code_prefix",
    "transfer_account_code_prefix",
    "default_pos_receivable_account_id",
    "account_default_pos_receivable_account_id",
    "income_currency_exchange_account_id",
    "expense_currency_exchange_account_id",
    "account_journal_suspense_account_id",
    "account_journal_early_pay_discount_loss_account_id",
    "account_journal_early_pay_discount_gain_account_id",
    "account_journal_payment_debit_account_id",
    "account_journal_payment_credit_account_id",
    "default_cash_difference_income_account_id",
    "default_cash_difference_expense_account_id",
];

static ACCOUNT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"account_.*id").expect("valid account field pattern"));

/// A satellite kind folded into a relation of its parent.
struct Fold {
    satellite: &'static str,
    back_reference: &'static str,
    parent: &'static str,
    relation: &'static str,
}

const FISCAL_POSITION_FOLDS: [Fold; 2] = [
    Fold {
        satellite: "account.fiscal.position.tax",
        back_reference: "position_id",
        parent: "account.fiscal.position",
        relation: "tax_ids",
    },
    Fold {
        satellite: "account.fiscal.position.account",
        back_reference: "position_id",
        parent: "account.fiscal.position",
        relation: "account_ids",
    },
];

const RECONCILE_MODEL_FOLD: Fold = Fold {
    satellite: "account.reconcile.model.line",
    back_reference: "model_id",
    parent: "account.reconcile.model",
    relation: "line_ids",
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupKey {
    pub namespace: String,
    /// Qualified legacy template id, if known.
    pub template: Option<String>,
}

impl GroupKey {
    pub fn new(namespace: impl Into<String>, template: Option<String>) -> Self {
        GroupKey {
            namespace: namespace.into(),
            template,
        }
    }
}

/// Kind under which a record is merged.
pub fn merged_kind(kind: &str) -> &str {
    if kind == CHART_TEMPLATE_KIND {
        kind
    } else {
        kind.strip_suffix(".template").unwrap_or(kind)
    }
}

/// The in-memory record graph of one batch.
#[derive(Debug, Default)]
pub struct Batch {
    groups: IndexMap<GroupKey, KindMap>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record to the graph, merging it with any record of the same
    /// identity.
    pub fn collect(&mut self, mut record: Record) {
        let id = qualify(&record.id, &record.namespace);
        let kind = merged_kind(&record.kind).to_owned();
        let namespace = record.namespace.clone();

        let template = match record.template.take() {
            Some(template) => {
                let template = qualify(&template, &namespace);
                let untemplated = GroupKey::new(namespace.clone(), None);
                let earlier = self
                    .groups
                    .get_mut(&untemplated)
                    .and_then(|kinds| kinds.get_mut(&kind))
                    .and_then(|records| records.shift_remove(&id));
                if let Some(mut earlier) = earlier {
                    debug!(%id, %template, "moving record into its template group");
                    earlier.template = Some(template.clone());
                    self.insert(
                        GroupKey::new(namespace.clone(), Some(template.clone())),
                        id.clone(),
                        earlier,
                    );
                }
                Some(template)
            }
            None => self
                .groups
                .iter()
                .find(|(key, kinds)| {
                    key.namespace == namespace
                        && kinds.get(&kind).is_some_and(|records| records.contains_key(&id))
                })
                .and_then(|(key, _)| key.template.clone()),
        };

        record.kind = kind;
        record.template = template.clone();
        self.insert(GroupKey::new(namespace, template), id, record);
    }

    fn insert(&mut self, key: GroupKey, id: String, record: Record) {
        let records = self
            .groups
            .entry(key)
            .or_default()
            .entry(record.kind.clone())
            .or_default();
        match records.get_mut(&id) {
            Some(existing) => existing.merge_from(record),
            None => {
                records.insert(id, record);
            }
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, &KindMap)> {
        self.groups.iter()
    }

    pub fn group(&self, key: &GroupKey) -> Option<&KindMap> {
        self.groups.get(key)
    }

    /// Records of `kind` in one group, in merge order.
    pub fn records<'a>(&'a self, key: &GroupKey, kind: &str) -> impl Iterator<Item = &'a Record> {
        self.groups
            .get(key)
            .and_then(|kinds| kinds.get(kind))
            .into_iter()
            .flat_map(|records| records.values())
    }

    pub fn into_groups(self) -> IndexMap<GroupKey, KindMap> {
        self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Run every rewrite pass in order.
    pub fn rewrite(&mut self) -> Result<()> {
        self.split_company();
        self.aggregate_tags()?;
        for fold in &FISCAL_POSITION_FOLDS {
            self.fold(fold)?;
        }
        self.fold(&RECONCILE_MODEL_FOLD)
    }

    // ── Split-off ────────────────────────────────────────────────────

    fn split_company(&mut self) {
        for (key, kinds) in self.groups.iter_mut() {
            let Some(charts) = kinds.get_mut(CHART_TEMPLATE_KIND) else {
                continue;
            };
            let mut company = Record::new(COMPANY_KIND, COMPANY_ID, key.namespace.as_str());
            company.template = key.template.clone();

            for chart in charts.values_mut() {
                chart.remove("id");
                for field in chart.fields_mut() {
                    if !ACCOUNT_FIELD.is_match(&field.id) {
                        continue;
                    }
                    if let Some(id) = field.value.id_text() {
                        field.value = Value::Str(unqualify(&id).to_owned());
                    }
                }
                for name in COMPANY_FIELDS {
                    if let Some(mut field) = chart.remove(name) {
                        if *name == "country_id" {
                            field.id = "account_fiscal_country_id".to_owned();
                        }
                        company.insert(field);
                    }
                }
            }

            if !company.is_empty() {
                debug!(namespace = %key.namespace, "split company settings off the chart template");
                kinds
                    .entry(COMPANY_KIND.to_owned())
                    .or_default()
                    .insert(COMPANY_ID.to_owned(), company);
            }
        }
    }

    // ── Tag aggregation ──────────────────────────────────────────────

    /// Qualified report expression id -> tag label, over every report
    /// line tree of the batch.
    pub fn tag_labels(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        for kinds in self.groups.values() {
            for report in kinds.get("account.report").into_iter().flat_map(|r| r.values()) {
                for line in created_records(report.value("line_ids")) {
                    collect_line_labels(line, &mut labels);
                }
            }
        }
        labels
    }

    fn aggregate_tags(&mut self) -> Result<()> {
        let labels = self.tag_labels();
        debug!(labels = labels.len(), "aggregating tax tags");
        for kinds in self.groups.values_mut() {
            let Some(taxes) = kinds.get_mut("account.tax") else {
                continue;
            };
            for tax in taxes.values_mut() {
                for field in tax.fields_mut() {
                    if field.deleted || !field.id.contains("repartition_line_ids") {
                        continue;
                    }
                    let Value::Relation(edges) = &mut field.value else {
                        continue;
                    };
                    for edge in edges.iter_mut() {
                        if let Edge::Create {
                            payload: Payload::Record(line),
                        } = edge
                        {
                            apply_tags(line, &labels)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ── Folds ────────────────────────────────────────────────────────

    fn fold(&mut self, fold: &Fold) -> Result<()> {
        let mut parents: HashMap<String, GroupKey> = HashMap::new();
        for (key, kinds) in &self.groups {
            for id in kinds.get(fold.parent).into_iter().flat_map(|r| r.keys()) {
                parents.insert(id.clone(), key.clone());
            }
        }

        let mut satellites = Vec::new();
        for (key, kinds) in self.groups.iter_mut() {
            if let Some(records) = kinds.shift_remove(fold.satellite) {
                satellites.extend(
                    records
                        .into_values()
                        .map(|record| (key.namespace.clone(), record)),
                );
            }
        }
        debug!(kind = fold.satellite, count = satellites.len(), "folding satellites");

        for (namespace, mut satellite) in satellites {
            let satellite_id = satellite.id.clone();
            let missing_field = || MigrateError::MissingField {
                kind: fold.satellite.to_owned(),
                id: satellite_id.clone(),
                field: fold.back_reference.to_owned(),
            };
            let back_reference = satellite
                .remove(fold.back_reference)
                .ok_or_else(missing_field)?;
            let parent_id = back_reference
                .original_value
                .id_text()
                .map(|id| qualify(&id, &namespace))
                .ok_or_else(missing_field)?;
            let missing_parent = || MigrateError::MissingIdentity {
                kind: fold.parent.to_owned(),
                id: parent_id.clone(),
            };
            let key = parents.get(&parent_id).ok_or_else(missing_parent)?;
            let parent = self
                .groups
                .get_mut(key)
                .and_then(|kinds| kinds.get_mut(fold.parent))
                .and_then(|records| records.get_mut(&parent_id))
                .ok_or_else(missing_parent)?;
            push_create(parent, fold.relation, satellite)?;
        }
        Ok(())
    }
}

/// Records carried by the `Create` edges of a relation value.
fn created_records(value: Option<&Value>) -> impl Iterator<Item = &Record> {
    let edges = match value {
        Some(Value::Relation(edges)) => edges.as_slice(),
        _ => &[],
    };
    edges
        .iter()
        .filter_map(|edge| edge.payload().and_then(Payload::as_record))
}

fn collect_line_labels(line: &Record, labels: &mut HashMap<String, String>) {
    for expression in created_records(line.value("expression_ids")) {
        if expression.id.is_empty() {
            continue;
        }
        if let Some(label) = expression.value("formula").and_then(Value::as_text) {
            labels.insert(qualify(&expression.id, &line.namespace), label.to_owned());
        }
    }
    for child in created_records(line.value("children_ids")) {
        collect_line_labels(child, labels);
    }
}

/// Replace the signed expression lists of a repartition line by its
/// `tag_ids` label string.
fn apply_tags(line: &mut Record, labels: &HashMap<String, String>) -> Result<()> {
    let namespace = line.namespace.clone();
    let mut tokens = Vec::new();
    for (name, sign) in [
        ("plus_report_expression_ids", '+'),
        ("minus_report_expression_ids", '-'),
    ] {
        let Some(field) = line.field_mut(name) else {
            continue;
        };
        if field.deleted {
            continue;
        }
        for id in field.value.id_list() {
            let id = qualify(&id, &namespace);
            let label = labels
                .get(&id)
                .ok_or_else(|| MigrateError::MissingIdentity {
                    kind: "account.report.expression".to_owned(),
                    id: id.clone(),
                })?;
            tokens.push(format!("{}{}", sign, label));
        }
        field.deleted = true;
    }
    if !tokens.is_empty() {
        line.insert(Field::unquoted("tag_ids", tokens.join("||")));
    }
    Ok(())
}

fn push_create(parent: &mut Record, relation: &str, satellite: Record) -> Result<()> {
    let parent_id = parent.id.clone();
    let edge = Edge::Create {
        payload: Payload::Record(Box::new(satellite)),
    };
    match parent.field_mut(relation) {
        Some(field) if !field.deleted => match &mut field.value {
            Value::Relation(edges) => edges.push(edge),
            value if !value.truthy() => *value = Value::Relation(vec![edge]),
            other => {
                return Err(MigrateError::Invariant(format!(
                    "field '{}' of '{}' is not a relation: {:?}",
                    relation, parent_id, other
                )))
            }
        },
        _ => parent.insert(Field::evaluated(relation, Value::Relation(vec![edge]))),
    }
    Ok(())
}
