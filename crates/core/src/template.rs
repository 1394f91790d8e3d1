//! Per-template finalization of a rewritten batch.
//!
//! Every `(namespace, template)` group becomes one [`TemplateUnit`], the
//! input of both output renderers. Records collected without a template
//! only survive as shared tax groups of their namespace.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

use crate::catalog::TranslationCatalog;
use crate::error::Result;
use crate::mapping::MappingTable;
use crate::merge::{Batch, KindMap};
use crate::record::{Field, Record, CHART_TEMPLATE_KIND};

pub const TAX_GROUP_KIND: &str = "account.tax.group";

/// Kinds whose `name` is translated.
pub const TRANSLATED_KINDS: &[&str] = &[
    "account.account",
    "account.group",
    TAX_GROUP_KIND,
    "account.tax",
    "account.fiscal.position",
    "account.reconcile.model",
];

const TAX_GROUP_PROPERTIES: &[&str] = &[
    "property_tax_receivable_account_id",
    "property_tax_payable_account_id",
    "property_advance_tax_payment_account_id",
];

/// The finalized records of one chart template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateUnit {
    pub namespace: String,
    /// Qualified legacy template id.
    pub legacy_template: String,
    /// Short name used for every output of the unit.
    pub qualifier: String,
    pub records: KindMap,
}

impl TemplateUnit {
    pub fn records<'a>(&'a self, kind: &str) -> impl Iterator<Item = &'a Record> {
        self.records
            .get(kind)
            .into_iter()
            .flat_map(|records| records.values())
    }
}

/// Turn every templated group of `batch` into a [`TemplateUnit`].
pub fn finalize(
    batch: Batch,
    mapping: &MappingTable,
    catalogs: &HashMap<String, TranslationCatalog>,
) -> Result<Vec<TemplateUnit>> {
    let groups = batch.into_groups();

    let mut shared_tax_groups: HashMap<&str, &IndexMap<String, Record>> = HashMap::new();
    for (key, kinds) in &groups {
        if key.template.is_some() {
            continue;
        }
        if let Some(tax_groups) = kinds.get(TAX_GROUP_KIND) {
            shared_tax_groups.insert(&key.namespace, tax_groups);
        }
        let stray: Vec<&str> = kinds
            .iter()
            .filter(|(kind, records)| kind.as_str() != TAX_GROUP_KIND && !records.is_empty())
            .map(|(kind, _)| kind.as_str())
            .collect();
        if !stray.is_empty() {
            warn!(namespace = %key.namespace, kinds = ?stray, "records without a chart template are not converted");
        }
    }

    let mut units = Vec::new();
    for (key, kinds) in &groups {
        let Some(legacy_template) = &key.template else {
            continue;
        };
        let qualifier = mapping.qualifier(legacy_template)?.to_owned();
        let mut records = kinds.clone();

        if let Some(shared) = shared_tax_groups.get(key.namespace.as_str()) {
            let tax_groups = records.entry(TAX_GROUP_KIND.to_owned()).or_default();
            for (id, tax_group) in shared.iter() {
                tax_groups.entry(id.clone()).or_insert_with(|| tax_group.clone());
            }
        }
        if let Some(catalog) = catalogs.get(&key.namespace) {
            translate(&mut records, catalog);
        }
        move_tax_group_properties(&mut records);

        units.push(TemplateUnit {
            namespace: key.namespace.clone(),
            legacy_template: legacy_template.clone(),
            qualifier,
            records,
        });
    }
    Ok(units)
}

fn translate(records: &mut KindMap, catalog: &TranslationCatalog) {
    for kind in TRANSLATED_KINDS {
        let Some(of_kind) = records.get_mut(*kind) else {
            continue;
        };
        for record in of_kind.values_mut() {
            let Some(name) = record.value("name").and_then(|v| v.as_text()).map(str::to_owned) else {
                continue;
            };
            let Some(translations) = catalog.translations(&name) else {
                continue;
            };
            for (locale, translated) in translations {
                record.insert(Field::text(format!("name@{}", locale), translated));
            }
        }
    }
}

fn move_tax_group_properties(records: &mut KindMap) {
    if let Some(tax_groups) = records.get_mut(TAX_GROUP_KIND) {
        for tax_group in tax_groups.values_mut() {
            for property in TAX_GROUP_PROPERTIES {
                if let Some(mut field) = tax_group.remove(property) {
                    field.id = stripped(property).to_owned();
                    tax_group.insert(field);
                }
            }
        }
    }

    let mut defaults = Vec::new();
    if let Some(charts) = records.get_mut(CHART_TEMPLATE_KIND) {
        for chart in charts.values_mut() {
            for property in TAX_GROUP_PROPERTIES {
                if !chart.has_live(property) {
                    continue;
                }
                if let Some(target) = chart.value(property).and_then(|v| v.id_text()) {
                    defaults.push((stripped(property), target));
                }
                chart.delete(property);
            }
        }
    }

    if let Some(tax_groups) = records.get_mut(TAX_GROUP_KIND) {
        for (name, target) in &defaults {
            for tax_group in tax_groups.values_mut() {
                if !tax_group.has_live(name) {
                    tax_group.insert(Field::reference(*name, target));
                }
            }
        }
    }
}

fn stripped(property: &str) -> &str {
    property.strip_prefix("property_").unwrap_or(property)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Context;
    use crate::value::Value;
    use crate::MigrateError;

    fn record(kind: &str, id: &str, template: Option<&str>, fields: &[(&str, &str)]) -> Record {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let mut record = Record::new(kind, id, "l10n_be");
        if let Some(template) = template {
            record.template = Some(template.to_owned());
        }
        for (name, text) in fields {
            record.append(Field::text(*name, text), &ctx).unwrap();
        }
        record
    }

    fn mapping() -> MappingTable {
        [("l10n_be.be_chart", "be")].into_iter().collect()
    }

    #[test]
    fn units_need_a_mapped_qualifier() {
        let mut batch = Batch::new();
        batch.collect(record("account.account", "a1", Some("other_chart"), &[("code", "1")]));
        let err = finalize(batch, &mapping(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, MigrateError::UnknownQualifier(ref id) if id == "l10n_be.other_chart"));
    }

    #[test]
    fn shared_tax_groups_join_every_unit() {
        let mut batch = Batch::new();
        batch.collect(record(TAX_GROUP_KIND, "tg_21", None, &[("name", "VAT 21%")]));
        batch.collect(record("account.account", "a1", Some("be_chart"), &[("code", "1")]));
        let units = finalize(batch, &mapping(), &HashMap::new()).unwrap();

        assert_eq!(units.len(), 1);
        let unit = &units[0];
        assert_eq!(unit.qualifier, "be");
        assert_eq!(unit.legacy_template, "l10n_be.be_chart");
        let names: Vec<&str> = unit.records(TAX_GROUP_KIND).map(|r| r.id.as_str()).collect();
        assert_eq!(names, vec!["tg_21"]);
    }

    #[test]
    fn names_are_translated_per_locale() {
        let mut catalog = TranslationCatalog::new();
        catalog.insert("Cash", "nl", "Kas");
        catalog.insert("Cash", "fr", "Caisse");
        let catalogs = HashMap::from([("l10n_be".to_owned(), catalog)]);

        let mut batch = Batch::new();
        batch.collect(record("account.account", "a1", Some("be_chart"), &[("name", "Cash")]));
        batch.collect(record("account.account", "a2", Some("be_chart"), &[("code", "2")]));
        let units = finalize(batch, &mapping(), &catalogs).unwrap();

        let accounts: Vec<&Record> = units[0].records("account.account").collect();
        let fields: Vec<(&str, &Value)> = accounts[0].live_fields().collect();
        assert_eq!(
            fields,
            vec![
                ("name", &Value::Str("Cash".into())),
                ("name@fr", &Value::Str("Caisse".into())),
                ("name@nl", &Value::Str("Kas".into())),
            ]
        );
        assert_eq!(accounts[1].live_fields().count(), 1);
    }

    #[test]
    fn tax_group_properties_move_from_the_chart_template() {
        let mut batch = Batch::new();
        batch.collect(record(
            TAX_GROUP_KIND,
            "tg_21",
            Some("be_chart"),
            &[("property_tax_payable_account_id", "a451"), ("name", "VAT 21%")],
        ));
        batch.collect(record(TAX_GROUP_KIND, "tg_6", Some("be_chart"), &[("name", "VAT 6%")]));
        batch.collect(record(
            CHART_TEMPLATE_KIND,
            "be_chart",
            None,
            &[
                ("property_tax_payable_account_id", "a4512"),
                ("property_tax_receivable_account_id", "a411"),
            ],
        ));
        let units = finalize(batch, &mapping(), &HashMap::new()).unwrap();
        let unit = &units[0];

        let groups: Vec<&Record> = unit.records(TAX_GROUP_KIND).collect();
        let ids: Vec<&str> = groups[0].live_fields().map(|(id, _)| id).collect();
        assert_eq!(
            ids,
            vec!["name", "tax_payable_account_id", "tax_receivable_account_id"]
        );
        assert_eq!(
            groups[0].value("tax_payable_account_id"),
            Some(&Value::Str("a451".into()))
        );
        assert_eq!(
            groups[1].value("tax_payable_account_id"),
            Some(&Value::Ref("a4512".into()))
        );

        let chart = unit.records(CHART_TEMPLATE_KIND).next().unwrap();
        assert!(chart.is_empty());
    }
}
