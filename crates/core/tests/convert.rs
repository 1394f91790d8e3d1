//! End-to-end conversion of a small in-memory addons tree.

use std::path::PathBuf;

use chartmig_core::tabular;
use chartmig_core::{
    convert, load, Conversion, InMemoryProvider, MappingTable, MigrateError, SourceChange, Value,
};

const CHART: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<odoo>
    <record id="be_chart" model="account.chart.template">
        <field name="name">Belgian chart</field>
        <field name="code_digits">6</field>
        <field name="property_account_receivable_id" ref="a400"/>
        <field name="property_tax_payable_account_id" ref="a451"/>
        <field name="country_id" ref="base.be"/>
        <field name="bank_account_code_prefix">550</field>
    </record>
</odoo>
"#;

const ACCOUNTS: &str = "\
\"id\",\"name\",\"code\",\"account_type\",\"chart_template_id:id\"
\"a400\",\"Customers\",\"400000\",\"asset_receivable\",\"be_chart\"
\"a451\",\"VAT payable\",\"451000\",\"liability_current\",\"be_chart\"
";

const TAX_GROUPS: &str = r#"<odoo>
    <record id="tax_group_21" model="account.tax.group">
        <field name="name">VAT 21%</field>
        <field name="sequence">10</field>
    </record>
</odoo>
"#;

const REPORT: &str = r#"<odoo>
    <record id="tax_report" model="account.report">
        <field name="name">Tax report</field>
        <field name="line_ids">
            <record id="line_03" model="account.report.line">
                <field name="name">03</field>
                <field name="expression_ids">
                    <record id="line_03_tag" model="account.report.expression">
                        <field name="engine">tax_tags</field>
                        <field name="formula">03</field>
                    </record>
                </field>
                <field name="children_ids">
                    <record id="line_54" model="account.report.line">
                        <field name="name">54</field>
                        <field name="expression_ids">
                            <record id="line_54_tag" model="account.report.expression">
                                <field name="engine">tax_tags</field>
                                <field name="formula">54</field>
                            </record>
                        </field>
                    </record>
                </field>
            </record>
        </field>
    </record>
</odoo>
"#;

const TAXES: &str = r#"<odoo>
    <record id="tax_21" model="account.tax.template">
        <field name="chart_template_id" ref="be_chart"/>
        <field name="name">21%</field>
        <field name="amount">21</field>
        <field name="tax_group_id" ref="tax_group_21"/>
        <field name="invoice_repartition_line_ids" eval="[(5, 0, 0),
            (0, 0, {'repartition_type': 'base', 'plus_report_expression_ids': [ref('line_03_tag')]}),
            (0, 0, {'repartition_type': 'tax', 'account_id': ref('a451'), 'plus_report_expression_ids': [ref('line_54_tag')]}),
        ]"/>
        <field name="refund_repartition_line_ids" eval="[(5, 0, 0),
            (0, 0, {'repartition_type': 'base', 'minus_report_expression_ids': [ref('line_03_tag')]}),
        ]"/>
    </record>
</odoo>
"#;

const FISCAL_POSITIONS: &str = r#"<odoo>
    <record id="fp_intra" model="account.fiscal.position.template">
        <field name="chart_template_id" ref="be_chart"/>
        <field name="name">Intra-EU</field>
        <field name="auto_apply" eval="True"/>
    </record>
    <record id="fp_intra_tax" model="account.fiscal.position.tax.template">
        <field name="position_id" ref="fp_intra"/>
        <field name="tax_src_id" ref="tax_21"/>
    </record>
    <!-- kept: not a template model -->
    <record id="partner_vat" model="res.partner">
        <field name="name">Belgian administration</field>
    </record>
</odoo>
"#;

const PARTNERS: &str = r#"<odoo>
    <record id="partner_admin" model="res.partner">
        <field name="name">Administration</field>
    </record>
</odoo>
"#;

const FRENCH: &str = r#"msgid ""
msgstr ""

msgid "Customers"
msgstr "Clients"

msgid "Intra-EU"
msgstr "Intra-UE"
"#;

fn provider() -> InMemoryProvider {
    InMemoryProvider::new("l10n_")
        .with_file("l10n_be/data/account_chart_template_data.xml", CHART)
        .with_file("l10n_be/data/account.account.template.csv", ACCOUNTS)
        .with_file("l10n_be/data/account_tax_group_data.xml", TAX_GROUPS)
        .with_file("l10n_be/data/account_tax_report_data.xml", REPORT)
        .with_file("l10n_be/data/account_tax_template_data.xml", TAXES)
        .with_file("l10n_be/data/fiscal_position_data.xml", FISCAL_POSITIONS)
        .with_file("l10n_be/data/res_partner_data.xml", PARTNERS)
        .with_file("l10n_be/data/broken.xml", "<odoo><record id='x' model='res.partner'></odoo>")
        .with_file("l10n_be/i18n/fr.po", FRENCH)
}

fn mapping() -> MappingTable {
    [("l10n_be.be_chart", "be")].into_iter().collect()
}

fn run() -> Conversion {
    convert(&provider(), &mapping()).unwrap()
}

#[test]
fn one_unit_per_chart_template() {
    let conversion = run();
    assert_eq!(conversion.units.len(), 1);
    let unit = &conversion.units[0];
    assert_eq!(unit.namespace, "l10n_be");
    assert_eq!(unit.qualifier, "be");
    assert_eq!(unit.legacy_template, "l10n_be.be_chart");
    let kinds: Vec<&str> = unit.records.keys().map(String::as_str).collect();
    for kind in [
        "account.account",
        "account.chart.template",
        "account.tax",
        "account.fiscal.position",
        "res.company",
        "account.tax.group",
    ] {
        assert!(kinds.contains(&kind), "missing {} in {:?}", kind, kinds);
    }
}

#[test]
fn malformed_source_is_skipped_and_siblings_survive() {
    let conversion = run();
    assert_eq!(conversion.skipped.len(), 1);
    assert_eq!(conversion.skipped[0].path, PathBuf::from("l10n_be/data/broken.xml"));

    let touched: Vec<&PathBuf> = conversion
        .changes
        .iter()
        .map(|change| match change {
            SourceChange::Remove { path } | SourceChange::Rewrite { path, .. } => path,
        })
        .collect();
    assert!(!touched.contains(&&PathBuf::from("l10n_be/data/res_partner_data.xml")));
    assert!(!touched.contains(&&PathBuf::from("l10n_be/data/account_tax_report_data.xml")));
}

#[test]
fn emptied_documents_and_consumed_tables_are_removed() {
    let conversion = run();
    for path in [
        "l10n_be/data/account.account.template.csv",
        "l10n_be/data/account_chart_template_data.xml",
        "l10n_be/data/account_tax_group_data.xml",
        "l10n_be/data/account_tax_template_data.xml",
    ] {
        assert!(
            conversion.changes.contains(&SourceChange::Remove {
                path: PathBuf::from(path)
            }),
            "{} should be removed",
            path
        );
    }

    let rewritten = conversion
        .changes
        .iter()
        .find_map(|change| match change {
            SourceChange::Rewrite { path, text }
                if path == &PathBuf::from("l10n_be/data/fiscal_position_data.xml") =>
            {
                Some(text.as_str())
            }
            _ => None,
        })
        .unwrap();
    assert!(!rewritten.contains("fp_intra"));
    assert!(rewritten.contains("<!-- kept: not a template model -->"));
    assert!(rewritten.contains(r#"<record id="partner_vat" model="res.partner">"#));
}

#[test]
fn tax_tags_replace_expression_lists() {
    let conversion = run();
    let unit = &conversion.units[0];
    let csv = tabular::encode(unit.records("account.tax")).unwrap();
    let header = csv.lines().next().unwrap();
    assert!(header.starts_with("\"id\","));
    assert!(header.contains("\"repartition_line_ids/tag_ids\""));
    assert!(!header.contains("plus_report_expression_ids"));
    assert!(csv.contains("\"+03\""));
    assert!(csv.contains("\"+54\""));
    assert!(csv.contains("\"-03\""));
}

#[test]
fn company_settings_leave_the_chart_template() {
    let conversion = run();
    let unit = &conversion.units[0];
    let company = unit.records("res.company").next().unwrap();
    assert_eq!(
        company.value("account_fiscal_country_id"),
        Some(&Value::Ref("base.be".into()))
    );
    let chart = unit.records("account.chart.template").next().unwrap();
    assert!(!chart.has_live("country_id"));
    assert!(!chart.has_live("property_tax_payable_account_id"));
    assert_eq!(
        chart.value("property_account_receivable_id"),
        Some(&Value::Str("a400".into()))
    );

    let tax_group = unit.records("account.tax.group").next().unwrap();
    assert_eq!(
        tax_group.value("tax_payable_account_id"),
        Some(&Value::Ref("a451".into()))
    );
}

#[test]
fn translations_and_folds_reach_their_records() {
    let conversion = run();
    let unit = &conversion.units[0];

    let customers = unit
        .records("account.account")
        .find(|r| r.id == "a400")
        .unwrap();
    assert_eq!(customers.value("name@fr"), Some(&Value::Str("Clients".into())));

    let position = unit.records("account.fiscal.position").next().unwrap();
    assert_eq!(position.value("name@fr"), Some(&Value::Str("Intra-UE".into())));
    assert_eq!(position.value("auto_apply"), Some(&Value::Int(1)));
    match position.value("tax_ids") {
        Some(Value::Relation(edges)) => assert_eq!(edges.len(), 1),
        other => panic!("expected folded taxes, got {:?}", other),
    }
}

#[test]
fn unmapped_template_aborts_the_batch() {
    let err = convert(&provider(), &MappingTable::new()).unwrap_err();
    assert!(matches!(err, MigrateError::UnknownQualifier(ref id) if id == "l10n_be.be_chart"));
}

#[test]
fn demo_records_are_not_collected() {
    let provider = InMemoryProvider::new("l10n_").with_file(
        "l10n_be/demo/demo_company.xml",
        r#"<odoo><record id="demo_partner" model="res.partner"><field name="name">x</field></record></odoo>"#,
    );
    let loaded = load(&provider, &mapping()).unwrap();
    assert!(loaded.batch.is_empty());
    assert!(loaded.changes.is_empty());
}
