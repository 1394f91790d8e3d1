//! Tabular codec: comma-separated rows <-> Records.
//!
//! Cells are double-quote delimited with doubled internal quotes; rows are
//! separated by `\n` and blank lines are ignored. A compound column
//! `rel/sub` addresses field `sub` of the inline payloads held by relation
//! field `rel`. Rows whose `id` cell is empty continue the record above,
//! contributing one more edge to each compound relation.

use std::collections::HashSet;
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;

use crate::error::{MigrateError, Result};
use crate::record::{Field, Record};
use crate::registry::Context;
use crate::resolve::unqualify;
use crate::value::{format_float, Edge, Payload, Value};

/// Separator between a relation field and a payload field in a header.
pub const PATH_SEPARATOR: char = '/';
/// Separator between a field id and its locale tag (`name@fr_BE`).
pub const LOCALE_SEPARATOR: char = '@';

static REF_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ref\((.*)\)$").expect("reference cell pattern"));

/// How to interpret one tabular source.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions<'a> {
    /// Declared kind of every row.
    pub kind: &'a str,
    pub namespace: &'a str,
    /// Header names that carry each row's template.
    pub template_columns: &'a [&'a str],
    /// Keep the template column as a regular field.
    pub keep_template_column: bool,
}

// ── Grammar ────────────────────────────────────────────────────────────────

/// Split tabular text into rows of cells.
pub fn parse(source_name: &str, text: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut has_content = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cell.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                cell.push(c);
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                has_content = true;
            }
            ',' => {
                row.push(std::mem::take(&mut cell));
                has_content = true;
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut cell));
                if has_content {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
                has_content = false;
            }
            _ => {
                cell.push(c);
                has_content = true;
            }
        }
    }

    if in_quotes {
        return Err(MigrateError::malformed(source_name, "unterminated quoted cell"));
    }
    if has_content {
        row.push(cell);
        rows.push(row);
    }
    Ok(rows)
}

// ── Decode ─────────────────────────────────────────────────────────────────

/// Decode tabular text into Records, in row order.
pub fn decode(
    source_name: &str,
    text: &str,
    opts: &DecodeOptions<'_>,
    ctx: &Context<'_>,
) -> Result<Vec<Record>> {
    let mut rows = parse(source_name, text)?.into_iter();
    let mut header = match rows.next() {
        Some(header) => header,
        None => return Ok(Vec::new()),
    };
    let mut rows: Vec<Vec<String>> = rows.collect();

    let templates = extract_template_column(&mut header, &mut rows, opts);
    let id_idx = header
        .iter()
        .position(|column| column == "id")
        .ok_or_else(|| MigrateError::malformed(source_name, "no 'id' column"))?;

    let mut records = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        let end = rows[start + 1..]
            .iter()
            .position(|row| !cell(row, id_idx).is_empty())
            .map_or(rows.len(), |offset| start + 1 + offset);
        let template = templates[start].clone();
        records.push(build_record(&header, &rows[start..end], id_idx, template, opts, ctx)?);
        start = end;
    }
    Ok(records)
}

/// Pull the template column out of the rows and strip lookup suffixes from
/// the remaining header names. Returns one template per row.
fn extract_template_column(
    header: &mut Vec<String>,
    rows: &mut [Vec<String>],
    opts: &DecodeOptions<'_>,
) -> Vec<Option<String>> {
    let mut column = None;
    for (idx, name) in header.iter_mut().enumerate() {
        if opts.template_columns.contains(&name.as_str()) {
            column = Some(idx);
        } else if let Some(stripped) = name
            .strip_suffix(":id")
            .or_else(|| name.strip_suffix("/id"))
        {
            *name = stripped.to_owned();
        }
    }

    let Some(column) = column else {
        return vec![None; rows.len()];
    };
    if !opts.keep_template_column {
        header.remove(column);
    }
    rows.iter_mut()
        .map(|row| {
            let template = if opts.keep_template_column {
                row.get(column).cloned()
            } else if column < row.len() {
                Some(row.remove(column))
            } else {
                None
            };
            template.filter(|t| !t.trim().is_empty())
        })
        .collect()
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|c| c.trim()).unwrap_or("")
}

fn reference_target(text: &str) -> Option<&str> {
    REF_CELL.captures(text).and_then(|caps| caps.get(1)).map(|m| {
        m.as_str()
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
    })
}

fn build_record(
    header: &[String],
    rows: &[Vec<String>],
    id_idx: usize,
    template: Option<String>,
    opts: &DecodeOptions<'_>,
    ctx: &Context<'_>,
) -> Result<Record> {
    let first = &rows[0];
    let mut record = Record::new(opts.kind, cell(first, id_idx), opts.namespace);
    if template.is_some() {
        record.template = template;
    }

    let mut relations = HashSet::new();
    for (idx, column) in header.iter().enumerate() {
        match column.split_once(PATH_SEPARATOR) {
            None => {
                if idx >= first.len() {
                    continue;
                }
                let text = cell(first, idx);
                let field = match reference_target(text) {
                    Some(target) => Field::reference(column.as_str(), target),
                    None => Field::text(column.as_str(), text),
                };
                record.append(field, ctx)?;
            }
            Some((relation, _)) => {
                if relations.insert(relation) {
                    let edges = relation_edges(header, relation, rows);
                    record.append(Field::evaluated(relation, Value::Relation(edges)), ctx)?;
                }
            }
        }
    }
    Ok(record)
}

/// One `Create` edge per row holding at least one non-empty cell under
/// `relation`.
fn relation_edges(header: &[String], relation: &str, rows: &[Vec<String>]) -> Vec<Edge> {
    let columns: Vec<(usize, &str)> = header
        .iter()
        .enumerate()
        .filter_map(|(idx, column)| {
            column
                .strip_prefix(relation)
                .and_then(|rest| rest.strip_prefix(PATH_SEPARATOR))
                .map(|sub| (idx, sub))
        })
        .collect();

    rows.iter()
        .filter(|row| columns.iter().any(|(idx, _)| !cell(row, *idx).is_empty()))
        .map(|row| {
            let payload = columns
                .iter()
                .map(|(idx, sub)| (sub.to_string(), cell_value(cell(row, *idx))))
                .collect();
            Edge::Create {
                payload: Payload::Map(payload),
            }
        })
        .collect()
}

fn cell_value(text: &str) -> Value {
    if text.is_empty() {
        Value::Null
    } else if let Some(target) = reference_target(text) {
        Value::Ref(target.to_owned())
    } else if text.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if text.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else {
        Value::Str(text.to_owned())
    }
}

// ── Encode ─────────────────────────────────────────────────────────────────

/// Column tree: a leaf, or a relation whose payload fields are columns.
#[derive(Debug)]
enum Column {
    Leaf,
    Branch(IndexMap<String, Column>),
}

type Line = Vec<(String, usize)>;

fn column_name(field_id: &str) -> String {
    field_id.replace(':', "/")
}

/// Inline payloads of a relation whose first edge carries one.
fn payloads(value: &Value) -> Option<Vec<&Payload>> {
    match value {
        Value::Relation(edges) if edges.first().and_then(Edge::payload).is_some() => {
            Some(edges.iter().filter_map(Edge::payload).collect())
        }
        _ => None,
    }
}

fn lookup<'a>(entries: &[(&str, &'a Value)], name: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(id, _)| column_name(id) == name)
        .map(|(_, value)| *value)
}

fn collect_columns(entries: &[(&str, &Value)], node: &mut IndexMap<String, Column>) {
    for (id, value) in entries {
        let name = column_name(id);
        match payloads(value) {
            Some(payloads) => {
                let column = node
                    .entry(name)
                    .or_insert_with(|| Column::Branch(IndexMap::new()));
                if matches!(column, Column::Leaf) {
                    *column = Column::Branch(IndexMap::new());
                }
                if let Column::Branch(sub) = column {
                    for payload in payloads {
                        collect_columns(&payload.entries(), sub);
                    }
                }
            }
            None => {
                node.entry(name).or_insert(Column::Leaf);
            }
        }
    }
}

fn flatten(node: &IndexMap<String, Column>, prefix: &str, out: &mut IndexSet<String>) {
    for (name, column) in node {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}{}{}", prefix, PATH_SEPARATOR, name)
        };
        match column {
            Column::Leaf => {
                out.insert(path);
            }
            Column::Branch(sub) => flatten(sub, &path, out),
        }
    }
}

fn column_class(column: &str) -> u8 {
    if column.contains(LOCALE_SEPARATOR) {
        2
    } else if column.contains(PATH_SEPARATOR) {
        1
    } else {
        0
    }
}

/// Relation paths to every leaf payload under `entries`.
fn lines(node: &IndexMap<String, Column>, entries: &[(&str, &Value)]) -> Vec<Line> {
    let mut out = Vec::new();
    for (name, column) in node {
        let Column::Branch(sub) = column else {
            continue;
        };
        let Some(payloads) = lookup(entries, name).and_then(payloads) else {
            continue;
        };
        for (idx, payload) in payloads.into_iter().enumerate() {
            let sublines = lines(sub, &payload.entries());
            if sublines.is_empty() {
                out.push(vec![(name.clone(), idx)]);
            } else {
                for subline in sublines {
                    let mut line = vec![(name.clone(), idx)];
                    line.extend(subline);
                    out.push(line);
                }
            }
        }
    }
    out
}

enum Cell {
    Quoted(String),
    Bare(&'static str),
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Quoted(text) => format!("\"{}\"", text.replace('"', "\"\"")),
            Cell::Bare(token) => (*token).to_owned(),
        }
    }
}

fn render_value(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Quoted(String::new()),
        Value::Bool(true) => Cell::Bare("True"),
        Value::Bool(false) => Cell::Bare("False"),
        Value::Int(i) => Cell::Quoted(i.to_string()),
        Value::Float(f) => Cell::Quoted(format_float(*f)),
        Value::Str(s) | Value::Unquoted(s) => Cell::Quoted(s.clone()),
        Value::Ref(id) => Cell::Quoted(unqualify(id).to_owned()),
        Value::List(_) | Value::Tuple(_) | Value::Relation(_) => Cell::Quoted(value.id_list().join(",")),
        Value::Map(_) => Cell::Quoted(String::new()),
    }
}

/// Value at `column` for `line`, or `None` when the line does not own the
/// column's relation path.
fn nested_cell<'a>(
    record: &'a Record,
    line: &[(String, usize)],
    parents: &[&str],
    leaf: &str,
) -> Option<Option<&'a Value>> {
    if line.len() < parents.len()
        || line.iter().zip(parents).any(|((name, _), parent)| name != parent)
    {
        return None;
    }
    let mut entries: Vec<(&str, &Value)> = record.live_fields().collect();
    for (name, idx) in &line[..parents.len()] {
        let payload = lookup(&entries, name)
            .and_then(payloads)
            .and_then(|payloads| payloads.into_iter().nth(*idx));
        match payload {
            Some(payload) => entries = payload.entries(),
            None => return Some(None),
        }
    }
    Some(lookup(&entries, leaf))
}

/// Encode Records into tabular text. Returns `None` when there is nothing
/// to write.
pub fn encode<'a>(records: impl IntoIterator<Item = &'a Record>) -> Option<String> {
    let records: Vec<&Record> = records.into_iter().collect();
    if records.is_empty() {
        return None;
    }

    let mut tree = IndexMap::new();
    for record in &records {
        let entries: Vec<(&str, &Value)> = record.live_fields().collect();
        collect_columns(&entries, &mut tree);
    }
    let mut flat = IndexSet::new();
    flatten(&tree, "", &mut flat);
    let mut header: Vec<String> = flat.into_iter().collect();
    header.sort_by_key(|column| column_class(column));
    if !header.iter().any(|column| column == "id") {
        header.insert(0, "id".to_owned());
    }

    let mut out = vec![header
        .iter()
        .map(|column| Cell::Quoted(column.clone()).render())
        .collect::<Vec<_>>()
        .join(",")];

    for record in &records {
        let entries: Vec<(&str, &Value)> = record.live_fields().collect();
        let mut record_lines = lines(&tree, &entries);
        if record_lines.is_empty() {
            record_lines.push(Vec::new());
        }

        for (row_idx, line) in record_lines.iter().enumerate() {
            let previous = row_idx.checked_sub(1).map(|i| &record_lines[i]);
            let row: Vec<String> = header
                .iter()
                .map(|column| {
                    let segments: Vec<&str> = column.split(PATH_SEPARATOR).collect();
                    let (leaf, parents) = match segments.split_last() {
                        Some((leaf, parents)) => (*leaf, parents),
                        None => return Cell::Quoted(String::new()),
                    };
                    if parents.is_empty() {
                        return if row_idx != 0 {
                            Cell::Quoted(String::new())
                        } else if column == "id" {
                            Cell::Quoted(unqualify(&record.id).to_owned())
                        } else {
                            lookup(&entries, column).map_or(Cell::Quoted(String::new()), render_value)
                        };
                    }
                    // Nested columns only fill the first row of their edge.
                    let first_of_edge = match previous {
                        Some(prev) => {
                            prev.len() < parents.len()
                                || line.len() < parents.len()
                                || prev[..parents.len()] != line[..parents.len()]
                        }
                        None => true,
                    };
                    if !first_of_edge {
                        return Cell::Quoted(String::new());
                    }
                    match nested_cell(record, line, parents, leaf) {
                        Some(Some(value)) => render_value(value),
                        _ => Cell::Quoted(String::new()),
                    }
                })
                .map(|cell| cell.render())
                .collect();
            out.push(row.join(","));
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingTable;

    fn opts<'a>(kind: &'a str, template_columns: &'a [&'a str]) -> DecodeOptions<'a> {
        DecodeOptions {
            kind,
            namespace: "l10n_be",
            template_columns,
            keep_template_column: false,
        }
    }

    fn map(entries: &[(&str, Value)]) -> Payload {
        Payload::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn parse_handles_quotes_and_blank_lines() {
        let rows = parse("t.csv", "a,\"b,c\",\"say \"\"hi\"\"\"\r\n\n1,2,3\n").unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b,c".into(), "say \"hi\"".into()],
                vec!["1".to_string(), "2".into(), "3".into()],
            ]
        );
    }

    #[test]
    fn unterminated_quote_is_malformed() {
        let err = parse("t.csv", "id,name\n\"x,y\n").unwrap_err();
        assert!(err.is_source_local());
    }

    #[test]
    fn decode_extracts_template_and_references() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let text = "id,code,chart_template_id/id,user_type_id:id,group_id\n\
                    a100,100,be_chart,account.data_account_type_equity,ref(l10n_be.grp_10)\n\
                    a101,101,,x,\n";
        let records = decode(
            "account.account-be.csv",
            text,
            &opts("account.account", &["chart_template_id/id", "chart_template_id:id"]),
            &ctx,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "a100");
        assert_eq!(records[0].template.as_deref(), Some("be_chart"));
        assert_eq!(records[1].template, None);
        assert!(!records[0].has_live("chart_template_id"));
        assert_eq!(
            records[0].value("user_type_id"),
            Some(&Value::Str("account.data_account_type_equity".into()))
        );
        assert_eq!(
            records[0].value("group_id"),
            Some(&Value::Ref("l10n_be.grp_10".into()))
        );
        assert_eq!(records[1].value("group_id"), Some(&Value::Null));
    }

    #[test]
    fn decode_without_id_column_is_malformed() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let err = decode("x.csv", "code\n1\n", &opts("x.thing", &[]), &ctx).unwrap_err();
        assert!(err.is_source_local());
    }

    #[test]
    fn continuation_rows_extend_relations() {
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let text = "id,name,lines/a,lines/b\nr1,First,x,y\n,,x2,\nr2,Second,,\n";
        let records = decode("x.csv", text, &opts("x.thing", &[]), &ctx).unwrap();
        assert_eq!(records.len(), 2);
        match records[0].value("lines") {
            Some(Value::Relation(edges)) => {
                assert_eq!(edges.len(), 2);
                assert_eq!(
                    edges[1],
                    Edge::Create {
                        payload: map(&[("a", Value::Str("x2".into())), ("b", Value::Null)])
                    }
                );
            }
            other => panic!("expected relation, got {:?}", other),
        }
        assert_eq!(records[1].value("lines"), Some(&Value::Relation(vec![])));
    }

    #[test]
    fn encode_orders_columns_and_fills_first_rows_only() {
        let mut record = Record::new("x.thing", "l10n_be.r1", "l10n_be");
        record.insert(Field::text("name@fr", "Premier"));
        record.insert(Field::evaluated(
            "a",
            Value::Relation(vec![
                Edge::Create {
                    payload: map(&[("b", Value::Str("b1".into())), ("c", Value::Str("c1".into()))]),
                },
                Edge::Create {
                    payload: map(&[("b", Value::Str("b2".into())), ("c", Value::Str("c2".into()))]),
                },
            ]),
        ));
        record.insert(Field::text("name", "First"));
        record.insert(Field::evaluated("active", Value::Bool(true)));
        record.insert(Field::reference("group_id", "l10n_be.grp"));

        let text = encode([&record]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "\"id\",\"name\",\"active\",\"group_id\",\"a/b\",\"a/c\",\"name@fr\"",
                "\"r1\",\"First\",True,\"grp\",\"b1\",\"c1\",\"Premier\"",
                "\"\",\"\",\"\",\"\",\"b2\",\"c2\",\"\"",
            ]
        );
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn encode_joins_id_edges() {
        let mut record = Record::new("x.thing", "r1", "mod");
        record.insert(Field::evaluated(
            "tax_ids",
            Value::Relation(vec![Edge::ReplaceAll {
                ids: vec!["vat21".into(), "vat6".into()],
            }]),
        ));
        record.insert(Field::evaluated("amount", Value::Float(21.0)));
        let text = encode([&record]).unwrap();
        assert!(text.contains("\"r1\",\"vat21,vat6\",\"21.0\""));
    }

    #[test]
    fn encode_nothing_is_none() {
        assert_eq!(encode(std::iter::empty::<&Record>()), None);
    }

    #[test]
    fn round_trip_scalar_and_single_level_relations() {
        let mut original = Record::new("x.thing", "r1", "mod");
        original.insert(Field::text("name", "Say \"hi\", twice"));
        original.insert(Field::evaluated("active", Value::Bool(false)));
        original.insert(Field::evaluated(
            "lines",
            Value::Relation(vec![
                Edge::Create {
                    payload: map(&[("a", Value::Str("x".into())), ("b", Value::Bool(true))]),
                },
                Edge::Create {
                    payload: map(&[("a", Value::Str("x2".into())), ("b", Value::Str("y2".into()))]),
                },
            ]),
        ));

        let text = encode([&original]).unwrap();
        let mapping = MappingTable::new();
        let ctx = Context { mapping: &mapping };
        let decoded = decode("x.csv", &text, &opts("x.thing", &[]), &ctx).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, original.id);
        let expected: Vec<(&str, &Value)> = original.live_fields().collect();
        let actual: Vec<(&str, &Value)> = decoded[0].live_fields().collect();
        assert_eq!(actual, expected);
    }
}
