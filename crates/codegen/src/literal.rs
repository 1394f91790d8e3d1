//! Nested-literal rendering of values and records as Python source.
//!
//! Layout rules, for a value rendered at indentation `level`:
//!
//! * the opening token is not indented (the caller places it);
//! * every item sits on its own line at `level + 1`, followed by `,`;
//! * the closing token sits at `level`.
//!
//! Relations render as `Command.*` calls, never as opcode tuples.

use chartmig_core::{Edge, Payload, Record, Value};
use chartmig_core::value::format_float;

/// Spaces per indentation level.
pub const INDENT_SIZE: usize = 4;

pub fn indent(level: usize) -> String {
    " ".repeat(level * INDENT_SIZE)
}

/// Render `value` at indentation `level`.
pub fn render(value: &Value, level: usize) -> String {
    match value {
        Value::Null => "None".to_owned(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format_float(*f),
        Value::Float(f) => format!("float('{}')", format_float(*f)),
        Value::Str(s) => string(s),
        Value::Unquoted(code) => code.clone(),
        Value::Ref(id) => repr(id),
        Value::List(items) => block('[', ']', items.iter().map(|item| render(item, level + 1)), level),
        Value::Tuple(items) => tuple(items, level),
        Value::Map(map) => entries(map.iter().map(|(k, v)| (k.as_str(), v)), level),
        Value::Relation(edges) => block(
            '[',
            ']',
            edges.iter().map(|edge| command(edge, level + 1)),
            level,
        ),
    }
}

/// Render the live fields of `record` as a dict literal.
pub fn render_record(record: &Record, level: usize) -> String {
    entries(record.live_fields(), level)
}

fn render_payload(payload: &Payload, level: usize) -> String {
    match payload {
        Payload::Record(record) => render_record(record, level),
        Payload::Map(map) => entries(map.iter().map(|(k, v)| (k.as_str(), v)), level),
    }
}

fn command(edge: &Edge, level: usize) -> String {
    match edge {
        Edge::Create { payload } => format!("Command.create({})", render_payload(payload, level)),
        Edge::Update { id, payload } => format!(
            "Command.update({}, {})",
            repr(id),
            render_payload(payload, level)
        ),
        Edge::Delete { id } => format!("Command.delete({})", repr(id)),
        Edge::Unlink { id } => format!("Command.unlink({})", repr(id)),
        Edge::Link { id } => format!("Command.link({})", repr(id)),
        Edge::Clear => "Command.clear()".to_owned(),
        Edge::ReplaceAll { ids } => {
            let ids: Vec<String> = ids.iter().map(|id| repr(id)).collect();
            format!("Command.set([{}])", ids.join(", "))
        }
    }
}

fn entries<'a>(items: impl Iterator<Item = (&'a str, &'a Value)>, level: usize) -> String {
    block(
        '{',
        '}',
        items.map(|(key, value)| format!("{}: {}", repr(key), render(value, level + 1))),
        level,
    )
}

fn tuple(items: &[Value], level: usize) -> String {
    if items.len() == 1 {
        // A one-element tuple needs its comma even when compact.
        return format!("({},)", render(&items[0], level));
    }
    block('(', ')', items.iter().map(|item| render(item, level + 1)), level)
}

fn block(open: char, close: char, items: impl Iterator<Item = String>, level: usize) -> String {
    let mut out = String::new();
    out.push(open);
    let mut empty = true;
    for item in items {
        if empty {
            out.push('\n');
            empty = false;
        }
        out.push_str(&indent(level + 1));
        out.push_str(&item);
        out.push_str(",\n");
    }
    if !empty {
        out.push_str(&indent(level));
    }
    out.push(close);
    out
}

/// A string literal. Multi-line text is triple quoted, keeping its line
/// breaks literal; a quote is escaped when another quote or the closing
/// delimiter follows it.
fn string(s: &str) -> String {
    if !s.contains('\n') {
        return repr(s);
    }
    let mut out = String::with_capacity(s.len() + 6);
    out.push_str("\"\"\"");
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' if matches!(chars.peek(), Some('"') | None) => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' | '\t' => out.push(c),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push_str("\"\"\"");
    out
}

/// Python `repr` of a string.
pub fn repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartmig_core::Field;
    use indexmap::IndexMap;

    fn map(entries: &[(&str, Value)]) -> IndexMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn scalars() {
        assert_eq!(render(&Value::Null, 0), "None");
        assert_eq!(render(&Value::Bool(true), 0), "True");
        assert_eq!(render(&Value::Int(-3), 0), "-3");
        assert_eq!(render(&Value::Float(21.0), 0), "21.0");
        assert_eq!(render(&Value::Float(1e16), 0), "1e+16");
        assert_eq!(render(&Value::Float(f64::NAN), 0), "float('nan')");
        assert_eq!(render(&Value::Float(f64::NEG_INFINITY), 0), "float('-inf')");
        assert_eq!(render(&Value::Str("it's".into()), 0), "\"it's\"");
        assert_eq!(render(&Value::Str("a\\b".into()), 0), "'a\\\\b'");
        assert_eq!(render(&Value::Ref("base.be".into()), 0), "'base.be'");
        assert_eq!(
            render(&Value::Unquoted("ref('base.be').id".into()), 0),
            "ref('base.be').id"
        );
        assert_eq!(render(&Value::Str("a\nb".into()), 0), "\"\"\"a\nb\"\"\"");
    }

    #[test]
    fn multi_line_text_stays_a_valid_literal() {
        assert_eq!(
            render(&Value::Str("line one\nends with quote\"".into()), 0),
            "\"\"\"line one\nends with quote\\\"\"\"\""
        );
        assert_eq!(
            render(&Value::Str("a\nback\\slash \\n".into()), 0),
            "\"\"\"a\nback\\\\slash \\\\n\"\"\""
        );
        assert_eq!(
            render(&Value::Str("say \"\"\"hi\"\"\"\nnow".into()), 0),
            "\"\"\"say \\\"\\\"\"hi\\\"\\\"\"\nnow\"\"\""
        );
        assert_eq!(
            render(&Value::Str("a \"quoted\" word\nok".into()), 0),
            "\"\"\"a \"quoted\" word\nok\"\"\""
        );
    }

    #[test]
    fn nested_blocks_are_indented_per_level() {
        let value = Value::Map(map(&[
            ("name", Value::Str("x".into())),
            (
                "codes",
                Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]),
            ),
            ("pair", Value::Tuple(vec![Value::Int(1), Value::Int(2)])),
            ("empty", Value::List(vec![])),
        ]));
        let expected = "{
    'name': 'x',
    'codes': [
        'a',
        'b',
    ],
    'pair': (
        1,
        2,
    ),
    'empty': [],
}";
        assert_eq!(render(&value, 0), expected);
    }

    #[test]
    fn single_item_tuple_keeps_its_comma() {
        assert_eq!(render(&Value::Tuple(vec![Value::Int(1)]), 0), "(1,)");
    }

    #[test]
    fn create_edges_render_as_commands() {
        let relation = Value::Relation(vec![Edge::Create {
            payload: Payload::Map(map(&[("id", Value::Str("x".into()))])),
        }]);
        let text = render(&relation, 0);
        assert_eq!(
            text,
            "[
    Command.create({
        'id': 'x',
    }),
]"
        );
        assert!(!text.contains("(0, 0"));
    }

    #[test]
    fn id_edges_render_as_commands() {
        let relation = Value::Relation(vec![
            Edge::Clear,
            Edge::Link { id: "tag_a".into() },
            Edge::Unlink { id: "tag_b".into() },
            Edge::Delete { id: "tag_c".into() },
            Edge::ReplaceAll {
                ids: vec!["t1".into(), "t2".into()],
            },
            Edge::Update {
                id: "l1".into(),
                payload: Payload::Map(map(&[("factor", Value::Float(0.5))])),
            },
        ]);
        let expected = "[
        Command.clear(),
        Command.link('tag_a'),
        Command.unlink('tag_b'),
        Command.delete('tag_c'),
        Command.set(['t1', 't2']),
        Command.update('l1', {
            'factor': 0.5,
        }),
    ]";
        assert_eq!(render(&relation, 1), expected);
    }

    #[test]
    fn records_skip_deleted_fields() {
        let mut record = Record::new("account.tax", "t", "l10n_be");
        record.insert(Field::text("name", "21%"));
        record.insert(Field::text("note", "gone"));
        record.delete("note");
        assert_eq!(render_record(&record, 0), "{\n    'name': '21%',\n}");
    }
}
