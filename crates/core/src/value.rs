//! Field values and relational edges.

use indexmap::IndexMap;
use serde::Serialize;

use crate::record::Record;

/// A normalized field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Code text that must be emitted verbatim, never quoted.
    Unquoted(String),
    /// A reference to another record by (possibly qualified) id.
    Ref(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(IndexMap<String, Value>),
    /// A one-to-many relation, as an ordered edge sequence.
    Relation(Vec<Edge>),
}

/// Inline payload carried by `Create` and `Update` edges.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Record(Box<Record>),
    Map(IndexMap<String, Value>),
}

/// A single relation mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edge {
    Create { payload: Payload },
    Update { id: String, payload: Payload },
    Delete { id: String },
    Unlink { id: String },
    Link { id: String },
    Clear,
    ReplaceAll { ids: Vec<String> },
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual content of string-like values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Unquoted(s) | Value::Ref(s) => Some(s),
            _ => None,
        }
    }

    /// The value read as a record identifier.
    pub fn id_text(&self) -> Option<String> {
        match self {
            Value::Str(s) | Value::Unquoted(s) | Value::Ref(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Identifiers held by a list, a single id, or id-only edges.
    pub fn id_list(&self) -> Vec<String> {
        match self {
            Value::List(items) | Value::Tuple(items) => {
                items.iter().filter_map(Value::id_text).collect()
            }
            Value::Relation(edges) => edges.iter().flat_map(Edge::target_ids).collect(),
            Value::Null => Vec::new(),
            other => other.id_text().into_iter().collect(),
        }
    }

    /// Python truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) | Value::Unquoted(s) | Value::Ref(s) => !s.is_empty(),
            Value::List(v) | Value::Tuple(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Relation(e) => !e.is_empty(),
        }
    }

    /// Replace references by their plain id text, recursively.
    pub fn without_refs(self) -> Value {
        match self {
            Value::Ref(id) => Value::Str(id),
            Value::List(items) => Value::List(items.into_iter().map(Value::without_refs).collect()),
            Value::Tuple(items) => {
                Value::Tuple(items.into_iter().map(Value::without_refs).collect())
            }
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, v.without_refs()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Convert legacy opcode lists (`[(0, 0, {...}), (4, id)]`) into a
    /// relation. Anything else is returned unchanged.
    pub fn into_relation_if_commands(self) -> Value {
        let items = match &self {
            Value::List(items) | Value::Tuple(items) if !items.is_empty() => items,
            _ => return self,
        };
        let edges: Option<Vec<Edge>> = items
            .iter()
            .map(|item| match item {
                Value::List(parts) | Value::Tuple(parts) => Edge::from_opcode_tuple(parts),
                _ => None,
            })
            .collect();
        match edges {
            Some(edges) => Value::Relation(edges),
            None => self,
        }
    }
}

/// Shortest round-trip float text, always carrying a fractional part or
/// an exponent (`21.0`, `0.1`, `1e-07`), as Python prints floats.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    // Shortest round-trip digits, positional for exponents in -4..16.
    let scientific = format!("{:e}", f);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let text = f.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{}.0", text)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

impl Payload {
    /// Live entries in canonical order.
    pub fn entries(&self) -> Vec<(&str, &Value)> {
        match self {
            Payload::Record(record) => record.live_fields().collect(),
            Payload::Map(map) => map.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Payload::Record(record) => record.value(key),
            Payload::Map(map) => map.get(key),
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Payload::Record(record) => Some(&**record),
            Payload::Map(_) => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Payload::Record(record) => Some(&mut **record),
            Payload::Map(_) => None,
        }
    }
}

impl Edge {
    /// Legacy integer opcode of the edge.
    pub fn opcode(&self) -> u8 {
        match self {
            Edge::Create { .. } => 0,
            Edge::Update { .. } => 1,
            Edge::Delete { .. } => 2,
            Edge::Unlink { .. } => 3,
            Edge::Link { .. } => 4,
            Edge::Clear => 5,
            Edge::ReplaceAll { .. } => 6,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Edge::Create { payload } | Edge::Update { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut Payload> {
        match self {
            Edge::Create { payload } | Edge::Update { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Ids an id-only edge points at.
    pub fn target_ids(&self) -> Vec<String> {
        match self {
            Edge::Link { id } => vec![id.clone()],
            Edge::ReplaceAll { ids } => ids.clone(),
            _ => Vec::new(),
        }
    }

    /// Build an edge from a legacy `(opcode, id, payload)` tuple.
    pub fn from_opcode_tuple(parts: &[Value]) -> Option<Edge> {
        if !(2..=3).contains(&parts.len()) {
            return None;
        }
        let opcode = match parts[0] {
            Value::Int(op) => op,
            _ => return None,
        };
        let id = || parts[1].id_text();
        let payload = || match parts.get(2) {
            Some(Value::Map(map)) => Some(Payload::Map(map.clone())),
            _ => None,
        };
        match opcode {
            0 => Some(Edge::Create { payload: payload()? }),
            1 => Some(Edge::Update {
                id: id()?,
                payload: payload()?,
            }),
            2 => Some(Edge::Delete { id: id()? }),
            3 => Some(Edge::Unlink { id: id()? }),
            4 => Some(Edge::Link { id: id()? }),
            5 => Some(Edge::Clear),
            6 => match parts.get(2) {
                Some(ids @ (Value::List(_) | Value::Tuple(_))) => {
                    Some(Edge::ReplaceAll { ids: ids.id_list() })
                }
                _ => None,
            },
            _ => None,
        }
    }
}
