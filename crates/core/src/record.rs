//! The record graph: leaf [`Field`]s owned by composite [`Record`]s.
//!
//! A Record keeps its fields in insertion order, which is the canonical
//! order of every rendered output. Normalization happens when a field is
//! appended: the field is routed through the `cleanup` chain of the
//! record's kind variant (see [`crate::registry`]) before it is stored.
//!
//! Deleting a field only flags it. Deleted fields stay visible to later
//! passes (their `original_value` in particular) but never reach an output.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::Result;
use crate::expr;
use crate::registry::{self, Context};
use crate::resolve::qualify;
use crate::value::Value;

/// Kind whose records carry their own template identity.
pub const CHART_TEMPLATE_KIND: &str = "account.chart.template";

/// Which source alternative produced a field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Ref,
    Eval,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub id: String,
    pub value: Value,
    pub value_type: Option<ValueType>,
    /// Snapshot of `value` taken at construction.
    pub original_value: Value,
    pub deleted: bool,
    #[serde(skip)]
    normalized: bool,
}

/// Raw alternatives a tree-document field element can carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldSource<'a> {
    pub text: &'a str,
    pub reference: &'a str,
    pub expression: &'a str,
    /// Emit the text verbatim instead of as a quoted string.
    pub unquoted: bool,
}

impl Field {
    fn with_value(id: impl Into<String>, value: Value, value_type: Option<ValueType>) -> Self {
        Field {
            id: id.into(),
            original_value: value.clone(),
            value,
            value_type,
            deleted: false,
            normalized: false,
        }
    }

    /// Build a field from its raw alternatives. Non-empty text wins over a
    /// non-empty reference, which wins over a non-empty expression.
    pub fn from_source(id: impl Into<String>, src: FieldSource<'_>) -> std::result::Result<Self, String> {
        let text = src.text.trim();
        let reference = src.reference.trim();
        let expression = src.expression.trim();

        if !text.is_empty() {
            let value = if src.unquoted {
                Value::Unquoted(text.to_owned())
            } else {
                Value::Str(text.to_owned())
            };
            Ok(Field::with_value(id, value, Some(ValueType::Text)))
        } else if !reference.is_empty() {
            Ok(Field::with_value(
                id,
                Value::Ref(reference.to_owned()),
                Some(ValueType::Ref),
            ))
        } else if !expression.is_empty() {
            let value = if expr::is_live_code(expression) {
                Value::Unquoted(expression.to_owned())
            } else {
                expr::evaluate(expression)?.into_relation_if_commands()
            };
            Ok(Field::with_value(id, value, Some(ValueType::Eval)))
        } else {
            Ok(Field::with_value(id, Value::Null, None))
        }
    }

    /// Inline text field; blank text yields an empty field.
    pub fn text(id: impl Into<String>, text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Field::with_value(id, Value::Null, None)
        } else {
            Field::with_value(id, Value::Str(text.to_owned()), Some(ValueType::Text))
        }
    }

    pub fn reference(id: impl Into<String>, target: &str) -> Self {
        Field::with_value(id, Value::Ref(target.to_owned()), Some(ValueType::Ref))
    }

    /// Text field emitted verbatim, never quoted as a string literal.
    pub fn unquoted(id: impl Into<String>, code: impl Into<String>) -> Self {
        Field::with_value(id, Value::Unquoted(code.into()), Some(ValueType::Text))
    }

    /// Field holding an already evaluated value.
    pub fn evaluated(id: impl Into<String>, value: Value) -> Self {
        Field::with_value(id, value.into_relation_if_commands(), Some(ValueType::Eval))
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }
}

/// A composite record of a declared kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    pub kind: String,
    pub namespace: String,
    pub template: Option<String>,
    fields: IndexMap<String, Field>,
}

impl Record {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, namespace: impl Into<String>) -> Self {
        let kind = kind.into();
        let id = id.into();
        let namespace = namespace.into();
        let template = if kind == CHART_TEMPLATE_KIND && !id.is_empty() {
            Some(qualify(&id, &namespace))
        } else {
            None
        };
        Record {
            id,
            kind,
            namespace,
            template,
            fields: IndexMap::new(),
        }
    }

    /// Normalize `field` through this record's kind variant and store it.
    pub fn append(&mut self, mut field: Field, ctx: &Context<'_>) -> Result<()> {
        let variant = registry::variant_for(&self.kind);
        if !field.normalized {
            variant.cleanup(self, &mut field, ctx)?;
            field.normalized = true;
        }
        match self.fields.get_mut(&field.id) {
            Some(existing) if field.deleted && !existing.deleted => {}
            Some(existing) if variant.accumulates(&field.id) => {
                match (&mut existing.value, field.value) {
                    (Value::Relation(edges), Value::Relation(more)) => edges.extend(more),
                    (_, value) => existing.value = value,
                }
            }
            Some(existing) => *existing = field,
            None => {
                self.fields.insert(field.id.clone(), field);
            }
        }
        Ok(())
    }

    /// Store a field as-is, replacing any field with the same id in place.
    pub fn insert(&mut self, mut field: Field) {
        field.normalized = true;
        self.fields.insert(field.id.clone(), field);
    }

    /// Union `other`'s fields into this record. On collision the field of
    /// `other` wins and keeps the original position, except that a deleted
    /// field never displaces a live one.
    pub fn merge_from(&mut self, other: Record) {
        for (id, field) in other.fields {
            match self.fields.get_mut(&id) {
                Some(existing) if field.deleted && !existing.deleted => {}
                Some(existing) => *existing = field,
                None => {
                    self.fields.insert(id, field);
                }
            }
        }
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.get(id)
    }

    pub fn field_mut(&mut self, id: &str) -> Option<&mut Field> {
        self.fields.get_mut(id)
    }

    /// Value of a live field.
    pub fn value(&self, id: &str) -> Option<&Value> {
        self.fields
            .get(id)
            .filter(|f| !f.deleted)
            .map(|f| &f.value)
    }

    pub fn has_live(&self, id: &str) -> bool {
        self.value(id).is_some()
    }

    /// Physically remove a field, keeping the order of the others.
    pub fn remove(&mut self, id: &str) -> Option<Field> {
        self.fields.shift_remove(id)
    }

    /// Flag a field deleted. Returns false when there is no such field.
    pub fn delete(&mut self, id: &str) -> bool {
        match self.fields.get_mut(id) {
            Some(field) => {
                field.deleted = true;
                true
            }
            None => false,
        }
    }

    /// Every field, deleted ones included.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.fields.values_mut()
    }

    /// Live `(id, value)` pairs in canonical order.
    pub fn live_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .values()
            .filter(|f| !f.deleted)
            .map(|f| (f.id.as_str(), &f.value))
    }

    pub fn is_empty(&self) -> bool {
        self.live_fields().next().is_none()
    }
}
