//! Tree codec: legacy XML data documents -> Records.
//!
//! The document is read once into an owned element tree that remembers
//! the byte span of every node. Records are built bottom-up from that
//! tree, and template-only declarations are dropped by copying the source
//! text around their spans, so everything else in the file is preserved
//! byte for byte. A `try_loading` call carrying company arguments is the
//! one declaration that is replaced rather than dropped: the new call
//! loads the chart by its qualifier.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::record::{Field, FieldSource, Record};
use crate::registry::{self, Context};
use crate::resolve::qualify;
use crate::value::{Edge, Payload, Value};

/// Element names declaring a record-like entity.
const DECLARATIONS: &[&str] = &["record", "function", "delete"];
/// Element names that only group declarations.
const CONTAINERS: &[&str] = &["odoo", "data", "openerp"];

static CHART_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"ref\(\s*['"]([^'"]+)['"]\s*\)"#).expect("chart reference pattern")
});

/// What happens to the source document once its records are extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    /// Some declarations were dropped; the remaining text.
    Rewritten(String),
    /// Nothing but empty containers and comments remain.
    Removed,
}

#[derive(Debug)]
pub struct TreeDocument {
    pub records: Vec<Record>,
    pub outcome: Outcome,
}

#[derive(Debug)]
enum Node {
    Element(Element),
    Text { text: String, span: Range<usize> },
    Comment,
    Other,
}

#[derive(Debug)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    span: Range<usize>,
}

impl Element {
    fn open(source_name: &str, tag: &BytesStart<'_>, start: usize) -> Result<Self> {
        let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in tag.attributes() {
            let attr = attr.map_err(|e| MigrateError::malformed(source_name, e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| MigrateError::malformed(source_name, e.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Element {
            name,
            attrs,
            children: Vec::new(),
            span: start..start,
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    /// Concatenated direct text content.
    fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True for a declaration of a template-only kind, which moves out of
    /// data documents into generated code.
    fn is_template_declaration(&self) -> bool {
        DECLARATIONS.contains(&self.name.as_str())
            && self.attr("model").is_some_and(|model| {
                registry::is_registered(model)
                    && (model.ends_with(".template") || model == "account.tax.group")
            })
    }
}

// ── Reading ────────────────────────────────────────────────────────────────

fn read_tree(source_name: &str, text: &str) -> Result<Element> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Element> = Vec::new();
    let mut top: Vec<Node> = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|e| {
            MigrateError::malformed(
                source_name,
                format!("{} (at byte {})", e, reader.buffer_position()),
            )
        })?;
        let end = reader.buffer_position() as usize;

        let node = match event {
            Event::Start(tag) => {
                stack.push(Element::open(source_name, &tag, start)?);
                continue;
            }
            Event::Empty(tag) => {
                let mut el = Element::open(source_name, &tag, start)?;
                el.span.end = end;
                Node::Element(el)
            }
            Event::End(_) => {
                let mut el = stack.pop().ok_or_else(|| {
                    MigrateError::malformed(source_name, "unbalanced closing tag")
                })?;
                el.span.end = end;
                Node::Element(el)
            }
            Event::Text(t) => Node::Text {
                text: t
                    .unescape()
                    .map_err(|e| MigrateError::malformed(source_name, e.to_string()))?
                    .into_owned(),
                span: start..end,
            },
            Event::CData(c) => Node::Text {
                text: String::from_utf8_lossy(&c).into_owned(),
                span: start..end,
            },
            Event::Comment(_) => Node::Comment,
            Event::Eof => break,
            _ => Node::Other,
        };
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => top.push(node),
        }
    }

    if let Some(open) = stack.last() {
        return Err(MigrateError::malformed(
            source_name,
            format!("unclosed element <{}>", open.name),
        ));
    }
    top.into_iter()
        .find_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
        .ok_or_else(|| MigrateError::malformed(source_name, "no root element"))
}

// ── Record building ────────────────────────────────────────────────────────

struct Builder<'a> {
    source_name: &'a str,
    namespace: &'a str,
    ctx: &'a Context<'a>,
}

impl Builder<'_> {
    fn collect(&self, el: &Element, out: &mut Vec<Record>) -> Result<()> {
        for child in el.elements() {
            match child.name.as_str() {
                "record" => out.push(self.record(child)?),
                "function" | "delete" | "field" => {}
                _ => self.collect(child, out)?,
            }
        }
        Ok(())
    }

    fn record(&self, el: &Element) -> Result<Record> {
        let id = el.attr("id").or_else(|| el.attr("name")).unwrap_or("");
        let kind = el.attr("model").unwrap_or("");
        let mut record = Record::new(kind, id, self.namespace);
        for child in el.elements().filter(|c| c.name == "field") {
            let field = self.field(child)?;
            record.append(field, self.ctx)?;
        }
        Ok(record)
    }

    fn field(&self, el: &Element) -> Result<Field> {
        let name = el.attr("name").or_else(|| el.attr("id")).unwrap_or("");
        let nested: Vec<&Element> = el.elements().filter(|c| c.name == "record").collect();
        if !nested.is_empty() {
            let edges = nested
                .into_iter()
                .map(|sub| {
                    Ok(Edge::Create {
                        payload: Payload::Record(Box::new(self.record(sub)?)),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Field::evaluated(name, Value::Relation(edges)));
        }

        let content = el.text();
        let source = FieldSource {
            text: el.attr("text").unwrap_or(&content),
            reference: el.attr("ref").unwrap_or(""),
            expression: el.attr("eval").unwrap_or(""),
            unquoted: el.attr("unquoted").is_some_and(|v| !v.is_empty()),
        };
        Field::from_source(name, source).map_err(|message| {
            MigrateError::malformed(self.source_name, format!("field '{}': {}", name, message))
        })
    }
}

// ── Filtering ──────────────────────────────────────────────────────────────

/// One change to the source text. An empty `text` drops the span.
#[derive(Debug)]
struct Edit {
    span: Range<usize>,
    text: String,
}

impl Builder<'_> {
    /// Edits dropping template declarations below `el`. A dropped span is
    /// widened over the whitespace that precedes it.
    fn edits(&self, source: &str, el: &Element, out: &mut Vec<Edit>) -> Result<()> {
        let mut preceding_blank: Option<usize> = None;
        for node in &el.children {
            match node {
                Node::Element(child) if child.is_template_declaration() => {
                    match self.reloaded_call(source, child)? {
                        Some(text) => out.push(Edit {
                            span: child.span.clone(),
                            text,
                        }),
                        None => out.push(Edit {
                            span: preceding_blank.unwrap_or(child.span.start)..child.span.end,
                            text: String::new(),
                        }),
                    }
                    preceding_blank = None;
                }
                Node::Element(child) => {
                    self.edits(source, child, out)?;
                    preceding_blank = None;
                }
                Node::Text { text, span } if text.trim().is_empty() => {
                    preceding_blank = Some(span.start);
                }
                _ => preceding_blank = None,
            }
        }
        Ok(())
    }

    /// Replacement for a `try_loading` call that passes companies as its
    /// second argument: the chart is then loaded by qualifier.
    fn reloaded_call(&self, source: &str, el: &Element) -> Result<Option<String>> {
        if el.name != "function" || el.attr("name") != Some("try_loading") {
            return Ok(None);
        }
        let args: Vec<&Element> = el.elements().collect();
        let [chart, companies] = args.as_slice() else {
            return Ok(None);
        };
        let expression = chart.attr("eval").unwrap_or("");
        let chart_id = CHART_REF
            .captures(expression)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .ok_or_else(|| {
                MigrateError::malformed(
                    self.source_name,
                    format!("try_loading: no chart reference in '{}'", expression),
                )
            })?;
        let qualifier = self
            .ctx
            .mapping
            .qualifier(&qualify(chart_id, self.namespace))?;

        let indent = line_indent(source, el.span.start);
        Ok(Some(format!(
            "<function model=\"account.chart.template\" name=\"try_loading\">\n\
             {inner}<value eval=\"[]\"/>\n\
             {inner}<value>{qualifier}</value>\n\
             {inner}{companies}\n\
             {indent}</function>",
            inner = format!("{}    ", indent),
            qualifier = qualifier,
            companies = &source[companies.span.clone()],
            indent = indent,
        )))
    }
}

/// Whitespace between the start of the line holding `pos` and `pos`.
fn line_indent(source: &str, pos: usize) -> &str {
    let line_start = source[..pos].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &source[line_start..pos];
    if prefix.trim().is_empty() {
        prefix
    } else {
        ""
    }
}

fn is_empty_container(el: &Element, removed: &HashSet<usize>) -> bool {
    CONTAINERS.contains(&el.name.as_str())
        && el.children.iter().all(|node| match node {
            Node::Element(child) => {
                removed.contains(&child.span.end) || is_empty_container(child, removed)
            }
            Node::Comment | Node::Text { .. } => true,
            Node::Other => false,
        })
}

fn splice(source: &str, edits: &[Edit]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for edit in edits {
        out.push_str(&source[cursor..edit.span.start]);
        out.push_str(&edit.text);
        cursor = edit.span.end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// Decode one tree document of `namespace`.
pub fn decode(
    source_name: &str,
    text: &str,
    namespace: &str,
    ctx: &Context<'_>,
) -> Result<TreeDocument> {
    let root = read_tree(source_name, text)?;

    let builder = Builder {
        source_name,
        namespace,
        ctx,
    };
    let mut records = Vec::new();
    if root.name == "record" {
        records.push(builder.record(&root)?);
    } else {
        builder.collect(&root, &mut records)?;
    }

    let mut edits = Vec::new();
    builder.edits(text, &root, &mut edits)?;
    edits.sort_by_key(|edit| edit.span.start);
    let removed: HashSet<usize> = edits
        .iter()
        .filter(|edit| edit.text.is_empty())
        .map(|edit| edit.span.end)
        .collect();

    let outcome = if is_empty_container(&root, &removed) {
        Outcome::Removed
    } else if edits.is_empty() {
        Outcome::Unchanged
    } else {
        Outcome::Rewritten(splice(text, &edits))
    };
    debug!(
        source = source_name,
        records = records.len(),
        edits = edits.len(),
        "decoded tree document"
    );
    Ok(TreeDocument { records, outcome })
}
