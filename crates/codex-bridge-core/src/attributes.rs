//! Typed attribute maps for documents, blocks, and spans.
//!
//! Format-specific payload (paragraph styles, apparatus readings, witness
//! sigla) travels in an [`Attributes`] map. Each value carries an explicit
//! `kind` discriminator on the wire, so readers match on a closed enum
//! instead of probing untyped JSON:
//!
//! ```json
//! { "style": { "kind": "text", "value": "p" },
//!   "variants": { "kind": "variants", "value": [
//!       { "reading": "λογος", "witnesses": ["P66", "B"] } ] } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::IrError;

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Flag(bool),
    List(Vec<String>),
    /// Apparatus readings attested by one or more witnesses.
    Variants(Vec<Variant>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_variants(&self) -> Option<&[Variant]> {
        match self {
            AttributeValue::Variants(v) => Some(v),
            _ => None,
        }
    }

    /// Wire name of the value's kind (`"text"`, `"variants"`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Text(_) => "text",
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Flag(_) => "flag",
            AttributeValue::List(_) => "list",
            AttributeValue::Variants(_) => "variants",
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Flag(b)
    }
}

/// A single apparatus reading and the witnesses that attest it.
///
/// Construction (including deserialization) rejects an empty reading or
/// an empty witness list, so every `Variant` in memory is well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VariantRepr")]
pub struct Variant {
    reading: String,
    witnesses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

#[derive(Deserialize)]
struct VariantRepr {
    reading: String,
    #[serde(default)]
    witnesses: Vec<String>,
    #[serde(default)]
    note: Option<String>,
}

impl TryFrom<VariantRepr> for Variant {
    type Error = IrError;

    fn try_from(repr: VariantRepr) -> Result<Self, Self::Error> {
        let mut variant = Variant::new(repr.reading, repr.witnesses)?;
        variant.note = repr.note;
        Ok(variant)
    }
}

impl Variant {
    pub fn new(
        reading: impl Into<String>,
        witnesses: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, IrError> {
        let reading = reading.into();
        let witnesses: Vec<String> = witnesses.into_iter().map(Into::into).collect();
        if reading.trim().is_empty() {
            return Err(IrError::InvalidVariant("reading is empty".to_string()));
        }
        if witnesses.is_empty() {
            return Err(IrError::InvalidVariant(format!(
                "reading '{}' has no witnesses",
                reading
            )));
        }
        Ok(Self {
            reading,
            witnesses,
            note: None,
        })
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn reading(&self) -> &str {
        &self.reading
    }

    pub fn witnesses(&self) -> &[String] {
        &self.witnesses
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

/// Ordered map of attribute name to typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    /// Shorthand for a `text`-kind lookup.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_text)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
