//! IR data model.
//!
//! A [`Corpus`] is a self-contained value: it owns its documents, their
//! content blocks, and everything beneath them, with no references out of
//! the tree. It is written to an IR file whole and read back whole.
//!
//! ```text
//! Corpus
//!  └─ Document (order)
//!      └─ ContentBlock (sequence, text, hash)
//!          ├─ Token
//!          └─ Anchor (position)
//!              └─ Span (type, ref)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attributes::Attributes;
use crate::error::IrError;
use crate::hash::sha256_hex;
use crate::loss::LossClass;

/// Well-known span types. Plugins may use others.
pub mod span_types {
    pub const BOOK: &str = "BOOK";
    pub const CHAPTER: &str = "CHAPTER";
    pub const VERSE: &str = "VERSE";
    pub const PARAGRAPH: &str = "PARAGRAPH";
    pub const NOTE: &str = "NOTE";
    pub const VARIANT: &str = "VARIANT";
}

/// Root IR unit: one module (a Bible, a commentary, an apparatus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    pub id: String,
    pub version: String,
    pub module_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rights: Option<String>,
    pub source_format: String,
    /// SHA-256 hex of the bytes read at ingestion time.
    pub source_hash: String,
    pub loss_class: LossClass,
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Open string map. `_<format>_raw` is reserved for preserved source bytes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Corpus {
    /// Start a corpus for `source` bytes read in `source_format`.
    ///
    /// The loss class starts at `L1`; call
    /// [`settle_loss_class`](Corpus::settle_loss_class) once extraction is
    /// finished to promote it to `L0` when the raw bytes were preserved.
    pub fn new(id: impl Into<String>, source_format: impl Into<String>, source: &[u8]) -> Self {
        Self {
            id: id.into(),
            version: "1.0.0".to_string(),
            module_type: "bible".to_string(),
            versification: None,
            language: None,
            title: None,
            description: None,
            publisher: None,
            rights: None,
            source_format: source_format.into(),
            source_hash: sha256_hex(source),
            loss_class: LossClass::L1,
            documents: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Append a document, assigning the next `order` value.
    ///
    /// Orders are monotonic in discovery order and never reused, even if
    /// documents were inserted out of band with higher values. Fails when
    /// an existing document already holds `u32::MAX`.
    pub fn push_document(&mut self, mut document: Document) -> Result<&mut Document, IrError> {
        document.order = match self.documents.iter().map(|d| d.order).max() {
            None => 1,
            Some(highest) => highest
                .checked_add(1)
                .ok_or_else(|| IrError::OrderExhausted(document.id.clone()))?,
        };
        self.documents.push(document);
        let last = self.documents.len() - 1;
        Ok(&mut self.documents[last])
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    pub fn block_count(&self) -> usize {
        self.documents.iter().map(|d| d.content_blocks.len()).sum()
    }

    pub fn to_json_pretty(&self) -> Result<String, IrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse IR JSON and check every invariant before handing it out.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, IrError> {
        let corpus: Corpus = serde_json::from_slice(bytes)?;
        corpus.check()?;
        Ok(corpus)
    }
}

/// One book, section, or other top-level unit of a corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Unique within the owning corpus; assigned by [`Corpus::push_document`].
    pub order: u32,
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            order: 0,
            content_blocks: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Append a block, assigning its 1-based `sequence`.
    pub fn push_block(&mut self, mut block: ContentBlock) -> &mut ContentBlock {
        block.sequence = self.content_blocks.len() as u32 + 1;
        self.content_blocks.push(block);
        let last = self.content_blocks.len() - 1;
        &mut self.content_blocks[last]
    }
}

/// One logical unit of text: a verse, paragraph, or apparatus entry.
///
/// `text` and `hash` are only reachable through methods, so the hash can
/// never drift from the text in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    pub sequence: u32,
    text: String,
    hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<Token>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<Anchor>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl ContentBlock {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = sha256_hex(text.as_bytes());
        Self {
            id: id.into(),
            sequence: 0,
            text,
            hash,
            tokens: Vec::new(),
            anchors: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Replace the text and recompute the hash.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.hash = sha256_hex(self.text.as_bytes());
    }

    pub fn push_str(&mut self, more: &str) {
        let mut text = std::mem::take(&mut self.text);
        text.push_str(more);
        self.set_text(text);
    }

    /// Length of the text in characters, the unit anchor positions use.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// All spans hanging off this block's anchors.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.anchors.iter().flat_map(|a| a.spans.iter())
    }
}

/// Sub-text markup: a word with optional lexical data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub text: String,
    /// Character offsets into the owning block's text.
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lemma: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morph: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strongs: Option<String>,
}

/// A position inside a block's text where spans start or end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    /// Character offset into the owning block's text.
    pub position: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
}

impl Anchor {
    pub fn new(id: impl Into<String>, position: usize) -> Self {
        Self {
            id: id.into(),
            position,
            spans: Vec::new(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.spans.push(span);
        self
    }
}

/// A typed range over the text, e.g. a verse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    #[serde(rename = "type")]
    pub span_type: String,
    pub start_anchor_id: String,
    /// `None` means the span runs to the next span of the same type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_anchor_id: Option<String>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<Ref>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl Span {
    pub fn new(
        id: impl Into<String>,
        span_type: impl Into<String>,
        start_anchor_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            span_type: span_type.into(),
            start_anchor_id: start_anchor_id.into(),
            end_anchor_id: None,
            reference: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_ref(mut self, reference: Ref) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// Canonical locator used to correlate content across formats.
///
/// Stored as given; book codes and versification are not validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub book: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verse_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_verse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osis_id: Option<String>,
}

impl Ref {
    pub fn book(book: impl Into<String>) -> Self {
        Self {
            book: book.into(),
            chapter: None,
            verse: None,
            verse_end: None,
            sub_verse: None,
            osis_id: None,
        }
    }

    /// A single verse with its `osis_id` filled in.
    pub fn verse(book: impl Into<String>, chapter: u32, verse: u32) -> Self {
        let mut r = Self::book(book);
        r.chapter = Some(chapter);
        r.verse = Some(verse);
        r.osis_id = Some(r.to_osis());
        r
    }

    /// Render as `Book[.Chapter[.Verse]]`, with `-Book.Chapter.End` for ranges.
    pub fn to_osis(&self) -> String {
        let mut out = self.book.clone();
        if let Some(c) = self.chapter {
            out.push_str(&format!(".{}", c));
            if let Some(v) = self.verse {
                out.push_str(&format!(".{}", v));
                if let Some(e) = self.verse_end.filter(|e| *e != v) {
                    out.push_str(&format!("-{}.{}.{}", self.book, c, e));
                }
            }
        }
        out
    }

    /// Parse `Book.Chapter.Verse` or a same-chapter range
    /// `Book.Chapter.Verse-Book.Chapter.End` (the end may also be a bare
    /// verse number). Ranges that cross a chapter or book are rejected.
    pub fn parse_osis(s: &str) -> Result<Self, IrError> {
        let invalid = || IrError::InvalidRef(s.to_string());
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (a, Some(b)),
            None => (s, None),
        };

        let mut parts = start.split('.');
        let book = parts.next().filter(|b| !b.is_empty()).ok_or_else(invalid)?;
        let mut r = Self::book(book);
        if let Some(c) = parts.next() {
            r.chapter = Some(c.parse().map_err(|_| invalid())?);
        }
        if let Some(v) = parts.next() {
            r.verse = Some(v.parse().map_err(|_| invalid())?);
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        if let Some(end) = end {
            if r.verse.is_none() {
                return Err(invalid());
            }
            let parts: Vec<&str> = end.split('.').collect();
            let verse_end = match parts.as_slice() {
                [verse] => verse,
                [book, chapter, verse] => {
                    let same_chapter = chapter.parse::<u32>().ok() == r.chapter;
                    if *book != r.book || !same_chapter {
                        return Err(IrError::UnsupportedRange(s.to_string()));
                    }
                    verse
                }
                _ => return Err(invalid()),
            };
            r.verse_end = Some(verse_end.parse().map_err(|_| invalid())?);
        }
        r.osis_id = Some(s.to_string());
        Ok(r)
    }
}
