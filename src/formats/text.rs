//! Verse-block assembly and the reverse walk used by emitters.
//!
//! Extractors feed marker-free text into a [`BlockBuilder`], which
//! normalises whitespace, tracks character offsets for tokens, and turns
//! into a [`ContentBlock`] carrying one `VERSE` span. Emitters go the
//! other way with [`verse_ref`], [`notes`], [`segments`] and [`audit_block`].

use codex_bridge_core::models::span_types;
use codex_bridge_core::{
    Anchor, AttributeValue, ContentBlock, Document, LossReport, Ref, Span, Token,
};

/// Block attribute holding footnote and cross-reference text.
pub const NOTES: &str = "notes";

pub struct BlockBuilder {
    id: String,
    reference: Option<Ref>,
    text: String,
    chars: usize,
    notes: Vec<String>,
    tokens: Vec<Token>,
}

impl BlockBuilder {
    /// A verse block `BOOK.C.V` (or `BOOK.C.V-E` for a bridged verse).
    pub fn verse(book: &str, chapter: u32, verse: u32, verse_end: Option<u32>) -> Self {
        let mut reference = Ref::verse(book, chapter, verse);
        if let Some(end) = verse_end.filter(|e| *e > verse) {
            reference.verse_end = Some(end);
            reference.osis_id = Some(reference.to_osis());
        }
        let id = match reference.verse_end {
            Some(end) => format!("{}.{}.{}-{}", book, chapter, verse, end),
            None => format!("{}.{}.{}", book, chapter, verse),
        };
        Self {
            id,
            reference: Some(reference),
            text: String::new(),
            chars: 0,
            notes: Vec::new(),
            tokens: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.notes.is_empty()
    }

    /// Append text, collapsing every whitespace run to one space. Returns
    /// the character range of the non-space text appended.
    pub fn push_text(&mut self, s: &str) -> (usize, usize) {
        let mut start = None;
        let mut end = self.chars;
        let mut last_space = self.text.is_empty() || self.text.ends_with(' ');
        for c in s.chars() {
            if c.is_whitespace() {
                if !last_space {
                    self.text.push(' ');
                    self.chars += 1;
                    last_space = true;
                }
            } else {
                start.get_or_insert(self.chars);
                self.text.push(c);
                self.chars += 1;
                end = self.chars;
                last_space = false;
            }
        }
        (start.unwrap_or(end), end)
    }

    /// Append a word with lexical data as a [`Token`].
    pub fn push_word(
        &mut self,
        word: &str,
        lemma: Option<String>,
        strongs: Option<String>,
        morph: Option<String>,
    ) {
        let (start, end) = self.push_text(word);
        if start == end {
            return;
        }
        let id = format!("{}.w{}", self.id, self.tokens.len() + 1);
        self.tokens.push(Token {
            id,
            text: word.trim().to_string(),
            start,
            end,
            lemma,
            morph,
            strongs,
        });
    }

    pub fn push_note(&mut self, note: &str) {
        let note = note.split_whitespace().collect::<Vec<_>>().join(" ");
        if !note.is_empty() {
            self.notes.push(note);
        }
    }

    pub fn finish(self) -> ContentBlock {
        let mut block = ContentBlock::new(self.id.clone(), self.text.trim_end());
        if let Some(reference) = self.reference {
            let anchor = format!("{}.a0", self.id);
            block.anchors.push(
                Anchor::new(anchor.clone(), 0)
                    .with_span(Span::new(format!("{}.v", self.id), span_types::VERSE, anchor).with_ref(reference)),
            );
        }
        block.tokens = self.tokens;
        if !self.notes.is_empty() {
            block
                .attributes
                .insert(NOTES, AttributeValue::List(self.notes));
        }
        block
    }
}

/// The reference of a block's first `VERSE` span, if it has chapter and
/// verse.
pub fn verse_ref(block: &ContentBlock) -> Option<&Ref> {
    block
        .spans()
        .filter(|s| s.span_type == span_types::VERSE)
        .filter_map(|s| s.reference.as_ref())
        .find(|r| r.chapter.is_some() && r.verse.is_some())
}

pub fn notes(block: &ContentBlock) -> &[String] {
    block
        .attributes
        .get(NOTES)
        .and_then(|v| v.as_list())
        .unwrap_or_default()
}

/// A block's text cut at token boundaries. Tokens that overlap or fall
/// outside the text are left out and returned separately.
pub fn segments(block: &ContentBlock) -> (Vec<(String, Option<&Token>)>, Vec<&Token>) {
    let chars: Vec<char> = block.text().chars().collect();
    let mut tokens: Vec<&Token> = block.tokens.iter().collect();
    tokens.sort_by_key(|t| t.start);

    let mut out = Vec::new();
    let mut skipped = Vec::new();
    let mut pos = 0;
    for token in tokens {
        if token.start < pos || token.start >= token.end || token.end > chars.len() {
            skipped.push(token);
            continue;
        }
        if token.start > pos {
            out.push((chars[pos..token.start].iter().collect(), None));
        }
        out.push((chars[token.start..token.end].iter().collect(), Some(token)));
        pos = token.end;
    }
    if pos < chars.len() {
        out.push((chars[pos..].iter().collect(), None));
    }
    (out, skipped)
}

/// Record everything in a block that a verse-oriented emitter cannot
/// write: attributes other than `known`, and non-verse spans.
pub fn audit_block(
    report: &mut LossReport,
    doc_index: usize,
    block_index: usize,
    block: &ContentBlock,
    known: &[&str],
) {
    let base = format!("documents[{}].content_blocks[{}]", doc_index, block_index);
    for (name, value) in block.attributes.iter() {
        if known.contains(&name.as_str()) {
            continue;
        }
        report.lose(
            format!("{}.attributes.{}", base, name),
            format!("attribute:{}", value.kind()),
            "no equivalent in target format",
            value.as_text().map(str::to_string),
        );
    }
    for span in block.spans() {
        if span.span_type != span_types::VERSE {
            report.lose(
                format!("{}.spans.{}", base, span.id),
                format!("span:{}", span.span_type),
                "only verse spans are written",
                None,
            );
        }
    }
}

/// Record document attributes other than `known`.
pub fn audit_document(report: &mut LossReport, doc_index: usize, doc: &Document, known: &[&str]) {
    for (name, value) in doc.attributes.iter() {
        if !known.contains(&name.as_str()) {
            report.lose(
                format!("documents[{}].attributes.{}", doc_index, name),
                format!("attribute:{}", value.kind()),
                "no equivalent in target format",
                value.as_text().map(str::to_string),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_bridge_core::LossClass;

    #[test]
    fn whitespace_is_collapsed() {
        let mut b = BlockBuilder::verse("GEN", 1, 1, None);
        b.push_text("In the\n  beginning ");
        b.push_text("God");
        b.push_text(", created");
        let block = b.finish();
        assert_eq!(block.text(), "In the beginning God, created");
        assert_eq!(block.id, "GEN.1.1");
        assert_eq!(verse_ref(&block).unwrap().osis_id.as_deref(), Some("GEN.1.1"));
    }

    #[test]
    fn bridged_verse_id() {
        let block = BlockBuilder::verse("GEN", 1, 1, Some(2)).finish();
        assert_eq!(block.id, "GEN.1.1-2");
        assert_eq!(
            verse_ref(&block).unwrap().osis_id.as_deref(),
            Some("GEN.1.1-GEN.1.2")
        );
    }

    #[test]
    fn tokens_track_char_offsets() {
        let mut b = BlockBuilder::verse("JHN", 1, 1, None);
        b.push_text("Ἐν ἀρχῇ ");
        b.push_word("ἦν", Some("εἰμί".into()), Some("G1510".into()), None);
        b.push_text(" ὁ λόγος");
        let block = b.finish();
        let token = &block.tokens[0];
        let text: String = block
            .text()
            .chars()
            .skip(token.start)
            .take(token.end - token.start)
            .collect();
        assert_eq!(text, "ἦν");

        let (segs, skipped) = segments(&block);
        assert!(skipped.is_empty());
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[1].0, "ἦν");
        assert_eq!(segs[1].1.unwrap().strongs.as_deref(), Some("G1510"));
    }

    #[test]
    fn notes_become_list_attribute() {
        let mut b = BlockBuilder::verse("GEN", 1, 1, None);
        b.push_text("text");
        b.push_note("  Or  from the start ");
        let block = b.finish();
        assert_eq!(notes(&block), ["Or from the start".to_string()]);
    }

    #[test]
    fn audit_reports_unknown_attributes() {
        let mut block = BlockBuilder::verse("GEN", 1, 1, None).finish();
        block.attributes.insert("style", "q1");
        let mut report = LossReport::new("usx", "usfm", LossClass::L1);
        audit_block(&mut report, 0, 0, &block, &[NOTES]);
        assert_eq!(report.loss_class, LossClass::L2);
        assert_eq!(
            report.lost_elements[0].path,
            "documents[0].content_blocks[0].attributes.style"
        );
        assert_eq!(report.lost_elements[0].original_value.as_deref(), Some("q1"));
    }
}
