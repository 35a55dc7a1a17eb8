//! USFM (Unified Standard Format Markers).
//!
//! Extraction keeps the source bytes under `_usfm_raw`, so USFM → IR →
//! USFM is byte-exact. The structured side captures books (`\id`),
//! titles (`\h`, `\toc1`, `\mt`), chapters, verses, word-level lexical
//! data (`\w word|lemma="…" strong="…"\w*`), and footnote and
//! cross-reference text. Section headings and other paratext are recorded
//! as lost elements.

use std::path::Path;

use codex_bridge_core::{Corpus, Document, LossClass, LossReport};

use crate::error::PluginError;
use crate::formats::common;
use crate::formats::text::{self, BlockBuilder};
use crate::protocol::{DetectResult, EmitNativeResult, ExtractIrResult};
use crate::traits::FormatPlugin;

pub const FORMAT: &str = "usfm";

pub struct UsfmPlugin;

impl FormatPlugin for UsfmPlugin {
    fn format(&self) -> &str {
        FORMAT
    }

    fn detect(&self, path: &Path) -> DetectResult {
        let head = match common::sniff_file(path) {
            Ok(head) => head,
            Err(negative) => return negative,
        };
        let head = String::from_utf8_lossy(&head);
        if book_code(&head).is_some() {
            return DetectResult::found(FORMAT, "found \\id marker");
        }
        let has_marker = |m: &str| head.lines().any(|l| l.trim_start().starts_with(m));
        if has_marker("\\c ") && has_marker("\\v ") {
            return DetectResult::found(FORMAT, "found \\c and \\v markers");
        }
        if common::has_extension(path, &["usfm", "sfm"]) {
            return DetectResult::found(FORMAT, "matched .usfm/.sfm extension");
        }
        DetectResult::not_found("no USFM markers found")
    }

    /// Book code from the first `\id` line, else the full file name.
    fn artifact_id(&self, path: &Path, bytes: &[u8]) -> String {
        book_code(&String::from_utf8_lossy(bytes)).unwrap_or_else(|| common::file_name(path))
    }

    fn extract_ir(&self, path: &Path, output_dir: &Path) -> Result<ExtractIrResult, PluginError> {
        let bytes = common::read_input(path)?;
        let fallback_id = common::default_artifact_id(path);

        let mut report = LossReport::new(FORMAT, "ir", LossClass::L1);
        let source = common::decode_text(&bytes, &mut report);
        let mut corpus = parse(&source, &bytes, &fallback_id, &mut report);
        corpus.preserve_raw(FORMAT, &bytes);
        tracing::debug!(
            corpus = %corpus.id,
            documents = corpus.documents.len(),
            blocks = corpus.block_count(),
            "parsed USFM"
        );
        common::finish_extract(corpus, LossClass::L1, report, output_dir)
    }

    fn emit_native(
        &self,
        ir_path: &Path,
        output_dir: &Path,
    ) -> Result<EmitNativeResult, PluginError> {
        common::emit(ir_path, output_dir, FORMAT, FORMAT, |corpus, report| {
            Ok(render(corpus, report).into_bytes())
        })
    }
}

/// First token after the first `\id` marker at the start of a line.
pub fn book_code(content: &str) -> Option<String> {
    content
        .trim_start_matches('\u{feff}')
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("\\id "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
}

// ═══════════════════════════════════════════════════════════════════════
// Lexing
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq)]
enum Item<'a> {
    /// `\name` (`closing` for `\name*`).
    Marker { name: &'a str, closing: bool },
    Text(&'a str),
}

fn lex(source: &str) -> Vec<Item<'_>> {
    let mut items = Vec::new();
    let mut rest = source.trim_start_matches('\u{feff}');
    while !rest.is_empty() {
        match rest.find('\\') {
            Some(0) => {
                let body = &rest[1..];
                let len = body
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '-'))
                    .unwrap_or(body.len());
                let name = &body[..len];
                let mut after = &body[len..];
                let closing = after.starts_with('*');
                if closing {
                    after = &after[1..];
                } else if let Some(c) = after.chars().next().filter(|c| c.is_whitespace()) {
                    // One separator belongs to the marker.
                    after = &after[c.len_utf8()..];
                }
                if name.is_empty() {
                    items.push(Item::Text("\\"));
                } else {
                    items.push(Item::Marker { name, closing });
                }
                rest = after;
            }
            Some(n) => {
                items.push(Item::Text(&rest[..n]));
                rest = &rest[n..];
            }
            None => {
                items.push(Item::Text(rest));
                rest = "";
            }
        }
    }
    items
}

// ═══════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════

/// What the next text item means.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Expect {
    Content,
    Id,
    Chapter,
    Verse,
    Title,
    Heading,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Note {
    Body,
    /// `\fr`/`\xo` origin reference, not part of the note text.
    Origin,
}

struct Parser<'r> {
    corpus: Corpus,
    report: &'r mut LossReport,
    doc: Option<Document>,
    chapter: u32,
    verse: Option<BlockBuilder>,
    note: Option<(Note, String)>,
    /// Attributes of the `\w` word being read.
    word: Option<String>,
    expect: Expect,
    stray: usize,
}

fn parse(source: &str, bytes: &[u8], fallback_id: &str, report: &mut LossReport) -> Corpus {
    let id = book_code(source).unwrap_or_else(|| fallback_id.to_string());
    let mut parser = Parser {
        corpus: Corpus::new(id, FORMAT, bytes),
        report,
        doc: None,
        chapter: 0,
        verse: None,
        note: None,
        word: None,
        expect: Expect::Content,
        stray: 0,
    };
    for item in lex(source) {
        match item {
            Item::Marker { name, closing } => parser.marker(name, closing),
            Item::Text(t) => parser.text(t),
        }
    }
    parser.finish()
}

impl Parser<'_> {
    fn marker(&mut self, name: &str, closing: bool) {
        // `\+w` is a `\w` nested inside another character style.
        let name = name.trim_start_matches('+');
        if closing {
            match name {
                "f" | "fe" | "x" => self.close_note(),
                "w" => self.word = None,
                _ => {}
            }
            return;
        }

        if let Some((state, _)) = self.note.as_mut().filter(|_| !ends_note(name)) {
            *state = if matches!(name, "fr" | "xo") {
                Note::Origin
            } else {
                Note::Body
            };
            return;
        }
        if self.note.is_some() {
            self.end_open_note(&format!("\\{}", name));
        }

        self.expect = match name {
            "id" => {
                self.close_document();
                Expect::Id
            }
            "c" => {
                self.close_verse();
                Expect::Chapter
            }
            "v" => {
                self.close_verse();
                Expect::Verse
            }
            "h" | "toc1" | "mt" | "mt1" => Expect::Title,
            "f" | "fe" | "x" => {
                self.note = Some((Note::Body, String::new()));
                Expect::Content
            }
            "w" => {
                self.word = Some(String::new());
                Expect::Content
            }
            "s" | "s1" | "s2" | "s3" | "ms" | "ms1" | "mr" | "r" | "d" | "sp" | "cl" => {
                Expect::Heading
            }
            "ide" | "rem" | "toc2" | "toc3" | "usfm" | "sts" | "mt2" | "mt3" | "is" | "ip"
            | "imt" | "ie" | "cp" | "ca" | "va" | "vp" => Expect::Ignore,
            _ => Expect::Content,
        };
    }

    fn text(&mut self, t: &str) {
        if let Some((state, buf)) = &mut self.note {
            if *state == Note::Body {
                buf.push_str(t);
            }
            return;
        }
        match std::mem::replace(&mut self.expect, Expect::Content) {
            Expect::Id => {
                let mut parts = t.trim().splitn(2, char::is_whitespace);
                let code = parts.next().unwrap_or_default();
                let mut doc = Document::new(code);
                let description = parts.next().map(str::trim).unwrap_or_default();
                if !description.is_empty() {
                    doc.attributes.insert("description", description);
                }
                self.doc = Some(doc);
                self.chapter = 0;
            }
            Expect::Chapter => {
                let (n, _) = leading_number(t);
                self.chapter = n.unwrap_or(self.chapter + 1);
            }
            Expect::Verse => {
                let trimmed = t.trim_start();
                let (token, rest) = trimmed
                    .split_once(char::is_whitespace)
                    .unwrap_or((trimmed, ""));
                let (start, end) = match token.split_once('-') {
                    Some((a, b)) => (a.parse().ok(), b.parse().ok()),
                    None => (leading_number(token).0, None),
                };
                let book = self
                    .doc
                    .as_ref()
                    .map(|d| d.id.clone())
                    .unwrap_or_else(|| self.corpus.id.clone());
                let verse = start.unwrap_or(1);
                let mut block = BlockBuilder::verse(&book, self.chapter.max(1), verse, end);
                block.push_text(rest);
                self.verse = Some(block);
            }
            Expect::Title => {
                let title = t.trim();
                if let Some(doc) = self.doc.as_mut() {
                    if doc.title.is_none() && !title.is_empty() {
                        doc.title = Some(title.to_string());
                    }
                }
            }
            Expect::Heading => {
                let heading = t.trim();
                if !heading.is_empty() {
                    let path = format!("documents[{}]", self.corpus.documents.len());
                    self.report.lose(
                        path,
                        "heading",
                        "section headings are not modelled",
                        Some(heading.to_string()),
                    );
                }
            }
            Expect::Ignore => {}
            Expect::Content => self.content(t),
        }
    }

    fn content(&mut self, t: &str) {
        match (&mut self.verse, &self.word) {
            (Some(block), Some(_)) => {
                let (word, attrs) = t.split_once('|').unwrap_or((t, ""));
                let (lemma, strong, morph) = word_attributes(attrs);
                if lemma.is_none() && strong.is_none() && morph.is_none() {
                    block.push_text(word);
                } else {
                    block.push_word(word, lemma, strong, morph);
                }
            }
            (Some(block), None) => {
                block.push_text(t);
            }
            (None, _) => {
                if !t.trim().is_empty() {
                    self.stray += 1;
                }
            }
        }
    }

    /// Close a note that was never terminated.
    fn end_open_note(&mut self, closed_at: &str) {
        let within = self.verse.as_ref().map_or("front matter", |v| v.id());
        let message = format!("unterminated note in {} closed at {}", within, closed_at);
        self.report.warn(message);
        self.close_note();
    }

    fn close_note(&mut self) {
        let Some((_, buf)) = self.note.take() else {
            return;
        };
        // The first token is the caller (`+`, `-`, or a character).
        let body = buf
            .trim_start()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        match self.verse.as_mut() {
            Some(block) => block.push_note(body),
            None => self.report.lose(
                format!("documents[{}]", self.corpus.documents.len()),
                "note",
                "note outside any verse",
                Some(body.trim().to_string()),
            ),
        }
    }

    fn close_verse(&mut self) {
        if let Some(block) = self.verse.take() {
            let doc = self
                .doc
                .get_or_insert_with(|| Document::new(self.corpus.id.clone()));
            doc.push_block(block.finish());
        }
    }

    fn close_document(&mut self) {
        self.close_note();
        self.close_verse();
        if let Some(doc) = self.doc.take() {
            if self.corpus.title.is_none() {
                self.corpus.title = doc.title.clone();
            }
            let index = self.corpus.documents.len();
            if let Err(e) = self.corpus.push_document(doc) {
                self.report
                    .lose(format!("documents[{}]", index), "document", e.to_string(), None);
            }
        }
    }

    fn finish(mut self) -> Corpus {
        if self.note.is_some() {
            self.end_open_note("end of input");
        }
        self.close_document();
        if self.stray > 0 {
            self.report.warn(format!(
                "{} text run(s) outside any verse were not captured",
                self.stray
            ));
        }
        self.corpus
    }
}

/// Markers that cannot occur inside a footnote or cross reference, so
/// one left open ends there.
fn ends_note(name: &str) -> bool {
    matches!(
        name,
        "id" | "c" | "v" | "f" | "fe" | "x" | "p" | "m" | "nb" | "b" | "pi" | "pi1" | "pi2"
            | "mi" | "pc" | "pr" | "pm" | "q" | "q1" | "q2" | "q3" | "q4" | "qc" | "qr"
            | "li" | "li1" | "li2" | "h" | "mt" | "mt1" | "s" | "s1" | "s2" | "s3" | "ms"
            | "ms1" | "d" | "sp" | "cl"
    )
}

fn leading_number(s: &str) -> (Option<u32>, &str) {
    let s = s.trim_start();
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    (s[..end].parse().ok(), &s[end..])
}

/// `lemma="…" strong="…" x-morph="…"`, or a bare default lemma.
fn word_attributes(attrs: &str) -> (Option<String>, Option<String>, Option<String>) {
    let attrs = attrs.trim();
    if attrs.is_empty() {
        return (None, None, None);
    }
    if !attrs.contains('=') {
        return (Some(attrs.to_string()), None, None);
    }
    let mut lemma = None;
    let mut strong = None;
    let mut morph = None;
    let mut rest = attrs;
    while let Some((key, after)) = rest.split_once("=\"") {
        let Some((value, tail)) = after.split_once('"') else {
            break;
        };
        match key.trim() {
            "lemma" => lemma = Some(value.to_string()),
            "strong" => strong = Some(value.to_string()),
            "x-morph" | "morph" => morph = Some(value.to_string()),
            _ => {}
        }
        rest = tail;
    }
    (lemma, strong, morph)
}

// ═══════════════════════════════════════════════════════════════════════
// Rendering
// ═══════════════════════════════════════════════════════════════════════

fn render(corpus: &Corpus, report: &mut LossReport) -> String {
    let mut out = String::new();
    for (di, doc) in corpus.documents.iter().enumerate() {
        text::audit_document(report, di, doc, &["description"]);
        out.push_str("\\id ");
        out.push_str(&doc.id);
        if let Some(desc) = doc.attributes.text("description") {
            out.push(' ');
            out.push_str(desc);
        }
        out.push('\n');
        if let Some(title) = &doc.title {
            out.push_str(&format!("\\h {}\n\\mt1 {}\n", title, title));
        }

        let mut chapter = None;
        for (bi, block) in doc.content_blocks.iter().enumerate() {
            text::audit_block(report, di, bi, block, &[text::NOTES]);
            match text::verse_ref(block) {
                Some(r) => {
                    if chapter != r.chapter {
                        chapter = r.chapter;
                        out.push_str(&format!("\\c {}\n\\p\n", r.chapter.unwrap_or(1)));
                    }
                    let number = match (r.verse, r.verse_end) {
                        (Some(v), Some(e)) if e > v => format!("{}-{}", v, e),
                        (Some(v), _) => v.to_string(),
                        (None, _) => String::new(),
                    };
                    out.push_str(&format!("\\v {} ", number));
                }
                None => out.push_str("\\p "),
            }
            render_text(block, report, di, bi, &mut out);
            for note in text::notes(block) {
                out.push_str(&format!("\\f + \\ft {}\\f*", note));
            }
            out.push('\n');
        }
    }
    out
}

fn render_text(
    block: &codex_bridge_core::ContentBlock,
    report: &mut LossReport,
    di: usize,
    bi: usize,
    out: &mut String,
) {
    let (segments, skipped) = text::segments(block);
    for token in skipped {
        report.lose(
            format!("documents[{}].content_blocks[{}].tokens.{}", di, bi, token.id),
            "token",
            "token range overlaps another or lies outside the text",
            Some(token.text.clone()),
        );
    }
    for (segment, token) in segments {
        match token {
            Some(t) => {
                let mut attrs = Vec::new();
                if let Some(l) = &t.lemma {
                    attrs.push(format!("lemma=\"{}\"", l));
                }
                if let Some(s) = &t.strongs {
                    attrs.push(format!("strong=\"{}\"", s));
                }
                if let Some(m) = &t.morph {
                    attrs.push(format!("x-morph=\"{}\"", m));
                }
                if attrs.is_empty() {
                    out.push_str(&segment);
                } else {
                    out.push_str(&format!("\\w {}|{}\\w*", segment, attrs.join(" ")));
                }
            }
            None => out.push_str(&segment),
        }
    }
}
