//! USX (the XML serialisation of USFM).
//!
//! Books come from `<book code="…">`, chapters and verses from the
//! `<chapter>`/`<verse>` milestones (USX 3 end milestones carrying `eid`
//! close the running verse), titles from `h`/`toc1`/`mt` paragraphs, and
//! notes from `<note>`. Words in `<char>` elements with `lemma` or
//! `strong` attributes become tokens.

use std::path::Path;

use codex_bridge_core::{Corpus, Document, LossClass, LossReport};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::PluginError;
use crate::formats::common;
use crate::formats::text::{self, BlockBuilder};
use crate::protocol::{DetectResult, EmitNativeResult, ExtractIrResult};
use crate::traits::FormatPlugin;

pub const FORMAT: &str = "usx";

pub struct UsxPlugin;

impl FormatPlugin for UsxPlugin {
    fn format(&self) -> &str {
        FORMAT
    }

    fn detect(&self, path: &Path) -> DetectResult {
        let head = match common::sniff_file(path) {
            Ok(head) => head,
            Err(negative) => return negative,
        };
        if String::from_utf8_lossy(&head).contains("<usx") {
            return DetectResult::found(FORMAT, "found <usx> root element");
        }
        if common::has_extension(path, &["usx"]) {
            return DetectResult::found(FORMAT, "matched .usx extension");
        }
        DetectResult::not_found("no <usx> root element")
    }

    /// `code` of the first `<book>`, else the file stem.
    fn artifact_id(&self, path: &Path, bytes: &[u8]) -> String {
        first_book_code(&String::from_utf8_lossy(bytes))
            .unwrap_or_else(|| common::default_artifact_id(path))
    }

    fn extract_ir(&self, path: &Path, output_dir: &Path) -> Result<ExtractIrResult, PluginError> {
        let bytes = common::read_input(path)?;
        let mut report = LossReport::new(FORMAT, "ir", LossClass::L1);
        let source = common::decode_text(&bytes, &mut report);
        let mut corpus = parse(&source, &bytes, &common::default_artifact_id(path), &mut report)?;
        corpus.preserve_raw(FORMAT, &bytes);
        common::finish_extract(corpus, LossClass::L1, report, output_dir)
    }

    fn emit_native(
        &self,
        ir_path: &Path,
        output_dir: &Path,
    ) -> Result<EmitNativeResult, PluginError> {
        common::emit(ir_path, output_dir, FORMAT, FORMAT, render)
    }
}

fn first_book_code(source: &str) -> Option<String> {
    let mut reader = Reader::from_str(source);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"book" => {
                return attr(&e, "code").ok().flatten();
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn attr(e: &BytesStart, name: &str) -> Result<Option<String>, PluginError> {
    match e.try_get_attribute(name) {
        Ok(Some(a)) => a
            .unescape_value()
            .map(|v| Some(v.into_owned()))
            .map_err(|err| PluginError::parse(FORMAT, err)),
        Ok(None) => Ok(None),
        Err(err) => Err(PluginError::parse(FORMAT, err)),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
enum Para {
    Title,
    Heading,
    Ignore,
    Content,
}

fn para_kind(style: &str) -> Para {
    match style {
        "h" | "toc1" | "mt" | "mt1" => Para::Title,
        "s" | "s1" | "s2" | "s3" | "ms" | "ms1" | "mr" | "r" | "d" | "sp" | "cl" => Para::Heading,
        "ide" | "rem" | "toc2" | "toc3" | "sts" | "mt2" | "mt3" | "is" | "ip" | "imt" | "ie" => {
            Para::Ignore
        }
        _ => Para::Content,
    }
}

#[derive(Debug)]
enum Frame {
    Root,
    Book,
    Para(Para),
    Note,
    Char {
        origin: bool,
        word: Option<(Option<String>, Option<String>, Option<String>)>,
    },
    Other,
}

struct Parser<'r> {
    corpus: Corpus,
    report: &'r mut LossReport,
    stack: Vec<Frame>,
    doc: Option<Document>,
    chapter: u32,
    verse: Option<BlockBuilder>,
    note: String,
    para_text: String,
    stray: usize,
}

fn parse(
    source: &str,
    bytes: &[u8],
    fallback_id: &str,
    report: &mut LossReport,
) -> Result<Corpus, PluginError> {
    let id = first_book_code(source).unwrap_or_else(|| fallback_id.to_string());
    let mut p = Parser {
        corpus: Corpus::new(id, FORMAT, bytes),
        report,
        stack: Vec::new(),
        doc: None,
        chapter: 0,
        verse: None,
        note: String::new(),
        para_text: String::new(),
        stray: 0,
    };

    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);
    loop {
        let event = reader.read_event().map_err(|e| {
            PluginError::parse(FORMAT, format!("{} at byte {}", e, reader.buffer_position()))
        })?;
        match event {
            Event::Start(e) => {
                let frame = p.open(&e)?;
                p.stack.push(frame);
            }
            Event::Empty(e) => {
                let frame = p.open(&e)?;
                p.stack.push(frame);
                p.close();
            }
            Event::End(_) => p.close(),
            Event::Text(t) => {
                let t = t.unescape().map_err(|e| PluginError::parse(FORMAT, e))?;
                p.text(&t);
            }
            Event::CData(t) => p.text(&String::from_utf8_lossy(&t.into_inner())),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(p.finish())
}

impl Parser<'_> {
    fn open(&mut self, e: &BytesStart) -> Result<Frame, PluginError> {
        let name = e.local_name();
        let name = std::str::from_utf8(name.as_ref()).unwrap_or_default().to_string();
        if self.stack.is_empty() {
            if name != "usx" {
                return Err(PluginError::parse(
                    FORMAT,
                    format!("root element is <{}>, expected <usx>", name),
                ));
            }
            return Ok(Frame::Root);
        }

        Ok(match name.as_str() {
            "book" => {
                self.close_document();
                let code = attr(e, "code")?.unwrap_or_else(|| self.corpus.id.clone());
                self.doc = Some(Document::new(code));
                self.chapter = 0;
                self.para_text.clear();
                Frame::Book
            }
            "chapter" => {
                self.close_verse();
                if attr(e, "eid")?.is_none() {
                    if let Some(n) = attr(e, "number")?.and_then(|n| n.trim().parse().ok()) {
                        self.chapter = n;
                    }
                }
                Frame::Other
            }
            "verse" => {
                self.close_verse();
                if attr(e, "eid")?.is_none() {
                    let number = attr(e, "number")?.unwrap_or_default();
                    let (start, end) = match number.split_once('-') {
                        Some((a, b)) => (a.trim().parse().ok(), b.trim().parse().ok()),
                        None => (number.trim().parse().ok(), None),
                    };
                    let book = self
                        .doc
                        .as_ref()
                        .map(|d| d.id.clone())
                        .unwrap_or_else(|| self.corpus.id.clone());
                    self.verse = Some(BlockBuilder::verse(
                        &book,
                        self.chapter.max(1),
                        start.unwrap_or(1),
                        end,
                    ));
                }
                Frame::Other
            }
            "para" => {
                let style = attr(e, "style")?.unwrap_or_default();
                self.para_text.clear();
                if let Some(block) = self.verse.as_mut() {
                    block.push_text(" ");
                }
                Frame::Para(para_kind(&style))
            }
            "note" => {
                self.note.clear();
                Frame::Note
            }
            "char" => {
                let style = attr(e, "style")?.unwrap_or_default();
                let lemma = attr(e, "lemma")?;
                let strong = attr(e, "strong")?;
                let morph = attr(e, "x-morph")?;
                let word = if lemma.is_some() || strong.is_some() || morph.is_some() {
                    Some((lemma, strong, morph))
                } else {
                    None
                };
                Frame::Char {
                    origin: matches!(style.as_str(), "fr" | "xo"),
                    word,
                }
            }
            _ => Frame::Other,
        })
    }

    fn close(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        match frame {
            Frame::Book => {
                let description = std::mem::take(&mut self.para_text);
                let description = description.trim();
                if let Some(doc) = self.doc.as_mut() {
                    if !description.is_empty() {
                        doc.attributes.insert("description", description);
                    }
                }
            }
            Frame::Para(Para::Title) => {
                let title = std::mem::take(&mut self.para_text);
                if let Some(doc) = self.doc.as_mut() {
                    if doc.title.is_none() && !title.trim().is_empty() {
                        doc.title = Some(title.trim().to_string());
                    }
                }
            }
            Frame::Para(Para::Heading) => {
                let heading = std::mem::take(&mut self.para_text);
                if !heading.trim().is_empty() {
                    let path = format!("documents[{}]", self.corpus.documents.len());
                    self.report.lose(
                        path,
                        "heading",
                        "section headings are not modelled",
                        Some(heading.trim().to_string()),
                    );
                }
            }
            Frame::Note => {
                let note = std::mem::take(&mut self.note);
                match self.verse.as_mut() {
                    Some(block) => block.push_note(&note),
                    None => self.report.lose(
                        format!("documents[{}]", self.corpus.documents.len()),
                        "note",
                        "note outside any verse",
                        Some(note.trim().to_string()),
                    ),
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, t: &str) {
        let mut word = None;
        let in_note = self.in_note();
        for frame in self.stack.iter().rev() {
            match frame {
                Frame::Char { origin: true, .. } if in_note => return,
                Frame::Char { word: Some(w), .. } if word.is_none() => word = Some(w.clone()),
                Frame::Note => {
                    self.note.push_str(t);
                    return;
                }
                Frame::Book => {
                    self.para_text.push_str(t);
                    return;
                }
                Frame::Para(Para::Title) | Frame::Para(Para::Heading) => {
                    self.para_text.push_str(t);
                    return;
                }
                Frame::Para(Para::Ignore) => return,
                _ => {}
            }
        }
        match self.verse.as_mut() {
            Some(block) => match word {
                Some((lemma, strong, morph)) => block.push_word(t, lemma, strong, morph),
                None => {
                    block.push_text(t);
                }
            },
            None => {
                if !t.trim().is_empty() && self.stack.len() > 1 {
                    self.stray += 1;
                }
            }
        }
    }

    fn in_note(&self) -> bool {
        self.stack.iter().any(|f| matches!(f, Frame::Note))
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

// ═══════════════════════════════════════════════════════════════════════
// Rendering
// ═══════════════════════════════════════════════════════════════════════

struct Out(Writer<Vec<u8>>);

impl Out {
    fn event(&mut self, event: Event<'_>) -> Result<(), PluginError> {
        self.0
            .write_event(event)
            .map_err(|e| PluginError::Application(format!("failed to write USX: {}", e)))
    }

    fn newline(&mut self) -> Result<(), PluginError> {
        self.event(Event::Text(BytesText::new("\n")))
    }

    fn element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), PluginError> {
        self.event(Event::Start(BytesStart::new(name).with_attributes(attrs.iter().copied())))?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.event(Event::End(BytesEnd::new(name)))
    }
}

fn render(corpus: &Corpus, report: &mut LossReport) -> Result<Vec<u8>, PluginError> {
    let mut out = Out(Writer::new(Vec::new()));
    out.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    out.newline()?;
    out.event(Event::Start(BytesStart::new("usx").with_attributes([("version", "3.0")])))?;
    out.newline()?;

    for (di, doc) in corpus.documents.iter().enumerate() {
        text::audit_document(report, di, doc, &["description"]);
        let description = doc.attributes.text("description").unwrap_or_default();
        out.element("book", &[("code", doc.id.as_str()), ("style", "id")], description)?;
        out.newline()?;
        if let Some(title) = &doc.title {
            out.element("para", &[("style", "h")], title)?;
            out.newline()?;
            out.element("para", &[("style", "mt1")], title)?;
            out.newline()?;
        }

        let mut chapter = None;
        let mut para_open = false;
        for (bi, block) in doc.content_blocks.iter().enumerate() {
            text::audit_block(report, di, bi, block, &[text::NOTES]);
            let reference = text::verse_ref(block);
            let starts_chapter = reference.map_or(false, |r| r.chapter != chapter);
            if para_open && (starts_chapter || reference.is_none()) {
                out.event(Event::End(BytesEnd::new("para")))?;
                out.newline()?;
                para_open = false;
            }
            if let Some(r) = reference {
                if starts_chapter {
                    chapter = r.chapter;
                    let number = r.chapter.unwrap_or(1).to_string();
                    out.event(Event::Empty(
                        BytesStart::new("chapter")
                            .with_attributes([("number", number.as_str()), ("style", "c")]),
                    ))?;
                    out.newline()?;
                }
            }
            if !para_open {
                out.event(Event::Start(BytesStart::new("para").with_attributes([("style", "p")])))?;
                para_open = true;
            }
            if let Some(r) = reference {
                let number = match (r.verse, r.verse_end) {
                    (Some(v), Some(e)) if e > v => format!("{}-{}", v, e),
                    (Some(v), _) => v.to_string(),
                    (None, _) => String::new(),
                };
                out.event(Event::Empty(
                    BytesStart::new("verse")
                        .with_attributes([("number", number.as_str()), ("style", "v")]),
                ))?;
            }
            render_text(&mut out, block, report, di, bi)?;
            for note in text::notes(block) {
                out.event(Event::Start(
                    BytesStart::new("note").with_attributes([("caller", "+"), ("style", "f")]),
                ))?;
                out.element("char", &[("style", "ft")], note)?;
                out.event(Event::End(BytesEnd::new("note")))?;
            }
            if reference.is_none() {
                out.event(Event::End(BytesEnd::new("para")))?;
                out.newline()?;
                para_open = false;
            } else {
                out.newline()?;
            }
        }
        if para_open {
            out.event(Event::End(BytesEnd::new("para")))?;
            out.newline()?;
        }
    }

    out.event(Event::End(BytesEnd::new("usx")))?;
    out.newline()?;
    Ok(out.0.into_inner())
}

fn render_text(
    out: &mut Out,
    block: &codex_bridge_core::ContentBlock,
    report: &mut LossReport,
    di: usize,
    bi: usize,
) -> Result<(), PluginError> {
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
        let Some(t) = token else {
            out.event(Event::Text(BytesText::new(&segment)))?;
            continue;
        };
        let mut start = BytesStart::new("char");
        start.push_attribute(("style", "w"));
        if let Some(l) = &t.lemma {
            start.push_attribute(("lemma", l.as_str()));
        }
        if let Some(s) = &t.strongs {
            start.push_attribute(("strong", s.as_str()));
        }
        if let Some(m) = &t.morph {
            start.push_attribute(("x-morph", m.as_str()));
        }
        out.event(Event::Start(start))?;
        out.event(Event::Text(BytesText::new(&segment)))?;
        out.event(Event::End(BytesEnd::new("char")))?;
    }
    Ok(())
}
