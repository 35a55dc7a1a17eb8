//! Whole-corpus invariant checks.
//!
//! Run on every IR file read from disk, so a hand-edited or foreign IR
//! document cannot smuggle a stale block hash or a false `L0` claim into
//! an emitter.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::error::IrError;
use crate::hash::{is_sha256_hex, sha256_hex};
use crate::loss::LossClass;
use crate::models::Corpus;

/// A single broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("source_hash '{0}' is not a sha256 hex digest")]
    SourceHashShape(String),

    #[error("document order {order} is used by both '{first}' and '{second}'")]
    DuplicateOrder {
        order: u32,
        first: String,
        second: String,
    },

    #[error("block '{block}' in '{document}' has a hash that does not match its text")]
    BlockHash { document: String, block: String },

    #[error("block '{block}' in '{document}' has sequence {found}, expected {expected}")]
    BlockSequence {
        document: String,
        block: String,
        expected: u32,
        found: u32,
    },

    #[error("anchor '{anchor}' in block '{block}' sits at {position}, past the end of the text")]
    AnchorOutOfRange {
        block: String,
        anchor: String,
        position: usize,
    },

    #[error("span '{span}' ends at unknown anchor '{anchor}'")]
    DanglingEndAnchor { span: String, anchor: String },

    #[error("loss class L0 claimed but no verified _{format}_raw attribute")]
    UnverifiedLossless { format: String },
}

impl Corpus {
    /// Every violated invariant, in tree order. Empty means valid.
    pub fn validate(&self) -> Vec<Violation> {
        let mut out = Vec::new();

        if !is_sha256_hex(&self.source_hash) {
            out.push(Violation::SourceHashShape(self.source_hash.clone()));
        }

        let mut orders: HashMap<u32, &str> = HashMap::new();
        for doc in &self.documents {
            if let Some(first) = orders.insert(doc.order, &doc.id) {
                out.push(Violation::DuplicateOrder {
                    order: doc.order,
                    first: first.to_string(),
                    second: doc.id.clone(),
                });
            }
        }

        let anchor_ids: HashSet<&str> = self
            .documents
            .iter()
            .flat_map(|d| d.content_blocks.iter())
            .flat_map(|b| b.anchors.iter())
            .map(|a| a.id.as_str())
            .collect();

        for doc in &self.documents {
            for (i, block) in doc.content_blocks.iter().enumerate() {
                if block.hash() != sha256_hex(block.text().as_bytes()) {
                    out.push(Violation::BlockHash {
                        document: doc.id.clone(),
                        block: block.id.clone(),
                    });
                }
                let expected = i as u32 + 1;
                if block.sequence != expected {
                    out.push(Violation::BlockSequence {
                        document: doc.id.clone(),
                        block: block.id.clone(),
                        expected,
                        found: block.sequence,
                    });
                }
                let len = block.char_len();
                for anchor in &block.anchors {
                    if anchor.position > len {
                        out.push(Violation::AnchorOutOfRange {
                            block: block.id.clone(),
                            anchor: anchor.id.clone(),
                            position: anchor.position,
                        });
                    }
                }
                for span in block.spans() {
                    if let Some(end) = &span.end_anchor_id {
                        if !anchor_ids.contains(end.as_str()) {
                            out.push(Violation::DanglingEndAnchor {
                                span: span.id.clone(),
                                anchor: end.clone(),
                            });
                        }
                    }
                }
            }
        }

        if self.loss_class == LossClass::L0 && !self.is_lossless_for(&self.source_format) {
            out.push(Violation::UnverifiedLossless {
                format: self.source_format.clone(),
            });
        }

        out
    }

    /// [`validate`](Corpus::validate) as a `Result`.
    pub fn check(&self) -> Result<(), IrError> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(IrError::Invalid {
                corpus: self.id.clone(),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Anchor, ContentBlock, Document, Span};
    use proptest::prelude::*;

    fn sample() -> Corpus {
        let src = b"\\id GEN\n\\c 1\n\\v 1 In the beginning\n";
        let mut corpus = Corpus::new("GEN", "usfm", src);
        let doc = corpus.push_document(Document::new("GEN")).unwrap();
        let block = doc.push_block(ContentBlock::new("GEN.1.1", "In the beginning"));
        block
            .anchors
            .push(Anchor::new("GEN.1.1.a0", 0).with_span(Span::new("GEN.1.1.v", "VERSE", "GEN.1.1.a0")));
        corpus
    }

    #[test]
    fn sample_is_valid() {
        assert!(sample().validate().is_empty());
        assert!(sample().check().is_ok());
    }

    #[test]
    fn stale_hash_from_json_is_caught() {
        let corpus = sample();
        let mut json = serde_json::to_value(&corpus).unwrap();
        json["documents"][0]["content_blocks"][0]["text"] = "tampered".into();
        let bytes = serde_json::to_vec(&json).unwrap();
        let err = Corpus::from_json_slice(&bytes).unwrap_err();
        assert!(err.to_string().contains("does not match its text"));
    }

    #[test]
    fn duplicate_order_is_caught() {
        let mut corpus = sample();
        let mut dup = Document::new("EXO");
        dup.order = 1;
        corpus.documents.push(dup);
        assert!(matches!(
            corpus.validate().as_slice(),
            [Violation::DuplicateOrder { order: 1, .. }]
        ));
    }

    #[test]
    fn false_l0_claim_is_caught() {
        let mut corpus = sample();
        corpus.loss_class = LossClass::L0;
        assert_eq!(
            corpus.validate(),
            vec![Violation::UnverifiedLossless {
                format: "usfm".to_string()
            }]
        );
        corpus.preserve_raw("usfm", b"\\id GEN\n\\c 1\n\\v 1 In the beginning\n");
        assert!(corpus.validate().is_empty());
    }

    #[test]
    fn anchor_past_end_and_dangling_span() {
        let mut corpus = sample();
        let block = &mut corpus.documents[0].content_blocks[0];
        block.anchors.push(Anchor::new("far", 999));
        let mut span = Span::new("s", "NOTE", "far");
        span.end_anchor_id = Some("nowhere".to_string());
        block.anchors[0].spans.push(span);
        let v = corpus.validate();
        assert!(v.iter().any(|x| matches!(x, Violation::AnchorOutOfRange { .. })));
        assert!(v.iter().any(|x| matches!(x, Violation::DanglingEndAnchor { .. })));
    }

    proptest! {
        #[test]
        fn block_hash_always_matches_text(texts in proptest::collection::vec(".*", 1..8)) {
            let mut doc = Document::new("D");
            for (i, t) in texts.iter().enumerate() {
                let block = doc.push_block(ContentBlock::new(format!("b{}", i), t.clone()));
                block.push_str("!");
            }
            for block in &doc.content_blocks {
                prop_assert_eq!(block.hash(), sha256_hex(block.text().as_bytes()));
            }
        }
    }
}
