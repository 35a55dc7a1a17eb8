//! Loss classification.
//!
//! Every ExtractIR and EmitNative result declares how faithful it is:
//!
//! | Class | Meaning |
//! |-------|---------|
//! | `L0` | Byte-exact round trip (raw bytes preserved and verified) |
//! | `L1` | Structurally faithful regeneration, bytes may differ |
//! | `L2` | Some structure simplified or dropped |
//!
//! Classes are ordered from most to least faithful, so combining two
//! steps is `max`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared fidelity of a conversion. `L0 < L1 < L2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LossClass {
    L0,
    L1,
    L2,
}

impl LossClass {
    /// The less faithful of two classes.
    pub fn worst(self, other: LossClass) -> LossClass {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LossClass::L0 => "L0",
            LossClass::L1 => "L1",
            LossClass::L2 => "L2",
        }
    }
}

impl fmt::Display for LossClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element that did not survive a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LostElement {
    /// Location inside the corpus, e.g. `documents[0].content_blocks[4].attributes.note`.
    pub path: String,
    pub element_type: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
}

/// Loss accounting for a single ExtractIR or EmitNative step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub source_format: String,
    pub target_format: String,
    pub loss_class: LossClass,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lost_elements: Vec<LostElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl LossReport {
    pub fn new(
        source_format: impl Into<String>,
        target_format: impl Into<String>,
        loss_class: LossClass,
    ) -> Self {
        Self {
            source_format: source_format.into(),
            target_format: target_format.into(),
            loss_class,
            lost_elements: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a dropped element. Any dropped element makes the step `L2`.
    pub fn lose(
        &mut self,
        path: impl Into<String>,
        element_type: impl Into<String>,
        reason: impl Into<String>,
        original_value: Option<String>,
    ) {
        self.lost_elements.push(LostElement {
            path: path.into(),
            element_type: element_type.into(),
            reason: reason.into(),
            original_value,
        });
        self.loss_class = self.loss_class.worst(LossClass::L2);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// `None` when the step was a clean `L0` with nothing to say.
    pub fn into_option(self) -> Option<LossReport> {
        if self.loss_class == LossClass::L0
            && self.lost_elements.is_empty()
            && self.warnings.is_empty()
        {
            None
        } else {
            Some(self)
        }
    }
}
