use thiserror::Error;

use crate::validate::Violation;

/// Errors raised while building, decoding, or checking IR values.
#[derive(Debug, Error)]
pub enum IrError {
    /// An apparatus variant was built without a reading or witnesses.
    #[error("invalid variant: {0}")]
    InvalidVariant(String),

    /// A `_<format>_raw` attribute did not hold valid base64.
    #[error("raw attribute {key} is not valid base64: {source}")]
    RawEncoding {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    /// A reference string could not be parsed as `Book.Chapter.Verse`.
    #[error("invalid OSIS reference: {0}")]
    InvalidRef(String),

    /// A range whose end lies in another chapter or book; `Ref` only
    /// carries an end verse.
    #[error("OSIS range crosses a chapter or book: {0}")]
    UnsupportedRange(String),

    /// A corpus already holds a document with order `u32::MAX`.
    #[error("no document order left for {0}")]
    OrderExhausted(String),

    /// IR JSON did not deserialize.
    #[error("malformed IR document: {0}")]
    Json(#[from] serde_json::Error),

    /// The corpus violates one or more model invariants.
    #[error("corpus {corpus} violates {} invariant(s): {}", .violations.len(), join(.violations))]
    Invalid {
        corpus: String,
        violations: Vec<Violation>,
    },
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
