//! Raw-byte preservation.
//!
//! A plugin that keeps the original source bytes under
//! `attributes["_<format>_raw"]` lets EmitNative of the same format
//! reproduce the input exactly. The value is always standard padded
//! base64, whatever the format.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::IrError;
use crate::hash::sha256_hex;
use crate::loss::LossClass;
use crate::models::Corpus;

/// Attribute key reserved for `format`'s raw bytes.
pub fn raw_key(format: &str) -> String {
    format!("_{}_raw", format)
}

/// Returns `true` for any `_<format>_raw` key.
pub fn is_raw_key(key: &str) -> bool {
    key.len() > "__raw".len() && key.starts_with('_') && key.ends_with("_raw")
}

impl Corpus {
    /// Store `bytes` under `_<format>_raw`.
    pub fn preserve_raw(&mut self, format: &str, bytes: &[u8]) {
        self.attributes.insert(raw_key(format), STANDARD.encode(bytes));
    }

    /// Decode the preserved bytes for `format`, if any.
    pub fn raw_bytes(&self, format: &str) -> Result<Option<Vec<u8>>, IrError> {
        let key = raw_key(format);
        match self.attributes.get(&key) {
            None => Ok(None),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|source| IrError::RawEncoding { key, source }),
        }
    }

    /// `true` when the raw bytes for `format` exist and hash to `source_hash`.
    pub fn is_lossless_for(&self, format: &str) -> bool {
        matches!(
            self.raw_bytes(format),
            Ok(Some(bytes)) if sha256_hex(&bytes) == self.source_hash
        )
    }

    /// Fix the final loss class after extraction.
    ///
    /// `L0` when the source format's raw bytes are preserved and verified,
    /// otherwise `structural`, the class the parsed structure alone earns.
    pub fn settle_loss_class(&mut self, structural: LossClass) -> LossClass {
        self.loss_class = if self.is_lossless_for(&self.source_format) {
            LossClass::L0
        } else {
            structural.worst(LossClass::L1)
        };
        self.loss_class
    }
}
