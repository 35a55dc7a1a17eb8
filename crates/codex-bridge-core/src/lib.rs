//! # codex-bridge Core
//!
//! Format-neutral intermediate representation (IR) for Bible texts and
//! scholarly apparatus, shared by every format plugin and every caller.
//!
//! This crate contains no filesystem I/O, process spawning, or async
//! runtime. It defines the data model, the invariants that hold over it,
//! and the loss-classification convention layered on top.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Corpus / Document / ContentBlock / Anchor / Span / Ref |
//! | [`attributes`] | Typed attribute union with an explicit kind tag |
//! | [`loss`] | Loss classes and loss reports |
//! | [`raw`] | Raw-byte preservation for byte-exact round trips |
//! | [`validate`] | Invariant checks over a whole corpus |
//! | [`hash`] | SHA-256 hex helper |

pub mod attributes;
pub mod error;
pub mod hash;
pub mod loss;
pub mod models;
pub mod raw;
pub mod validate;

pub use attributes::{AttributeValue, Attributes, Variant};
pub use error::IrError;
pub use hash::sha256_hex;
pub use loss::{LossClass, LossReport, LostElement};
pub use models::{Anchor, ContentBlock, Corpus, Document, Ref, Span, Token};
pub use validate::Violation;
