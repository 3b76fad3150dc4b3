//! Content-script side of the pipeline.
//!
//! One [`ContentScript`] lives per document. It places CSS directly into
//! the page, delegates JS to the background, and keeps a per-document
//! de-duplication table keyed by `(kind, config id, item name)`. A
//! navigation creates a fresh instance, so the table never needs
//! persisting.

mod document;
mod script;

pub use document::{Document, MemoryDocument, Placement, StyleElement};
pub use script::{ArtifactKind, ContentScript, CssOutcome, InjectedKey, InjectionSummary};
