//! AI text-transform endpoints (rewrite / translate / summarize).
//!
//! The endpoints are external collaborators: request in, streamed plain-text
//! replacement out. [`TextTransformer`] is the seam the capture workflow
//! depends on; [`HttpTransformer`] is the production implementation.

pub mod client;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use client::{HttpTransformer, TextTransformer, TransformError, TransformKind};
