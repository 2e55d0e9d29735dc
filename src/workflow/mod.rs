//! Note capture workflow.
//!
//! Composes the transcription session, the note sync engine and the AI
//! transformer into the user-facing record → review → commit sequence.

pub mod capture;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use capture::{CaptureError, CaptureState, NoteCaptureWorkflow};
