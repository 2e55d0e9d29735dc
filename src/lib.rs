//! Voice-notes core: dictate notes via live speech transcription, review
//! and edit them with AI assistance, and persist them to a shared
//! multi-device note store.
//!
//! This crate is the orchestration layer only — no UI, no vendor wire
//! protocols. It keeps three concurrent, independently-failing real-time
//! flows coherent:
//!
//! ```text
//! audio ──▶ TranscriptionSession ──▶ transcript
//!                                        │
//!                                        ▼
//!                            NoteCaptureWorkflow
//!                      (review / edit, optional AI transform)
//!                                        │ committed text
//!                                        ▼
//!                               NoteSyncEngine.write()
//!                     optimistic entry visible immediately
//!                                        │
//!              authoritative push feed ──┴─▶ reconciled NoteSet
//! ```
//!
//! * [`transcription`] owns the streaming speech-to-text session: interim
//!   text is replaced as the engine revises it, final text is appended once.
//! * [`notes`] owns the merged note view: locally-buffered optimistic writes
//!   reconciled — not duplicated, not lost, not reordered — against the
//!   authoritative push subscription once it catches up.
//! * [`transform`] talks to the hosted rewrite / translate / summarize
//!   endpoints and collects their streamed replacement text.
//! * [`workflow`] drives record → review → commit-or-discard on top of the
//!   other three.
//! * [`config`] holds the tunables (language hint, timeouts, endpoint URLs)
//!   with TOML persistence.
//!
//! External collaborators (the speech transport, the note store) enter as
//! trait objects injected at construction, so every layer tests in
//! isolation against fakes.

pub mod config;
pub mod notes;
pub mod transcription;
pub mod transform;
pub mod workflow;

// ── Curated re-exports ─────────────────────────────────────────────────────

pub use config::AppConfig;
pub use notes::{Note, NoteEntry, NoteSet, NoteSyncEngine, WriteError, WriteStatus};
pub use transcription::{SessionState, SpeechTransport, TranscriptionSession};
pub use transform::{HttpTransformer, TextTransformer, TransformKind};
pub use workflow::{CaptureError, CaptureState, NoteCaptureWorkflow};
