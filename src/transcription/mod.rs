//! Live speech-to-text transcription.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │              SpeechTransport (trait)                   │
//! │                       │ open(language)                 │
//! │                       ▼                                │
//! │              SpeechConnection                          │
//! │        audio chunks ──▶│▶── TransportEvent feed        │
//! │                        ▼                               │
//! │             TranscriptionSession                       │
//! │   interim buffer (replaced)  final buffer (appended)   │
//! │                        │                               │
//! │                        ▼                               │
//! │        on_update listeners / stop() → transcript       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport is an external collaborator; the session owns the
//! connection lifecycle and the interim/final bookkeeping.

pub mod session;
pub mod transport;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use session::{
    SessionError, SessionEvent, SessionState, TranscriptionSession, UpdateSubscription,
};
pub use transport::{ConnectError, SpeechConnection, SpeechTransport, TransportEvent};

// test-only re-export so other modules' tests can import ScriptedTransport
// without reaching into `transcription::transport` directly.
#[cfg(test)]
pub use transport::ScriptedTransport;
