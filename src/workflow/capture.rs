//! Note capture workflow — drives record → review/edit → commit-or-discard.
//!
//! [`NoteCaptureWorkflow`] composes a [`SpeechTransport`], the
//! [`NoteSyncEngine`] and a [`TextTransformer`], all injected at
//! construction so each can be faked in isolation.
//!
//! # State machine
//!
//! ```text
//! Idle ──start_recording()──▶ Recording ──stop_recording()──▶ Reviewing
//!                                 │            (empty transcript → Idle)
//!                                 │
//!                              discard() ─▶ Idle
//!
//! Reviewing ──transform(kind)──▶ Transforming ──▶ Reviewing
//!     │                               (draft replaced on success,
//!     │                                untouched on failure)
//!     ├─ commit() ──▶ Committing ── ok ──▶ Idle   (cycle committed)
//!     │                   └────── err ──▶ Reviewing (draft preserved)
//!     └─ discard() ──▶ Idle
//! ```
//!
//! A transform is exclusive: while one is in flight the workflow sits in
//! `Transforming` and a second request is rejected. Failed commits and
//! failed transforms never lose the drafted text.

use std::sync::Arc;

use thiserror::Error;

use crate::notes::{Note, NoteSyncEngine, WriteError};
use crate::transcription::{SessionError, SessionState, SpeechTransport, TranscriptionSession};
use crate::transform::{TextTransformer, TransformError, TransformKind};

// ---------------------------------------------------------------------------
// CaptureState
// ---------------------------------------------------------------------------

/// States of one note capture cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Waiting for the user to start dictating.
    Idle,
    /// A live transcription session is running.
    Recording,
    /// The transcript seeded the editable draft; the user is editing.
    Reviewing,
    /// An AI transform of the draft is in flight.
    Transforming,
    /// The draft is being written to the note store.
    Committing,
}

impl CaptureState {
    /// Returns `true` while an operation is in flight and the trigger
    /// controls should be disabled.
    pub fn is_busy(&self) -> bool {
        matches!(self, CaptureState::Transforming | CaptureState::Committing)
    }

    /// A short human-readable label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            CaptureState::Idle => "Idle",
            CaptureState::Recording => "Recording",
            CaptureState::Reviewing => "Reviewing",
            CaptureState::Transforming => "Processing",
            CaptureState::Committing => "Saving",
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors surfaced across the workflow boundary.
///
/// All variants are typed results — nothing panics across this boundary and
/// every failure leaves the drafted text intact.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// `start_recording` called while a cycle is already in progress.
    #[error("a capture cycle is already in progress")]
    NotIdle,

    /// `stop_recording` called with no recording running.
    #[error("no recording in progress")]
    NotRecording,

    /// A review-stage operation called outside `Reviewing`.
    #[error("no draft under review")]
    NotReviewing,

    /// The transcription session could not be started.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The AI transform failed; the draft is unchanged.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// The note store rejected the commit; the draft is preserved.
    #[error(transparent)]
    Write(#[from] WriteError),
}

// ---------------------------------------------------------------------------
// NoteCaptureWorkflow
// ---------------------------------------------------------------------------

/// Drives the user-facing capture sequence for one client.
///
/// Single-caller: all methods take `&mut self` and every await point
/// belongs to exactly one in-flight operation, so the state machine never
/// observes interleaved mutations.
pub struct NoteCaptureWorkflow {
    transport: Arc<dyn SpeechTransport>,
    engine: Arc<NoteSyncEngine>,
    transformer: Arc<dyn TextTransformer>,
    owner_id: String,
    language: String,
    state: CaptureState,
    draft: String,
    session: Option<TranscriptionSession>,
    last_error: Option<String>,
}

impl NoteCaptureWorkflow {
    /// Create a workflow for `owner_id`, dictating in `language`.
    pub fn new(
        transport: Arc<dyn SpeechTransport>,
        engine: Arc<NoteSyncEngine>,
        transformer: Arc<dyn TextTransformer>,
        owner_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            engine,
            transformer,
            owner_id: owner_id.into(),
            language: language.into(),
            state: CaptureState::Idle,
            draft: String::new(),
            session: None,
            last_error: None,
        }
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Start a fresh transcription session. `Idle → Recording`.
    pub async fn start_recording(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Idle {
            return Err(CaptureError::NotIdle);
        }

        let session = TranscriptionSession::new(Arc::clone(&self.transport));
        match session.start(&self.language).await {
            Ok(()) => {
                log::debug!("capture: Idle → Recording");
                self.session = Some(session);
                self.state = CaptureState::Recording;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Finish recording. `Recording → Reviewing`, or straight back to
    /// `Idle` when nothing was transcribed.
    ///
    /// A session that dropped mid-stream still yields its partial
    /// transcript; the drop is recorded in [`last_error`](Self::last_error)
    /// so the caller can prompt the user instead of appearing to hang.
    pub fn stop_recording(&mut self) -> Result<CaptureState, CaptureError> {
        if self.state != CaptureState::Recording {
            return Err(CaptureError::NotRecording);
        }
        let Some(session) = self.session.take() else {
            self.state = CaptureState::Idle;
            return Err(CaptureError::NotRecording);
        };

        let transcript = session.stop();
        if session.state() == SessionState::Errored {
            let message = session
                .last_error()
                .unwrap_or_else(|| "transcription stream dropped".to_string());
            log::warn!("capture: recording ended by stream drop: {message}");
            self.last_error = Some(message);
        }

        if transcript.trim().is_empty() {
            log::debug!("capture: empty transcript, Recording → Idle");
            self.draft.clear();
            self.state = CaptureState::Idle;
            return Ok(CaptureState::Idle);
        }

        log::debug!("capture: Recording → Reviewing ({} chars)", transcript.len());
        self.draft = transcript;
        self.state = CaptureState::Reviewing;
        Ok(CaptureState::Reviewing)
    }

    /// The running session, if any — the presentation layer subscribes to it
    /// for live captions.
    pub fn session(&self) -> Option<&TranscriptionSession> {
        self.session.as_ref()
    }

    /// Forward an audio chunk to the running session.
    pub fn send_audio(&self, chunk: Vec<u8>) {
        if let Some(session) = &self.session {
            session.send_audio(chunk);
        }
    }

    // -----------------------------------------------------------------------
    // Review / transform
    // -----------------------------------------------------------------------

    /// The editable draft.
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the draft with the user's edit. Only meaningful while
    /// `Reviewing`; ignored otherwise.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        if self.state == CaptureState::Reviewing {
            self.draft = text.into();
        }
    }

    /// Apply an AI transform to the draft.
    /// `Reviewing → Transforming → Reviewing`.
    ///
    /// On success the draft is replaced wholesale by the streamed result; on
    /// failure the draft is left untouched and the error recorded. A new
    /// transform cannot be requested while one is in flight — the workflow
    /// is in `Transforming`, not `Reviewing`.
    pub async fn transform(&mut self, kind: TransformKind) -> Result<(), CaptureError> {
        if self.state != CaptureState::Reviewing {
            return Err(CaptureError::NotReviewing);
        }

        self.state = CaptureState::Transforming;
        log::debug!("capture: Reviewing → Transforming ({:?})", kind);
        let result = self.transformer.transform(kind, &self.draft).await;
        self.state = CaptureState::Reviewing;

        match result {
            Ok(replaced) => {
                self.draft = replaced;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                log::warn!("capture: transform failed, draft preserved: {e}");
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commit / discard
    // -----------------------------------------------------------------------

    /// Commit the draft to the note store.
    /// `Reviewing → Committing → Idle`, or back to `Reviewing` on failure
    /// with the draft preserved — the user never loses drafted text on a
    /// failed save.
    pub async fn commit(&mut self) -> Result<Note, CaptureError> {
        if self.state != CaptureState::Reviewing {
            return Err(CaptureError::NotReviewing);
        }

        self.state = CaptureState::Committing;
        log::debug!("capture: Reviewing → Committing");
        match self.engine.write(&self.owner_id, &self.draft).await {
            Ok(note) => {
                log::debug!("capture: committed note {}", note.id);
                self.draft.clear();
                self.state = CaptureState::Idle;
                self.last_error = None;
                Ok(note)
            }
            Err(e) => {
                log::warn!("capture: commit failed, draft preserved: {e}");
                self.state = CaptureState::Reviewing;
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Abandon the current cycle: stop any running session, clear the draft
    /// and transcript, and return to `Idle`.
    pub fn discard(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.stop();
        }
        log::debug!("capture: {:?} → Idle (discarded)", self.state);
        self.draft.clear();
        self.state = CaptureState::Idle;
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    /// Current workflow state.
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Message from the most recent failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Take (and clear) the most recent failure message.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
