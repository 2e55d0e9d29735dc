//! Speech transport seam — the boundary to the streaming speech-to-text
//! vendor.
//!
//! [`SpeechTransport`] opens one bidirectional streaming connection and hands
//! back a [`SpeechConnection`]: an audio-chunk sender going out and a
//! [`TransportEvent`] receiver coming back. Vendor framing and audio encoding
//! live entirely behind this trait; the session layer only sees tagged
//! transcript events.
//!
//! [`ScriptedTransport`] (available under `#[cfg(test)]`) replays a fixed
//! event sequence without any network — useful for unit-testing the session
//! and workflow layers against exact interim/final orderings.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// ConnectError
// ---------------------------------------------------------------------------

/// Errors raised while opening a streaming transcription connection.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    /// The transport rejected the handshake (bad credentials, unsupported
    /// language, quota exceeded, …).
    #[error("transcription handshake rejected: {0}")]
    Rejected(String),

    /// The transport could not be reached at all.
    #[error("transcription transport unreachable: {0}")]
    Unreachable(String),
}

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// An asynchronous event emitted by the speech transport.
///
/// Speech engines revise recent words as more audio context arrives, so the
/// interim/final distinction is load-bearing: interim text REPLACES what came
/// before it, final text is stable and appended once.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Provisional text for audio not yet finalised; supersedes any previous
    /// interim text.
    Interim(String),
    /// Stable text the engine will not revise again.
    Final(String),
    /// The engine closed the stream cleanly.
    Closed,
    /// The connection was lost mid-stream. Terminal — no events follow.
    Dropped(String),
}

// ---------------------------------------------------------------------------
// SpeechConnection
// ---------------------------------------------------------------------------

/// One live streaming connection.
///
/// Audio goes out through `audio`; transcript events come back through
/// `events`. Dropping `audio` (or the whole connection) is the close
/// handshake — fire-and-forget, the caller never waits on network drain.
#[derive(Debug)]
pub struct SpeechConnection {
    /// Outgoing audio chunks, vendor encoding opaque to the core.
    pub audio: mpsc::Sender<Vec<u8>>,
    /// Incoming transcript events, in engine emission order.
    pub events: mpsc::Receiver<TransportEvent>,
}

// ---------------------------------------------------------------------------
// SpeechTransport trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for streaming speech-to-text
/// transports.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc<dyn SpeechTransport>` and shared with the capture workflow.
#[async_trait]
pub trait SpeechTransport: Send + Sync {
    /// Open a streaming connection with the given BCP-47 language hint.
    async fn open(&self, language: &str) -> Result<SpeechConnection, ConnectError>;
}

// Compile-time assertion: Box<dyn SpeechTransport> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SpeechTransport>) {}
};

// ---------------------------------------------------------------------------
// ScriptedTransport  (test-only)
// ---------------------------------------------------------------------------

/// A test double that replays a pre-configured event script on `open`.
///
/// The script is delivered through a buffered channel; once drained, the
/// event feed ends as if the engine had closed the stream.
#[cfg(test)]
pub struct ScriptedTransport {
    script: Vec<TransportEvent>,
    fail_open: Option<ConnectError>,
}

#[cfg(test)]
impl ScriptedTransport {
    /// Create a transport that opens successfully and replays `script`.
    pub fn events(script: Vec<TransportEvent>) -> Self {
        Self {
            script,
            fail_open: None,
        }
    }

    /// Create a transport whose handshake always fails with `error`.
    pub fn failing(error: ConnectError) -> Self {
        Self {
            script: Vec::new(),
            fail_open: Some(error),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl SpeechTransport for ScriptedTransport {
    async fn open(&self, _language: &str) -> Result<SpeechConnection, ConnectError> {
        if let Some(e) = &self.fail_open {
            return Err(e.clone());
        }

        let (audio_tx, _audio_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(self.script.len().max(1));
        for ev in self.script.clone() {
            // Capacity covers the whole script, so try_send cannot fail.
            event_tx
                .try_send(ev)
                .expect("scripted event channel overflow");
        }
        // event_tx drops here: the feed ends once the script is drained.

        Ok(SpeechConnection {
            audio: audio_tx,
            events: event_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
