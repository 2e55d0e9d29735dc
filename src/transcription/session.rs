//! Live transcription session — lifecycle of one streaming connection.
//!
//! [`TranscriptionSession`] owns exactly one [`SpeechTransport`] connection
//! and turns its raw event feed into two buffers: an interim buffer that is
//! REPLACED on every interim event, and a final buffer that is APPENDED on
//! every final event. Treating interim text as append-only would corrupt the
//! transcript, because the engine rewrites recent words as more audio
//! arrives.
//!
//! The state machine is:
//!
//! ```text
//! Idle ──start()──▶ Connecting ──handshake ok──▶ Streaming
//!                       │                            │
//!                       │ handshake rejected         ├─ stop() ──▶ Closing ──▶ Closed
//!                       ▼                            │
//!                    Errored ◀──── transport drop ───┘
//! ```
//!
//! No transitions leave `Closed` or `Errored`; the caller records the error
//! and may start over with a fresh session object.
//!
//! `stop()` is synchronous: it flushes any trailing interim fragment into the
//! final buffer (recovering spoken content beats discarding it), returns the
//! accumulated transcript, and leaves the close handshake to complete in the
//! background without blocking on network drain.

use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::transport::{ConnectError, SpeechTransport, TransportEvent};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// States of a live transcription session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet started.
    Idle,
    /// Handshake with the speech transport in progress.
    Connecting,
    /// Connection open; audio flowing out, transcript events flowing in.
    Streaming,
    /// `stop()` called; close handshake in flight.
    Closing,
    /// Cleanly finished. Terminal.
    Closed,
    /// Handshake rejected or connection lost mid-stream. Terminal.
    Errored,
}

impl SessionState {
    /// Returns `true` while the session holds (or is acquiring) a live
    /// connection.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Streaming | SessionState::Closing
        )
    }

    /// Returns `true` once the session can never stream again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    /// A short human-readable label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Streaming => "Listening",
            SessionState::Closing => "Finishing",
            SessionState::Closed => "Done",
            SessionState::Errored => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEvent / SessionError
// ---------------------------------------------------------------------------

/// Incremental update delivered to [`TranscriptionSession::on_update`]
/// listeners, at most once per underlying transport event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Provisional text replacing the current interim buffer.
    Interim { text: String },
    /// Stable text appended to the final buffer.
    Final { text: String },
    /// The connection was lost; the session is now `Errored`.
    Dropped { message: String },
}

/// Errors surfaced by [`TranscriptionSession::start`].
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// `start` was called while a connection is open or being opened.
    #[error("a transcription session is already active")]
    AlreadyActive,

    /// `start` was called on a session that already closed or errored.
    #[error("session already finished; create a new session to record again")]
    Finished,

    /// The transport rejected the handshake.
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

// ---------------------------------------------------------------------------
// SessionInner
// ---------------------------------------------------------------------------

type UpdateListener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct SessionInner {
    state: SessionState,
    /// Revisable text for audio the engine has not finalised yet.
    interim: String,
    /// Stable transcript, appended once per final event.
    final_buf: String,
    /// Message recorded when the session enters `Errored`.
    error: Option<String>,
    /// Outgoing audio half of the connection; dropping it closes the stream.
    audio: Option<mpsc::Sender<Vec<u8>>>,
    listeners: Vec<(u64, UpdateListener)>,
    next_listener_id: u64,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            interim: String::new(),
            final_buf: String::new(),
            error: None,
            audio: None,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    /// Append a stable fragment to the final buffer, space-joined.
    fn append_final(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.final_buf.is_empty() {
            self.final_buf.push(' ');
        }
        self.final_buf.push_str(text);
    }

    /// Move any trailing interim fragment into the final buffer.
    fn flush_interim(&mut self) {
        if !self.interim.is_empty() {
            let trailing = std::mem::take(&mut self.interim);
            self.append_final(&trailing);
        }
    }

    fn listener_snapshot(&self) -> Vec<UpdateListener> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

// ---------------------------------------------------------------------------
// UpdateSubscription
// ---------------------------------------------------------------------------

/// Disposer returned by [`TranscriptionSession::on_update`].
///
/// Disposal is idempotent: calling [`dispose`](Self::dispose) twice (or
/// dropping after disposing) has no effect the second time.
pub struct UpdateSubscription {
    inner: Weak<Mutex<SessionInner>>,
    id: u64,
    disposed: bool,
}

impl UpdateSubscription {
    /// Stop delivery to this listener. Safe to call more than once and safe
    /// after the session has ended.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(inner) = self.inner.upgrade() {
            inner
                .lock()
                .unwrap()
                .listeners
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for UpdateSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// TranscriptionSession
// ---------------------------------------------------------------------------

/// Owns the lifecycle of one live speech-to-text connection.
///
/// Create with [`TranscriptionSession::new`], start streaming with
/// [`start`](Self::start), observe text with [`on_update`](Self::on_update)
/// or the buffer accessors, and finish with [`stop`](Self::stop).
pub struct TranscriptionSession {
    transport: Arc<dyn SpeechTransport>,
    inner: Arc<Mutex<SessionInner>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TranscriptionSession {
    /// Create a new session in the `Idle` state.
    pub fn new(transport: Arc<dyn SpeechTransport>) -> Self {
        Self {
            transport,
            inner: Arc::new(Mutex::new(SessionInner::new())),
            pump: Mutex::new(None),
        }
    }

    /// Open the streaming connection.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] — a connection is open or opening.
    /// - [`SessionError::Finished`] — the session already closed or errored.
    /// - [`SessionError::Connect`] — the transport rejected the handshake;
    ///   the session is left `Errored`.
    pub async fn start(&self, language: &str) -> Result<(), SessionError> {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                SessionState::Idle => {}
                SessionState::Closed | SessionState::Errored => {
                    return Err(SessionError::Finished)
                }
                _ => return Err(SessionError::AlreadyActive),
            }
            inner.state = SessionState::Connecting;
        }
        log::debug!("session: Idle → Connecting (language={language})");

        match self.transport.open(language).await {
            Ok(conn) => {
                {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.state != SessionState::Connecting {
                        // stop() raced the handshake; the session already
                        // settled and the fresh connection is discarded.
                        return Ok(());
                    }
                    inner.state = SessionState::Streaming;
                    inner.audio = Some(conn.audio);
                }
                log::debug!("session: Connecting → Streaming");

                let handle = tokio::spawn(pump_events(Arc::clone(&self.inner), conn.events));
                *self.pump.lock().unwrap() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                if inner.state == SessionState::Connecting {
                    // A stop() racing the handshake may have settled the
                    // session already; only an open attempt still in flight
                    // marks it errored.
                    inner.state = SessionState::Errored;
                    inner.error = Some(e.to_string());
                }
                log::error!("session: handshake failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Forward an audio chunk to the transport.
    ///
    /// Chunks sent while the session is not streaming are dropped: audio
    /// racing a `stop()` is expected, not an error.
    pub fn send_audio(&self, chunk: Vec<u8>) {
        let sender = self.inner.lock().unwrap().audio.clone();
        if let Some(tx) = sender {
            let _ = tx.try_send(chunk);
        }
    }

    /// Register a listener invoked at most once per transcript event.
    ///
    /// Returns a disposer; dropping or disposing it stops delivery.
    pub fn on_update<F>(&self, listener: F) -> UpdateSubscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        UpdateSubscription {
            inner: Arc::downgrade(&self.inner),
            id,
            disposed: false,
        }
    }

    /// Finish the session and return the accumulated final transcript.
    ///
    /// Any trailing interim fragment is flushed into the final buffer first:
    /// an interim with no corresponding final event is still spoken content,
    /// and surfacing it beats silently losing it. The close handshake is
    /// fire-and-forget — this method never waits on network drain.
    ///
    /// Calling `stop` on an `Errored` session returns whatever transcript
    /// was captured before the drop; calling it on an `Idle` session returns
    /// an empty string.
    pub fn stop(&self) -> String {
        let transcript = {
            let mut inner = self.inner.lock().unwrap();
            inner.flush_interim();
            if inner.state.is_active() {
                log::debug!("session: {:?} → Closing → Closed", inner.state);
                inner.state = SessionState::Closing;
                // Dropping the audio half is the close handshake.
                inner.audio = None;
                inner.state = SessionState::Closed;
            }
            inner.final_buf.clone()
        };

        if let Some(handle) = self.pump.lock().unwrap().take() {
            handle.abort();
        }

        transcript
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    /// Error message recorded when the session entered `Errored`.
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().error.clone()
    }

    /// The stable transcript accumulated so far.
    pub fn final_transcript(&self) -> String {
        self.inner.lock().unwrap().final_buf.clone()
    }

    /// The current revisable interim fragment.
    pub fn interim_text(&self) -> String {
        self.inner.lock().unwrap().interim.clone()
    }

    /// Stable transcript plus the current interim fragment — what a live
    /// caption view should display.
    pub fn live_transcript(&self) -> String {
        let inner = self.inner.lock().unwrap();
        if inner.interim.is_empty() {
            inner.final_buf.clone()
        } else if inner.final_buf.is_empty() {
            inner.interim.clone()
        } else {
            format!("{} {}", inner.final_buf, inner.interim)
        }
    }
}

// ---------------------------------------------------------------------------
// Event pump
// ---------------------------------------------------------------------------

/// Apply transport events to the session buffers, in emission order.
///
/// Listener callbacks run after the lock is released so a listener may call
/// back into the session without deadlocking.
async fn pump_events(
    inner: Arc<Mutex<SessionInner>>,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let (update, listeners) = {
            let mut guard = inner.lock().unwrap();
            if guard.state != SessionState::Streaming {
                // stop() already settled the transcript.
                break;
            }
            let update = match event {
                TransportEvent::Interim(text) => {
                    guard.interim = text.clone();
                    Some(SessionEvent::Interim { text })
                }
                TransportEvent::Final(text) => {
                    guard.interim.clear();
                    guard.append_final(&text);
                    Some(SessionEvent::Final { text })
                }
                TransportEvent::Closed => {
                    log::debug!("session: engine closed the stream");
                    None
                }
                TransportEvent::Dropped(reason) => {
                    guard.state = SessionState::Errored;
                    guard.error = Some(reason.clone());
                    guard.audio = None;
                    log::error!("session: stream dropped: {reason}");
                    Some(SessionEvent::Dropped { message: reason })
                }
            };
            (update, guard.listener_snapshot())
        };

        let Some(update) = update else {
            // clean close from the engine side: stop pumping
            break;
        };
        let terminal = matches!(update, SessionEvent::Dropped { .. });
        for listener in &listeners {
            listener(&update);
        }
        if terminal {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::transport::ScriptedTransport;

    /// Subscribe a channel-backed listener so tests can await event
    /// processing deterministically before asserting on buffers.
    fn channel_listener(
        session: &TranscriptionSession,
    ) -> (mpsc::UnboundedReceiver<SessionEvent>, UpdateSubscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = session.on_update(move |ev| {
            let _ = tx.send(ev.clone());
        });
        (rx, sub)
    }

    fn scripted_session(script: Vec<TransportEvent>) -> TranscriptionSession {
        TranscriptionSession::new(Arc::new(ScriptedTransport::events(script)))
    }

    #[tokio::test]
    async fn interim_then_final_yields_final_only() {
        let session = scripted_session(vec![
            TransportEvent::Interim("hello wor".into()),
            TransportEvent::Final("hello world.".into()),
        ]);
        let (mut rx, _sub) = channel_listener(&session);

        session.start("en-US").await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Interim {
                text: "hello wor".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Final {
                text: "hello world.".into()
            })
        );

        let transcript = session.stop();
        assert_eq!(transcript, "hello world.");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn interim_events_replace_never_append() {
        let session = scripted_session(vec![
            TransportEvent::Interim("one".into()),
            TransportEvent::Interim("one two".into()),
            TransportEvent::Interim("one two three".into()),
            TransportEvent::Final("one two three.".into()),
        ]);
        let (mut rx, _sub) = channel_listener(&session);

        session.start("en-US").await.unwrap();
        for _ in 0..4 {
            rx.recv().await.unwrap();
        }

        // Only the final event reaches the persisted transcript.
        assert_eq!(session.stop(), "one two three.");
    }

    #[tokio::test]
    async fn multiple_finals_are_appended_in_order() {
        let session = scripted_session(vec![
            TransportEvent::Final("first sentence.".into()),
            TransportEvent::Interim("second".into()),
            TransportEvent::Final("second sentence.".into()),
        ]);
        let (mut rx, _sub) = channel_listener(&session);

        session.start("en-US").await.unwrap();
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }

        assert_eq!(session.stop(), "first sentence. second sentence.");
    }

    #[tokio::test]
    async fn trailing_interim_is_flushed_on_stop() {
        let session = scripted_session(vec![TransportEvent::Interim("hello wor".into())]);
        let (mut rx, _sub) = channel_listener(&session);

        session.start("en-US").await.unwrap();
        rx.recv().await.unwrap();

        // No final event ever arrived; the interim fragment must still be
        // surfaced rather than discarded.
        assert_eq!(session.stop(), "hello wor");
    }

    #[tokio::test]
    async fn transport_drop_moves_to_errored_and_keeps_transcript() {
        let session = scripted_session(vec![
            TransportEvent::Final("kept before the drop.".into()),
            TransportEvent::Dropped("connection reset".into()),
        ]);
        let (mut rx, _sub) = channel_listener(&session);

        session.start("en-US").await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::Dropped {
                message: "connection reset".into()
            })
        );

        assert_eq!(session.state(), SessionState::Errored);
        assert_eq!(session.last_error().as_deref(), Some("connection reset"));
        // stop() on an errored session still returns the captured text.
        assert_eq!(session.stop(), "kept before the drop.");
        assert_eq!(session.state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn start_twice_is_already_active() {
        let session = scripted_session(vec![]);
        session.start("en-US").await.unwrap();
        let err = session.start("en-US").await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyActive));
    }

    #[tokio::test]
    async fn start_after_stop_is_finished() {
        let session = scripted_session(vec![]);
        session.start("en-US").await.unwrap();
        session.stop();
        let err = session.start("en-US").await.unwrap_err();
        assert!(matches!(err, SessionError::Finished));
    }

    #[tokio::test]
    async fn handshake_rejection_surfaces_connect_error() {
        let session = TranscriptionSession::new(Arc::new(ScriptedTransport::failing(
            ConnectError::Rejected("invalid key".into()),
        )));

        let err = session.start("en-US").await.unwrap_err();
        assert!(matches!(err, SessionError::Connect(_)));
        assert_eq!(session.state(), SessionState::Errored);
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn stop_on_idle_returns_empty() {
        let session = scripted_session(vec![]);
        assert_eq!(session.stop(), "");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn disposed_listener_receives_nothing_more() {
        let session = scripted_session(vec![
            TransportEvent::Final("one.".into()),
            TransportEvent::Final("two.".into()),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = session.on_update(move |ev| {
            let _ = tx.send(ev.clone());
        });
        sub.dispose();
        sub.dispose(); // second disposal is a no-op

        // A second, live listener tells us when the pump has applied the
        // whole script.
        let (mut done_rx, _keep) = channel_listener(&session);

        session.start("en-US").await.unwrap();
        done_rx.recv().await.unwrap();
        done_rx.recv().await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(session.stop(), "one. two.");
    }

    #[tokio::test]
    async fn live_transcript_combines_final_and_interim() {
        let session = scripted_session(vec![
            TransportEvent::Final("first.".into()),
            TransportEvent::Interim("seco".into()),
        ]);
        let (mut rx, _sub) = channel_listener(&session);

        session.start("en-US").await.unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        assert_eq!(session.live_transcript(), "first. seco");
        assert_eq!(session.final_transcript(), "first.");
        assert_eq!(session.interim_text(), "seco");
    }

    #[test]
    fn state_predicates() {
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Streaming.is_active());
        assert!(SessionState::Closing.is_active());
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Errored.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
    }
}
