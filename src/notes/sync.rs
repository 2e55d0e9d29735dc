//! Note sync engine — optimistic local writes reconciled against the
//! authoritative push feed.
//!
//! [`NoteSyncEngine`] is the only mutator of the merged view. Exactly two
//! triggers touch it — a local [`write`](NoteSyncEngine::write) and an
//! authoritative snapshot — and each is applied as one synchronous merge
//! step under the inner lock, so a push arriving mid-write-submission can
//! never corrupt the pending-write bookkeeping. The lock is never held
//! across an `.await`.
//!
//! # Write lifecycle
//!
//! ```text
//! write(owner, text)
//!   └─▶ PendingWrite {Submitting} merged + published immediately
//!         └─▶ store.create (bounded by write_timeout_secs)
//!               ├─ Ok(id)  → {AwaitingConfirmation}; retired only when the
//!               │             feed echoes the note back (no flicker between
//!               │             "submitted" and "not yet visible")
//!               ├─ Err     → {Failed}, stays visible, WriteError returned
//!               └─ timeout → {Failed}, stays visible, WriteError::Timeout
//! ```
//!
//! # Reconciliation
//!
//! Every snapshot sweeps the pending arena: a pending entry is retired when
//! the snapshot carries a note with the same owner and text whose timestamp
//! falls within the correlation window. The match is content-based because
//! the optimistic side has no server identifier; each confirmed note retires
//! at most one pending entry. The engine trusts the latest snapshot
//! wholesale and never merges two snapshots.
//!
//! # Feed fallback
//!
//! When the server-sorted subscription errors (missing composite index), the
//! engine transparently re-subscribes through the unordered query and
//! re-sorts client-side — same view shape, same ordering, degraded only in
//! staleness. A feed error never replaces a populated view with an empty
//! one; the last known view is kept and the error logged.

use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tokio::sync::watch;

use crate::config::SyncConfig;

use super::model::{Note, NoteSet, PendingWrite, WriteStatus};
use super::store::{FeedErrorHandler, NoteFields, NoteStore, SnapshotHandler, StoreSubscription};

// ---------------------------------------------------------------------------
// WriteError
// ---------------------------------------------------------------------------

/// Errors surfaced by [`NoteSyncEngine::write`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    /// Empty (or whitespace-only) text is not a savable note.
    #[error("cannot save an empty note")]
    EmptyText,

    /// The store rejected the create call.
    #[error("note creation rejected: {0}")]
    Rejected(String),

    /// The create call produced no response within the configured bound.
    #[error("note creation timed out")]
    Timeout,
}

// ---------------------------------------------------------------------------
// EngineInner
// ---------------------------------------------------------------------------

struct EngineInner {
    owner_id: Option<String>,
    /// Latest authoritative snapshot, trusted wholesale.
    confirmed: Vec<Note>,
    /// Arena of optimistic writes, swept on every snapshot.
    pending: Vec<PendingWrite>,
    next_token: u64,
    feed: Option<StoreSubscription>,
    /// Set once the ordered query failed and the unordered path took over.
    fallback_active: bool,
    view_tx: watch::Sender<NoteSet>,
}

impl EngineInner {
    fn publish(&self) {
        self.view_tx
            .send_replace(NoteSet::build(&self.confirmed, &self.pending));
    }
}

// ---------------------------------------------------------------------------
// NoteFeed
// ---------------------------------------------------------------------------

/// Live handle to the merged note view, returned by
/// [`NoteSyncEngine::subscribe`].
///
/// Views are monotonically improving: each emission supersedes the previous
/// one and a transient feed error never regresses a populated view to an
/// empty set. Unsubscribing is idempotent and safe after the underlying
/// feed has already errored.
pub struct NoteFeed {
    rx: watch::Receiver<NoteSet>,
    engine: Weak<Mutex<EngineInner>>,
    active: bool,
}

impl NoteFeed {
    /// The latest merged view.
    pub fn current(&self) -> NoteSet {
        self.rx.borrow().clone()
    }

    /// Wait for the next view change. Returns `false` once the engine is
    /// gone and no further change can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Stop delivery and release the underlying store feed.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        // Take the subscription out under the lock, drop it after releasing:
        // the store-side cancel closure takes the store's own lock.
        let sub = self
            .engine
            .upgrade()
            .and_then(|inner| inner.lock().unwrap().feed.take());
        drop(sub);
    }
}

impl Drop for NoteFeed {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// NoteSyncEngine
// ---------------------------------------------------------------------------

/// Merges the authoritative push feed with locally-buffered optimistic
/// writes into one ordered, deduplicated view.
pub struct NoteSyncEngine {
    store: Arc<dyn NoteStore>,
    config: SyncConfig,
    inner: Arc<Mutex<EngineInner>>,
}

impl NoteSyncEngine {
    /// Create an engine over the given store.
    pub fn new(store: Arc<dyn NoteStore>, config: SyncConfig) -> Self {
        let (view_tx, _) = watch::channel(NoteSet::default());
        Self {
            store,
            config,
            inner: Arc::new(Mutex::new(EngineInner {
                owner_id: None,
                confirmed: Vec::new(),
                pending: Vec::new(),
                next_token: 0,
                feed: None,
                fallback_active: false,
                view_tx,
            })),
        }
    }

    /// Begin listening to the authoritative feed scoped to `owner_id` and
    /// return a live handle to the merged view.
    pub fn subscribe(self: &Arc<Self>, owner_id: &str) -> NoteFeed {
        log::debug!("sync: subscribing to notes for owner {owner_id}");

        // Release any previous feed outside the lock.
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            inner.owner_id = Some(owner_id.to_string());
            inner.fallback_active = false;
            inner.feed.take()
        };
        drop(previous);

        let weak = Arc::downgrade(self);
        let on_snapshot: SnapshotHandler = Arc::new(move |notes| {
            if let Some(engine) = weak.upgrade() {
                engine.apply_snapshot(notes);
            }
        });
        let weak = Arc::downgrade(self);
        let on_error: FeedErrorHandler = Arc::new(move |err| {
            if let Some(engine) = weak.upgrade() {
                engine.ordered_feed_failed(&err);
            }
        });

        let sub = self.store.subscribe(owner_id, on_snapshot, on_error);

        let replaced = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fallback_active {
                // The ordered feed already failed during installation and
                // the unordered fallback holds the feed slot; discard the
                // dead ordered subscription.
                Some(sub)
            } else {
                inner.feed.replace(sub)
            }
        };
        drop(replaced);

        let rx = self.inner.lock().unwrap().view_tx.subscribe();
        NoteFeed {
            rx,
            engine: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    /// Create a note optimistically.
    ///
    /// The pending entry is visible in the merged view before the remote
    /// call is issued, stays visible as `AwaitingConfirmation` after the
    /// call succeeds, and is only retired when the subscription feed
    /// independently confirms the same content. On failure the entry turns
    /// `Failed` and stays visible — the drafted text is never silently
    /// dropped.
    pub async fn write(&self, owner_id: &str, text: &str) -> Result<Note, WriteError> {
        if text.trim().is_empty() {
            return Err(WriteError::EmptyText);
        }

        let created_at = chrono::Utc::now();
        let token = {
            let mut inner = self.inner.lock().unwrap();
            let token = inner.next_token;
            inner.next_token += 1;
            inner.pending.push(PendingWrite {
                token,
                text: text.to_string(),
                created_at,
                owner_id: owner_id.to_string(),
                status: WriteStatus::Submitting,
            });
            inner.publish();
            token
        };
        log::debug!("sync: optimistic write (token={token}, owner={owner_id})");

        let create = self.store.create(
            &self.config.collection,
            NoteFields {
                text: text.to_string(),
                created_at,
            },
            owner_id,
        );
        let bound = std::time::Duration::from_secs(self.config.write_timeout_secs);

        match tokio::time::timeout(bound, create).await {
            Ok(Ok(id)) => {
                let mut inner = self.inner.lock().unwrap();
                // The feed may already have confirmed (and retired) the
                // entry while the ack was in flight; don't resurrect it.
                if let Some(p) = inner.pending.iter_mut().find(|p| p.token == token) {
                    p.status = WriteStatus::AwaitingConfirmation;
                    inner.publish();
                }
                log::debug!("sync: write confirmed by store (token={token}, id={id})");
                Ok(Note {
                    id,
                    text: text.to_string(),
                    created_at,
                    owner_id: owner_id.to_string(),
                })
            }
            Ok(Err(store_err)) => {
                self.mark_failed(token);
                log::warn!("sync: write rejected (token={token}): {store_err}");
                Err(WriteError::Rejected(store_err.to_string()))
            }
            Err(_elapsed) => {
                self.mark_failed(token);
                log::warn!("sync: write timed out after {bound:?} (token={token})");
                Err(WriteError::Timeout)
            }
        }
    }

    /// The latest merged view (also available through [`NoteFeed`]).
    pub fn view(&self) -> NoteSet {
        self.inner.lock().unwrap().view_tx.borrow().clone()
    }

    /// Returns `true` once the unordered fallback query carries the feed.
    pub fn fallback_active(&self) -> bool {
        self.inner.lock().unwrap().fallback_active
    }

    // -----------------------------------------------------------------------
    // Snapshot application
    // -----------------------------------------------------------------------

    /// One synchronous merge step per authoritative snapshot.
    fn apply_snapshot(&self, notes: Vec<Note>) {
        let mut inner = self.inner.lock().unwrap();

        // Sweep the pending arena: each confirmed note retires at most one
        // pending entry, oldest pending first.
        let window = chrono::Duration::seconds(self.config.correlation_window_secs);
        let mut claimed: Vec<usize> = Vec::new();
        let drained: Vec<PendingWrite> = inner.pending.drain(..).collect();
        let mut kept = Vec::with_capacity(drained.len());
        for p in drained {
            let confirmed_by = notes
                .iter()
                .enumerate()
                .find(|(i, n)| !claimed.contains(i) && p.matches(n, window));
            match confirmed_by {
                Some((i, n)) => {
                    claimed.push(i);
                    log::debug!(
                        "sync: pending write retired by authoritative note (token={}, id={})",
                        p.token,
                        n.id
                    );
                }
                None => kept.push(p),
            }
        }
        inner.pending = kept;
        inner.confirmed = notes;
        inner.publish();
    }

    /// Swap the feed to the unordered query after an ordered-feed error.
    fn ordered_feed_failed(self: &Arc<Self>, err: &super::store::StoreError) {
        log::warn!("sync: ordered note feed failed ({err}); falling back to unordered query");

        let owner = { self.inner.lock().unwrap().owner_id.clone() };
        let Some(owner) = owner else {
            return;
        };

        let weak = Arc::downgrade(self);
        let on_snapshot: SnapshotHandler = Arc::new(move |mut notes| {
            // The unordered query gives no ordering guarantee; re-sort
            // client-side so the view is indistinguishable from the sorted
            // path.
            notes.sort_by(|a: &Note, b: &Note| b.created_at.cmp(&a.created_at));
            if let Some(engine) = weak.upgrade() {
                engine.apply_snapshot(notes);
            }
        });
        let on_error: FeedErrorHandler = Arc::new(move |err| {
            // Keep the last known view; an error must never regress a
            // populated view to an empty set.
            log::error!("sync: fallback note feed failed ({err}); keeping last known view");
        });

        let sub = self.store.subscribe_unordered(&owner, on_snapshot, on_error);

        let replaced = {
            let mut inner = self.inner.lock().unwrap();
            inner.fallback_active = true;
            inner.feed.replace(sub)
        };
        drop(replaced);
    }

    fn mark_failed(&self, token: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(p) = inner.pending.iter_mut().find(|p| p.token == token) {
            p.status = WriteStatus::Failed;
            inner.publish();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::store::{MemoryNoteStore, StoreError};
    use async_trait::async_trait;
    use chrono::Utc;

    fn engine_over(store: &Arc<MemoryNoteStore>) -> Arc<NoteSyncEngine> {
        let dyn_store: Arc<dyn NoteStore> = Arc::clone(store) as Arc<dyn NoteStore>;
        Arc::new(NoteSyncEngine::new(dyn_store, SyncConfig::default()))
    }

    fn remote_note(id: &str, text: &str, owner: &str) -> Note {
        Note {
            id: id.into(),
            text: text.into(),
            created_at: Utc::now(),
            owner_id: owner.into(),
        }
    }

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// A store whose create call never resolves — drives the timeout and
    /// visible-while-submitting paths.
    struct StallingStore;

    #[async_trait]
    impl NoteStore for StallingStore {
        fn subscribe(
            &self,
            _owner_id: &str,
            _on_snapshot: SnapshotHandler,
            _on_error: FeedErrorHandler,
        ) -> StoreSubscription {
            StoreSubscription::noop()
        }

        fn subscribe_unordered(
            &self,
            _owner_id: &str,
            _on_snapshot: SnapshotHandler,
            _on_error: FeedErrorHandler,
        ) -> StoreSubscription {
            StoreSubscription::noop()
        }

        async fn create(
            &self,
            _collection: &str,
            _fields: NoteFields,
            _owner_id: &str,
        ) -> Result<String, StoreError> {
            std::future::pending().await
        }
    }

    // -----------------------------------------------------------------------
    // Write lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn write_succeeds_and_awaits_confirmation() {
        let store = MemoryNoteStore::new();
        let engine = engine_over(&store);
        let _feed = engine.subscribe("u1");

        let note = engine.write("u1", "note A").await.unwrap();
        assert_eq!(note.id, "n1");
        assert_eq!(note.text, "note A");

        // Store acked, feed has not confirmed yet: exactly one entry, still
        // pending with AwaitingConfirmation.
        let view = engine.view();
        assert_eq!(view.len(), 1);
        assert_eq!(
            view.entries()[0].status(),
            Some(WriteStatus::AwaitingConfirmation)
        );
        assert_eq!(view.entries()[0].id(), None);
    }

    #[tokio::test]
    async fn snapshot_confirmation_retires_pending_without_duplicate() {
        let store = MemoryNoteStore::new();
        let engine = engine_over(&store);
        let _feed = engine.subscribe("u1");

        engine.write("u1", "note A").await.unwrap();
        store.push_snapshot();

        let view = engine.view();
        assert_eq!(view.len(), 1, "no duplicate after confirmation");
        let entry = &view.entries()[0];
        assert!(!entry.is_pending());
        assert_eq!(entry.id(), Some("n1"));
        assert_eq!(entry.text(), "note A");
    }

    #[tokio::test]
    async fn failed_write_stays_visible_and_returns_error() {
        let store = MemoryNoteStore::new();
        store.fail_creates(StoreError::Rejected("network failure".into()));
        let engine = engine_over(&store);
        let _feed = engine.subscribe("u1");

        let err = engine.write("u1", "note A").await.unwrap_err();
        assert!(matches!(err, WriteError::Rejected(_)));

        // Text not lost: the entry is still in the view, tagged Failed.
        let view = engine.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.entries()[0].status(), Some(WriteStatus::Failed));
        assert_eq!(view.entries()[0].text(), "note A");
    }

    #[tokio::test]
    async fn write_timeout_surfaces_as_timeout_error() {
        let store: Arc<dyn NoteStore> = Arc::new(StallingStore);
        let config = SyncConfig {
            write_timeout_secs: 0,
            ..SyncConfig::default()
        };
        let engine = Arc::new(NoteSyncEngine::new(store, config));

        let err = engine.write("u1", "note A").await.unwrap_err();
        assert_eq!(err, WriteError::Timeout);
        assert_eq!(
            engine.view().entries()[0].status(),
            Some(WriteStatus::Failed)
        );
    }

    #[tokio::test]
    async fn pending_entry_is_visible_while_submitting() {
        let store: Arc<dyn NoteStore> = Arc::new(StallingStore);
        let engine = Arc::new(NoteSyncEngine::new(store, SyncConfig::default()));

        let write_engine = Arc::clone(&engine);
        let handle =
            tokio::spawn(async move { write_engine.write("u1", "note A").await });

        // Let the write task run to its first await (the stalled create);
        // the optimistic entry is inserted before that point.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let view = engine.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.entries()[0].status(), Some(WriteStatus::Submitting));

        handle.abort();
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_any_remote_call() {
        let store = MemoryNoteStore::new();
        let engine = engine_over(&store);

        assert_eq!(
            engine.write("u1", "   ").await.unwrap_err(),
            WriteError::EmptyText
        );
        assert!(engine.view().is_empty());
    }

    #[tokio::test]
    async fn failed_write_is_retired_when_feed_confirms_equivalent_content() {
        // The ack was lost but the create actually landed (or another device
        // wrote the same text): the confirmed copy must replace the error
        // entry instead of duplicating it.
        let store = MemoryNoteStore::new();
        store.fail_creates(StoreError::Rejected("ack lost".into()));
        let engine = engine_over(&store);
        let _feed = engine.subscribe("u1");

        engine.write("u1", "note A").await.unwrap_err();
        store.insert_remote(remote_note("n9", "note A", "u1"));
        store.push_snapshot();

        let view = engine.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view.entries()[0].id(), Some("n9"));
    }

    #[tokio::test]
    async fn one_confirmed_note_retires_at_most_one_pending() {
        let store = MemoryNoteStore::new();
        store.fail_creates(StoreError::Rejected("down".into()));
        let engine = engine_over(&store);
        let _feed = engine.subscribe("u1");

        // Two identical-text failed writes, one confirmed copy.
        engine.write("u1", "same text").await.unwrap_err();
        engine.write("u1", "same text").await.unwrap_err();
        store.insert_remote(remote_note("n1", "same text", "u1"));
        store.push_snapshot();

        let view = engine.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view.iter().filter(|e| e.is_pending()).count(), 1);
    }

    // -----------------------------------------------------------------------
    // Subscription / view delivery
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn subscribe_delivers_authoritative_notes_newest_first() {
        let store = MemoryNoteStore::new();
        let mut a = remote_note("a", "older", "u1");
        a.created_at = Utc::now() - chrono::Duration::seconds(60);
        store.insert_remote(a);
        store.insert_remote(remote_note("b", "newer", "u1"));

        let engine = engine_over(&store);
        let feed = engine.subscribe("u1");

        let view = feed.current();
        let texts: Vec<&str> = view.iter().map(|e| e.text()).collect();
        assert_eq!(texts, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn feed_changed_fires_on_new_snapshot() {
        let store = MemoryNoteStore::new();
        let engine = engine_over(&store);
        let mut feed = engine.subscribe("u1");

        store.insert_remote(remote_note("a", "hello", "u1"));
        store.push_snapshot();

        assert!(feed.changed().await);
        assert_eq!(feed.current().len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_releases_feed() {
        let store = MemoryNoteStore::new();
        let engine = engine_over(&store);
        let mut feed = engine.subscribe("u1");
        assert_eq!(store.subscriber_count(), 1);

        feed.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
        feed.unsubscribe(); // no effect the second time
        assert_eq!(store.subscriber_count(), 0);

        // Snapshots after unsubscribe no longer reach the engine.
        store.insert_remote(remote_note("a", "late", "u1"));
        store.push_snapshot();
        assert!(engine.view().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_after_feed_error_is_safe() {
        let store = MemoryNoteStore::new();
        let engine = engine_over(&store);
        let mut feed = engine.subscribe("u1");

        store.fail_feed_now(StoreError::Feed("connection lost".into()));
        feed.unsubscribe();
        feed.unsubscribe();
    }

    // -----------------------------------------------------------------------
    // Fallback path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn missing_index_falls_back_to_unordered_query() {
        let store = MemoryNoteStore::new();
        store.fail_ordered_queries();
        let mut a = remote_note("a", "older", "u1");
        a.created_at = Utc::now() - chrono::Duration::seconds(60);
        store.insert_remote(a);
        store.insert_remote(remote_note("b", "newer", "u1"));

        let engine = engine_over(&store);
        let feed = engine.subscribe("u1");

        assert!(engine.fallback_active());
        // Same shape, same ordering as the sorted path would have produced.
        let texts: Vec<String> = feed
            .current()
            .iter()
            .map(|e| e.text().to_string())
            .collect();
        assert_eq!(texts, vec!["newer".to_string(), "older".to_string()]);
    }

    #[tokio::test]
    async fn fallback_still_reconciles_pending_writes() {
        let store = MemoryNoteStore::new();
        store.fail_ordered_queries();
        let engine = engine_over(&store);
        let _feed = engine.subscribe("u1");

        engine.write("u1", "note A").await.unwrap();
        store.push_snapshot();

        let view = engine.view();
        assert_eq!(view.len(), 1);
        assert!(!view.entries()[0].is_pending());
    }

    #[tokio::test]
    async fn feed_error_after_data_never_regresses_to_empty() {
        let store = MemoryNoteStore::new();
        store.insert_remote(remote_note("a", "keep me", "u1"));

        let engine = engine_over(&store);
        let feed = engine.subscribe("u1");
        assert_eq!(feed.current().len(), 1);

        // Ordered feed dies; the engine swaps to the unordered query, which
        // re-delivers the same data. The view never goes empty in between.
        store.fail_feed_now(StoreError::Feed("index dropped".into()));
        assert!(engine.fallback_active());
        assert_eq!(feed.current().len(), 1);
        assert_eq!(feed.current().entries()[0].text(), "keep me");
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn view_stays_sorted_across_pending_and_confirmed() {
        let store = MemoryNoteStore::new();
        store.fail_creates(StoreError::Rejected("offline".into()));
        let engine = engine_over(&store);
        let _feed = engine.subscribe("u1");

        let mut old = remote_note("a", "confirmed old", "u1");
        old.created_at = Utc::now() - chrono::Duration::seconds(120);
        store.insert_remote(old);
        store.push_snapshot();

        engine.write("u1", "pending new").await.unwrap_err();

        let view = engine.view();
        assert_eq!(view.entries()[0].text(), "pending new");
        assert_eq!(view.entries()[1].text(), "confirmed old");
    }
}
