//! Note store seam — the boundary to the authoritative document store.
//!
//! [`NoteStore`] models the two capabilities the sync engine needs from the
//! backing store: a push subscription delivering full snapshots of one
//! owner's notes, and a create call returning the server-assigned
//! identifier. The subscription comes in two flavours because the
//! server-sorted query can be unavailable (a missing composite index, for
//! example): [`NoteStore::subscribe`] prefers a `created_at`-descending
//! server sort, [`NoteStore::subscribe_unordered`] serves the same filtered
//! set with no ordering guarantee and the engine re-sorts client-side.
//!
//! [`MemoryNoteStore`] (available under `#[cfg(test)]`) is an in-memory
//! implementation with scripted failure modes and explicit snapshot pushes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::model::Note;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors surfaced by the authoritative note store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The create call was rejected.
    #[error("note creation rejected: {0}")]
    Rejected(String),

    /// The server-sorted query cannot be served (e.g. missing index).
    #[error("ordered query unavailable: {0}")]
    QueryUnavailable(String),

    /// The subscription feed itself failed.
    #[error("note feed failed: {0}")]
    Feed(String),
}

// ---------------------------------------------------------------------------
// Handler aliases / NoteFields
// ---------------------------------------------------------------------------

/// Callback receiving each full snapshot of the owner's notes.
///
/// Snapshots are complete current state, never deltas; the receiver trusts
/// the latest one wholesale.
pub type SnapshotHandler = Arc<dyn Fn(Vec<Note>) + Send + Sync>;

/// Callback invoked when the subscription errors.
pub type FeedErrorHandler = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Client-supplied fields for a note creation call. The server adds only
/// the identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteFields {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StoreSubscription
// ---------------------------------------------------------------------------

/// Disposer for a store subscription.
///
/// Unsubscribing is idempotent and releases the underlying feed resource;
/// dropping the value unsubscribes too.
pub struct StoreSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl StoreSubscription {
    /// Wrap a cancellation closure.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to release (already-failed feeds).
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Release the feed. Calling this twice has no effect the second time.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ---------------------------------------------------------------------------
// NoteStore trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface to the authoritative note store.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Subscribe to full snapshots of `owner_id`'s notes, server-sorted by
    /// `created_at` descending. `on_error` fires if the sorted query cannot
    /// be served; the caller is expected to fall back to
    /// [`subscribe_unordered`](Self::subscribe_unordered).
    fn subscribe(
        &self,
        owner_id: &str,
        on_snapshot: SnapshotHandler,
        on_error: FeedErrorHandler,
    ) -> StoreSubscription;

    /// Subscribe to the same filtered set with no server-side ordering.
    fn subscribe_unordered(
        &self,
        owner_id: &str,
        on_snapshot: SnapshotHandler,
        on_error: FeedErrorHandler,
    ) -> StoreSubscription;

    /// Create a note in `collection` owned by `owner_id`; returns the
    /// server-assigned identifier — the only new information beyond what the
    /// caller already knows.
    async fn create(
        &self,
        collection: &str,
        fields: NoteFields,
        owner_id: &str,
    ) -> Result<String, StoreError>;
}

// Compile-time assertion: Box<dyn NoteStore> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn NoteStore>) {}
};

// ---------------------------------------------------------------------------
// MemoryNoteStore  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use memory::MemoryNoteStore;


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
