//! Notes: data model, store seam, and the sync engine.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 NoteStore (trait)                         │
//! │   push snapshots ──▶│◀── create(fields) → id              │
//! │                     ▼                                     │
//! │               NoteSyncEngine                              │
//! │   confirmed notes ──┐                                     │
//! │                     ├─▶ reconcile ─▶ NoteSet (view)       │
//! │   pending writes ───┘                                     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The store is an external collaborator; the engine exclusively owns the
//! pending-write arena and the merge that produces the ordered view.

pub mod model;
pub mod store;
pub mod sync;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use model::{Note, NoteEntry, NoteSet, PendingWrite, WriteStatus};
pub use store::{
    FeedErrorHandler, NoteFields, NoteStore, SnapshotHandler, StoreError, StoreSubscription,
};
pub use sync::{NoteFeed, NoteSyncEngine, WriteError};

// test-only re-export so other modules' tests can import MemoryNoteStore
// without reaching into `notes::store` directly.
#[cfg(test)]
pub use store::MemoryNoteStore;
