//! Note data model and the derived, ordered note view.
//!
//! A [`Note`] is authoritative: the server assigned its identifier. A
//! [`PendingWrite`] is a note this client saved but the authoritative feed
//! has not yet echoed back; it carries a local correlation token instead of
//! an identifier. [`NoteSet`] is the merged view the presentation layer
//! renders — confirmed notes plus surviving pending writes, newest first.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Note
// ---------------------------------------------------------------------------

/// An authoritative note.
///
/// The identifier is server-assigned and immutable; the text is immutable
/// after commit (edits happen pre-commit only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Server-assigned opaque identifier.
    pub id: String,
    /// Free-form note text.
    pub text: String,
    /// Commit-time timestamp, assigned by the writing client.
    pub created_at: DateTime<Utc>,
    /// Identifier of the authenticated owner.
    pub owner_id: String,
}

// ---------------------------------------------------------------------------
// WriteStatus / PendingWrite
// ---------------------------------------------------------------------------

/// Lifecycle of an optimistic write that has no server identifier yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The create call is in flight.
    Submitting,
    /// The create call succeeded; waiting for the authoritative feed to echo
    /// the note back before retiring the optimistic entry.
    AwaitingConfirmation,
    /// The create call failed. The entry stays visible so the user can see
    /// and retry the failure; it is never silently dropped.
    Failed,
}

impl WriteStatus {
    /// Returns `true` when the write failed and should be rendered as a
    /// retryable error.
    pub fn is_failed(&self) -> bool {
        matches!(self, WriteStatus::Failed)
    }
}

/// A note saved locally but not yet confirmed by the authoritative store.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Locally-generated correlation token, unique per engine instance.
    pub token: u64,
    /// Note text as committed.
    pub text: String,
    /// Commit-time timestamp.
    pub created_at: DateTime<Utc>,
    /// Owner of the note.
    pub owner_id: String,
    /// Where this write currently stands.
    pub status: WriteStatus,
}

impl PendingWrite {
    /// Content-based correlation: the optimistic side has no server
    /// identifier, so a confirmed note supersedes this entry when the owner
    /// and text match and the timestamps fall within `window` of each other.
    pub fn matches(&self, note: &Note, window: Duration) -> bool {
        self.owner_id == note.owner_id
            && self.text == note.text
            && (note.created_at - self.created_at).abs() <= window
    }
}

// ---------------------------------------------------------------------------
// NoteEntry
// ---------------------------------------------------------------------------

/// One row of the merged view: either authoritative or still pending.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteEntry {
    /// Confirmed by the authoritative store.
    Confirmed(Note),
    /// Optimistic local write awaiting confirmation (or failed).
    Pending(PendingWrite),
}

impl NoteEntry {
    /// Note text, regardless of confirmation state.
    pub fn text(&self) -> &str {
        match self {
            NoteEntry::Confirmed(n) => &n.text,
            NoteEntry::Pending(p) => &p.text,
        }
    }

    /// Commit-time timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            NoteEntry::Confirmed(n) => n.created_at,
            NoteEntry::Pending(p) => p.created_at,
        }
    }

    /// Owner of the note.
    pub fn owner_id(&self) -> &str {
        match self {
            NoteEntry::Confirmed(n) => &n.owner_id,
            NoteEntry::Pending(p) => &p.owner_id,
        }
    }

    /// Server identifier — `None` until the store confirms the note.
    pub fn id(&self) -> Option<&str> {
        match self {
            NoteEntry::Confirmed(n) => Some(&n.id),
            NoteEntry::Pending(_) => None,
        }
    }

    /// Returns `true` for entries not yet confirmed by the store.
    pub fn is_pending(&self) -> bool {
        matches!(self, NoteEntry::Pending(_))
    }

    /// Write status for pending entries, `None` for confirmed ones.
    pub fn status(&self) -> Option<WriteStatus> {
        match self {
            NoteEntry::Confirmed(_) => None,
            NoteEntry::Pending(p) => Some(p.status),
        }
    }
}

// ---------------------------------------------------------------------------
// NoteSet
// ---------------------------------------------------------------------------

/// The reconciled, ordered view exposed to the presentation layer.
///
/// Derived on every change — never persisted. Sorted by `created_at`
/// descending; when a confirmed and a pending entry carry the same
/// timestamp, the confirmed one orders first (confirmation always wins once
/// present).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NoteSet {
    entries: Vec<NoteEntry>,
}

impl NoteSet {
    /// Build the merged view from confirmed notes and surviving pending
    /// writes.
    pub fn build(confirmed: &[Note], pending: &[PendingWrite]) -> Self {
        let mut entries: Vec<NoteEntry> = confirmed
            .iter()
            .cloned()
            .map(NoteEntry::Confirmed)
            .chain(pending.iter().cloned().map(NoteEntry::Pending))
            .collect();

        entries.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.is_pending().cmp(&b.is_pending()))
        });

        Self { entries }
    }

    /// The ordered entries, newest first.
    pub fn entries(&self) -> &[NoteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NoteEntry> {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
