//! Shared tournament state
//!
//! Single authoritative-for-this-client snapshot of the tournament,
//! observed by UIs and mutated only by the reconciler. Every successful
//! apply notifies all observers synchronously before the triggering
//! operation returns, and observers always read a whole snapshot, so a
//! torn/partial update is never visible. No operation here performs I/O.

use tokio::sync::watch;
use wjs_common::models::{CalculatedScores, Division, Participant, Score};
use wjs_common::Error;

/// Phase of the current participant-scoring session.
///
/// Errors are attributes of the snapshot (`last_error`), never phases: a
/// failed transition leaves the phase unchanged so the same intent can be
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    /// A division is proposed locally but not yet committed to the service
    DivisionSelected,
    /// A participant is proposed/known active; scores not yet loaded
    ParticipantSelected,
    ScoresLoading,
    ScoresLoaded,
    Calculating,
    Calculated,
    Publishing,
    /// Terminal moment of a session; the reconciler immediately returns to
    /// Idle after clearing the session fields
    Published,
}

/// Current tournament view for this client
#[derive(Debug, Clone, Default)]
pub struct TournamentSnapshot {
    pub divisions: Vec<Division>,
    pub selected_division: Option<Division>,
    pub participants: Vec<Participant>,
    pub active_participant: Option<Participant>,
    pub on_deck_participant: Option<Participant>,
    /// Scores fetched for the active participant
    pub scores: Vec<Score>,
    /// Derived totals from the most recent aggregation, if any
    pub calculated: Option<CalculatedScores>,
    /// Most recent failure; cleared when the failed intent later succeeds
    pub last_error: Option<Error>,
    pub phase: SessionPhase,
}

/// Tournament state store
///
/// Wraps the snapshot in a watch channel: `apply` mutates in place and
/// marks the value changed before returning, `snapshot` clones a
/// consistent copy, `observe` hands out a receiver for change
/// notifications. The apply operation is crate-private so only the
/// reconciler can mutate state.
pub struct TournamentStore {
    tx: watch::Sender<TournamentSnapshot>,
}

impl TournamentStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TournamentSnapshot::default());
        Self { tx }
    }

    /// Apply a patch to the snapshot, notifying observers synchronously
    pub(crate) fn apply(&self, patch: impl FnOnce(&mut TournamentSnapshot)) {
        self.tx.send_modify(patch);
    }

    /// Consistent copy of the current snapshot
    pub fn snapshot(&self) -> TournamentSnapshot {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot changes
    pub fn observe(&self) -> watch::Receiver<TournamentSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for TournamentStore {
    fn default() -> Self {
        Self::new()
    }
}
