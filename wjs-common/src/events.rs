//! Live event types for the tournament push channel
//!
//! Provides the shared `LiveEvent` definitions and the `EventBus` used to
//! fan events out inside one client process.
//!
//! # Architecture
//!
//! The remote service pushes named events over a live channel; peers
//! (including this client, after its own writes) emit events back through
//! the same channel. Every event carries a string-keyed payload, but the
//! payload is only a signal-to-refresh: handlers re-read through the data
//! gateway rather than trusting pushed fields, so unknown payload keys are
//! ignored and every field here is optional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::Score;

/// Named events carried by the live channel.
///
/// The wire form is `{"event": <name>, "data": {...}}`, matching the
/// service's emit convention; variant names map to the service's camelCase
/// event names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum LiveEvent {
    /// A participant's complete score set was published as
    /// tournament-of-record. Emitted by this client after a successful
    /// publish; received from peers as a refresh trigger.
    ScorePublished {
        #[serde(default)]
        participant_id: Option<i64>,
        #[serde(default)]
        scores: Vec<Score>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// The active division changed. Emitted by this client after committing
    /// a division activation so peers re-fetch.
    ActiveDivisionUpdated {
        #[serde(default)]
        division_id: Option<i64>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },

    /// The active/on-deck participant pointers changed somewhere.
    /// Handlers re-read tournament details; the pushed ids are not trusted.
    TournamentDetailsUpdated {
        #[serde(default)]
        active_id: Option<i64>,
        #[serde(default)]
        on_deck_id: Option<i64>,
    },

    /// A judge submitted a score for a participant
    ScoreSubmitted {
        #[serde(default)]
        participant_id: Option<i64>,
        #[serde(default)]
        judge: Option<String>,
    },

    /// A judge revised an already-submitted score
    ScoreUpdated {
        #[serde(default)]
        participant_id: Option<i64>,
        #[serde(default)]
        judge: Option<String>,
    },

    /// A deduction applied to a participant's routine changed
    DeductionUpdated {
        #[serde(default)]
        participant_id: Option<i64>,
    },
}

impl LiveEvent {
    /// Get event name as string for filtering and logging
    pub fn event_name(&self) -> &'static str {
        match self {
            LiveEvent::ScorePublished { .. } => "scorePublished",
            LiveEvent::ActiveDivisionUpdated { .. } => "activeDivisionUpdated",
            LiveEvent::TournamentDetailsUpdated { .. } => "tournamentDetailsUpdated",
            LiveEvent::ScoreSubmitted { .. } => "scoreSubmitted",
            LiveEvent::ScoreUpdated { .. } => "scoreUpdated",
            LiveEvent::DeductionUpdated { .. } => "deductionUpdated",
        }
    }
}

/// Central event distribution bus for live events inside one client
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LiveEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LiveEvent,
    ) -> Result<usize, broadcast::error::SendError<LiveEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LiveEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
