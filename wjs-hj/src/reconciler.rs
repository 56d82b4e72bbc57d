//! Reconciler: the coordination engine
//!
//! Keeps the tournament store consistent with the remote service and with
//! peer clients, and drives the head judge's scoring workflow. Two inputs
//! converge here: locally-originated intents (select/commit division and
//! participant, calculate, publish) and live channel notifications. Both
//! paths write to the same store, so observers never distinguish "this
//! client caused it" from "another client caused it".
//!
//! # Concurrency
//!
//! One externally-triggered operation runs to completion at a time: every
//! intent and event handler serializes through `intent_lock`. Methods with
//! the `_locked` suffix require that lock to be held. A separate in-flight
//! registry, checked *before* waiting on the serial lock, rejects duplicate
//! conflicting intents (a second publish for the same participant while one
//! is outstanding) immediately and without a network call.
//!
//! # Failure policy
//!
//! Every failure is recorded as the store's `last_error` and leaves the
//! responsible state unchanged, so the triggering intent can simply be
//! retried. Errors are attributes of the snapshot, never phases.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::channel::LiveChannel;
use crate::gateway::RemoteGateway;
use crate::state::{SessionPhase, TournamentStore};
use wjs_common::api::types::DetailKey;
use wjs_common::events::LiveEvent;
use wjs_common::models::JudgeCode;
use wjs_common::scoring;
use wjs_common::{Error, Result};

/// Logical operations tracked by the in-flight guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OpKind {
    CommitActiveParticipant,
    SubmitScore,
    Publish,
}

impl OpKind {
    fn as_str(&self) -> &'static str {
        match self {
            OpKind::CommitActiveParticipant => "commit-active-participant",
            OpKind::SubmitScore => "submit-score",
            OpKind::Publish => "publish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct InFlightKey {
    participant_id: i64,
    op: OpKind,
}

/// Removes its key from the registry when the operation completes
struct InFlightGuard<'a> {
    registry: &'a StdMutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.registry.lock() {
            keys.remove(&self.key);
        }
    }
}

/// Core orchestrator for one client process
pub struct Reconciler {
    store: Arc<TournamentStore>,
    gateway: Arc<dyn RemoteGateway>,
    channel: Arc<dyn LiveChannel>,
    intent_lock: Mutex<()>,
    in_flight: StdMutex<HashSet<InFlightKey>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<TournamentStore>,
        gateway: Arc<dyn RemoteGateway>,
        channel: Arc<dyn LiveChannel>,
    ) -> Self {
        Self {
            store,
            gateway,
            channel,
            intent_lock: Mutex::new(()),
            in_flight: StdMutex::new(HashSet::new()),
        }
    }

    /// Record a failure in the store and hand it back to the caller
    fn fail(&self, err: Error) -> Error {
        self.store.apply(|s| s.last_error = Some(err.clone()));
        err
    }

    /// Register an in-flight operation, rejecting duplicates locally
    fn begin_op(&self, key: InFlightKey) -> Result<InFlightGuard<'_>> {
        let mut keys = self
            .in_flight
            .lock()
            .map_err(|_| Error::Internal("in-flight registry poisoned".to_string()))?;
        if !keys.insert(key) {
            return Err(Error::InFlight(format!(
                "{} already outstanding for participant {}",
                key.op.as_str(),
                key.participant_id
            )));
        }
        Ok(InFlightGuard {
            registry: &self.in_flight,
            key,
        })
    }

    // ========================================
    // Division workflow
    // ========================================

    /// Fetch divisions; the server-active one becomes the selection
    pub async fn refresh_divisions(&self) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        self.refresh_divisions_locked().await
    }

    async fn refresh_divisions_locked(&self) -> Result<()> {
        let divisions = self
            .gateway
            .list_divisions()
            .await
            .map_err(|e| self.fail(e))?;
        let selected = divisions.iter().find(|d| d.is_active).cloned();
        self.store.apply(|s| {
            s.divisions = divisions;
            s.selected_division = selected;
            s.last_error = None;
        });
        Ok(())
    }

    /// Propose a division locally. Two-phase: nothing is written to the
    /// service until `commit_active_division`.
    pub async fn select_division(&self, division_id: i64) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        let known = self
            .store
            .snapshot()
            .divisions
            .iter()
            .any(|d| d.id == division_id);
        if !known {
            return Err(self.fail(Error::InvalidState(format!(
                "unknown division {division_id}"
            ))));
        }
        self.store.apply(|s| {
            // Exactly one division is marked active in the local view
            for d in &mut s.divisions {
                d.is_active = d.id == division_id;
            }
            s.selected_division = s.divisions.iter().find(|d| d.id == division_id).cloned();
            s.phase = SessionPhase::DivisionSelected;
            s.last_error = None;
        });
        Ok(())
    }

    /// Commit the proposed division as tournament-active. The server is
    /// the authority on `is_active`; its answer replaces the selection.
    /// Peers are notified and the participant scope is refreshed.
    pub async fn commit_active_division(&self) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        let selected = self
            .store
            .snapshot()
            .selected_division
            .ok_or_else(|| Error::InvalidState("no division selected".to_string()))
            .map_err(|e| self.fail(e))?;

        let division = self
            .gateway
            .set_active_division(selected.id)
            .await
            .map_err(|e| self.fail(e))?;
        let division_id = division.id;
        info!(division_id, name = %division.name, "Active division committed");

        self.store.apply(|s| {
            for d in &mut s.divisions {
                d.is_active = d.id == division_id;
            }
            s.selected_division = Some(division);
            s.last_error = None;
        });

        // Peers cannot know the result of this client's write
        self.channel
            .emit(LiveEvent::ActiveDivisionUpdated {
                division_id: Some(division_id),
                timestamp: Some(chrono::Utc::now()),
            })
            .await
            .map_err(|e| self.fail(e))?;

        self.refresh_participants_locked().await
    }

    // ========================================
    // Participant workflow
    // ========================================

    /// Fetch participants (sorted by display name), then resolve the
    /// active/on-deck pointers against the fresh list
    pub async fn refresh_participants(&self) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        self.refresh_participants_locked().await
    }

    async fn refresh_participants_locked(&self) -> Result<()> {
        let mut participants = self
            .gateway
            .list_participants()
            .await
            .map_err(|e| self.fail(e))?;
        participants.sort_by_key(|p| p.name());
        self.store.apply(|s| {
            s.participants = participants;
            s.last_error = None;
        });
        self.sync_tournament_details_locked().await
    }

    /// Propose a participant as active. Local-only; rejected without a
    /// network call when the participant is already proposed on-deck.
    pub async fn select_active_participant(&self, participant_id: i64) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        let snapshot = self.store.snapshot();
        if snapshot.on_deck_participant.as_ref().map(|p| p.id) == Some(participant_id) {
            return Err(self.fail(Error::Conflict(
                "participant cannot be both active and on-deck".to_string(),
            )));
        }
        let Some(participant) = snapshot
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned()
        else {
            return Err(self.fail(Error::InvalidState(format!(
                "unknown participant {participant_id}"
            ))));
        };

        let changed =
            snapshot.active_participant.as_ref().map(|p| p.id) != Some(participant_id);
        self.store.apply(|s| {
            s.active_participant = Some(participant);
            if changed {
                s.scores.clear();
                s.calculated = None;
            }
            s.phase = SessionPhase::ParticipantSelected;
            s.last_error = None;
        });
        Ok(())
    }

    /// Propose a participant as on-deck; the mirror-image conflict check
    pub async fn select_on_deck_participant(&self, participant_id: i64) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        let snapshot = self.store.snapshot();
        if snapshot.active_participant.as_ref().map(|p| p.id) == Some(participant_id) {
            return Err(self.fail(Error::Conflict(
                "participant cannot be both active and on-deck".to_string(),
            )));
        }
        let Some(participant) = snapshot
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned()
        else {
            return Err(self.fail(Error::InvalidState(format!(
                "unknown participant {participant_id}"
            ))));
        };

        self.store.apply(|s| {
            s.on_deck_participant = Some(participant);
            s.last_error = None;
        });
        Ok(())
    }

    /// Commit a participant as active on the service, then load their
    /// scores. On failure nothing changes locally.
    pub async fn commit_active_participant(&self, participant_id: i64) -> Result<()> {
        let _guard = self
            .begin_op(InFlightKey {
                participant_id,
                op: OpKind::CommitActiveParticipant,
            })
            .map_err(|e| self.fail(e))?;
        let _serial = self.intent_lock.lock().await;

        let snapshot = self.store.snapshot();
        if snapshot.on_deck_participant.as_ref().map(|p| p.id) == Some(participant_id) {
            return Err(self.fail(Error::Conflict(
                "participant cannot be both active and on-deck".to_string(),
            )));
        }

        let participant = self
            .gateway
            .set_active_participant(participant_id)
            .await
            .map_err(|e| self.fail(e))?;
        info!(participant_id, name = %participant.name(), "Active participant committed");

        self.store.apply(|s| {
            s.active_participant = Some(participant);
            s.scores.clear();
            s.calculated = None;
            s.phase = SessionPhase::ParticipantSelected;
            s.last_error = None;
        });
        self.load_scores_locked().await
    }

    /// Persist the proposed active/on-deck pair as tournament details.
    /// Requires both proposals, and that they differ.
    pub async fn commit_tournament_details(&self) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        let snapshot = self.store.snapshot();
        let (Some(active), Some(on_deck)) = (
            snapshot.active_participant.clone(),
            snapshot.on_deck_participant.clone(),
        ) else {
            return Err(self.fail(Error::InvalidState(
                "active and on-deck participants must both be set".to_string(),
            )));
        };
        if active.id == on_deck.id {
            return Err(self.fail(Error::Conflict(
                "active and on-deck participants must differ".to_string(),
            )));
        }

        self.gateway
            .set_tournament_detail(DetailKey::ActiveId, active.id)
            .await
            .map_err(|e| self.fail(e))?;
        self.gateway
            .set_tournament_detail(DetailKey::OnDeckId, on_deck.id)
            .await
            .map_err(|e| self.fail(e))?;
        info!(active = active.id, on_deck = on_deck.id, "Tournament details committed");
        self.store.apply(|s| s.last_error = None);
        Ok(())
    }

    // ========================================
    // Scoring workflow
    // ========================================

    /// Fetch the active participant's scores
    pub async fn load_scores(&self) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        self.load_scores_locked().await
    }

    async fn load_scores_locked(&self) -> Result<()> {
        let snapshot = self.store.snapshot();
        let Some(active) = snapshot.active_participant else {
            return Err(self.fail(Error::InvalidState(
                "no active participant".to_string(),
            )));
        };
        let prev_phase = snapshot.phase;
        self.store.apply(|s| s.phase = SessionPhase::ScoresLoading);

        match self.gateway.list_scores(active.id).await {
            Ok(scores) => {
                self.store.apply(|s| {
                    s.scores = scores;
                    s.calculated = None;
                    s.phase = SessionPhase::ScoresLoaded;
                    s.last_error = None;
                });
                Ok(())
            }
            Err(err) => {
                self.store.apply(|s| s.phase = prev_phase);
                Err(self.fail(err))
            }
        }
    }

    /// Submit one judge score for the active participant, then refresh the
    /// local score view
    pub async fn submit_score(&self, judge: JudgeCode, value: f64) -> Result<()> {
        let participant_id = self
            .store
            .snapshot()
            .active_participant
            .map(|p| p.id)
            .ok_or_else(|| Error::InvalidState("no active participant".to_string()))
            .map_err(|e| self.fail(e))?;
        let _guard = self
            .begin_op(InFlightKey {
                participant_id,
                op: OpKind::SubmitScore,
            })
            .map_err(|e| self.fail(e))?;
        let _serial = self.intent_lock.lock().await;

        self.gateway
            .post_score(participant_id, judge, value)
            .await
            .map_err(|e| self.fail(e))?;
        self.load_scores_locked().await
    }

    /// Aggregate the four panel scores into derived totals
    pub async fn calculate(&self) -> Result<()> {
        let _serial = self.intent_lock.lock().await;
        let snapshot = self.store.snapshot();
        if snapshot.phase != SessionPhase::ScoresLoaded {
            return Err(self.fail(Error::InvalidState(
                "calculate requires loaded scores".to_string(),
            )));
        }

        self.store.apply(|s| s.phase = SessionPhase::Calculating);
        match scoring::aggregate(&snapshot.scores) {
            Ok(calculated) => {
                self.store.apply(|s| {
                    s.calculated = Some(calculated);
                    s.phase = SessionPhase::Calculated;
                    s.last_error = None;
                });
                Ok(())
            }
            Err(err) => {
                self.store.apply(|s| s.phase = SessionPhase::ScoresLoaded);
                Err(self.fail(err))
            }
        }
    }

    /// Publish the active participant's complete score set as
    /// tournament-of-record.
    ///
    /// One atomic write carries all seven judge entries. On success the
    /// session is cleared, peers are notified, and tournament details are
    /// re-read to pick up an on-deck promotion. On failure the session
    /// stays `Calculated` and the same intent can be retried.
    pub async fn publish(&self) -> Result<()> {
        let Some(active) = self.store.snapshot().active_participant else {
            return Err(self.fail(Error::InvalidState(
                "no active participant".to_string(),
            )));
        };
        // Duplicate invocations are rejected here, before the serial lock,
        // so a rapid double-publish never reaches the network
        let _guard = self
            .begin_op(InFlightKey {
                participant_id: active.id,
                op: OpKind::Publish,
            })
            .map_err(|e| self.fail(e))?;
        let _serial = self.intent_lock.lock().await;

        // State may have moved while we waited for the lock
        let snapshot = self.store.snapshot();
        if snapshot.phase != SessionPhase::Calculated {
            return Err(self.fail(Error::InvalidState(
                "publish requires calculated scores".to_string(),
            )));
        }
        if snapshot.active_participant.as_ref().map(|p| p.id) != Some(active.id) {
            return Err(self.fail(Error::InvalidState(
                "active participant changed before publish".to_string(),
            )));
        }

        let payload = scoring::validate_publish_ready(&snapshot.scores, snapshot.calculated.as_ref())
            .map_err(|e| self.fail(e))?;

        self.store.apply(|s| s.phase = SessionPhase::Publishing);
        match self.gateway.publish_scores(active.id, &payload).await {
            Ok(published) => {
                info!(
                    participant_id = active.id,
                    records = published.len(),
                    "Scores published"
                );
                self.store.apply(|s| {
                    s.phase = SessionPhase::Published;
                    s.scores.clear();
                    s.calculated = None;
                    s.active_participant = None;
                    s.last_error = None;
                });

                let emitted = self
                    .channel
                    .emit(LiveEvent::ScorePublished {
                        participant_id: Some(active.id),
                        scores: payload.entries.clone(),
                        timestamp: Some(chrono::Utc::now()),
                    })
                    .await
                    .map_err(|e| self.fail(e));

                // Session over; await the next participant
                self.store.apply(|s| s.phase = SessionPhase::Idle);
                let synced = self.sync_tournament_details_locked().await;
                emitted.and(synced)
            }
            Err(err) => {
                self.store.apply(|s| s.phase = SessionPhase::Calculated);
                Err(self.fail(err))
            }
        }
    }

    // ========================================
    // Live event handling
    // ========================================

    /// Consume live events until the channel closes
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.channel.subscribe();
        debug!("Reconciler event loop started");
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Notifications are only refresh triggers, so one full
                    // refresh covers everything that was dropped
                    warn!("Lagged {skipped} live events; running full refresh");
                    let _serial = self.intent_lock.lock().await;
                    if let Err(err) = self.refresh_divisions_locked().await {
                        warn!("Resync failed: {err}");
                    } else if let Err(err) = self.refresh_participants_locked().await {
                        warn!("Resync failed: {err}");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Live channel closed; reconciler event loop stopping");
                    break;
                }
            }
        }
    }

    /// Handle one notification. The payload is a signal-to-refresh: state
    /// is always re-read through the gateway, never taken from the push.
    pub async fn handle_event(&self, event: LiveEvent) {
        let _serial = self.intent_lock.lock().await;
        debug!(event = event.event_name(), "Handling live event");

        let result = match &event {
            LiveEvent::ScoreSubmitted { participant_id, .. }
            | LiveEvent::ScoreUpdated { participant_id, .. }
            | LiveEvent::DeductionUpdated { participant_id } => {
                self.refresh_active_scores_locked(*participant_id).await
            }
            LiveEvent::TournamentDetailsUpdated { .. } => {
                self.sync_tournament_details_locked().await
            }
            LiveEvent::ScorePublished { .. } => self.sync_tournament_details_locked().await,
            LiveEvent::ActiveDivisionUpdated { .. } => {
                match self.refresh_divisions_locked().await {
                    Ok(()) => self.refresh_participants_locked().await,
                    Err(err) => Err(err),
                }
            }
        };

        if let Err(err) = result {
            // Already recorded as last_error; the loop must keep running
            warn!(event = event.event_name(), "Event refresh failed: {err}");
        }
    }

    /// Re-fetch scores for the active participant, ignoring events that
    /// name somebody else. An event without a participant id still
    /// triggers a refresh; the payload is a hint, not data.
    async fn refresh_active_scores_locked(&self, event_participant: Option<i64>) -> Result<()> {
        let snapshot = self.store.snapshot();
        let Some(active) = snapshot.active_participant else {
            debug!("No active participant; ignoring score event");
            return Ok(());
        };
        if let Some(pid) = event_participant {
            if pid != active.id {
                debug!(
                    event_participant = pid,
                    active = active.id,
                    "Score event for non-active participant; ignoring"
                );
                return Ok(());
            }
        }

        let scores = self
            .gateway
            .list_scores(active.id)
            .await
            .map_err(|e| self.fail(e))?;
        self.store.apply(|s| {
            s.scores = scores;
            // Derived totals are stale the moment new scores arrive
            s.calculated = None;
            s.phase = SessionPhase::ScoresLoaded;
            s.last_error = None;
        });
        Ok(())
    }

    /// Fresh read of the active/on-deck pointers, resolved against the
    /// known participant list. An unknown or absent active id clears the
    /// active participant (removed or deactivated elsewhere).
    async fn sync_tournament_details_locked(&self) -> Result<()> {
        let details = self
            .gateway
            .get_tournament_details()
            .await
            .map_err(|e| self.fail(e))?;

        let snapshot = self.store.snapshot();
        let active = details
            .active_id
            .and_then(|id| snapshot.participants.iter().find(|p| p.id == id).cloned());
        let on_deck = details
            .on_deck_id
            .and_then(|id| snapshot.participants.iter().find(|p| p.id == id).cloned());

        let prev_active = snapshot.active_participant.as_ref().map(|p| p.id);
        let new_active = active.as_ref().map(|p| p.id);
        let changed = prev_active != new_active;
        let has_active = active.is_some();

        self.store.apply(|s| {
            s.active_participant = active;
            s.on_deck_participant = on_deck;
            if changed {
                s.scores.clear();
                s.calculated = None;
                s.phase = if has_active {
                    SessionPhase::ParticipantSelected
                } else if s.selected_division.is_some() {
                    SessionPhase::DivisionSelected
                } else {
                    SessionPhase::Idle
                };
            }
            s.last_error = None;
        });

        if changed && has_active {
            self.load_scores_locked().await?;
        }
        Ok(())
    }
}
