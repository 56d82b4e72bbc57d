//! # WJS Head-Judge Coordinator
//!
//! Headless coordination engine for live tournament scoring. Keeps one
//! client's view of the tournament consistent with the remote service and
//! with peer clients, and drives the head judge's scoring workflow
//! (collect → aggregate → validate → publish).
//!
//! # Architecture
//!
//! - `gateway`: request/response operations against the tournament service
//! - `channel`: live push events, inbound (refresh triggers) and outbound
//! - `state`: the tournament state store observed by UIs
//! - `reconciler`: the orchestrator tying the three together

pub mod channel;
pub mod gateway;
pub mod reconciler;
pub mod state;

pub use reconciler::Reconciler;
pub use state::{SessionPhase, TournamentSnapshot, TournamentStore};
