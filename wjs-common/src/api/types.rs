//! Request/response types for the tournament service's REST API
//!
//! Wire-faithful DTOs; field names follow the service. Score values travel
//! as numeric strings (see `models::score_string`). Some endpoints report
//! application errors inside a 2xx body via an `error` field; the gateway
//! treats those as failed operations.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{score_string_opt, PublishedScore, Score};

// ========================================
// Authentication
// ========================================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

// ========================================
// Division / participant writes
// ========================================

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SetActiveDivisionRequest {
    pub division_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SetActiveParticipantRequest {
    pub participant_id: i64,
}

/// Tournament-detail keys the service accepts for updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailKey {
    #[serde(rename = "Active_ID")]
    ActiveId,
    #[serde(rename = "OnDeck_ID")]
    OnDeckId,
}

impl DetailKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailKey::ActiveId => "Active_ID",
            DetailKey::OnDeckId => "OnDeck_ID",
        }
    }
}

/// One tournament-detail write: `{"argument": "Active_ID", "value": 7}`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TournamentDetailUpdate {
    pub argument: DetailKey,
    pub value: i64,
}

// ========================================
// Scores
// ========================================

#[derive(Debug, Clone, Serialize)]
pub struct SubmitScoreRequest {
    pub participant_id: i64,
    #[serde(flatten)]
    pub score: Score,
}

/// Acknowledgement for a score write. Echo fields are decoded leniently
/// (the service historically omits or mangles them); only `error` matters
/// to the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoreAck {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub participant_id: Option<i64>,
    #[serde(default)]
    pub judge: Option<String>,
    #[serde(default, with = "score_string_opt")]
    pub score: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub division_id: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScoreAck {
    /// Fail the operation if the service reported an application error
    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(message) => Err(Error::Conflict(message)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishScoresRequest {
    pub participant_id: i64,
    pub scores: Vec<Score>,
}

/// Publish response. The service answers either with a bare array of
/// published scores or with a `{"scores": [...]}` / `{"error": ...}`
/// wrapper; both forms decode here.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PublishedScoresResponse {
    Bare(Vec<PublishedScore>),
    Wrapped {
        #[serde(default)]
        scores: Option<Vec<PublishedScore>>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl PublishedScoresResponse {
    pub fn into_result(self) -> Result<Vec<PublishedScore>> {
        match self {
            PublishedScoresResponse::Bare(scores) => Ok(scores),
            PublishedScoresResponse::Wrapped {
                error: Some(message),
                ..
            } => Err(Error::Conflict(message)),
            PublishedScoresResponse::Wrapped { scores, .. } => Ok(scores.unwrap_or_default()),
        }
    }
}
