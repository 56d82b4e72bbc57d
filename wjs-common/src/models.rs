//! Domain models for tournament state synchronization
//!
//! Entities are created and owned by the remote tournament service; this
//! client caches them and never authors ids. Field renames follow the
//! service's wire names. The service encodes score values as numeric
//! strings; the `score_string` serde helpers parse them and reject anything
//! non-numeric as malformed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tournament division. Exactly one division is active at any time,
/// enforced server-side; activation is a replace-one-of-many operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Division {
    pub id: i64,
    #[serde(rename = "division_name")]
    pub name: String,
    #[serde(rename = "active")]
    pub is_active: bool,
}

/// A competitor. Participants belong conceptually to a division; the list
/// served by the tournament service is already scoped to the tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub school_id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Participant {
    /// Display name, "first last"
    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Cross-client pointer to the participant currently being judged and the
/// one queued next. When both are set they must differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentDetails {
    #[serde(rename = "Active_ID")]
    pub active_id: Option<i64>,
    #[serde(rename = "OnDeck_ID")]
    pub on_deck_id: Option<i64>,
}

/// Scoring role: four individual judges plus the three derived totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JudgeCode {
    A1,
    A2,
    B1,
    B2,
    FinalA,
    FinalB,
    Final,
}

impl JudgeCode {
    /// The four individual judges whose scores feed aggregation
    pub const PANEL: [JudgeCode; 4] =
        [JudgeCode::A1, JudgeCode::A2, JudgeCode::B1, JudgeCode::B2];

    /// All seven roles, in publish order
    pub const ALL: [JudgeCode; 7] = [
        JudgeCode::A1,
        JudgeCode::A2,
        JudgeCode::B1,
        JudgeCode::B2,
        JudgeCode::FinalA,
        JudgeCode::FinalB,
        JudgeCode::Final,
    ];

    /// Stable wire string for this role
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeCode::A1 => "A1",
            JudgeCode::A2 => "A2",
            JudgeCode::B1 => "B1",
            JudgeCode::B2 => "B2",
            JudgeCode::FinalA => "FinalA",
            JudgeCode::FinalB => "FinalB",
            JudgeCode::Final => "Final",
        }
    }
}

impl fmt::Display for JudgeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One judge's score for one participant.
///
/// The wire representation carries `score` as a numeric string; decoding
/// rejects non-numeric values, and encoding writes the same string form
/// back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub judge: JudgeCode,
    #[serde(with = "score_string")]
    pub score: f64,
}

impl Score {
    pub fn new(judge: JudgeCode, score: f64) -> Self {
        Self { judge, score }
    }
}

/// Client-derived totals. Ephemeral: replaced on every recalculation and
/// cleared on participant change; never persisted until publish.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalculatedScores {
    pub final_a: f64,
    pub final_b: f64,
    pub final_score: f64,
}

/// Tournament-of-record result for one (participant, judge) pair.
/// Immutable once created; there is no update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedScore {
    pub id: i64,
    pub participant_id: i64,
    pub judge: JudgeCode,
    #[serde(with = "score_string")]
    pub score: f64,
    pub published_at: String,
    pub division_id: i64,
}

/// Serde adapter for the service's string-encoded score values
pub mod score_string {
    use serde::de::{self, Deserialize, Deserializer};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<f64>().map_err(|_| {
            de::Error::custom(format!("expected numeric score string, got {raw:?}"))
        })
    }
}

/// Lenient variant for acknowledgement bodies: a missing field decodes as
/// `None`, and so does a string that fails to parse (matching the service's
/// historical tolerance in score acks).
pub mod score_string_opt {
    use serde::de::{Deserialize, Deserializer};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        value: &Option<f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.and_then(|s| s.parse::<f64>().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_division_wire_names() {
        let json = r#"{"id": 3, "division_name": "Adult Changquan", "active": true}"#;
        let division: Division = serde_json::from_str(json).unwrap();
        assert_eq!(division.id, 3);
        assert_eq!(division.name, "Adult Changquan");
        assert!(division.is_active);
    }

    #[test]
    fn test_participant_name_and_wire_names() {
        let json = r#"{"id": 7, "school_id": 2, "first_name": "Mei", "last_name": "Chen"}"#;
        let participant: Participant = serde_json::from_str(json).unwrap();
        assert_eq!(participant.name(), "Mei Chen");
        assert_eq!(participant.active, None);
    }

    #[test]
    fn test_tournament_details_wire_names() {
        let json = r#"{"Active_ID": 7, "OnDeck_ID": null}"#;
        let details: TournamentDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.active_id, Some(7));
        assert_eq!(details.on_deck_id, None);
    }

    #[test]
    fn test_score_decodes_numeric_string() {
        let json = r#"{"judge": "A1", "score": "9.10"}"#;
        let score: Score = serde_json::from_str(json).unwrap();
        assert_eq!(score.judge, JudgeCode::A1);
        assert_eq!(score.score, 9.10);
    }

    #[test]
    fn test_score_rejects_non_numeric_string() {
        let json = r#"{"judge": "A1", "score": "nine-ish"}"#;
        let result: Result<Score, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_score_rejects_bare_number() {
        // The wire format is a string; a bare number is a malformed response
        let json = r#"{"judge": "A1", "score": 9.1}"#;
        let result: Result<Score, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_score_serializes_back_to_string() {
        let score = Score::new(JudgeCode::FinalB, 9.15);
        let json = serde_json::to_value(&score).unwrap();
        assert_eq!(json["judge"], "FinalB");
        assert_eq!(json["score"], "9.15");
    }

    #[test]
    fn test_judge_code_wire_strings() {
        for code in JudgeCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            let back: JudgeCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, code);
        }
    }

    #[test]
    fn test_published_score_decode() {
        let json = r#"{
            "id": 41,
            "participant_id": 7,
            "judge": "Final",
            "score": "18.30",
            "published_at": "2025-04-01T18:22:10Z",
            "division_id": 3
        }"#;
        let published: PublishedScore = serde_json::from_str(json).unwrap();
        assert_eq!(published.judge, JudgeCode::Final);
        assert_eq!(published.score, 18.30);
        assert_eq!(published.division_id, 3);
    }
}
