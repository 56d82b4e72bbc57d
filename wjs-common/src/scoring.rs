//! Score aggregation and publish validation
//!
//! Pure functions only; no I/O and no shared state. The reconciler calls
//! `aggregate` when the head judge requests totals and
//! `validate_publish_ready` immediately before the publish write.

use crate::error::{Error, Result};
use crate::models::{CalculatedScores, JudgeCode, Score};

/// Unset sentinel. The service's wire format cannot distinguish a score of
/// exactly 0.0 from "not yet submitted", so a genuine zero score is
/// unrepresentable; detection would have to switch to presence/absence if
/// the sport's rules ever allow a real 0.0.
pub const UNSET_SCORE: f64 = 0.0;

/// Ordered list of the seven judge entries sent in one publish write:
/// A1, A2, B1, B2, FinalA, FinalB, Final.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPayload {
    pub entries: Vec<Score>,
}

fn submitted(scores: &[Score], judge: JudgeCode) -> Option<f64> {
    scores
        .iter()
        .find(|s| s.judge == judge)
        .map(|s| s.score)
        .filter(|v| *v != UNSET_SCORE)
}

/// Aggregate the four individual judge scores into derived totals.
///
/// Requires A1, A2, B1 and B2 to be present and set; otherwise returns
/// `MissingJudges` naming exactly the absent judges (in panel order) and
/// never a partial result. Totals are recomputed from the current scores on
/// every call:
///
/// - FinalA = (A1 + A2) / 2
/// - FinalB = (B1 + B2) / 2
/// - Final  = FinalA + FinalB
///
/// Plain f64 arithmetic; rounding is a presentation concern.
pub fn aggregate(scores: &[Score]) -> Result<CalculatedScores> {
    let panel: Vec<Option<f64>> = JudgeCode::PANEL
        .iter()
        .map(|judge| submitted(scores, *judge))
        .collect();

    match (panel[0], panel[1], panel[2], panel[3]) {
        (Some(a1), Some(a2), Some(b1), Some(b2)) => {
            let final_a = (a1 + a2) / 2.0;
            let final_b = (b1 + b2) / 2.0;
            Ok(CalculatedScores {
                final_a,
                final_b,
                final_score: final_a + final_b,
            })
        }
        _ => Err(Error::MissingJudges(
            JudgeCode::PANEL
                .iter()
                .zip(&panel)
                .filter(|(_, value)| value.is_none())
                .map(|(judge, _)| *judge)
                .collect(),
        )),
    }
}

/// Assemble the complete seven-entry publish payload.
///
/// Succeeds only when all of A1, A2, B1, B2, FinalA, FinalB and Final are
/// available; otherwise returns `MissingJudges` naming the absent entries.
/// The derived totals come from `calculated` (the most recent `aggregate`
/// result); `None` means no aggregation has happened and all three derived
/// entries are reported missing.
pub fn validate_publish_ready(
    scores: &[Score],
    calculated: Option<&CalculatedScores>,
) -> Result<PublishPayload> {
    let set = |value: f64| (value != UNSET_SCORE).then_some(value);

    let mut entries = Vec::with_capacity(JudgeCode::ALL.len());
    let mut missing = Vec::new();
    for judge in JudgeCode::ALL {
        let value = match (judge, calculated) {
            (JudgeCode::FinalA, Some(calc)) => set(calc.final_a),
            (JudgeCode::FinalB, Some(calc)) => set(calc.final_b),
            (JudgeCode::Final, Some(calc)) => set(calc.final_score),
            (JudgeCode::FinalA | JudgeCode::FinalB | JudgeCode::Final, None) => None,
            _ => submitted(scores, judge),
        };
        match value {
            Some(v) => entries.push(Score::new(judge, v)),
            None => missing.push(judge),
        }
    }

    if !missing.is_empty() {
        return Err(Error::MissingJudges(missing));
    }
    Ok(PublishPayload { entries })
}
