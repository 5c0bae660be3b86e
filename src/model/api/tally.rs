use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    common::{CandidateStatus, Position},
    db::candidate::Candidate,
};

/// One candidate's share of the vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTally {
    pub id: String,
    pub name: String,
    pub reg_no: String,
    pub position: Position,
    pub votes: u64,
    /// Share of all votes cast, in percent.
    pub percentage: f64,
    /// Share of the votes cast for this candidate's position, in percent.
    pub position_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionTally {
    pub position: Position,
    pub total_votes: u64,
    pub candidates: usize,
}

/// Election results over the approved candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub total_votes: u64,
    pub candidates: Vec<CandidateTally>,
    pub positions: Vec<PositionTally>,
}

impl Tally {
    /// Aggregate the given candidates. Candidates that are not approved are
    /// ignored, and a zero total yields 0% rather than a division by zero.
    pub fn compute(candidates: &[Candidate]) -> Self {
        let approved: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.status == CandidateStatus::Approved)
            .collect();

        let mut per_position: BTreeMap<Position, (u64, usize)> =
            Position::ALL.iter().map(|p| (*p, (0, 0))).collect();
        for candidate in &approved {
            let entry = per_position.entry(candidate.position).or_default();
            entry.0 += candidate.votes;
            entry.1 += 1;
        }
        let total_votes = per_position.values().map(|(votes, _)| votes).sum();

        let candidates = approved
            .iter()
            .map(|candidate| {
                let position_total = per_position
                    .get(&candidate.position)
                    .map_or(0, |(votes, _)| *votes);
                CandidateTally {
                    id: candidate.id.to_string(),
                    name: candidate.name.clone(),
                    reg_no: candidate.reg_no.clone(),
                    position: candidate.position,
                    votes: candidate.votes,
                    percentage: percentage(candidate.votes, total_votes),
                    position_percentage: percentage(candidate.votes, position_total),
                }
            })
            .collect();

        let positions = per_position
            .into_iter()
            .map(|(position, (total_votes, candidates))| PositionTally {
                position,
                total_votes,
                candidates,
            })
            .collect();

        Self {
            total_votes,
            candidates,
            positions,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
