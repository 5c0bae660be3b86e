use serde::{Deserialize, Serialize};

use crate::model::common::Position;

use super::candidate::CandidateDescription;

/// A ballot for one position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub reg_no: String,
    pub user_id: String,
    pub position: Position,
}

/// The result of a successful vote: the candidate with their new tally.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub message: String,
    pub candidate: CandidateDescription,
}

/// Which positions a voter has already voted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    pub has_voted: bool,
    pub voted_positions: Vec<Position>,
}

impl From<Vec<Position>> for VoteStatus {
    fn from(voted_positions: Vec<Position>) -> Self {
        Self {
            has_voted: !voted_positions.is_empty(),
            voted_positions,
        }
    }
}
