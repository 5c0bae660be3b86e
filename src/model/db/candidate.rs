use std::collections::BTreeMap;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::{Branch, CandidateStatus, Email, Position, Year},
    mongodb::{Coll, Id},
};

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub name: String,
    pub email: Email,
    /// University registration number; the candidate's public identifier.
    pub reg_no: String,
    pub year: Year,
    pub branch: Branch,
    pub position: Position,
    /// Reference to the profile image in the image store.
    pub image: String,
    /// Reference to the scorecard upload in the image store.
    pub scorecard: String,
    pub status: CandidateStatus,
    /// Only ever incremented, by the vote ledger, and only while approved.
    pub votes: u64,
    pub remarks: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub submitted_at: DateTime<Utc>,
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Candidate {
    /// Look a candidate up by registration number, whatever their status.
    pub async fn by_reg_no(candidates: &Coll<Candidate>, reg_no: &str) -> Result<Candidate> {
        candidates
            .find_one(doc! { "reg_no": reg_no }, None)
            .await?
            .ok_or_else(|| Error::not_found(format!("Candidate with registration number '{reg_no}'")))
    }

    /// All approved candidates, optionally only those standing for `position`.
    /// This is a full scan of the approved set, with no pagination.
    pub async fn list_approved(
        candidates: &Coll<Candidate>,
        position: Option<Position>,
    ) -> Result<Vec<Candidate>> {
        let mut filter = doc! { "status": CandidateStatus::Approved };
        if let Some(position) = position {
            filter.insert("position", position);
        }
        let approved = candidates.find(filter, None).await?.try_collect().await?;
        Ok(approved)
    }
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

/// Partition candidates by the office they stand for. Every position is
/// present in the result, even if nobody stands for it.
pub fn group_by_position<C>(candidates: Vec<C>) -> BTreeMap<Position, Vec<C>>
where
    C: Deref<Target = CandidateCore>,
{
    let mut groups: BTreeMap<Position, Vec<C>> =
        Position::ALL.iter().map(|p| (*p, Vec::new())).collect();
    for candidate in candidates {
        // Every position was inserted above.
        groups.entry(candidate.position).or_default().push(candidate);
    }
    groups
}
