use std::ops::Deref;

use mongodb::bson::doc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::{verify_password, Email, Position},
    mongodb::{Coll, Id},
};

/// Core voter (student) account data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    pub name: String,
    pub email: Email,
    pub roll_no: String,
    pub password_hash: String,
    /// Offices this voter has already voted for. Treated as a set: the vote
    /// ledger only ever adds a position that is not yet present.
    #[serde(default)]
    pub voted_positions: Vec<Position>,
}

impl VoterCore {
    /// Check whether the given password is correct.
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }

    /// Has this voter already voted for the given position?
    pub fn has_voted_for(&self, position: Position) -> bool {
        self.voted_positions.contains(&position)
    }

    /// Has this voter voted for anything at all?
    pub fn has_voted(&self) -> bool {
        !self.voted_positions.is_empty()
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Voter {
    /// Look a voter up by ID.
    pub async fn by_id(voters: &Coll<Voter>, id: Id) -> Result<Voter> {
        voters
            .find_one(id.as_doc(), None)
            .await?
            .ok_or_else(|| Error::not_found(format!("Voter with ID '{id}'")))
    }

    /// Look a voter up by email address.
    pub async fn by_email(voters: &Coll<Voter>, email: &Email) -> Result<Voter> {
        voters
            .find_one(doc! { "email": email }, None)
            .await?
            .ok_or_else(|| Error::not_found(format!("Voter with email '{email}'")))
    }

    /// Look a voter up by roll number.
    pub async fn by_roll_no(voters: &Coll<Voter>, roll_no: &str) -> Result<Voter> {
        voters
            .find_one(doc! { "roll_no": roll_no }, None)
            .await?
            .ok_or_else(|| Error::not_found(format!("Voter with roll number '{roll_no}'")))
    }
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voting_flags_are_per_position() {
        let mut voter = NewVoter::example();
        assert!(!voter.has_voted());
        voter.voted_positions.push(Position::TechnicalSecretary);
        assert!(voter.has_voted());
        assert!(voter.has_voted_for(Position::TechnicalSecretary));
        assert!(!voter.has_voted_for(Position::GeneralSecretary));
    }

    #[test]
    fn password_check() {
        let voter = NewVoter::example();
        assert!(voter.verify_password(NewVoter::example_password()));
        assert!(!voter.verify_password("wrong password"));
    }
}
