use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Document};
use rocket::fs::TempFile;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::{Branch, CandidateStatus, Email, Position, Year},
    db::candidate::{Candidate, NewCandidate},
};

/// A candidate as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDescription {
    pub id: String,
    pub name: String,
    pub email: Email,
    pub reg_no: String,
    pub year: Year,
    pub branch: Branch,
    pub position: Position,
    pub image: String,
    pub scorecard: String,
    pub status: CandidateStatus,
    pub votes: u64,
    pub remarks: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        let id = candidate.id.to_string();
        let core = candidate.candidate;
        Self {
            id,
            name: core.name,
            email: core.email,
            reg_no: core.reg_no,
            year: core.year,
            branch: core.branch,
            position: core.position,
            image: core.image,
            scorecard: core.scorecard,
            status: core.status,
            votes: core.votes,
            remarks: core.remarks,
            submitted_at: core.submitted_at,
        }
    }
}

/// Admin listing filters, from the query string. Every filter is optional;
/// `search` matches name, email or registration number, ignoring case.
#[derive(Debug, Default, FromForm)]
pub struct CandidateFilter {
    pub status: Option<CandidateStatus>,
    pub year: Option<Year>,
    pub branch: Option<Branch>,
    pub position: Option<Position>,
    pub search: Option<String>,
}

impl CandidateFilter {
    /// The MongoDB filter document selecting matching candidates.
    pub fn to_doc(&self) -> Document {
        let mut filter = Document::new();
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        if let Some(year) = self.year {
            filter.insert("year", year);
        }
        if let Some(branch) = self.branch {
            filter.insert("branch", branch);
        }
        if let Some(position) = self.position {
            filter.insert("position", position);
        }
        if let Some(search) = self.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let pattern = escape_regex(search);
                let matches = |field: &str| {
                    let mut clause = Document::new();
                    clause.insert(field, doc! { "$regex": pattern.as_str(), "$options": "i" });
                    clause
                };
                filter.insert(
                    "$or",
                    vec![matches("name"), matches("email"), matches("reg_no")],
                );
            }
        }
        filter
    }
}

/// Escape regex metacharacters so user input is matched literally.
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A candidate's self-nomination, as submitted in a multipart form.
#[derive(FromForm)]
pub struct CandidateSubmission<'r> {
    pub name: String,
    pub email: String,
    #[field(name = "regNo")]
    pub reg_no: String,
    pub year: Year,
    pub branch: Branch,
    pub position: Position,
    pub image: TempFile<'r>,
    pub scorecard: TempFile<'r>,
}

impl CandidateSubmission<'_> {
    /// Validate the text fields and build the pending candidate, referring to
    /// the already-stored `image` and `scorecard`.
    pub fn to_candidate(&self, image: String, scorecard: String) -> Result<NewCandidate> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        let reg_no = self.reg_no.trim();
        if reg_no.is_empty() {
            return Err(Error::Validation(
                "registration number must not be empty".to_string(),
            ));
        }
        let email: Email = self
            .email
            .parse()
            .map_err(|e| Error::Validation(format!("{e}")))?;
        Ok(NewCandidate {
            name: name.to_string(),
            email,
            reg_no: reg_no.to_string(),
            year: self.year,
            branch: self.branch,
            position: self.position,
            image,
            scorecard,
            status: CandidateStatus::Pending,
            votes: 0,
            remarks: None,
            submitted_at: Utc::now(),
        })
    }
}

/// A moderation decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: CandidateStatus,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl StatusUpdate {
    pub fn to_update_doc(&self) -> Document {
        doc! {
            "$set": {
                "status": self.status,
                "remarks": self.remarks.as_deref().map(str::trim),
            }
        }
    }
}

/// Corrections to a candidate's details. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateUpdate {
    pub name: Option<String>,
    pub email: Option<Email>,
    pub year: Option<Year>,
    pub branch: Option<Branch>,
    pub position: Option<Position>,
}

impl CandidateUpdate {
    /// Whether applying this update would move the candidate to another office.
    pub fn changes_position(&self, candidate: &Candidate) -> bool {
        matches!(self.position, Some(position) if position != candidate.position)
    }

    pub fn to_update_doc(&self) -> Result<Document> {
        let mut set = Document::new();
        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Validation("name must not be empty".to_string()));
            }
            set.insert("name", name);
        }
        if let Some(email) = &self.email {
            set.insert("email", email);
        }
        if let Some(year) = self.year {
            set.insert("year", year);
        }
        if let Some(branch) = self.branch {
            set.insert("branch", branch);
        }
        if let Some(position) = self.position {
            set.insert("position", position);
        }
        if set.is_empty() {
            return Err(Error::Validation("nothing to update".to_string()));
        }
        Ok(doc! { "$set": set })
    }
}
