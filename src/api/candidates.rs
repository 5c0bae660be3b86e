use std::collections::BTreeMap;

use mongodb::Client;
use rocket::{form::Form, http::Status, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            candidate::{CandidateDescription, CandidateSubmission},
            tally::Tally,
            vote::{VoteReceipt, VoteRequest, VoteStatus},
        },
        common::{Position, VerificationStage},
        db::{
            candidate::{group_by_position, Candidate, NewCandidate},
            ledger,
            session::VerificationSession,
            voter::Voter,
        },
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
    storage::{ImageStore, UploadKind},
};

pub fn routes() -> Vec<Route> {
    routes![
        approved_candidates,
        grouped_candidates,
        vote,
        check_vote,
        stats,
        submit,
    ]
}

#[get("/api/election-candidates?<position>")]
pub async fn approved_candidates(
    position: Option<Position>,
    candidates: Coll<Candidate>,
) -> Result<Json<Vec<CandidateDescription>>> {
    let approved = Candidate::list_approved(&candidates, position).await?;
    Ok(Json(approved.into_iter().map(Into::into).collect()))
}

#[get("/api/election-candidates/grouped")]
pub async fn grouped_candidates(
    candidates: Coll<Candidate>,
) -> Result<Json<BTreeMap<Position, Vec<CandidateDescription>>>> {
    let approved = Candidate::list_approved(&candidates, None).await?;
    let groups = group_by_position(approved)
        .into_iter()
        .map(|(position, members)| (position, members.into_iter().map(Into::into).collect()))
        .collect();
    Ok(Json(groups))
}

#[put("/api/election-candidates/vote", data = "<ballot>", format = "json")]
pub async fn vote(
    ballot: Json<VoteRequest>,
    session: std::result::Result<VerificationSession, Error>,
    voters: Coll<Voter>,
    candidates: Coll<Candidate>,
    db_client: &State<Client>,
) -> Result<Json<VoteReceipt>> {
    // Only a fully verified voter may vote, and only as themselves.
    let session = session?;
    if session.stage != VerificationStage::RollVerified {
        return Err(Error::Status(
            Status::Forbidden,
            "Complete verification before voting".to_string(),
        ));
    }
    let voter_id: Id = ballot
        .user_id
        .parse()
        .map_err(|_| Error::Validation(format!("'{}' is not a valid user ID", ballot.user_id)))?;
    if voter_id != session.voter_id {
        return Err(Error::Status(
            Status::Forbidden,
            "Votes may only be cast by the verified voter".to_string(),
        ));
    }

    let candidate = ledger::cast_vote(
        db_client,
        &voters,
        &candidates,
        voter_id,
        ballot.reg_no.trim(),
        ballot.position,
    )
    .await?;

    Ok(Json(VoteReceipt {
        message: format!("Vote recorded for {}", ballot.position),
        candidate: candidate.into(),
    }))
}

#[get("/api/election-candidates/check-vote/<user_id>")]
pub async fn check_vote(user_id: Id, voters: Coll<Voter>) -> Result<Json<VoteStatus>> {
    let positions = ledger::voted_positions(&voters, user_id).await?;
    Ok(Json(positions.into()))
}

#[get("/api/election-candidates/stats")]
pub async fn stats(candidates: Coll<Candidate>) -> Result<Json<Tally>> {
    let approved = Candidate::list_approved(&candidates, None).await?;
    Ok(Json(Tally::compute(&approved)))
}

#[post("/api/candidates/submit", data = "<submission>")]
pub async fn submit(
    mut submission: Form<CandidateSubmission<'_>>,
    new_candidates: Coll<NewCandidate>,
    candidates: Coll<Candidate>,
    store: &State<ImageStore>,
) -> Result<(Status, Json<CandidateDescription>)> {
    let image = store
        .save(&mut submission.image, UploadKind::Image)
        .await?;
    let scorecard = match store
        .save(&mut submission.scorecard, UploadKind::Scorecard)
        .await
    {
        Ok(scorecard) => scorecard,
        Err(e) => {
            discard_uploads(store, &[&image]).await;
            return Err(e);
        }
    };

    let inserted = match submission.to_candidate(image.clone(), scorecard.clone()) {
        Ok(candidate) => new_candidates
            .insert_one(&candidate, None)
            .await
            .map_err(|e| {
                if is_duplicate_key_error(&e) {
                    Error::DuplicateEntry(format!(
                        "A candidate with email '{}' or registration number '{}'",
                        candidate.email, candidate.reg_no
                    ))
                } else {
                    e.into()
                }
            }),
        Err(e) => Err(e),
    };
    let id: Id = match inserted {
        Ok(result) => result
            .inserted_id
            .as_object_id()
            .expect("Inserted IDs are object IDs")
            .into(),
        Err(e) => {
            discard_uploads(store, &[&image, &scorecard]).await;
            return Err(e);
        }
    };

    let candidate = candidates
        .find_one(id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate with ID '{id}'")))?;
    info!(
        "Received nomination of {} for {}",
        candidate.reg_no, candidate.position
    );
    Ok((Status::Created, Json(candidate.into())))
}

/// Remove files stored for a submission that was then refused.
async fn discard_uploads(store: &ImageStore, references: &[&str]) {
    for reference in references {
        if let Err(e) = store.remove(reference).await {
            warn!("Failed to remove orphaned upload {reference}: {e}");
        }
    }
}
