//! The vote ledger: the only code that mutates vote tallies or voters'
//! voting records.

use std::time::{Duration, Instant};

use mongodb::{
    bson::doc,
    error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{
        Acknowledgment, FindOneAndUpdateOptions, ReadConcern, ReturnDocument, TransactionOptions,
        WriteConcern,
    },
    Client, ClientSession,
};
use rand::Rng;
use rocket::{http::Status, tokio::time::sleep};

use crate::error::{Error, Result};
use crate::model::{
    common::{CandidateStatus, Position},
    db::{candidate::Candidate, voter::Voter},
    mongodb::{Coll, Id},
};

/// How long a vote keeps retrying after transient transaction failures.
const TRANSACTION_RETRY_LIMIT: Duration = Duration::from_secs(10);

/// Outcome of the writes inside the vote transaction, before commit.
enum Applied {
    Counted(Candidate),
    AlreadyVoted,
    CandidateGone,
}

/// Record one vote by `voter_id` for the candidate `reg_no`, standing for
/// `position`.
///
/// The voter's record and the candidate's tally are updated in a single
/// transaction: either both writes commit or neither does. A voter may vote
/// once per position. Transactions aborted by a write conflict are rerun;
/// `Transaction` is only returned once [`TRANSACTION_RETRY_LIMIT`] has passed.
pub async fn cast_vote(
    db_client: &Client,
    voters: &Coll<Voter>,
    candidates: &Coll<Candidate>,
    voter_id: Id,
    reg_no: &str,
    position: Position,
) -> Result<Candidate> {
    // Cheap pre-checks outside the transaction; the transaction re-checks.
    let voter = Voter::by_id(voters, voter_id).await?;
    if voter.has_voted_for(position) {
        return Err(Error::AlreadyVoted(position.to_string()));
    }
    let candidate = Candidate::by_reg_no(candidates, reg_no).await?;
    if candidate.status != CandidateStatus::Approved {
        return Err(Error::not_found(format!("Approved candidate '{reg_no}'")));
    }
    if candidate.position != position {
        return Err(Error::Validation(format!(
            "candidate '{reg_no}' stands for {}, not {position}",
            candidate.position
        )));
    }

    let mut session = db_client
        .start_session(None)
        .await
        .map_err(transaction_error)?;

    // Concurrent votes for one candidate conflict on its tally, and the server
    // aborts all but one transaction. Those are rerun until the deadline.
    let deadline = Instant::now() + TRANSACTION_RETRY_LIMIT;
    let applied = loop {
        match run_vote_transaction(&mut session, voters, candidates, voter_id, reg_no, position)
            .await
        {
            Ok(applied) => break applied,
            Err(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) && Instant::now() < deadline => {
                debug!("Retrying vote transaction for {reg_no}: {e}");
                backoff().await;
            }
            Err(e) => return Err(transaction_error(e)),
        }
    };

    match applied {
        Applied::Counted(candidate) => {
            info!(
                "Vote recorded for {} ({position}); tally now {}",
                candidate.reg_no, candidate.votes
            );
            Ok(candidate)
        }
        Applied::AlreadyVoted => Err(Error::AlreadyVoted(position.to_string())),
        Applied::CandidateGone => Err(Error::not_found(format!("Approved candidate '{reg_no}'"))),
    }
}

/// One attempt at the vote transaction. Commits if the vote was counted and
/// aborts otherwise.
async fn run_vote_transaction(
    session: &mut ClientSession,
    voters: &Coll<Voter>,
    candidates: &Coll<Candidate>,
    voter_id: Id,
    reg_no: &str,
    position: Position,
) -> std::result::Result<Applied, DbError> {
    let options = TransactionOptions::builder()
        .read_concern(ReadConcern::snapshot())
        .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
        .build();
    session.start_transaction(options).await?;

    let applied = match apply_vote(session, voters, candidates, voter_id, reg_no, position).await {
        Ok(applied) => applied,
        Err(e) => {
            abort(session).await;
            return Err(e);
        }
    };
    match applied {
        Applied::Counted(_) => commit(session).await?,
        Applied::AlreadyVoted | Applied::CandidateGone => abort(session).await,
    }
    Ok(applied)
}

/// Commit, retrying while the outcome of the commit is unknown. Retrying a
/// commit that already succeeded is harmless.
async fn commit(session: &mut ClientSession) -> std::result::Result<(), DbError> {
    let deadline = Instant::now() + TRANSACTION_RETRY_LIMIT;
    loop {
        match session.commit_transaction().await {
            Err(e)
                if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && Instant::now() < deadline =>
            {
                warn!("Retrying vote commit with unknown result: {e}");
            }
            result => return result,
        }
    }
}

/// Sleep a few random milliseconds so conflicting transactions spread out.
async fn backoff() {
    let millis = rand::thread_rng().gen_range(1..=20);
    sleep(Duration::from_millis(millis)).await;
}

/// The two writes of a vote, inside the caller's transaction.
async fn apply_vote(
    session: &mut ClientSession,
    voters: &Coll<Voter>,
    candidates: &Coll<Candidate>,
    voter_id: Id,
    reg_no: &str,
    position: Position,
) -> std::result::Result<Applied, DbError> {
    // Check-and-set on the voter: only matches if this position is not yet
    // recorded. A concurrent vote by the same voter conflicts on this document.
    let voter_filter = doc! {
        "_id": voter_id,
        "voted_positions": { "$ne": position },
    };
    let voter_update = doc! {
        "$addToSet": { "voted_positions": position },
    };
    let result = voters
        .update_one_with_session(voter_filter, voter_update, None, session)
        .await?;
    if result.matched_count == 0 {
        return Ok(Applied::AlreadyVoted);
    }

    // Atomic increment; never read-modify-write.
    let candidate_filter = doc! {
        "reg_no": reg_no,
        "position": position,
        "status": CandidateStatus::Approved,
    };
    let candidate_update = doc! {
        "$inc": { "votes": 1_i64 },
    };
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let candidate = candidates
        .find_one_and_update_with_session(candidate_filter, candidate_update, options, session)
        .await?;

    Ok(match candidate {
        Some(candidate) => Applied::Counted(candidate),
        None => Applied::CandidateGone,
    })
}

async fn abort(session: &mut ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        // Dropping the session aborts it server-side anyway.
        warn!("Failed to abort vote transaction: {e}");
    }
}

fn transaction_error(e: DbError) -> Error {
    Error::Transaction(e.to_string())
}

/// Whether the given voter has voted, and for which positions.
pub async fn voted_positions(voters: &Coll<Voter>, voter_id: Id) -> Result<Vec<Position>> {
    let voter = Voter::by_id(voters, voter_id).await?;
    Ok(voter.voted_positions.clone())
}

/// Refuse changes that would break the tally invariants for a candidate that
/// has already received votes.
pub fn ensure_no_votes(candidate: &Candidate, action: &str) -> Result<()> {
    if candidate.votes > 0 {
        Err(Error::Status(
            Status::Conflict,
            format!(
                "Cannot {action} candidate '{}': they have already received {} votes",
                candidate.reg_no, candidate.votes
            ),
        ))
    } else {
        Ok(())
    }
}
