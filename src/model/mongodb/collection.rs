use std::ops::Deref;
use std::time::Duration;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};

use crate::model::db::{
    admin::{Admin, NewAdmin},
    candidate::{Candidate, NewCandidate},
    otp::OtpRecord,
    session::{NewVerificationSession, VerificationSession},
    voter::{NewVoter, Voter},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Fails iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.rocket().state::<Database>() {
            Some(db) => request::Outcome::Success(Coll::from_db(db)),
            None => request::Outcome::Failure((Status::InternalServerError, ())),
        }
    }
}

// Admin collections
const ADMINS: &str = "admins";
impl MongoCollection for Admin {
    const NAME: &'static str = ADMINS;
}
impl MongoCollection for NewAdmin {
    const NAME: &'static str = ADMINS;
}

// Voter collections
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for NewVoter {
    const NAME: &'static str = VOTERS;
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CANDIDATES;
}

// OTP collection
impl MongoCollection for OtpRecord {
    const NAME: &'static str = "otps";
}

// Verification session collections
const SESSIONS: &str = "verification_sessions";
impl MongoCollection for VerificationSession {
    const NAME: &'static str = SESSIONS;
}
impl MongoCollection for NewVerificationSession {
    const NAME: &'static str = SESSIONS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();
    // Documents are removed as soon as the MongoDB TTL monitor notices the
    // indexed date has passed.
    let expire_at_date = IndexOptions::builder()
        .expire_after(Duration::from_secs(0))
        .build();

    // Voter collection.
    let voters = Coll::<Voter>::from_db(db);
    for key in ["email", "roll_no"] {
        let index = IndexModel::builder()
            .keys(doc! { key: 1 })
            .options(unique.clone())
            .build();
        voters.create_index(index, None).await?;
    }

    // Candidate collection.
    let candidates = Coll::<Candidate>::from_db(db);
    for key in ["email", "reg_no"] {
        let index = IndexModel::builder()
            .keys(doc! { key: 1 })
            .options(unique.clone())
            .build();
        candidates.create_index(index, None).await?;
    }
    let listing_index = IndexModel::builder()
        .keys(doc! { "status": 1, "position": 1 })
        .build();
    candidates.create_index(listing_index, None).await?;

    // Admin collection.
    let admin_index = IndexModel::builder()
        .keys(doc! { "username": 1 })
        .options(unique.clone())
        .build();
    Coll::<Admin>::from_db(db)
        .create_index(admin_index, None)
        .await?;

    // OTP collection: one live code per email, purged after its retention period.
    let otps = Coll::<OtpRecord>::from_db(db);
    let otp_email_index = IndexModel::builder()
        .keys(doc! { "email": 1 })
        .options(unique)
        .build();
    otps.create_index(otp_email_index, None).await?;
    let otp_purge_index = IndexModel::builder()
        .keys(doc! { "purge_at": 1 })
        .options(expire_at_date.clone())
        .build();
    otps.create_index(otp_purge_index, None).await?;

    // Verification session collection.
    let session_expiry_index = IndexModel::builder()
        .keys(doc! { "expire_at": 1 })
        .options(expire_at_date)
        .build();
    Coll::<VerificationSession>::from_db(db)
        .create_index(session_expiry_index, None)
        .await?;

    Ok(())
}
