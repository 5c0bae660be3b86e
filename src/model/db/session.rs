use std::ops::Deref;

use chrono::{DateTime, Duration, Utc};
use mongodb::{
    bson::{self, doc, serde_helpers::chrono_datetime_as_bson_datetime},
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use rocket::{
    http::{Cookie, CookieJar, SameSite, Status},
    request::{FromRequest, Outcome},
    time::Duration as CookieDuration,
    Request,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::{Email, VerificationStage},
    mongodb::{Coll, Id},
};

pub const SESSION_COOKIE: &str = "verification_session";

/// Server-side record of a voter's progress through verification.
/// The client only holds its ID, in a private cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSessionCore {
    pub voter_id: Id,
    pub email: Email,
    pub stage: VerificationStage,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expire_at: DateTime<Utc>,
}

/// A session without an ID.
pub type NewVerificationSession = VerificationSessionCore;

impl VerificationSessionCore {
    /// A session for a voter who has just proven ownership of their email.
    pub fn email_verified(voter_id: Id, email: Email, ttl: Duration) -> Self {
        Self {
            voter_id,
            email,
            stage: VerificationStage::EmailVerified,
            expire_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at
    }
}

/// A verification session from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSession {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub session: VerificationSessionCore,
}

impl Deref for VerificationSession {
    type Target = VerificationSessionCore;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl VerificationSession {
    /// Insert a new session and return it with its ID.
    pub async fn open(
        new_sessions: &Coll<NewVerificationSession>,
        session: NewVerificationSession,
    ) -> Result<Self> {
        let id: Id = new_sessions
            .insert_one(&session, None)
            .await?
            .inserted_id
            .as_object_id()
            .expect("Inserted IDs are object IDs")
            .into();
        Ok(Self { id, session })
    }

    /// Fail unless the session is currently at `expected`.
    pub fn require_stage(&self, expected: VerificationStage) -> Result<()> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(Error::Status(
                Status::Conflict,
                format!(
                    "Verification steps out of order: session is at {:?}, this step needs {:?}",
                    self.stage, expected
                ),
            ))
        }
    }

    /// Move the session one stage forward.
    ///
    /// The update is conditional on the stage still being the current one, so
    /// two concurrent requests cannot both advance it.
    pub async fn advance(self, sessions: &Coll<VerificationSession>) -> Result<Self> {
        let next = self.stage.next().ok_or_else(|| {
            Error::Status(Status::Conflict, "Verification already complete".to_string())
        })?;
        let filter = doc! {
            "_id": self.id,
            "stage": self.stage,
            "expire_at": { "$gt": bson::DateTime::from_chrono(Utc::now()) },
        };
        let update = doc! {
            "$set": { "stage": next }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        sessions
            .find_one_and_update(filter, update, options)
            .await?
            .ok_or_else(|| {
                Error::Status(
                    Status::Conflict,
                    "Verification session changed or expired during this step".to_string(),
                )
            })
    }

    /// The private cookie carrying this session's ID.
    pub fn cookie(&self) -> Cookie<'static> {
        let remaining = (self.expire_at - Utc::now()).num_seconds().max(0);
        Cookie::build(SESSION_COOKIE, self.id.to_string())
            .max_age(CookieDuration::seconds(remaining))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Forget the session on the client side.
    pub fn clear_cookie(cookies: &CookieJar<'_>) {
        cookies.remove_private(Cookie::named(SESSION_COOKIE));
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for VerificationSession {
    type Error = Error;

    /// Load the session named by the private cookie. Handlers take this guard
    /// as a `Result` so the failure reaches the client as a JSON error.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let id = match req
            .cookies()
            .get_private(SESSION_COOKIE)
            .and_then(|cookie| cookie.value().parse::<Id>().ok())
        {
            Some(id) => id,
            None => {
                return Outcome::Failure((
                    Status::Unauthorized,
                    Error::Status(
                        Status::Unauthorized,
                        "No verification session; verify your email first".to_string(),
                    ),
                ))
            }
        };

        let sessions = match req.guard::<Coll<VerificationSession>>().await {
            Outcome::Success(sessions) => sessions,
            _ => {
                return Outcome::Failure((
                    Status::InternalServerError,
                    Error::Status(
                        Status::InternalServerError,
                        "Database unavailable".to_string(),
                    ),
                ))
            }
        };
        match sessions.find_one(id.as_doc(), None).await {
            Ok(Some(session)) if !session.is_expired_at(Utc::now()) => Outcome::Success(session),
            Ok(_) => Outcome::Failure((
                Status::Gone,
                Error::Expired("verification session".to_string()),
            )),
            Err(e) => Outcome::Failure((Status::InternalServerError, e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(stage: VerificationStage) -> VerificationSession {
        VerificationSession {
            id: Id::new(),
            session: VerificationSessionCore {
                stage,
                ..VerificationSessionCore::email_verified(
                    Id::new(),
                    Email::example(),
                    Duration::minutes(10),
                )
            },
        }
    }

    #[test]
    fn new_sessions_start_after_the_email_step() {
        let session =
            VerificationSessionCore::email_verified(Id::new(), Email::example(), Duration::seconds(30));
        assert_eq!(VerificationStage::EmailVerified, session.stage);
        assert!(!session.is_expired_at(Utc::now()));
        assert!(session.is_expired_at(Utc::now() + Duration::seconds(31)));
    }

    #[test]
    fn steps_must_come_in_order() {
        let session = session_at(VerificationStage::EmailVerified);
        assert!(session.require_stage(VerificationStage::EmailVerified).is_ok());
        let err = session
            .require_stage(VerificationStage::PasswordVerified)
            .unwrap_err();
        assert_eq!(Status::Conflict, err.status());
    }

    #[test]
    fn cookie_carries_the_session_id() {
        let session = session_at(VerificationStage::RollVerified);
        let cookie = session.cookie();
        assert_eq!(SESSION_COOKIE, cookie.name());
        assert_eq!(session.id.to_string(), cookie.value());
        assert_eq!(Some(true), cookie.http_only());
    }
}
