use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{self, status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::RequestId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Incorrect {0}")]
    Mismatch(String),
    #[error("Expired: {0}")]
    Expired(String),
    #[error("Already voted for {0}")]
    AlreadyVoted(String),
    #[error("Already exists: {0}")]
    DuplicateEntry(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Transaction aborted: {0}")]
    Transaction(String),
    #[error("Failed to deliver message: {0}")]
    Delivery(String),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`] describing `what`.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::Db(_) | Self::Io(_) | Self::Transaction(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Argon2(_) | Self::Validation(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Mismatch(_) => Status::Unauthorized,
            Self::Expired(_) => Status::Gone,
            Self::AlreadyVoted(_) | Self::DuplicateEntry(_) => Status::Conflict,
            Self::Delivery(_) => Status::BadGateway,
            Self::Status(status, _) => *status,
        }
    }

    /// The message shown to the client. Storage and IO failures stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Db(_) | Self::Io(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let id = RequestId::of(req);
        let status = self.status();
        match status.class() {
            StatusClass::ServerError => error!("req{id} failed: {self}"),
            _ => warn!("req{id} rejected: {self}"),
        }
        let body = ErrorBody {
            message: self.public_message(),
        };
        Custom(status, Json(body)).respond_to(req)
    }
}
