use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{common::hash_password, db::admin::NewAdmin};

/// Raw admin credentials, received from a user. These are never stored directly,
/// since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl TryFrom<AdminCredentials> for NewAdmin {
    type Error = Error;

    /// Convert [`AdminCredentials`] to a new admin by hashing the password.
    /// This enforces that the username is non-empty, and the password meets minimum length.
    fn try_from(cred: AdminCredentials) -> Result<Self, Self::Error> {
        let username = cred.username.trim();
        if username.is_empty() {
            return Err(Error::Validation("username must not be empty".to_string()));
        }
        let password_hash = hash_password(&cred.password)?;
        Ok(Self {
            username: username.to_string(),
            password_hash,
        })
    }
}

/// The admin's public view of themselves.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminDescription {
    pub username: String,
}
