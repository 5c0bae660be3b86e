use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    api::admin::AdminCredentials,
    common::verify_password,
    mongodb::{Coll, Id},
};

/// Username of the admin created when the database has none.
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

/// Core admin user data.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    pub username: String,
    pub password_hash: String,
}

impl AdminCore {
    /// Check whether the given password is correct.
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(&self.password_hash, password)
    }
}

/// An admin without an ID.
pub type NewAdmin = AdminCore;

/// An admin user from the database, with its unique ID.
#[derive(Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

/// Create the default admin if there are no admins at all, so the moderation
/// endpoints are always reachable.
pub async fn ensure_admin_exists(admins: &Coll<NewAdmin>, password: &str) -> Result<()> {
    if admins.count_documents(None, None).await? > 0 {
        return Ok(());
    }
    let credentials = AdminCredentials {
        username: DEFAULT_ADMIN_USERNAME.to_string(),
        password: password.to_string(),
    };
    let admin = NewAdmin::try_from(credentials)?;
    admins.insert_one(admin, None).await?;
    warn!("No admins found; created default admin '{DEFAULT_ADMIN_USERNAME}'");
    Ok(())
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl AdminCore {
        pub fn example() -> Self {
            AdminCredentials::example().try_into().unwrap()
        }
    }
}
