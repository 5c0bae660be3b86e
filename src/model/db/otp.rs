use chrono::{DateTime, Duration, Utc};
use hmac::{digest::Output, Hmac, Mac};
use mongodb::{
    bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Document},
    options::{FindOneAndUpdateOptions, ReplaceOptions, ReturnDocument},
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::model::{api::otp::Code, common::Email, mongodb::Coll};

pub type HmacSha256 = Hmac<Sha256>;

/// Wrong guesses allowed against one code before it is revoked.
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// How long an expired record is kept before the TTL index removes it, so a
/// late verification attempt is told the code expired rather than that none
/// was issued.
pub fn expired_retention() -> Duration {
    Duration::minutes(5)
}

/// The pending one-time password for an email address. At most one exists per
/// address; issuing a new code replaces the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub email: Email,
    /// HMAC of the email and code; the code itself is never stored.
    pub code_hmac: Output<HmacSha256>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub issued_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub purge_at: DateTime<Utc>,
    #[serde(default)]
    pub failed_attempts: u32,
}

/// Outcome of comparing a submitted code against a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Valid,
    Expired,
    Mismatch,
}

impl OtpRecord {
    /// Create a record for `code`, issued at `now`.
    pub fn new(email: Email, code: Code, now: DateTime<Utc>, ttl: Duration, secret: &[u8]) -> Self {
        let code_hmac = code_mac(secret, &email, code).finalize().into_bytes();
        Self {
            email,
            code_hmac,
            issued_at: now,
            purge_at: now + ttl + expired_retention(),
            failed_attempts: 0,
        }
    }

    /// Compare a submitted code at time `now`. Expiry takes precedence over
    /// the code itself: an expired record never validates.
    pub fn check(&self, code: Code, now: DateTime<Utc>, ttl: Duration, secret: &[u8]) -> OtpCheck {
        if now - self.issued_at > ttl {
            return OtpCheck::Expired;
        }
        match code_mac(secret, &self.email, code).verify_slice(self.code_hmac.as_slice()) {
            Ok(()) => OtpCheck::Valid,
            Err(_) => OtpCheck::Mismatch,
        }
    }

    /// Store a freshly issued code, replacing any code already pending for
    /// the same address.
    pub async fn store(&self, otps: &Coll<OtpRecord>) -> Result<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        otps.replace_one(doc! { "email": &self.email }, self, options)
            .await?;
        Ok(())
    }

    /// Remove this exact record, leaving any newer code for the same address.
    /// Returns whether anything was deleted.
    pub async fn revoke(&self, otps: &Coll<OtpRecord>) -> Result<bool> {
        let result = otps.delete_one(self.filter(), None).await?;
        Ok(result.deleted_count == 1)
    }

    /// Count a wrong guess against this record, revoking it once
    /// [`MAX_FAILED_ATTEMPTS`] have been made.
    async fn record_failure(&self, otps: &Coll<OtpRecord>) -> Result<()> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = otps
            .find_one_and_update(
                self.filter(),
                doc! { "$inc": { "failed_attempts": 1 } },
                options,
            )
            .await?;
        if let Some(updated) = updated {
            if updated.failed_attempts >= MAX_FAILED_ATTEMPTS {
                warn!(
                    "Revoking OTP for '{}' after {} wrong guesses",
                    self.email, updated.failed_attempts
                );
                updated.revoke(otps).await?;
            }
        }
        Ok(())
    }

    /// Matches this exact record.
    fn filter(&self) -> Document {
        doc! {
            "email": &self.email,
            "code_hmac": to_bson(&self.code_hmac).expect("HMAC serialization does not fail"),
        }
    }

    /// Verify and consume the code pending for `email`.
    ///
    /// Fails with `NotFound` if no code is pending (never issued, already used,
    /// or purged), `Expired` if it outlived `ttl` (the record is deleted), and
    /// `Mismatch` if the code is wrong. A wrong code keeps the record until
    /// [`MAX_FAILED_ATTEMPTS`] wrong codes have been tried.
    pub async fn consume(
        otps: &Coll<OtpRecord>,
        email: &Email,
        code: Code,
        ttl: Duration,
        secret: &[u8],
    ) -> Result<()> {
        let record = otps
            .find_one(doc! { "email": email }, None)
            .await?
            .ok_or_else(|| Error::not_found(format!("Pending OTP for '{email}'")))?;

        match record.check(code, Utc::now(), ttl, secret) {
            OtpCheck::Expired => {
                record.revoke(otps).await?;
                Err(Error::Expired(format!("OTP for '{email}'")))
            }
            OtpCheck::Mismatch => {
                record.record_failure(otps).await?;
                Err(Error::Mismatch("OTP".to_string()))
            }
            OtpCheck::Valid => {
                // Single use: whoever deletes the record first wins.
                if record.revoke(otps).await? {
                    Ok(())
                } else {
                    Err(Error::not_found(format!("Pending OTP for '{email}'")))
                }
            }
        }
    }
}

fn code_mac(secret: &[u8], email: &Email, code: Code) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(email.as_bytes());
    mac.update(b":");
    mac.update(code.to_string().as_bytes());
    mac
}
