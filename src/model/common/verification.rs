use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// Progress of a voter through identity verification. Stages only ever move
/// forward, one at a time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    /// No proof given yet. Never stored: sessions start once the OTP is accepted.
    Unverified,
    /// The voter proved ownership of their email address with an OTP.
    EmailVerified,
    /// The voter also supplied their account password.
    PasswordVerified,
    /// The voter's roll number matched their email. Voting is allowed.
    RollVerified,
}

impl VerificationStage {
    /// The stage reached by completing the next step, if any remains.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unverified => Some(Self::EmailVerified),
            Self::EmailVerified => Some(Self::PasswordVerified),
            Self::PasswordVerified => Some(Self::RollVerified),
            Self::RollVerified => None,
        }
    }

    /// Whether this stage permits casting votes.
    pub fn may_vote(self) -> bool {
        self == Self::RollVerified
    }
}

impl From<VerificationStage> for Bson {
    fn from(stage: VerificationStage) -> Self {
        to_bson(&stage).expect("Serialisation is infallible")
    }
}
