mod candidate;
mod email;
mod password;
mod verification;

pub use candidate::{Branch, CandidateStatus, Position, Year};
pub use email::{Email, EmailError};
pub use password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
pub use verification::VerificationStage;
