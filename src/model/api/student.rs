use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::{hash_password, Email},
    db::voter::NewVoter,
};

/// A new student account, as submitted by the student.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRegistration {
    pub name: String,
    pub email: Email,
    pub roll_no: String,
    pub password: String,
}

impl TryFrom<StudentRegistration> for NewVoter {
    type Error = Error;

    /// Validate the registration and hash the password.
    fn try_from(registration: StudentRegistration) -> Result<Self> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        let roll_no = registration.roll_no.trim();
        if roll_no.is_empty() {
            return Err(Error::Validation("roll number must not be empty".to_string()));
        }
        let password_hash = hash_password(&registration.password)?;
        Ok(Self {
            name: name.to_string(),
            email: registration.email,
            roll_no: roll_no.to_string(),
            password_hash,
            voted_positions: Vec::new(),
        })
    }
}

/// Student login credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct StudentCredentials {
    pub email: Email,
    pub password: String,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_hashes_the_password() {
        let voter = NewVoter::try_from(StudentRegistration::example()).unwrap();
        assert_eq!("2021BCS001", voter.roll_no);
        assert!(voter.verify_password(NewVoter::example_password()));
        assert!(voter.voted_positions.is_empty());
    }

    #[test]
    fn registration_rejects_blank_fields() {
        let blank_name = StudentRegistration {
            name: "  ".to_string(),
            ..StudentRegistration::example()
        };
        assert!(NewVoter::try_from(blank_name).is_err());
        let short_password = StudentRegistration {
            password: "short".to_string(),
            ..StudentRegistration::example()
        };
        assert!(matches!(
            NewVoter::try_from(short_password),
            Err(Error::Validation(_))
        ));
    }
}
