use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Email, VerificationStage},
    db::voter::Voter,
};

use super::otp::Code;

/// Step 1: ask for a code to be mailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRequest {
    pub email: Email,
}

/// Step 1, continued: prove ownership of the address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpVerifyRequest {
    pub email: Email,
    pub otp: Code,
}

/// Step 2.
#[derive(Clone, Serialize, Deserialize)]
pub struct PasswordRequest {
    pub email: Email,
    pub password: String,
}

/// Step 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollNoRequest {
    pub email: Email,
    pub roll_no: String,
}

/// The public profile of a fully verified voter. `user_id` is what the
/// client puts in its vote requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterProfile {
    pub name: String,
    pub email: Email,
    pub roll_no: String,
    pub user_id: String,
}

impl From<&Voter> for VoterProfile {
    fn from(voter: &Voter) -> Self {
        Self {
            name: voter.name.clone(),
            email: voter.email.clone(),
            roll_no: voter.roll_no.clone(),
            user_id: voter.id.to_string(),
        }
    }
}

/// How far the current verification session has got.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub email: Email,
    pub stage: VerificationStage,
    pub may_vote: bool,
}

/// A plain acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::serde_json;

    use super::*;

    #[test]
    fn otp_requests_are_validated_on_parse() {
        let ok: OtpVerifyRequest =
            serde_json::from_str(r#"{"email": "A@SGGS.ac.in", "otp": "123456"}"#).unwrap();
        assert_eq!("a@sggs.ac.in", &*ok.email);
        assert_eq!(123456, ok.otp.value());

        assert!(serde_json::from_str::<OtpVerifyRequest>(
            r#"{"email": "a@sggs.ac.in", "otp": "12345"}"#
        )
        .is_err());
        assert!(
            serde_json::from_str::<OtpRequest>(r#"{"email": "not-an-address"}"#).is_err()
        );
    }

    #[test]
    fn roll_numbers_use_client_field_names() {
        let request: RollNoRequest =
            serde_json::from_str(r#"{"email": "a@sggs.ac.in", "rollNo": "2021BCS001"}"#).unwrap();
        assert_eq!("2021BCS001", request.roll_no);
    }
}
