use chrono::Utc;
use rocket::{http::CookieJar, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    mail::Mailer,
    model::{
        api::{
            otp::Code,
            verification::{
                Message, OtpRequest, OtpVerifyRequest, PasswordRequest, RollNoRequest,
                SessionStatus, VoterProfile,
            },
        },
        common::{Email, VerificationStage},
        db::{
            otp::OtpRecord,
            session::{NewVerificationSession, VerificationSession},
            voter::Voter,
        },
        mongodb::Coll,
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![
        send_otp,
        verify_otp,
        verify_password,
        verify_rollno,
        session_status,
        end_session,
    ]
}

const OTP_SUBJECT: &str = "Your election verification code";

#[post("/api/election/send-otp", data = "<request>", format = "json")]
pub async fn send_otp(
    request: Json<OtpRequest>,
    voters: Coll<Voter>,
    otps: Coll<OtpRecord>,
    mailer: &State<Mailer>,
    config: &State<Config>,
) -> Result<Json<Message>> {
    let voter = Voter::by_email(&voters, &request.email).await?;

    // Issue a fresh code, replacing any still pending.
    let code = Code::random();
    let record = OtpRecord::new(
        voter.email.clone(),
        code,
        Utc::now(),
        config.otp_ttl(),
        config.hmac_secret(),
    );
    record.store(&otps).await?;

    let text = format!(
        "Hello {},\n\nYour verification code for the student election is {code}. \
         It expires in {} seconds.",
        voter.name,
        config.otp_ttl().num_seconds()
    );
    if let Err(e) = mailer.send(&voter.email, OTP_SUBJECT, &text).await {
        // A code the voter never received must not stay valid.
        if let Err(revoke_err) = record.revoke(&otps).await {
            error!("Failed to revoke undelivered OTP for {}: {revoke_err}", voter.email);
        }
        return Err(e);
    }

    info!("Issued OTP for {}", voter.email);
    Ok(Json(Message::new(format!("OTP sent to {}", voter.email))))
}

#[post("/api/election/verify-otp", data = "<request>", format = "json")]
pub async fn verify_otp(
    request: Json<OtpVerifyRequest>,
    cookies: &CookieJar<'_>,
    voters: Coll<Voter>,
    otps: Coll<OtpRecord>,
    new_sessions: Coll<NewVerificationSession>,
    config: &State<Config>,
) -> Result<Json<SessionStatus>> {
    OtpRecord::consume(
        &otps,
        &request.email,
        request.otp,
        config.otp_ttl(),
        config.hmac_secret(),
    )
    .await?;

    let voter = Voter::by_email(&voters, &request.email).await?;
    let session = VerificationSession::open(
        &new_sessions,
        NewVerificationSession::email_verified(
            voter.id,
            voter.email.clone(),
            config.session_ttl(),
        ),
    )
    .await?;
    cookies.add_private(session.cookie());

    Ok(Json(status_of(&session)))
}

#[post("/api/election/verify-password", data = "<request>", format = "json")]
pub async fn verify_password(
    request: Json<PasswordRequest>,
    session: std::result::Result<VerificationSession, Error>,
    voters: Coll<Voter>,
    sessions: Coll<VerificationSession>,
) -> Result<Json<SessionStatus>> {
    let session = session?;
    session.require_stage(VerificationStage::EmailVerified)?;
    ensure_session_email(&session, &request.email)?;

    let voter = Voter::by_email(&voters, &request.email).await?;
    if !voter.verify_password(&request.password) {
        return Err(Error::Mismatch("password".to_string()));
    }

    let session = session.advance(&sessions).await?;
    Ok(Json(status_of(&session)))
}

#[post("/api/election/verify-rollno", data = "<request>", format = "json")]
pub async fn verify_rollno(
    request: Json<RollNoRequest>,
    session: std::result::Result<VerificationSession, Error>,
    voters: Coll<Voter>,
    sessions: Coll<VerificationSession>,
) -> Result<Json<VoterProfile>> {
    let session = session?;
    session.require_stage(VerificationStage::PasswordVerified)?;
    ensure_session_email(&session, &request.email)?;

    let voter = Voter::by_roll_no(&voters, request.roll_no.trim()).await?;
    if voter.email != request.email || voter.id != session.voter_id {
        return Err(Error::Mismatch(
            "roll number for this email address".to_string(),
        ));
    }

    session.advance(&sessions).await?;
    info!("Voter {} completed verification", voter.id);
    Ok(Json(VoterProfile::from(&voter)))
}

#[get("/api/election/session")]
pub async fn session_status(
    session: std::result::Result<VerificationSession, Error>,
) -> Result<Json<SessionStatus>> {
    Ok(Json(status_of(&session?)))
}

#[delete("/api/election/session")]
pub async fn end_session(
    session: std::result::Result<VerificationSession, Error>,
    cookies: &CookieJar<'_>,
    sessions: Coll<VerificationSession>,
) -> Result<Json<Message>> {
    VerificationSession::clear_cookie(cookies);
    // Nothing to delete if the session already expired.
    if let Ok(session) = session {
        sessions.delete_one(session.id.as_doc(), None).await?;
    }
    Ok(Json(Message::new("Verification session ended")))
}

/// Later steps must be for the address the OTP was sent to.
fn ensure_session_email(session: &VerificationSession, email: &Email) -> Result<()> {
    if session.email == *email {
        Ok(())
    } else {
        Err(Error::Mismatch(
            "email address for this verification session".to_string(),
        ))
    }
}

fn status_of(session: &VerificationSession) -> SessionStatus {
    SessionStatus {
        email: session.email.clone(),
        stage: session.stage,
        may_vote: session.stage.may_vote(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mongodb::bson::doc;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::{serde_json, serde_json::json, Value},
    };

    use crate::{
        error::ErrorBody,
        model::{db::otp::MAX_FAILED_ATTEMPTS, db::session::SESSION_COOKIE, db::voter::NewVoter},
    };

    use super::*;

    async fn post<'c>(client: &'c Client, uri: rocket::http::uri::Origin<'c>, body: Value) -> LocalResponse<'c> {
        client
            .post(uri)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await
    }

    async fn request_code(client: &Client, email: &Email) -> Code {
        let response = post(client, uri!(send_otp), json!({ "email": email })).await;
        assert_eq!(Status::Ok, response.status());
        client
            .rocket()
            .state::<Mailer>()
            .unwrap()
            .last_code_for(email)
            .unwrap()
    }

    #[backend_test(verified)]
    async fn verified_voters_may_vote(client: Client) {
        let response = client.get(uri!(session_status)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let status: SessionStatus =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(VerificationStage::RollVerified, status.stage);
        assert!(status.may_vote);
    }

    #[backend_test]
    async fn full_verification_returns_the_profile(client: Client, new_voters: Coll<NewVoter>) {
        let voter = NewVoter::example();
        new_voters.insert_one(&voter, None).await.unwrap();

        let code = request_code(&client, &voter.email).await;
        let response = post(
            &client,
            uri!(verify_otp),
            json!({ "email": &voter.email, "otp": code }),
        )
        .await;
        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get_private(SESSION_COOKIE).is_some());

        let response = post(
            &client,
            uri!(verify_password),
            json!({ "email": &voter.email, "password": NewVoter::example_password() }),
        )
        .await;
        assert_eq!(Status::Ok, response.status());

        let response = post(
            &client,
            uri!(verify_rollno),
            json!({ "email": &voter.email, "rollNo": &voter.roll_no }),
        )
        .await;
        assert_eq!(Status::Ok, response.status());
        let profile: VoterProfile =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(voter.name, profile.name);
        assert_eq!(voter.roll_no, profile.roll_no);
        assert_eq!(24, profile.user_id.len());
    }

    #[backend_test]
    async fn unknown_email_gets_no_code(client: Client) {
        let response = post(&client, uri!(send_otp), json!({ "email": Email::example() })).await;
        assert_eq!(Status::NotFound, response.status());
        assert!(client.rocket().state::<Mailer>().unwrap().sent().is_empty());
    }

    #[backend_test]
    async fn codes_are_single_use(client: Client, new_voters: Coll<NewVoter>) {
        let voter = NewVoter::example();
        new_voters.insert_one(&voter, None).await.unwrap();

        let code = request_code(&client, &voter.email).await;
        let body = json!({ "email": &voter.email, "otp": code });
        let first = post(&client, uri!(verify_otp), body.clone()).await;
        assert_eq!(Status::Ok, first.status());
        let second = post(&client, uri!(verify_otp), body).await;
        assert_eq!(Status::NotFound, second.status());
    }

    #[backend_test]
    async fn wrong_code_keeps_the_right_one_valid(client: Client, new_voters: Coll<NewVoter>) {
        let voter = NewVoter::example();
        new_voters.insert_one(&voter, None).await.unwrap();

        let code = request_code(&client, &voter.email).await;
        let wrong = if code.value() == 999_999 { "100000" } else { "999999" };
        let response = post(
            &client,
            uri!(verify_otp),
            json!({ "email": &voter.email, "otp": wrong }),
        )
        .await;
        assert_eq!(Status::Unauthorized, response.status());
        let error: ErrorBody =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!("Incorrect OTP", error.message);

        let response = post(
            &client,
            uri!(verify_otp),
            json!({ "email": &voter.email, "otp": code }),
        )
        .await;
        assert_eq!(Status::Ok, response.status());
    }

    #[backend_test]
    async fn repeated_wrong_codes_revoke_the_code(
        client: Client,
        new_voters: Coll<NewVoter>,
        otps: Coll<OtpRecord>,
    ) {
        let voter = NewVoter::example();
        new_voters.insert_one(&voter, None).await.unwrap();

        let code = request_code(&client, &voter.email).await;
        let wrong = if code.value() == 999_999 { "100000" } else { "999999" };
        for _ in 0..MAX_FAILED_ATTEMPTS {
            let response = post(
                &client,
                uri!(verify_otp),
                json!({ "email": &voter.email, "otp": wrong }),
            )
            .await;
            assert_eq!(Status::Unauthorized, response.status());
        }
        assert_eq!(0, otps.count_documents(None, None).await.unwrap());

        // Even the right code is no good now.
        let response = post(
            &client,
            uri!(verify_otp),
            json!({ "email": &voter.email, "otp": code }),
        )
        .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn late_codes_have_expired(
        client: Client,
        new_voters: Coll<NewVoter>,
        otps: Coll<OtpRecord>,
    ) {
        let voter = NewVoter::example();
        new_voters.insert_one(&voter, None).await.unwrap();

        // Issued 61 seconds ago, with a 60 second lifetime.
        let config = client.rocket().state::<Config>().unwrap();
        let code = Code::random();
        let record = OtpRecord::new(
            voter.email.clone(),
            code,
            Utc::now() - Duration::seconds(61),
            config.otp_ttl(),
            config.hmac_secret(),
        );
        record.store(&otps).await.unwrap();

        let response = post(
            &client,
            uri!(verify_otp),
            json!({ "email": &voter.email, "otp": code }),
        )
        .await;
        assert_eq!(Status::Gone, response.status());
        assert_eq!(
            0,
            otps.count_documents(doc! { "email": &voter.email }, None)
                .await
                .unwrap()
        );
    }

    #[backend_test]
    async fn undelivered_codes_are_revoked(
        client: Client,
        new_voters: Coll<NewVoter>,
        otps: Coll<OtpRecord>,
    ) {
        let voter = NewVoter::example();
        new_voters.insert_one(&voter, None).await.unwrap();

        client.rocket().state::<Mailer>().unwrap().fail_next();
        let response = post(&client, uri!(send_otp), json!({ "email": &voter.email })).await;
        assert_eq!(Status::BadGateway, response.status());
        assert_eq!(0, otps.count_documents(None, None).await.unwrap());
    }

    #[backend_test]
    async fn steps_cannot_be_skipped(client: Client, new_voters: Coll<NewVoter>) {
        let voter = NewVoter::example();
        new_voters.insert_one(&voter, None).await.unwrap();

        // No session at all.
        let response = post(
            &client,
            uri!(verify_password),
            json!({ "email": &voter.email, "password": NewVoter::example_password() }),
        )
        .await;
        assert_eq!(Status::Unauthorized, response.status());

        let code = request_code(&client, &voter.email).await;
        post(
            &client,
            uri!(verify_otp),
            json!({ "email": &voter.email, "otp": code }),
        )
        .await;

        // Roll number before password.
        let response = post(
            &client,
            uri!(verify_rollno),
            json!({ "email": &voter.email, "rollNo": &voter.roll_no }),
        )
        .await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test]
    async fn credentials_must_match(client: Client, new_voters: Coll<NewVoter>) {
        let voter = NewVoter::example();
        let other = NewVoter::example2();
        new_voters.insert_one(&voter, None).await.unwrap();
        new_voters.insert_one(&other, None).await.unwrap();

        let code = request_code(&client, &voter.email).await;
        post(
            &client,
            uri!(verify_otp),
            json!({ "email": &voter.email, "otp": code }),
        )
        .await;

        let response = post(
            &client,
            uri!(verify_password),
            json!({ "email": &voter.email, "password": "not the password" }),
        )
        .await;
        assert_eq!(Status::Unauthorized, response.status());

        // The session belongs to the first voter only.
        let response = post(
            &client,
            uri!(verify_password),
            json!({ "email": &other.email, "password": NewVoter::example_password() }),
        )
        .await;
        assert_eq!(Status::Unauthorized, response.status());

        let response = post(
            &client,
            uri!(verify_password),
            json!({ "email": &voter.email, "password": NewVoter::example_password() }),
        )
        .await;
        assert_eq!(Status::Ok, response.status());

        // Another voter's roll number.
        let response = post(
            &client,
            uri!(verify_rollno),
            json!({ "email": &voter.email, "rollNo": &other.roll_no }),
        )
        .await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(verified)]
    async fn ending_the_session_forgets_it(client: Client) {
        let response = client.delete(uri!(end_session)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let response = client.get(uri!(session_status)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }
}
