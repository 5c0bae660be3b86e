use mongodb::bson::doc;
use rocket::{http::CookieJar, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            student::{StudentCredentials, StudentRegistration},
            verification::{Message, VoterProfile},
        },
        db::voter::{NewVoter, Voter},
        mongodb::{is_duplicate_key_error, Coll},
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![register, login, me, logout]
}

#[post("/api/students/register", data = "<registration>", format = "json")]
pub async fn register(
    registration: Json<StudentRegistration>,
    voters: Coll<Voter>,
    new_voters: Coll<NewVoter>,
) -> Result<Json<VoterProfile>> {
    let voter = NewVoter::try_from(registration.into_inner())?;
    let id = new_voters
        .insert_one(&voter, None)
        .await
        .map_err(|e| {
            if is_duplicate_key_error(&e) {
                Error::DuplicateEntry(format!(
                    "A student with email '{}' or roll number '{}'",
                    voter.email, voter.roll_no
                ))
            } else {
                e.into()
            }
        })?
        .inserted_id
        .as_object_id()
        .expect("Inserted IDs are object IDs")
        .into();

    let voter = Voter::by_id(&voters, id).await?;
    info!("Registered student {}", voter.roll_no);
    Ok(Json(VoterProfile::from(&voter)))
}

#[post("/api/students/login", data = "<credentials>", format = "json")]
pub async fn login(
    cookies: &CookieJar<'_>,
    credentials: Json<StudentCredentials>,
    voters: Coll<Voter>,
    config: &State<Config>,
) -> Result<Json<VoterProfile>> {
    let voter = voters
        .find_one(doc! { "email": &credentials.email }, None)
        .await?
        .filter(|voter| voter.verify_password(&credentials.password))
        .ok_or_else(|| Error::Mismatch("email or password".to_string()))?;

    cookies.add(AuthToken::new(&voter).into_cookie(config));
    Ok(Json(VoterProfile::from(&voter)))
}

#[get("/api/students/me")]
pub async fn me(
    token: std::result::Result<AuthToken<Voter>, Error>,
    voters: Coll<Voter>,
) -> Result<Json<VoterProfile>> {
    let voter = Voter::by_id(&voters, token?.id).await?;
    Ok(Json(VoterProfile::from(&voter)))
}

#[delete("/api/students/logout")]
pub fn logout(cookies: &CookieJar<'_>) -> Json<Message> {
    AuthToken::<Voter>::clear_cookie(cookies);
    Json(Message::new("Logged out"))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json, serde_json::json},
    };

    use crate::model::api::auth::AUTH_TOKEN_COOKIE;

    use super::*;

    #[backend_test(student)]
    async fn registered_students_can_see_themselves(client: Client) {
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.get(uri!(me)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let profile: VoterProfile =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(StudentRegistration::example().roll_no, profile.roll_no);

        client.delete(uri!(logout)).dispatch().await;
        let response = client.get(uri!(me)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test]
    async fn duplicate_registrations_are_refused(client: Client, voters: Coll<Voter>) {
        let submit = |body: serde_json::Value| {
            client
                .post(uri!(register))
                .header(ContentType::JSON)
                .body(body.to_string())
                .dispatch()
        };

        let response = submit(json!(StudentRegistration::example())).await;
        assert_eq!(Status::Ok, response.status());

        // Same roll number, different email.
        let mut again = json!(StudentRegistration::example());
        again["email"] = json!("someone.else@sggs.ac.in");
        let response = submit(again).await;
        assert_eq!(Status::Conflict, response.status());

        assert_eq!(1, voters.count_documents(None, None).await.unwrap());
    }

    #[backend_test]
    async fn wrong_password_is_refused(client: Client, new_voters: Coll<NewVoter>) {
        new_voters
            .insert_one(NewVoter::example(), None)
            .await
            .unwrap();

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!({ "email": "a@sggs.ac.in", "password": "not my password" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_none());
    }
}
