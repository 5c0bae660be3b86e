use mongodb::{
    bson::{doc, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};
use rocket::{futures::TryStreamExt, http::CookieJar, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            admin::{AdminCredentials, AdminDescription},
            auth::AuthToken,
            candidate::{CandidateDescription, CandidateFilter, CandidateUpdate, StatusUpdate},
            pagination::{Paginated, Pagination},
            verification::Message,
        },
        db::{admin::Admin, candidate::Candidate, ledger::ensure_no_votes},
        mongodb::{is_duplicate_key_error, Coll},
    },
    storage::ImageStore,
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![
        login,
        logout,
        list_candidates,
        get_candidate,
        set_candidate_status,
        update_candidate,
        delete_candidate,
    ]
}

type AdminToken = std::result::Result<AuthToken<Admin>, Error>;

#[post("/api/admin/login", data = "<credentials>", format = "json")]
pub async fn login(
    cookies: &CookieJar<'_>,
    credentials: Json<AdminCredentials>,
    admins: Coll<Admin>,
    config: &State<Config>,
) -> Result<Json<AdminDescription>> {
    let with_username = doc! {
        "username": credentials.username.trim(),
    };

    let admin = admins
        .find_one(with_username, None)
        .await?
        .filter(|admin| admin.verify_password(&credentials.password))
        .ok_or_else(|| Error::Mismatch("username or password".to_string()))?;

    let token = AuthToken::new(&admin);
    cookies.add(token.into_cookie(config));
    info!("Admin '{}' logged in", admin.username);

    Ok(Json(AdminDescription {
        username: admin.admin.username,
    }))
}

#[delete("/api/admin/logout")]
pub fn logout(cookies: &CookieJar<'_>) -> Json<Message> {
    AuthToken::<Admin>::clear_cookie(cookies);
    Json(Message::new("Logged out"))
}

#[get("/api/admin/candidates?<filter..>")]
pub async fn list_candidates(
    token: AdminToken,
    filter: CandidateFilter,
    pagination: std::result::Result<Pagination, Error>,
    candidates: Coll<Candidate>,
) -> Result<Json<Paginated<CandidateDescription>>> {
    token?;
    let pagination = pagination?;
    let filter = filter.to_doc();

    // Newest submissions first.
    let options = FindOptions::builder()
        .sort(doc! { "submitted_at": -1, "_id": -1 })
        .skip(pagination.skip())
        .limit(i64::try_from(pagination.page_size()).unwrap_or(i64::MAX))
        .build();
    let page = candidates
        .find(filter.clone(), options)
        .await?
        .map_ok(CandidateDescription::from)
        .try_collect::<Vec<_>>()
        .await?;
    let total = candidates.count_documents(filter, None).await?;

    Ok(Json(pagination.result(page, total)))
}

#[get("/api/admin/candidates/<reg_no>")]
pub async fn get_candidate(
    token: AdminToken,
    reg_no: &str,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateDescription>> {
    token?;
    let candidate = Candidate::by_reg_no(&candidates, reg_no).await?;
    Ok(Json(candidate.into()))
}

#[patch("/api/admin/candidates/<reg_no>/status", data = "<update>", format = "json")]
pub async fn set_candidate_status(
    token: AdminToken,
    reg_no: &str,
    update: Json<StatusUpdate>,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateDescription>> {
    token?;
    let candidate = find_and_update(
        &candidates,
        doc! { "reg_no": reg_no },
        update.to_update_doc(),
    )
    .await?
    .ok_or_else(|| Error::not_found(format!("Candidate with registration number '{reg_no}'")))?;
    info!("Candidate {reg_no} is now {:?}", candidate.status);
    Ok(Json(candidate.into()))
}

#[put("/api/admin/candidates/<reg_no>", data = "<update>", format = "json")]
pub async fn update_candidate(
    token: AdminToken,
    reg_no: &str,
    update: Json<CandidateUpdate>,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateDescription>> {
    token?;
    let existing = Candidate::by_reg_no(&candidates, reg_no).await?;
    let mut filter = doc! { "reg_no": reg_no };
    if update.changes_position(&existing) {
        // Votes already cast were cast for the old position.
        ensure_no_votes(&existing, "change the position of")?;
        filter.insert("votes", 0_i64);
    }

    let updated = find_and_update(&candidates, filter, update.to_update_doc()?)
        .await
        .map_err(|e| match e {
            Error::Db(e) if is_duplicate_key_error(&e) => {
                Error::DuplicateEntry(format!("Another candidate with this email ({reg_no})"))
            }
            e => e,
        })?;
    match updated {
        Some(candidate) => Ok(Json(candidate.into())),
        // A vote arrived after the check above.
        None => {
            let current = Candidate::by_reg_no(&candidates, reg_no).await?;
            ensure_no_votes(&current, "change the position of")?;
            Err(Error::not_found(format!(
                "Candidate with registration number '{reg_no}'"
            )))
        }
    }
}

#[delete("/api/admin/candidates/<reg_no>")]
pub async fn delete_candidate(
    token: AdminToken,
    reg_no: &str,
    candidates: Coll<Candidate>,
    store: &State<ImageStore>,
) -> Result<Json<Message>> {
    token?;
    let existing = Candidate::by_reg_no(&candidates, reg_no).await?;
    ensure_no_votes(&existing, "delete")?;

    let Some(deleted) = candidates
        .find_one_and_delete(doc! { "reg_no": reg_no, "votes": 0_i64 }, None)
        .await?
    else {
        let current = Candidate::by_reg_no(&candidates, reg_no).await?;
        ensure_no_votes(&current, "delete")?;
        return Err(Error::not_found(format!(
            "Candidate with registration number '{reg_no}'"
        )));
    };

    for reference in [&deleted.image, &deleted.scorecard] {
        if let Err(e) = store.remove(reference).await {
            warn!("Failed to remove upload {reference} of deleted candidate: {e}");
        }
    }
    info!("Deleted candidate {reg_no}");
    Ok(Json(Message::new(format!("Deleted candidate {reg_no}"))))
}

async fn find_and_update(
    candidates: &Coll<Candidate>,
    filter: Document,
    update: Document,
) -> Result<Option<Candidate>> {
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    Ok(candidates
        .find_one_and_update(filter, update, options)
        .await?)
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{serde_json, serde_json::json},
    };

    use crate::model::{
        api::auth::AUTH_TOKEN_COOKIE,
        common::{CandidateStatus, Position},
        db::{admin::NewAdmin, candidate::NewCandidate},
    };

    use super::*;

    async fn insert_candidates(new_candidates: &Coll<NewCandidate>) {
        new_candidates
            .insert_many(
                [
                    NewCandidate::example(),
                    NewCandidate::example2(),
                    NewCandidate::example_general(),
                    NewCandidate::example_pending(),
                    NewCandidate::example_rejected(),
                ],
                None,
            )
            .await
            .unwrap();
    }

    async fn list(client: &Client, query: &str) -> Paginated<CandidateDescription> {
        let response = client
            .get(format!("/api/admin/candidates{query}"))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    #[backend_test]
    async fn admin_login_valid(client: Client, admins: Coll<NewAdmin>) {
        admins.insert_one(NewAdmin::example(), None).await.unwrap();

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::example()).to_string())
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());
    }

    #[backend_test]
    async fn admin_login_invalid(client: Client, admins: Coll<NewAdmin>) {
        admins.insert_one(NewAdmin::example(), None).await.unwrap();

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(AdminCredentials::empty()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": &NewAdmin::example().username,
                    "password": AdminCredentials::example2().password,
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(admin)]
    async fn admin_logout(client: Client) {
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());
        let response = client.delete(uri!(logout)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_none());

        let response = client.get("/api/admin/candidates").dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(student)]
    async fn students_are_not_admins(client: Client) {
        let response = client.get("/api/admin/candidates").dispatch().await;
        assert_eq!(Status::Forbidden, response.status());
    }

    #[backend_test(admin)]
    async fn listing_filters_and_pages(client: Client, new_candidates: Coll<NewCandidate>) {
        insert_candidates(&new_candidates).await;

        let all = list(&client, "").await;
        assert_eq!(5, all.pagination.total);
        assert_eq!(5, all.items.len());

        let pending = list(&client, "?status=pending").await;
        assert_eq!(1, pending.pagination.total);
        assert_eq!("REG004", pending.items[0].reg_no);

        let technical = list(&client, "?position=Technical%20Secretary&status=approved").await;
        assert_eq!(2, technical.pagination.total);

        let search = list(&client, "?search=MEERA").await;
        assert_eq!(1, search.pagination.total);
        assert_eq!("REG002", search.items[0].reg_no);

        // Metacharacters are literal.
        let search = list(&client, "?search=.*").await;
        assert_eq!(0, search.pagination.total);

        let page = list(&client, "?page_num=2&page_size=2").await;
        assert_eq!(5, page.pagination.total);
        assert_eq!(2, page.items.len());
        let last = list(&client, "?page_num=3&page_size=2").await;
        assert_eq!(1, last.items.len());

        let response = client
            .get("/api/admin/candidates?page_num=0")
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }

    #[backend_test(admin)]
    async fn moderation_controls_the_ballot(client: Client, new_candidates: Coll<NewCandidate>) {
        insert_candidates(&new_candidates).await;

        let response = client
            .patch(uri!(set_candidate_status("REG004")))
            .header(ContentType::JSON)
            .body(json!({ "status": "approved", "remarks": "Eligible" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let candidate: CandidateDescription =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(CandidateStatus::Approved, candidate.status);
        assert_eq!(Some("Eligible".to_string()), candidate.remarks);

        let response = client
            .patch(uri!(set_candidate_status("REG001")))
            .header(ContentType::JSON)
            .body(json!({ "status": "rejected" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let approved = list(&client, "?status=approved").await;
        let reg_nos: Vec<_> = approved.items.iter().map(|c| c.reg_no.as_str()).collect();
        assert!(reg_nos.contains(&"REG004"));
        assert!(!reg_nos.contains(&"REG001"));

        let response = client
            .patch(uri!(set_candidate_status("NOPE")))
            .header(ContentType::JSON)
            .body(json!({ "status": "approved" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test(admin)]
    async fn candidates_with_votes_keep_their_position(
        client: Client,
        candidates: Coll<Candidate>,
        new_candidates: Coll<NewCandidate>,
    ) {
        insert_candidates(&new_candidates).await;
        candidates
            .update_one(doc! { "reg_no": "REG001" }, doc! { "$set": { "votes": 4_i64 } }, None)
            .await
            .unwrap();

        let response = client
            .put(uri!(update_candidate("REG001")))
            .header(ContentType::JSON)
            .body(json!({ "position": Position::SportsSecretary }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        // Other details may still be corrected.
        let response = client
            .put(uri!(update_candidate("REG001")))
            .header(ContentType::JSON)
            .body(json!({ "name": "Kiran S. Jadhav" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client.delete(uri!(delete_candidate("REG001"))).dispatch().await;
        assert_eq!(Status::Conflict, response.status());

        let candidate = Candidate::by_reg_no(&candidates, "REG001").await.unwrap();
        assert_eq!(Position::TechnicalSecretary, candidate.position);
        assert_eq!("Kiran S. Jadhav", candidate.name);
        assert_eq!(4, candidate.votes);
    }

    #[backend_test(admin)]
    async fn candidates_without_votes_can_move_or_go(
        client: Client,
        candidates: Coll<Candidate>,
        new_candidates: Coll<NewCandidate>,
    ) {
        insert_candidates(&new_candidates).await;

        let response = client
            .put(uri!(update_candidate("REG002")))
            .header(ContentType::JSON)
            .body(json!({ "position": Position::SportsSecretary }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let moved = Candidate::by_reg_no(&candidates, "REG002").await.unwrap();
        assert_eq!(Position::SportsSecretary, moved.position);

        let response = client
            .put(uri!(update_candidate("REG002")))
            .header(ContentType::JSON)
            .body(json!({ "email": "kiran@sggs.ac.in" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());

        let response = client.delete(uri!(delete_candidate("REG002"))).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let response = client.get(uri!(get_candidate("REG002"))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }
}
