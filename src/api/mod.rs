use rocket::Route;

pub mod admin;
pub mod candidates;
pub mod election;
pub mod students;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(election::routes());
    routes.extend(candidates::routes());
    routes.extend(admin::routes());
    routes.extend(students::routes());
    routes
}
