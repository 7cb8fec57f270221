use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod health;
pub mod lookup;
pub mod roster;
pub mod schools;
pub mod students;
pub mod teachers;
pub mod users;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let user_routes = Router::new()
        .route("/user", put(users::create_user))
        .route(
            "/user/:login",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/me", get(auth::me));

    let school_routes = Router::new()
        .route(
            "/school",
            put(schools::create_school)
                .get(schools::get_school)
                .patch(schools::update_school)
                .delete(schools::delete_school),
        )
        .route("/schools", get(schools::list_schools))
        .route(
            "/school/teachers",
            put(schools::create_teachers).get(schools::list_teachers),
        )
        .route(
            "/school/students",
            put(schools::create_students).get(schools::list_students),
        )
        .route("/school/absents", get(schools::list_absents))
        .route("/school/find_by_code", get(schools::find_by_code));

    let teacher_routes = Router::new()
        .route(
            "/teacher",
            get(teachers::get_teacher)
                .patch(teachers::update_teacher)
                .delete(teachers::delete_teacher),
        )
        .route("/teacher/tg_auth", post(teachers::tg_auth))
        .route("/teacher/code", post(teachers::rotate_code))
        .route("/teacher/students", get(teachers::list_class_students))
        .route("/teacher/students_by_name", get(teachers::students_by_name))
        .route("/teacher/absents", get(teachers::list_absents));

    let student_routes = Router::new()
        .route(
            "/student",
            get(students::get_student)
                .patch(students::update_student)
                .delete(students::delete_student),
        )
        .route("/student/tg_auth", post(students::tg_auth))
        .route("/student/code", post(students::rotate_code))
        .route(
            "/student/absent",
            post(students::create_absence).delete(students::delete_absence),
        )
        .route("/student/absents", get(students::list_absents));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .merge(user_routes)
        .merge(school_routes)
        .merge(teacher_routes)
        .merge(student_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let v1 = Router::new()
        .merge(protected_routes)
        .route("/token", post(auth::token))
        .route("/health", get(health::health_check));

    Router::new()
        .nest("/v1", v1)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
