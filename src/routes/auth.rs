use axum::{extract::State, Form, Json};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::User,
    schema::users::dsl,
    state::AppState,
};

#[derive(Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

pub async fn token(
    State(state): State<AppState>,
    WithRejection(Form(payload), _): WithRejection<Form<TokenRequest>, AppError>,
) -> AppResult<Json<TokenResponse>> {
    let mut conn = state.db()?;

    let user: User = dsl::users
        .filter(dsl::login.eq(payload.username.trim()))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;

    if !valid || !user.enabled {
        tracing::warn!(login = %user.login, enabled = user.enabled, "login rejected");
        return Err(AppError::unauthorized());
    }

    let token_version: i32 = diesel::update(dsl::users.find(user.id))
        .set((
            dsl::token_version.eq(dsl::token_version + 1),
            dsl::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(dsl::token_version)
        .get_result(&mut conn)?;

    let access_token = state
        .jwt
        .generate_token(user.id, &user.login, token_version)
        .map_err(AppError::from)?;

    tracing::info!(login = %user.login, token_version, "issued access token");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
    }))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}
