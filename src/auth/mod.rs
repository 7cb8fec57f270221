pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, models::User, schema::users, state::AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub login: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        // A newer login bumps token_version and revokes older tokens.
        let mut conn = state.db()?;
        let user = users::table
            .find(claims.sub)
            .first::<User>(&mut conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        if !user.enabled || user.token_version != claims.token_version {
            tracing::debug!(login = %user.login, "rejecting stale or disabled token");
            return Err(AppError::unauthorized());
        }

        Ok(AuthenticatedUser {
            user_id: user.id,
            login: user.login,
        })
    }
}
