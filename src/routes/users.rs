use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewUser, User, LOGIN_MAX_LEN, TEXT_MAX_LEN},
    schema::users,
    state::AppState,
    utils::json::{check_length, classify_patch, nullable_text, required_text, Patch},
};

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub login: String,
    pub email: String,
    pub password: String,
    pub info: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub login: String,
    pub email: String,
    pub info: Option<String>,
    pub enabled: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            login: user.login,
            email: user.email,
            info: user.info,
            enabled: user.enabled,
        }
    }
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateUserChangeset {
    login: Option<String>,
    email: Option<String>,
    password_hash: Option<String>,
    info: Option<Option<String>>,
    enabled: Option<bool>,
    token_version: Option<i32>,
}

fn validate_email(email: &str) -> AppResult<()> {
    check_length("email", email, TEXT_MAX_LEN).map_err(AppError::bad_request)?;
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AppError::bad_request(format!("invalid email `{email}`")))
    }
}

fn find_user(conn: &mut PgConnection, login: &str) -> AppResult<User> {
    users::table
        .filter(users::login.eq(login))
        .first::<User>(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("user {login} not found")))
}

fn is_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)
    )
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    WithRejection(Json(payload), _): WithRejection<Json<CreateUserRequest>, AppError>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let login = payload.login.trim();
    if login.is_empty() {
        return Err(AppError::bad_request("login must not be empty"));
    }
    check_length("login", login, LOGIN_MAX_LEN).map_err(AppError::bad_request)?;
    if payload.password.is_empty() {
        return Err(AppError::bad_request("password must not be empty"));
    }
    let email = payload.email.trim();
    validate_email(email)?;

    let password_hash = password::hash_password(&payload.password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        login: login.to_string(),
        email: email.to_string(),
        password_hash,
        info: payload.info.filter(|info| !info.trim().is_empty()),
    };

    let mut conn = state.db()?;
    let created: User = match diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
    {
        Ok(created) => created,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::bad_request(format!("user {login} already exists")));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(login = %created.login, created_by = %user.login, "created user");
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(login): Path<String>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    Ok(Json(find_user(&mut conn, &login)?.into()))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(login): Path<String>,
    WithRejection(Json(body), _): WithRejection<Json<Value>, AppError>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let existing = find_user(&mut conn, &login)?;

    let old_password =
        classify_patch::<String>(&body, "old_password").map_err(AppError::bad_request)?;
    let new_password =
        classify_patch::<String>(&body, "new_password").map_err(AppError::bad_request)?;
    let new_email = required_text(&body, "new_email").map_err(AppError::bad_request)?;
    let new_login = required_text(&body, "new_login").map_err(AppError::bad_request)?;
    let new_info = nullable_text(&body, "new_info").map_err(AppError::bad_request)?;
    let enabled = classify_patch::<bool>(&body, "enabled").map_err(AppError::bad_request)?;

    let mut changeset = UpdateUserChangeset::default();

    match new_password {
        Patch::Omitted => {}
        Patch::Null => return Err(AppError::bad_request("`new_password` cannot be null")),
        Patch::Value(new_password) => {
            if new_password.is_empty() {
                return Err(AppError::bad_request("`new_password` must not be empty"));
            }
            let Patch::Value(old_password) = old_password else {
                return Err(AppError::bad_request(
                    "`old_password` is required to change the password",
                ));
            };
            if !password::verify_password(&old_password, &existing.password_hash)? {
                return Err(AppError::bad_request("old password does not match"));
            }
            changeset.password_hash = Some(password::hash_password(&new_password)?);
            changeset.token_version = Some(existing.token_version + 1);
        }
    }

    if let Some(email) = new_email {
        validate_email(&email)?;
        changeset.email = Some(email);
    }

    if let Some(new_login) = new_login {
        check_length("new_login", &new_login, LOGIN_MAX_LEN).map_err(AppError::bad_request)?;
        if new_login != existing.login {
            changeset.login = Some(new_login);
        }
    }

    match new_info {
        Patch::Omitted => {}
        Patch::Null => changeset.info = Some(None),
        Patch::Value(info) => changeset.info = Some(Some(info)),
    }

    match enabled {
        Patch::Omitted => {}
        Patch::Null => return Err(AppError::bad_request("`enabled` cannot be null")),
        Patch::Value(enabled) => changeset.enabled = Some(enabled),
    }

    let updated: User = match diesel::update(users::table.find(existing.id))
        .set((&changeset, users::updated_at.eq(Utc::now().naive_utc())))
        .get_result(&mut conn)
    {
        Ok(updated) => updated,
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::bad_request("user login already exists"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    tracing::info!(
        login = %updated.login,
        password_changed = changeset.password_hash.is_some(),
        "updated user"
    );
    Ok(Json(updated.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(login): Path<String>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(users::table.filter(users::login.eq(&login))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found(format!("user {login} not found")));
    }

    tracing::info!(%login, "deleted user");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(validate_email("teacher@school.ru").is_ok());
        assert!(validate_email("a.b+c@mail.example.com").is_ok());
    }

    #[test]
    fn rejects_malformed_addresses() {
        for email in ["", "no-at-sign", "@school.ru", "user@localhost", "user@.ru", "a b@x.ru"] {
            assert!(validate_email(email).is_err(), "{email} should be rejected");
        }
    }
}
