use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use isabsent::auth::{jwt::JwtService, password};
use isabsent::config::{AppConfig, DEFAULT_SHEETS_ENDPOINT};
use isabsent::db::{self, PgPool};
use isabsent::models::NewUser;
use isabsent::routes;
use isabsent::sheets::{
    AbsenceRow, Roster, RosterEntry, SheetsError, SheetsResult, SpreadsheetSync,
};
use isabsent::state::AppState;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const ADMIN_LOGIN: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin-pass";

/// In-memory spreadsheet that records every write.
#[derive(Default)]
pub struct FakeSheets {
    rosters: Mutex<HashMap<(String, Roster), Vec<RosterEntry>>>,
    written_codes: Mutex<Vec<(String, Roster, Vec<String>)>>,
    replaced_codes: Mutex<Vec<(Roster, String, String)>>,
    absences: Mutex<Vec<(String, AbsenceRow)>>,
    fail_writes: AtomicBool,
}

#[async_trait]
impl SpreadsheetSync for FakeSheets {
    async fn fetch_roster(&self, link: &str, roster: Roster) -> SheetsResult<Vec<RosterEntry>> {
        let guard = self.rosters.lock().await;
        match guard.get(&(link.to_string(), roster)) {
            Some(entries) if entries.is_empty() => Err(SheetsError::EmptyRoster),
            Some(entries) => Ok(entries.clone()),
            None => Err(SheetsError::WorksheetMissing(roster.label().to_string())),
        }
    }

    async fn write_codes(&self, link: &str, roster: Roster, codes: &[String]) -> SheetsResult<()> {
        self.check_writable()?;
        let mut guard = self.written_codes.lock().await;
        guard.push((link.to_string(), roster, codes.to_vec()));
        Ok(())
    }

    async fn replace_code(
        &self,
        _link: &str,
        roster: Roster,
        old_code: &str,
        new_code: &str,
    ) -> SheetsResult<()> {
        self.check_writable()?;
        let mut guard = self.replaced_codes.lock().await;
        guard.push((roster, old_code.to_string(), new_code.to_string()));
        Ok(())
    }

    async fn append_absence(&self, link: &str, row: &AbsenceRow) -> SheetsResult<()> {
        self.check_writable()?;
        let mut guard = self.absences.lock().await;
        guard.push((link.to_string(), row.clone()));
        Ok(())
    }
}

#[allow(dead_code)]
impl FakeSheets {
    fn check_writable(&self) -> SheetsResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SheetsError::Upstream {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }
        Ok(())
    }

    pub async fn set_roster(&self, link: &str, roster: Roster, entries: Vec<RosterEntry>) {
        let mut guard = self.rosters.lock().await;
        guard.insert((link.to_string(), roster), entries);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn written_codes(&self) -> Vec<(String, Roster, Vec<String>)> {
        self.written_codes.lock().await.clone()
    }

    pub async fn replaced_codes(&self) -> Vec<(Roster, String, String)> {
        self.replaced_codes.lock().await.clone()
    }

    pub async fn absences(&self) -> Vec<(String, AbsenceRow)> {
        self.absences.lock().await.clone()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    sheets: Arc<FakeSheets>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            google_credentials_path: None,
            google_sheets_endpoint: DEFAULT_SHEETS_ENDPOINT.to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let sheets = Arc::new(FakeSheets::default());
        let sheets_for_state: Arc<dyn SpreadsheetSync> = sheets.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, sheets_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            sheets,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    #[allow(dead_code)]
    pub fn sheets(&self) -> Arc<FakeSheets> {
        self.sheets.clone()
    }

    pub async fn insert_user(&self, login: &str, password: &str) -> Result<Uuid> {
        let login = login.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                login,
                email: "admin@isabsent.test".to_string(),
                password_hash: password::hash_password(&password)?,
                info: None,
            };
            diesel::insert_into(isabsent::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, login: &str, password: &str) -> Result<String> {
        let response = self
            .post_form("/v1/token", &[("username", login), ("password", password)])
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response without access_token"))
    }

    /// Creates the admin user and returns a fresh token for it.
    #[allow(dead_code)]
    pub async fn admin_token(&self) -> Result<String> {
        self.insert_user(ADMIN_LOGIN, ADMIN_PASSWORD).await?;
        self.login_token(ADMIN_LOGIN, ADMIN_PASSWORD).await
    }

    pub async fn post_form(&self, path: &str, fields: &[(&str, &str)]) -> Result<hyper::Response<Body>> {
        let body = fields
            .iter()
            .map(|(key, value)| format!("{}={}", form_encode(key), form_encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        self.send(
            Method::POST,
            path,
            Body::from(body),
            Some("application/x-www-form-urlencoded"),
            None,
        )
        .await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = Body::from(serde_json::to_vec(payload)?);
        self.send(Method::PUT, path, body, Some("application/json"), token)
            .await
    }

    #[allow(dead_code)]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = Body::from(serde_json::to_vec(payload)?);
        self.send(Method::POST, path, body, Some("application/json"), token)
            .await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = Body::from(serde_json::to_vec(payload)?);
        self.send(Method::PATCH, path, body, Some("application/json"), token)
            .await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path, Body::empty(), None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path, Body::empty(), None, token)
            .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Body,
        content_type: Option<&str>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body)?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

fn form_encode(value: &str) -> String {
    percent_encoding::utf8_percent_encode(value, percent_encoding::NON_ALPHANUMERIC).to_string()
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(db::MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE absences, students, teachers, schools, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
