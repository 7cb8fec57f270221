use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            expiry: Duration::minutes(config.jwt_expiry_minutes),
        })
    }

    pub fn expires_in_seconds(&self) -> i64 {
        self.expiry.num_seconds()
    }

    // `token_version` must match the user's row for the token to stay valid.
    pub fn generate_token(&self, user_id: Uuid, login: &str, token_version: i32) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.expiry;
        let claims = Claims {
            sub: user_id,
            login: login.to_owned(),
            token_version,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub login: String,
    pub token_version: i32,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn config(secret: &str, audience: &str) -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/isabsent".into(),
            database_max_pool_size: 1,
            server_host: "127.0.0.1".into(),
            server_port: 0,
            jwt_secret: secret.into(),
            jwt_issuer: "isabsent".into(),
            jwt_audience: audience.into(),
            jwt_expiry_minutes: 5,
            cors_allowed_origin: None,
            google_credentials_path: None::<PathBuf>,
            google_sheets_endpoint: crate::config::DEFAULT_SHEETS_ENDPOINT.into(),
        }
    }

    #[test]
    fn issued_token_verifies_with_same_service() {
        let service = JwtService::from_config(&config("secret", "bots")).unwrap();
        let user_id = Uuid::new_v4();
        let token = service.generate_token(user_id, "bot", 3).unwrap();

        let claims = service.verify_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.login, "bot");
        assert_eq!(claims.token_version, 3);
        assert_eq!(service.expires_in_seconds(), 300);
    }

    #[test]
    fn token_for_other_audience_is_rejected() {
        let issuer = JwtService::from_config(&config("secret", "bots")).unwrap();
        let verifier = JwtService::from_config(&config("secret", "admins")).unwrap();
        let token = issuer.generate_token(Uuid::new_v4(), "bot", 0).unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issuer = JwtService::from_config(&config("one", "bots")).unwrap();
        let verifier = JwtService::from_config(&config("two", "bots")).unwrap();
        let token = issuer.generate_token(Uuid::new_v4(), "bot", 0).unwrap();
        assert!(verifier.verify_token(&token).is_err());
    }
}
