//! HS256 token issuing and verification

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use uuid::Uuid;

use super::claims::{Claims, TokenType};
use crate::config::Settings;

/// Access/refresh pair returned by login
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub access_expires_in: i64,
}

/// Signing material shared by every request
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl JwtKeys {
    pub fn new(secret: &str, issuer: &str, access_ttl_seconds: i64, refresh_ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.jwt_secret,
            &settings.jwt_issuer,
            settings.jwt_access_ttl_seconds,
            settings.jwt_refresh_ttl_seconds,
        )
    }

    pub fn issue_pair(&self, user_id: Uuid, email: &str) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.issue(user_id, email, TokenType::Access)?,
            refresh: self.issue(user_id, email, TokenType::Refresh)?,
            access_expires_in: self.access_ttl_seconds,
        })
    }

    pub fn issue(&self, user_id: Uuid, email: &str, token_type: TokenType) -> Result<String> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl_seconds,
            TokenType::Refresh => self.refresh_ttl_seconds,
        };
        let now = Utc::now().timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            token_type,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl,
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).context("Failed to sign token")
    }

    /// Verify signature, issuer, expiry and the expected token type
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &self.decoding, &validation).context("JWT validation failed")?;

        if data.claims.token_type != expected {
            anyhow::bail!("Unexpected token type {:?}", data.claims.token_type);
        }

        Ok(data.claims)
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new("unit-test-secret-value", "tenderhub-test", 300, 3600)
    }

    #[test]
    fn issued_access_token_verifies() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let pair = keys.issue_pair(user_id, "buyer@example.com").unwrap();

        let claims = keys.verify(&pair.access, TokenType::Access).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "buyer@example.com");
        assert_eq!(pair.access_expires_in, 300);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let keys = keys();
        let pair = keys.issue_pair(Uuid::new_v4(), "a@b.c").unwrap();

        assert!(keys.verify(&pair.refresh, TokenType::Access).is_err());
        assert!(keys.verify(&pair.refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn foreign_secret_or_issuer_is_rejected() {
        let token = keys().issue(Uuid::new_v4(), "a@b.c", TokenType::Access).unwrap();

        let other_secret = JwtKeys::new("another-secret-value!!", "tenderhub-test", 300, 3600);
        assert!(other_secret.verify(&token, TokenType::Access).is_err());

        let other_issuer = JwtKeys::new("unit-test-secret-value", "someone-else", 300, 3600);
        assert!(other_issuer.verify(&token, TokenType::Access).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        // Past the default 60s leeway
        let expired = JwtKeys::new("unit-test-secret-value", "tenderhub-test", -600, -600);
        let token = expired.issue(Uuid::new_v4(), "a@b.c", TokenType::Access).unwrap();

        assert!(keys().verify(&token, TokenType::Access).is_err());
    }
}
