//! Password hashing and strength rules

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::sync::OnceLock;

pub const MIN_PASSWORD_LENGTH: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password123", "12345678", "123456789", "1234567890", "qwerty123",
    "qwertyui", "11111111", "00000000", "iloveyou", "admin123", "letmein1", "welcome1",
    "abc12345", "football", "baseball", "sunshine", "princess", "passw0rd",
];

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Constant-time check of `password` against a stored PHC string
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// [`hash_password`] off the async runtime
pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("Password hashing task failed")?
}

/// [`verify_password`] off the async runtime
pub async fn verify_password_blocking(password: String, stored_hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .unwrap_or(false)
}

/// Hash verified against when the login email is unknown
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("tender-login-placeholder").unwrap_or_default())
}

/// Login check that costs one argon2 verification whether or not the user exists
pub async fn verify_login_blocking(password: String, stored_hash: Option<String>) -> bool {
    let known = stored_hash.is_some();
    tokio::task::spawn_blocking(move || {
        let matched = verify_password(&password, stored_hash.as_deref().unwrap_or_else(|| dummy_hash()));
        known && matched
    })
    .await
    .unwrap_or(false)
}

/// Strength problems with `password`, empty when acceptable
pub fn password_problems(password: &str, email: &str) -> Vec<String> {
    let mut problems = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "Password must contain at least {MIN_PASSWORD_LENGTH} characters"
        ));
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("Password cannot be entirely numeric".to_string());
    }
    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        problems.push("Password is too common".to_string());
    }
    let local_part = email.split('@').next().unwrap_or_default().to_lowercase();
    if local_part.len() >= 3 && password.to_lowercase().contains(&local_part) {
        problems.push("Password is too similar to the email".to_string());
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_roundtrip_and_mismatch() {
        let hash = hash_password("s3cure-Passphrase").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cure-Passphrase", &hash));
        assert!(!verify_password("wrong-passphrase", &hash));
    }

    #[tokio::test]
    async fn blocking_wrappers_agree() {
        let hash = hash_password_blocking("Tender-Flow-77".to_string()).await.unwrap();
        assert!(verify_password_blocking("Tender-Flow-77".to_string(), hash.clone()).await);
        assert!(!verify_password_blocking("nope".to_string(), hash).await);
    }

    #[tokio::test]
    async fn unknown_login_still_pays_for_a_verification() {
        assert!(dummy_hash().starts_with("$argon2"));
        assert!(!verify_login_blocking("tender-login-placeholder".to_string(), None).await);

        let hash = hash_password_blocking("Tender-Flow-77".to_string()).await.unwrap();
        assert!(verify_login_blocking("Tender-Flow-77".to_string(), Some(hash.clone())).await);
        assert!(!verify_login_blocking("nope".to_string(), Some(hash)).await);
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn weak_passwords_are_reported() {
        assert!(!password_problems("short", "x@y.z").is_empty());
        assert!(!password_problems("1234567890", "x@y.z").is_empty());
        assert!(!password_problems("password123", "x@y.z").is_empty());
        assert!(!password_problems("olena-2024!", "olena@company.ua").is_empty());
        assert!(password_problems("Tender-Flow-77", "olena@company.ua").is_empty());
    }
}
