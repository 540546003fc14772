//! User accounts and authentication DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::auth::password::password_problems;
use crate::error::{ApiResult, Violations};

/// User entity
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub phone: Option<String>,
    pub full_name: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        let full_name = full_name(&u.last_name, &u.first_name, u.middle_name.as_deref());
        Self {
            id: u.id,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            middle_name: u.middle_name,
            phone: u.phone,
            full_name,
            is_active: u.is_active,
            is_superuser: u.is_superuser,
            created_at: u.created_at,
        }
    }
}

/// Compact user reference embedded in other responses
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserBrief {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
}

/// "Last First Middle", skipping blanks
pub fn full_name(last: &str, first: &str, middle: Option<&str>) -> String {
    [last, first, middle.unwrap_or_default()]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trim and lowercase the domain part; the local part keeps its case
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

pub fn is_valid_email(email: &str) -> bool {
    match email.rsplit_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.starts_with('.')
                && domain.contains('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn check_email(v: &mut Violations, field: &str, email: &str) {
    if email.trim().is_empty() {
        v.add(field, "This field is required");
    } else if !is_valid_email(email.trim()) {
        v.add(field, "Enter a valid email address");
    }
}

fn check_password(v: &mut Violations, field: &str, password: &str, email: &str) {
    for problem in password_problems(password, email) {
        v.add(field, problem);
    }
}

// ============================================================================
// Registration / account DTOs
// ============================================================================

/// Step one of onboarding, also used to create company users
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUserRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub phone: String,
    pub email: String,
    pub password: String,
}

impl RegisterUserRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        v.require("first_name", &self.first_name);
        v.require("last_name", &self.last_name);
        v.require("phone", &self.phone);
        check_email(&mut v, "email", &self.email);
        check_password(&mut v, "password", &self.password, &self.email);
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessTokenResponse {
    pub access: String,
    pub access_expires_in: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        if let Some(first_name) = &self.first_name {
            v.require("first_name", first_name);
        }
        if let Some(last_name) = &self.last_name {
            v.require("last_name", last_name);
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChangeRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

/// Reset tokens are `<row id>.<secret>`; only the secret's hash is stored
pub fn split_reset_token(token: &str) -> Option<(Uuid, &str)> {
    let (id, secret) = token.trim().split_once('.')?;
    let id = Uuid::parse_str(id).ok()?;
    if secret.is_empty() {
        return None;
    }
    Some((id, secret))
}

/// Admin edit of a member's account
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMemberUserRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_confirm: Option<String>,
}

impl UpdateMemberUserRequest {
    /// `current_email` feeds the password similarity rule when email is unchanged
    pub fn validate(&self, current_email: &str) -> ApiResult<()> {
        let mut v = Violations::new();
        if let Some(email) = &self.email {
            check_email(&mut v, "email", email);
        }
        if let Some(first_name) = &self.first_name {
            v.require("first_name", first_name);
        }
        if let Some(last_name) = &self.last_name {
            v.require("last_name", last_name);
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            match self.password_confirm.as_deref() {
                Some(confirm) if confirm == password => {}
                Some(_) => v.add("password_confirm", "Passwords do not match"),
                None => v.add("password_confirm", "Confirm the new password"),
            }
            let email = self.email.as_deref().unwrap_or(current_email);
            check_password(&mut v, "password", password, email);
        }
        v.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step1() -> RegisterUserRequest {
        RegisterUserRequest {
            first_name: "Olena".into(),
            last_name: "Koval".into(),
            middle_name: None,
            phone: "+380501112233".into(),
            email: "olena@Example.UA".into(),
            password: "Tender-Flow-77".into(),
        }
    }

    #[test]
    fn email_domain_is_lowercased() {
        assert_eq!(normalize_email("  Olena@Example.UA "), "Olena@example.ua");
        assert!(is_valid_email("a@b.ua"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.ua"));
        assert!(!is_valid_email("a b@c.ua"));
    }

    #[test]
    fn full_name_skips_blank_parts() {
        assert_eq!(full_name("Koval", "Olena", None), "Koval Olena");
        assert_eq!(full_name("Koval", "Olena", Some("Ivanivna")), "Koval Olena Ivanivna");
        assert_eq!(full_name("", "Olena", Some(" ")), "Olena");
    }

    #[test]
    fn registration_reports_all_fields() {
        assert!(step1().validate().is_ok());

        let mut bad = step1();
        bad.first_name = " ".into();
        bad.email = "nope".into();
        bad.password = "123".into();
        match bad.validate() {
            Err(crate::error::ApiError::Validation(fields)) => {
                assert!(fields.contains_key("first_name"));
                assert!(fields.contains_key("email"));
                assert!(fields.contains_key("password"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn member_password_requires_matching_confirmation() {
        let mut req = UpdateMemberUserRequest {
            password: Some("Tender-Flow-77".into()),
            ..Default::default()
        };
        assert!(req.validate("x@y.ua").is_err());

        req.password_confirm = Some("Tender-Flow-77".into());
        assert!(req.validate("x@y.ua").is_ok());
    }

    #[test]
    fn reset_token_format() {
        let id = Uuid::new_v4();
        let token = format!("{id}.s3cret");
        assert_eq!(split_reset_token(&token), Some((id, "s3cret")));
        assert_eq!(split_reset_token("garbage"), None);
        assert_eq!(split_reset_token(&format!("{id}.")), None);
    }
}
