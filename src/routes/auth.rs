//! Authentication routes
//!
//! Local accounts with argon2 password hashes and HS256 access/refresh tokens.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, MessageResponse};
use crate::app::AppState;
use crate::auth::password::{
    hash_password_blocking, password_problems, verify_login_blocking, verify_password_blocking,
};
use crate::auth::{RequireAuth, TokenType};
use crate::domain::memberships::{MembershipResponse, MembershipRow, MEMBERSHIP_SELECT};
use crate::domain::users::{
    normalize_email, split_reset_token, AccessTokenResponse, LoginRequest, PasswordChangeRequest,
    PasswordResetConfirmRequest, PasswordResetRequest, RefreshRequest, UpdateProfileRequest, User,
    UserResponse,
};
use crate::error::{ApiError, ApiResult, Violations};

const RESET_REQUESTED: &str = "If the email is registered, password reset instructions have been sent";

#[derive(Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
    pub memberships: Vec<MembershipResponse>,
    /// Union of permission codes over approved memberships
    pub permissions: Vec<String>,
}

async fn load_user(state: &AppState, user_id: Uuid) -> ApiResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(email) = lower($1)")
        .bind(normalize_email(&req.email))
        .fetch_optional(&state.db)
        .await?;

    // Same answer for unknown users, wrong passwords and inactive accounts
    let verified = verify_login_blocking(req.password, user.as_ref().map(|u| u.password_hash.clone())).await;
    let user = match user {
        Some(user) if verified && user.is_active => user,
        _ => return Err(ApiError::unauthorized("Invalid email or password")),
    };

    let pair = state.tokens.issue_pair(user.id, &user.email)?;

    sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(pair))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let claims = state
        .tokens
        .verify(&req.refresh, TokenType::Refresh)
        .map_err(|_| ApiError::unauthorized("Invalid or expired refresh token"))?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthorized("Invalid or expired refresh token"))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND is_active")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User is inactive or does not exist"))?;

    let access = state.tokens.issue(user.id, &user.email, TokenType::Access)?;

    Ok(Json(AccessTokenResponse {
        access,
        access_expires_in: state.tokens.access_ttl_seconds(),
    }))
}

/// GET /auth/me
pub async fn me(auth: RequireAuth, State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, auth.user_id).await?;

    let memberships = sqlx::query_as::<_, MembershipRow>(&format!(
        "{MEMBERSHIP_SELECT} WHERE cu.user_id = $1 ORDER BY cu.created_at"
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await?;

    let permissions = if auth.is_superuser {
        sqlx::query_scalar::<_, String>("SELECT code FROM permissions ORDER BY code")
            .fetch_all(&state.db)
            .await?
    } else {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.code
            FROM company_users cu
            JOIN role_permissions rp ON rp.role_id = cu.role_id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE cu.user_id = $1 AND cu.status = 'approved'
            ORDER BY p.code
            "#,
        )
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await?
    };

    Ok(Json(DataResponse::new(MeResponse {
        user: user.into(),
        memberships: memberships.into_iter().map(Into::into).collect(),
        permissions,
    })))
}

/// PATCH /auth/me
pub async fn update_me(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            middle_name = COALESCE($4, middle_name),
            phone = COALESCE($5, phone),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(auth.user_id)
    .bind(req.first_name.as_deref().map(str::trim))
    .bind(req.last_name.as_deref().map(str::trim))
    .bind(req.middle_name.as_deref().map(str::trim))
    .bind(req.phone.as_deref().map(str::trim))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %auth.user_id, "Profile updated");
    Ok(Json(DataResponse::new(UserResponse::from(user))))
}

/// POST /auth/password-change
pub async fn change_password(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<PasswordChangeRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, auth.user_id).await?;

    if !verify_password_blocking(req.old_password, user.password_hash.clone()).await {
        return Err(ApiError::field("old_password", "Old password is incorrect"));
    }
    let mut v = Violations::new();
    for problem in password_problems(&req.new_password, &user.email) {
        v.add("new_password", problem);
    }
    v.finish()?;

    let hash = hash_password_blocking(req.new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .bind(&hash)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(MessageResponse::new("Password changed"))
}

/// POST /auth/password-reset
///
/// Always answers the same way so the endpoint cannot probe for accounts.
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(email) = lower($1) AND is_active")
        .bind(normalize_email(&req.email))
        .fetch_optional(&state.db)
        .await?;

    if let Some(user) = user {
        let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let token_hash = hash_password_blocking(secret.clone()).await?;
        let expires_at = Utc::now() + Duration::seconds(state.settings.password_reset_ttl_seconds);

        let token_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user.id)
        .bind(&token_hash)
        .bind(expires_at)
        .fetch_one(&state.db)
        .await?;

        tracing::info!(user_id = %user.id, "Password reset requested");
        if state.settings.env.is_dev() {
            tracing::info!(token = %format!("{token_id}.{secret}"), "Password reset token (dev only)");
        }
    }

    Ok(MessageResponse::new(RESET_REQUESTED))
}

#[derive(sqlx::FromRow)]
struct ResetTokenRow {
    user_id: Uuid,
    token_hash: String,
    email: String,
}

/// POST /auth/password-reset/confirm
pub async fn confirm_password_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PasswordResetConfirmRequest>,
) -> ApiResult<impl IntoResponse> {
    let invalid = || ApiError::field("token", "Invalid or expired token");
    let (token_id, secret) = split_reset_token(&req.token).ok_or_else(invalid)?;

    let mut tx = state.db.begin().await?;

    let row = sqlx::query_as::<_, ResetTokenRow>(
        r#"
        SELECT t.user_id, t.token_hash, u.email
        FROM password_reset_tokens t
        JOIN users u ON u.id = t.user_id
        WHERE t.id = $1 AND t.used_at IS NULL AND t.expires_at > NOW()
        FOR UPDATE OF t
        "#,
    )
    .bind(token_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(invalid)?;

    if !verify_password_blocking(secret.to_string(), row.token_hash).await {
        return Err(invalid());
    }

    let mut v = Violations::new();
    for problem in password_problems(&req.new_password, &row.email) {
        v.add("new_password", problem);
    }
    v.finish()?;

    let hash = hash_password_blocking(req.new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(row.user_id)
        .bind(&hash)
        .execute(&mut *tx)
        .await?;

    // Spend this token and any other outstanding ones
    sqlx::query("UPDATE password_reset_tokens SET used_at = NOW() WHERE user_id = $1 AND used_at IS NULL")
        .bind(row.user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(user_id = %row.user_id, "Password reset completed");
    Ok(MessageResponse::new("Password has been reset"))
}
