use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{AuthContext, TokenType};
use crate::app::AppState;
use crate::error::ErrorResponse;
use crate::middleware::request_id::RequestIdExt;

/// Extractor that requires a valid access token for an active user
///
/// Example:
/// ```ignore
/// async fn protected_route(auth: RequireAuth) -> impl IntoResponse {
///     format!("Hello, user {}", auth.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth(pub AuthContext);

impl std::ops::Deref for RequireAuth {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken(String),
    InactiveUser,
    Database(String),
}

/// Rejection carrying the request id into the error body
#[derive(Debug)]
pub struct AuthRejection {
    pub error: AuthError,
    request_id: Option<String>,
}

impl AuthRejection {
    pub fn new(error: AuthError, parts: &Parts) -> Self {
        Self {
            error,
            request_id: parts.headers.request_id().map(str::to_string),
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.error {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing authorization token"),
            AuthError::InvalidFormat => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid authorization format"),
            AuthError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid or expired token"),
            AuthError::InactiveUser => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "User is inactive or does not exist"),
            AuthError::Database(e) => {
                tracing::error!(error = %e, "Database error during authentication");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "An internal error occurred")
            }
        };

        let body = ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            fields: None,
            request_id: self.request_id,
        };

        (status, Json(body)).into_response()
    }
}

#[derive(sqlx::FromRow)]
struct ActiveUserRow {
    email: String,
    is_active: bool,
    is_superuser: bool,
}

/// Pull the bearer token out of the Authorization header
pub(crate) fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<AuthContext, AuthError> {
    let token = bearer_token(parts)?;

    let claims = state.tokens.verify(token, TokenType::Access).map_err(|e| {
        tracing::warn!(error = %e, "JWT verification failed");
        AuthError::InvalidToken(e.to_string())
    })?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AuthError::InvalidToken("Invalid user ID in token".to_string()))?;

    let user = sqlx::query_as::<_, ActiveUserRow>(
        "SELECT email, is_active, is_superuser FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AuthError::Database(e.to_string()))?;

    match user {
        Some(user) if user.is_active => Ok(AuthContext::new(user_id, user.email, user.is_superuser)),
        _ => Err(AuthError::InactiveUser),
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state)
            .await
            .map(RequireAuth)
            .map_err(|e| AuthRejection::new(e, parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/auth/me");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_token_parsing() {
        assert!(matches!(bearer_token(&parts_with(None)), Err(AuthError::MissingToken)));
        assert!(matches!(bearer_token(&parts_with(Some("Token abc"))), Err(AuthError::InvalidFormat)));
        assert!(matches!(bearer_token(&parts_with(Some("Bearer   "))), Err(AuthError::MissingToken)));
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc.def"))).unwrap(), "abc.def");
    }
}
