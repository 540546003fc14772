//! Notification routes
//!
//! In-app notifications of the current user: list, mark read.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::notifications::{MarkAllReadResponse, Notification, NotificationQuery, NotificationResponse};
use crate::error::{ApiError, ApiResult};

/// GET /notifications
///
/// Newest first, optionally only unread ones.
pub async fn list_notifications(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationQuery>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM notifications
        WHERE user_id = $1 AND ($2::bool = false OR is_read = false)
        "#,
    )
    .bind(auth.user_id)
    .bind(query.unread_only)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1 AND ($2::bool = false OR is_read = false)
        ORDER BY created_at DESC, id
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(auth.user_id)
    .bind(query.unread_only)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<NotificationResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &pagination, total))
}

/// GET /notifications/:id
pub async fn get_notification(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let notification = sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(notification_id)
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Notification not found"))?;

    Ok(DataResponse::new(NotificationResponse::from(notification)))
}

/// POST /notifications/:id/mark-read
pub async fn mark_read(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let notification = sqlx::query_as::<_, Notification>(
        "UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(notification_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Notification not found"))?;

    Ok(DataResponse::new(NotificationResponse::from(notification)))
}

/// POST /notifications/mark-all-read
pub async fn mark_all_read(auth: RequireAuth, State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let count = sqlx::query("UPDATE notifications SET is_read = true WHERE user_id = $1 AND is_read = false")
        .bind(auth.user_id)
        .execute(&state.db)
        .await?
        .rows_affected();

    tracing::debug!(user_id = %auth.user_id, count, "Notifications marked read");
    Ok(DataResponse::new(MarkAllReadResponse { count }))
}
