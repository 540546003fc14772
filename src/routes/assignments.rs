//! User assignments to organisation nodes
//!
//! One implementation serves `/branch-users`, `/department-users`,
//! `/category-users` and `/expense-users`; the router attaches the
//! [`AssignmentKind`] as an extension.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::CompanyScope;
use crate::domain::org::{
    AssignUsersRequest, AssignmentKind, AssignmentQuery, AssignmentResponse, AssignmentRow, BulkUnassignRequest,
};
use crate::error::{ApiError, ApiResult};

fn select_sql(kind: AssignmentKind) -> String {
    format!(
        r#"
        SELECT a.id, a.{col} AS node_id, a.user_id, u.email, u.first_name, u.last_name, u.middle_name, a.created_at
        FROM {table} a
        JOIN users u ON u.id = a.user_id
        "#,
        col = kind.node_column(),
        table = kind.table(),
    )
}

/// Company owning the node, if the caller can see it
async fn node_company<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    kind: AssignmentKind,
    scope: &CompanyScope,
    node_id: Uuid,
) -> ApiResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>(kind.company_sql())
        .bind(node_id)
        .fetch_optional(executor)
        .await?
        .filter(|company_id| scope.allows(*company_id))
        .ok_or_else(|| ApiError::not_found(format!("{} not found", kind.node_name())))
}

/// GET /<node>-users
pub async fn list_assignments(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<AssignmentKind>,
    Query(query): Query<AssignmentQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = match query.node_id {
        Some(node_id) => {
            node_company(&state.db, kind, &scope, node_id).await?;
            sqlx::query_as::<_, AssignmentRow>(&format!(
                "{} WHERE a.{} = $1 ORDER BY a.created_at",
                select_sql(kind),
                kind.node_column()
            ))
            .bind(node_id)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, AssignmentRow>(&format!(
                "{} WHERE a.{} IN ({}) ORDER BY a.created_at",
                select_sql(kind),
                kind.node_column(),
                kind.visible_nodes_sql()
            ))
            .bind(scope.visible())
            .fetch_all(&state.db)
            .await?
        }
    };

    let data: Vec<AssignmentResponse> = rows.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(data))
}

/// POST /<node>-users
///
/// Get-or-create for every pair; only newly created rows are returned.
/// Users without an approved membership in the node's company are skipped.
pub async fn create_assignments(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<AssignmentKind>,
    Json(req): Json<AssignUsersRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_ids = req.user_ids()?;

    let mut tx = state.db.begin().await?;
    let company_id = node_company(&mut *tx, kind, &scope, req.node)
        .await
        .map_err(|e| match e {
            ApiError::NotFound(msg) => ApiError::field("node", msg),
            other => other,
        })?;
    scope.ensure(company_id)?;

    let members = sqlx::query_scalar::<_, Uuid>(
        "SELECT user_id FROM company_users WHERE company_id = $1 AND status = 'approved' AND user_id = ANY($2)",
    )
    .bind(company_id)
    .bind(&user_ids)
    .fetch_all(&mut *tx)
    .await?;

    let created = sqlx::query_scalar::<_, Uuid>(&format!(
        "INSERT INTO {table} ({col}, user_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT ({col}, user_id) DO NOTHING RETURNING id",
        table = kind.table(),
        col = kind.node_column(),
    ))
    .bind(req.node)
    .bind(&members)
    .fetch_all(&mut *tx)
    .await?;

    let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
        "{} WHERE a.id = ANY($1) ORDER BY a.created_at",
        select_sql(kind)
    ))
    .bind(&created)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        company_id = %company_id,
        node_id = %req.node,
        requested = user_ids.len(),
        created = rows.len(),
        "{} users assigned",
        kind.node_name()
    );
    let data: Vec<AssignmentResponse> = rows.into_iter().map(Into::into).collect();
    Ok((StatusCode::CREATED, Json(DataResponse::new(data))))
}

/// DELETE /<node>-users/:id
pub async fn delete_assignment(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<AssignmentKind>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let node_id = sqlx::query_scalar::<_, Uuid>(&format!(
        "SELECT {} FROM {} WHERE id = $1",
        kind.node_column(),
        kind.table()
    ))
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Assignment not found"))?;

    node_company(&state.db, kind, &scope, node_id)
        .await
        .map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::not_found("Assignment not found"),
            other => other,
        })?;

    sqlx::query(&format!("DELETE FROM {} WHERE id = $1", kind.table()))
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), assignment_id = %id, "{} user unassigned", kind.node_name());
    Ok(StatusCode::NO_CONTENT)
}

/// POST /department-users/bulk-delete
pub async fn bulk_delete_assignments(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<AssignmentKind>,
    Json(req): Json<BulkUnassignRequest>,
) -> ApiResult<StatusCode> {
    let user_ids = req.user_ids()?;
    let company_id = node_company(&state.db, kind, &scope, req.node).await?;
    scope.ensure(company_id)?;

    let removed = sqlx::query(&format!(
        "DELETE FROM {} WHERE {} = $1 AND user_id = ANY($2)",
        kind.table(),
        kind.node_column()
    ))
    .bind(req.node)
    .bind(&user_ids)
    .execute(&state.db)
    .await?
    .rows_affected();

    tracing::info!(user_id = %scope.user_id(), node_id = %req.node, removed, "{} users unassigned", kind.node_name());
    Ok(StatusCode::NO_CONTENT)
}
