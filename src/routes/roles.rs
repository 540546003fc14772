//! Permission catalog and company roles

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::{AdminScope, RequireAuth};
use crate::domain::roles::{CreateRoleRequest, Permission, Role, RoleQuery, RoleResponse, UpdateRoleRequest};
use crate::error::{ApiError, ApiResult};

#[derive(sqlx::FromRow)]
struct RolePermissionRow {
    role_id: Uuid,
    id: Uuid,
    code: String,
    label: String,
}

/// Attach permissions to each role with a single query
async fn with_permissions<'e, E: sqlx::PgExecutor<'e>>(executor: E, roles: Vec<Role>) -> ApiResult<Vec<RoleResponse>> {
    let ids: Vec<Uuid> = roles.iter().map(|r| r.id).collect();
    let rows = sqlx::query_as::<_, RolePermissionRow>(
        r#"
        SELECT rp.role_id, p.id, p.code, p.label
        FROM role_permissions rp
        JOIN permissions p ON p.id = rp.permission_id
        WHERE rp.role_id = ANY($1)
        ORDER BY p.code
        "#,
    )
    .bind(&ids)
    .fetch_all(executor)
    .await?;

    let mut by_role: HashMap<Uuid, Vec<Permission>> = HashMap::new();
    for row in rows {
        by_role.entry(row.role_id).or_default().push(Permission {
            id: row.id,
            code: row.code,
            label: row.label,
        });
    }

    Ok(roles
        .into_iter()
        .map(|role| {
            let permissions = by_role.remove(&role.id).unwrap_or_default();
            RoleResponse::new(role, permissions)
        })
        .collect())
}

async fn load_role(state: &AppState, scope: &AdminScope, role_id: Uuid) -> ApiResult<Role> {
    sqlx::query_as::<_, Role>(
        "SELECT * FROM roles WHERE id = $1 AND ($2::uuid[] IS NULL OR company_id = ANY($2))",
    )
    .bind(role_id)
    .bind(scope.visible())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Role not found"))
}

async fn replace_permissions(conn: &mut sqlx::PgConnection, role_id: Uuid, permission_ids: &[Uuid]) -> ApiResult<()> {
    let known = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM permissions WHERE id = ANY($1)")
        .bind(permission_ids)
        .fetch_one(&mut *conn)
        .await?;
    let mut unique = permission_ids.to_vec();
    unique.sort_unstable();
    unique.dedup();
    if known as usize != unique.len() {
        return Err(ApiError::field("permission_ids", "Unknown permission"));
    }

    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::uuid[])")
        .bind(role_id)
        .bind(&unique)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// GET /permissions
pub async fn list_permissions(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let permissions = sqlx::query_as::<_, Permission>("SELECT id, code, label FROM permissions ORDER BY code")
        .fetch_all(&state.db)
        .await?;

    Ok(DataResponse::new(permissions))
}

/// GET /roles
pub async fn list_roles(
    scope: AdminScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoleQuery>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let roles = sqlx::query_as::<_, Role>(
        r#"
        SELECT * FROM roles
        WHERE ($1::uuid[] IS NULL OR company_id = ANY($1))
        ORDER BY is_system DESC, name
        "#,
    )
    .bind(&companies)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(with_permissions(&state.db, roles).await?))
}

/// GET /roles/:id
pub async fn get_role(
    scope: AdminScope,
    State(state): State<Arc<AppState>>,
    Path(role_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let role = load_role(&state, &scope, role_id).await?;
    let mut roles = with_permissions(&state.db, vec![role]).await?;
    let role = roles.pop().ok_or_else(|| ApiError::not_found("Role not found"))?;
    Ok(DataResponse::new(role))
}

/// POST /roles
pub async fn create_role(
    scope: AdminScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let company_id = scope.target_company(req.company_id)?;

    let mut tx = state.db.begin().await?;
    let role = sqlx::query_as::<_, Role>(
        "INSERT INTO roles (company_id, name, is_system) VALUES ($1, $2, false) RETURNING *",
    )
    .bind(company_id)
    .bind(req.name.trim())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::field("name", "A role with this name already exists"),
        other => other,
    })?;
    replace_permissions(&mut tx, role.id, &req.permission_ids).await?;

    let response = with_permissions(&mut *tx, vec![role]).await?;
    tx.commit().await?;

    let role = response.into_iter().next().ok_or_else(|| ApiError::internal("Role vanished"))?;
    tracing::info!(user_id = %scope.user_id(), company_id = %company_id, role_id = %role.id, "Role created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(role))))
}

/// PATCH /roles/:id
pub async fn update_role(
    scope: AdminScope,
    State(state): State<Arc<AppState>>,
    Path(role_id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let current = load_role(&state, &scope, role_id).await?;
    if current.is_system && req.name.as_deref().is_some_and(|n| n.trim() != current.name) {
        return Err(ApiError::field("name", "System roles cannot be renamed"));
    }

    let mut tx = state.db.begin().await?;
    let role = sqlx::query_as::<_, Role>("UPDATE roles SET name = COALESCE($2, name) WHERE id = $1 RETURNING *")
        .bind(role_id)
        .bind(req.name.as_deref().map(str::trim))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::field("name", "A role with this name already exists"),
            other => other,
        })?;
    if let Some(permission_ids) = &req.permission_ids {
        replace_permissions(&mut tx, role_id, permission_ids).await?;
    }

    let response = with_permissions(&mut *tx, vec![role]).await?;
    tx.commit().await?;

    let role = response.into_iter().next().ok_or_else(|| ApiError::internal("Role vanished"))?;
    tracing::info!(user_id = %scope.user_id(), role_id = %role_id, "Role updated");
    Ok(DataResponse::new(role))
}

/// DELETE /roles/:id
pub async fn delete_role(
    scope: AdminScope,
    State(state): State<Arc<AppState>>,
    Path(role_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let role = load_role(&state, &scope, role_id).await?;
    if role.is_system {
        return Err(ApiError::bad_request("System roles cannot be deleted"));
    }

    let in_use = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM company_users WHERE role_id = $1)")
        .bind(role_id)
        .fetch_one(&state.db)
        .await?;
    if in_use {
        return Err(ApiError::bad_request("Role is assigned to members and cannot be deleted"));
    }

    sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(role_id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), role_id = %role_id, "Role deleted");
    Ok(StatusCode::NO_CONTENT)
}
