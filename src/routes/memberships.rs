//! Company membership management
//!
//! Everything here is limited to companies where the caller is approved.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::CompanyScope;
use crate::domain::memberships::{
    can_decide, CreateCompanyUserRequest, CreateMembershipRequest, MembershipQuery, MembershipResponse,
    MembershipRow, MembershipStatus, UpdateMembershipRequest, MEMBERSHIP_SELECT,
};
use crate::domain::users::{normalize_email, UpdateMemberUserRequest};
use crate::error::{ApiError, ApiResult};
use crate::services::accounts::{self, NewUser};
use crate::services::notifications::notify_membership_decision;

async fn load_membership<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    scope: &CompanyScope,
    membership_id: Uuid,
) -> ApiResult<MembershipRow> {
    sqlx::query_as::<_, MembershipRow>(&format!(
        "{MEMBERSHIP_SELECT} WHERE cu.id = $1 AND ($2::uuid[] IS NULL OR cu.company_id = ANY($2))"
    ))
    .bind(membership_id)
    .bind(scope.visible())
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| ApiError::not_found("Membership not found"))
}

/// Role must belong to the membership's company
async fn ensure_company_role(state: &AppState, role_id: Uuid, company_id: Uuid) -> ApiResult<()> {
    let ok = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1 AND company_id = $2)")
        .bind(role_id)
        .bind(company_id)
        .fetch_one(&state.db)
        .await?;

    if ok {
        Ok(())
    } else {
        Err(ApiError::field("role_id", "Role does not belong to this company"))
    }
}

/// GET /memberships
pub async fn list_memberships(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<MembershipQuery>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let status = query.status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM company_users cu
        WHERE ($1::uuid[] IS NULL OR cu.company_id = ANY($1))
          AND ($2::text IS NULL OR cu.status = $2)
        "#,
    )
    .bind(&companies)
    .bind(status)
    .fetch_one(&state.db)
    .await?;

    let rows = sqlx::query_as::<_, MembershipRow>(&format!(
        r#"{MEMBERSHIP_SELECT}
        WHERE ($1::uuid[] IS NULL OR cu.company_id = ANY($1))
          AND ($2::text IS NULL OR cu.status = $2)
        ORDER BY cu.created_at DESC
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(&companies)
    .bind(status)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<MembershipResponse> = rows.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &pagination, total))
}

/// GET /memberships/:id
pub async fn get_membership(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let row = load_membership(&state.db, &scope, membership_id).await?;
    Ok(DataResponse::new(MembershipResponse::from(row)))
}

/// POST /memberships
pub async fn create_membership(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateMembershipRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.ensure(req.company_id)?;

    let user_exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
        .bind(req.user_id)
        .fetch_one(&state.db)
        .await?;
    if !user_exists {
        return Err(ApiError::field("user_id", "User not found"));
    }

    let mut tx = state.db.begin().await?;
    let role_id = match req.role_id {
        Some(role_id) => {
            ensure_company_role(&state, role_id, req.company_id).await?;
            role_id
        }
        None => accounts::ensure_member_role(&mut tx, req.company_id).await?,
    };

    let membership_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO company_users (user_id, company_id, role_id, status, invited_by)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(req.user_id)
    .bind(req.company_id)
    .bind(role_id)
    .bind(req.status.as_str())
    .bind(scope.user_id())
    .fetch_one(&mut *tx)
    .await?;

    let row = load_membership(&mut *tx, &scope, membership_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        company_id = %req.company_id,
        membership_id = %membership_id,
        "Membership created"
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(MembershipResponse::from(row)))))
}

/// PATCH /memberships/:id
pub async fn update_membership(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
    Json(req): Json<UpdateMembershipRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = load_membership(&state.db, &scope, membership_id).await?;
    if let Some(role_id) = req.role_id {
        ensure_company_role(&state, role_id, current.company_id).await?;
    }

    sqlx::query(
        r#"
        UPDATE company_users SET
            role_id = COALESCE($2, role_id),
            status = COALESCE($3, status),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(membership_id)
    .bind(req.role_id)
    .bind(req.status.map(|s| s.as_str()))
    .execute(&state.db)
    .await?;

    let row = load_membership(&state.db, &scope, membership_id).await?;
    tracing::info!(user_id = %scope.user_id(), membership_id = %membership_id, "Membership updated");
    Ok(DataResponse::new(MembershipResponse::from(row)))
}

/// DELETE /memberships/:id
pub async fn delete_membership(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let current = load_membership(&state.db, &scope, membership_id).await?;

    sqlx::query("DELETE FROM company_users WHERE id = $1")
        .bind(current.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), membership_id = %membership_id, "Membership deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn decide(
    scope: CompanyScope,
    state: &AppState,
    membership_id: Uuid,
    approve: bool,
) -> ApiResult<DataResponse<MembershipResponse>> {
    let mut tx = state.db.begin().await?;

    let current = load_membership(&mut *tx, &scope, membership_id).await?;
    let status = MembershipStatus::parse(&current.status).unwrap_or_default();
    if !can_decide(status) {
        return Err(ApiError::bad_request(format!(
            "Only pending requests can be decided (current status: {})",
            status.label()
        )));
    }

    let next = if approve {
        MembershipStatus::Approved
    } else {
        MembershipStatus::Rejected
    };
    sqlx::query("UPDATE company_users SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(membership_id)
        .bind(next.as_str())
        .execute(&mut *tx)
        .await?;

    notify_membership_decision(
        &mut *tx,
        current.user_id,
        membership_id,
        current.company_id,
        &current.company_name,
        approve,
    )
    .await?;

    let row = load_membership(&mut *tx, &scope, membership_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        membership_id = %membership_id,
        status = %next,
        "Membership decided"
    );
    Ok(DataResponse::new(MembershipResponse::from(row)))
}

/// POST /memberships/:id/approve
pub async fn approve_membership(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    decide(scope, &state, membership_id, true).await
}

/// POST /memberships/:id/reject
pub async fn reject_membership(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    decide(scope, &state, membership_id, false).await
}

/// POST /memberships/create-user
///
/// New account with an approved member-role membership in the caller's company.
pub async fn create_company_user(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCompanyUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let company_id = scope.target_company(req.company_id)?;
    req.user.validate()?;

    let mut tx = state.db.begin().await?;
    let user = accounts::create_user(
        &mut tx,
        NewUser {
            email: &req.user.email,
            password: &req.user.password,
            first_name: &req.user.first_name,
            last_name: &req.user.last_name,
            middle_name: req.user.middle_name.as_deref(),
            phone: Some(&req.user.phone),
            is_superuser: false,
        },
    )
    .await?;
    let role_id = accounts::ensure_member_role(&mut tx, company_id).await?;

    let membership_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO company_users (user_id, company_id, role_id, status, invited_by)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(user.id)
    .bind(company_id)
    .bind(role_id)
    .bind(MembershipStatus::Approved.as_str())
    .bind(scope.user_id())
    .fetch_one(&mut *tx)
    .await?;

    let row = load_membership(&mut *tx, &scope, membership_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        company_id = %company_id,
        new_user_id = %user.id,
        "Company user created"
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(MembershipResponse::from(row)))))
}

/// PATCH /memberships/:id/update-user
pub async fn update_member_user(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
    Json(req): Json<UpdateMemberUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = load_membership(&state.db, &scope, membership_id).await?;
    req.validate(&current.user_email)?;

    let email = req.email.as_deref().map(normalize_email);
    if let Some(email) = &email {
        if accounts::email_taken(&state.db, email, Some(current.user_id)).await? {
            return Err(ApiError::field("email", "A user with this email already exists"));
        }
    }

    let password_hash = match req.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => Some(crate::auth::password::hash_password_blocking(password.to_string()).await?),
        None => None,
    };

    sqlx::query(
        r#"
        UPDATE users SET
            first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            middle_name = COALESCE($4, middle_name),
            email = COALESCE($5, email),
            phone = COALESCE($6, phone),
            password_hash = COALESCE($7, password_hash),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(current.user_id)
    .bind(req.first_name.as_deref().map(str::trim))
    .bind(req.last_name.as_deref().map(str::trim))
    .bind(req.middle_name.as_deref().map(str::trim))
    .bind(&email)
    .bind(req.phone.as_deref().map(str::trim))
    .bind(&password_hash)
    .execute(&state.db)
    .await?;

    let row = load_membership(&state.db, &scope, membership_id).await?;
    tracing::info!(
        user_id = %scope.user_id(),
        member_user_id = %current.user_id,
        password_changed = password_hash.is_some(),
        "Member account updated"
    );
    Ok(DataResponse::new(MembershipResponse::from(row)))
}

async fn set_member_active(
    scope: CompanyScope,
    state: &AppState,
    membership_id: Uuid,
    active: bool,
) -> ApiResult<DataResponse<MembershipResponse>> {
    let current = load_membership(&state.db, &scope, membership_id).await?;
    if current.user_is_active == active {
        return Err(ApiError::bad_request(if active {
            "User is already active"
        } else {
            "User is already inactive"
        }));
    }
    if !active && current.user_id == scope.user_id() {
        return Err(ApiError::bad_request("You cannot deactivate yourself"));
    }

    sqlx::query("UPDATE users SET is_active = $2, updated_at = NOW() WHERE id = $1")
        .bind(current.user_id)
        .bind(active)
        .execute(&state.db)
        .await?;

    let row = load_membership(&state.db, &scope, membership_id).await?;
    tracing::info!(
        user_id = %scope.user_id(),
        member_user_id = %current.user_id,
        active,
        "Member activation changed"
    );
    Ok(DataResponse::new(MembershipResponse::from(row)))
}

/// POST /memberships/:id/activate
pub async fn activate_member(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    set_member_active(scope, &state, membership_id, true).await
}

/// POST /memberships/:id/deactivate
pub async fn deactivate_member(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(membership_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    set_member_active(scope, &state, membership_id, false).await
}
