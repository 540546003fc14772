//! Two-step onboarding: create an account, then register or join a company

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::domain::companies::{
    normalize_edrpou, Company, CompanyResponse, CompanyStatus, JoinCompanyRequest, RegisterCompanyRequest,
};
use crate::domain::memberships::{MembershipResponse, MembershipRow, MembershipStatus, MEMBERSHIP_SELECT};
use crate::domain::users::{full_name, RegisterUserRequest, User, UserResponse};
use crate::error::{ApiError, ApiResult};
use crate::services::accounts::{self, NewUser};
use crate::services::notifications::{notify_membership_request, JoinRequester};

/// POST /registration/step1
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterUserRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let mut conn = state.db.acquire().await?;
    let user = accounts::create_user(
        &mut conn,
        NewUser {
            email: &req.email,
            password: &req.password,
            first_name: &req.first_name,
            last_name: &req.last_name,
            middle_name: req.middle_name.as_deref(),
            phone: Some(&req.phone),
            is_superuser: false,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(DataResponse::new(UserResponse::from(user)))))
}

async fn active_user(conn: &mut sqlx::PgConnection, user_id: uuid::Uuid) -> ApiResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND is_active")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::field("user_id", "User not found"))
}

/// POST /registration/step2/new
///
/// Company, administrator role and approved membership in one transaction.
pub async fn register_company(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterCompanyRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let edrpou = normalize_edrpou(&req.edrpou);

    let mut tx = state.db.begin().await?;
    let user = active_user(&mut tx, req.user_id).await?;

    let taken = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM companies WHERE edrpou = $1)")
        .bind(&edrpou)
        .fetch_one(&mut *tx)
        .await?;
    if taken {
        return Err(ApiError::field("edrpou", "A company with this EDRPOU is already registered"));
    }

    let company = sqlx::query_as::<_, Company>(
        r#"
        INSERT INTO companies (edrpou, name, goal_tenders, goal_participation, status)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&edrpou)
    .bind(req.name.trim())
    .bind(req.goal_tenders)
    .bind(req.goal_participation)
    .bind(CompanyStatus::Active.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let admin_role = accounts::ensure_admin_role(&mut tx, company.id).await?;

    sqlx::query(
        r#"
        INSERT INTO company_users (user_id, company_id, role_id, status)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user.id)
    .bind(company.id)
    .bind(admin_role)
    .bind(MembershipStatus::Approved.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.id, company_id = %company.id, "Company registered");
    Ok((StatusCode::CREATED, Json(DataResponse::new(CompanyResponse::from(company)))))
}

/// POST /registration/step2/existing
///
/// Pending membership with the member role; administrators are notified.
pub async fn join_company(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinCompanyRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let edrpou = normalize_edrpou(&req.edrpou);

    let mut tx = state.db.begin().await?;
    let user = active_user(&mut tx, req.user_id).await?;

    let mut company = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE edrpou = $1 FOR UPDATE")
        .bind(&edrpou)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::field("edrpou", "No company with this EDRPOU"))?;

    if CompanyStatus::parse(&company.status) != Some(CompanyStatus::Active) {
        return Err(ApiError::field("edrpou", "Company is not active"));
    }

    let already = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM company_users WHERE user_id = $1 AND company_id = $2)",
    )
    .bind(user.id)
    .bind(company.id)
    .fetch_one(&mut *tx)
    .await?;
    if already {
        return Err(ApiError::field("edrpou", "You already have a membership in this company"));
    }

    // An unclaimed company takes the name from the first person to join
    if let Some(name) = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        let has_members = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM company_users WHERE company_id = $1 AND status = 'approved')",
        )
        .bind(company.id)
        .fetch_one(&mut *tx)
        .await?;

        if !has_members && name != company.name {
            company = sqlx::query_as::<_, Company>(
                "UPDATE companies SET name = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(company.id)
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        }
    }

    let member_role = accounts::ensure_member_role(&mut tx, company.id).await?;

    let membership_id = sqlx::query_scalar::<_, uuid::Uuid>(
        r#"
        INSERT INTO company_users (user_id, company_id, role_id, status)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user.id)
    .bind(company.id)
    .bind(member_role)
    .bind(MembershipStatus::Pending.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let requester_name = full_name(&user.last_name, &user.first_name, user.middle_name.as_deref());
    let notified = notify_membership_request(
        &mut tx,
        membership_id,
        company.id,
        &company.name,
        &JoinRequester {
            user_id: user.id,
            full_name: &requester_name,
            email: &user.email,
        },
    )
    .await?;

    let membership = sqlx::query_as::<_, MembershipRow>(&format!("{MEMBERSHIP_SELECT} WHERE cu.id = $1"))
        .bind(membership_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        user_id = %user.id,
        company_id = %company.id,
        notified,
        "Membership requested"
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(MembershipResponse::from(membership)))))
}
