//! Currencies and tender criteria

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::{CompanyScope, RequireAuth};
use crate::domain::references::{
    CreateCriterionRequest, CriterionQuery, CriterionType, Currency, TenderCriterion, TenderCriterionResponse,
    UpdateCriterionRequest,
};
use crate::error::{ApiError, ApiResult};

/// GET /currencies
pub async fn list_currencies(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let currencies = sqlx::query_as::<_, Currency>("SELECT id, code, name FROM currencies ORDER BY code")
        .fetch_all(&state.db)
        .await?;

    Ok(DataResponse::new(currencies))
}

/// GET /currencies/:id
pub async fn get_currency(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let currency = sqlx::query_as::<_, Currency>("SELECT id, code, name FROM currencies WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Currency not found"))?;

    Ok(DataResponse::new(currency))
}

// ============================================================================
// Tender criteria
// ============================================================================

async fn load_criterion(state: &AppState, scope: &CompanyScope, id: Uuid) -> ApiResult<TenderCriterion> {
    sqlx::query_as::<_, TenderCriterion>(
        "SELECT * FROM tender_criteria WHERE id = $1 AND ($2::uuid[] IS NULL OR company_id = ANY($2))",
    )
    .bind(id)
    .bind(scope.visible())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Criterion not found"))
}

/// GET /tender-criteria
pub async fn list_criteria(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CriterionQuery>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let rows = sqlx::query_as::<_, TenderCriterion>(
        "SELECT * FROM tender_criteria WHERE ($1::uuid[] IS NULL OR company_id = ANY($1)) ORDER BY name",
    )
    .bind(&companies)
    .fetch_all(&state.db)
    .await?;

    let data: Vec<TenderCriterionResponse> = rows.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(data))
}

/// GET /tender-criteria/:id
pub async fn get_criterion(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let criterion = load_criterion(&state, &scope, id).await?;
    Ok(DataResponse::new(TenderCriterionResponse::from(criterion)))
}

/// POST /tender-criteria
pub async fn create_criterion(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCriterionRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let company_id = scope.target_company(req.company_id)?;
    let options = req.options.clone().unwrap_or_else(|| serde_json::json!([]));

    let criterion = sqlx::query_as::<_, TenderCriterion>(
        "INSERT INTO tender_criteria (company_id, name, type, options) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(company_id)
    .bind(req.name.trim())
    .bind(req.criterion_type.as_str())
    .bind(sqlx::types::Json(options))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %scope.user_id(), company_id = %company_id, criterion_id = %criterion.id, "Criterion created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(TenderCriterionResponse::from(criterion)))))
}

/// PATCH /tender-criteria/:id
pub async fn update_criterion(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCriterionRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = load_criterion(&state, &scope, id).await?;
    let current_type = CriterionType::parse(&current.criterion_type).unwrap_or_default();
    req.validate(current_type)?;

    let criterion = sqlx::query_as::<_, TenderCriterion>(
        r#"
        UPDATE tender_criteria SET
            name = COALESCE($2, name),
            type = COALESCE($3, type),
            options = COALESCE($4, options)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.criterion_type.map(|t| t.as_str()))
    .bind(req.options.clone().map(sqlx::types::Json))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %scope.user_id(), criterion_id = %id, "Criterion updated");
    Ok(DataResponse::new(TenderCriterionResponse::from(criterion)))
}

/// DELETE /tender-criteria/:id
pub async fn delete_criterion(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    load_criterion(&state, &scope, id).await?;
    sqlx::query("DELETE FROM tender_criteria WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), criterion_id = %id, "Criterion deleted");
    Ok(StatusCode::NO_CONTENT)
}
