//! Procurement and sales tenders
//!
//! The router mounts these handlers twice and attaches the [`TenderKind`]
//! as an extension, so both aggregates share one implementation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::CompanyScope;
use crate::domain::tenders::{tender_select, CreateTenderRequest, TenderKind, TenderQuery, TenderRow, UpdateTenderRequest};
use crate::error::ApiResult;
use crate::services::storage;
use crate::services::tenders::{self as store, TenderRefs};

const TENDER_FILTER: &str = r#"
    WHERE ($1::uuid[] IS NULL OR t.company_id = ANY($1))
      AND ($2::text IS NULL OR t.stage = $2)
      AND ($3::text IS NULL OR t.name ILIKE $3 OR t.number::text = $4)
"#;

/// GET /<kind>-tenders
pub async fn list_tenders(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Query(query): Query<TenderQuery>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let stage = query.stage.map(|s| s.as_str());
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let pattern = search.map(|s| format!("%{s}%"));

    let mut conn = state.db.acquire().await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} t {TENDER_FILTER}", kind.tenders()))
        .bind(&companies)
        .bind(stage)
        .bind(&pattern)
        .bind(search)
        .fetch_one(&mut *conn)
        .await?;

    let rows = sqlx::query_as::<_, TenderRow>(&format!(
        "{} {TENDER_FILTER} ORDER BY t.number DESC, t.tour_number DESC LIMIT $5 OFFSET $6",
        tender_select(kind)
    ))
    .bind(&companies)
    .bind(stage)
    .bind(&pattern)
    .bind(search)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&mut *conn)
    .await?;

    let data = store::assemble(&mut conn, kind, rows).await?;
    Ok(Paginated::new(data, &pagination, total))
}

/// GET /<kind>-tenders/:id
pub async fn get_tender(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.db.acquire().await?;
    let row = store::load_tender(&mut conn, kind, tender_id, scope.visible()).await?;
    let tender = store::assemble_one(&mut conn, kind, row).await?;
    Ok(DataResponse::new(tender))
}

/// POST /<kind>-tenders
///
/// Numbering, links and positions are written in one transaction that holds
/// the company row lock until commit.
pub async fn create_tender(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Json(req): Json<CreateTenderRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let company_id = scope.target_company(req.company_id)?;

    let mut tx = state.db.begin().await?;

    store::validate_refs(
        &mut tx,
        company_id,
        &TenderRefs {
            category_id: req.category_id,
            expense_article_id: req.expense_article_id,
            branch_id: req.branch_id,
            department_id: req.department_id,
            currency_id: req.currency_id,
            cpv_category_id: req.cpv_category_id,
            cpv_ids: &req.cpv_ids,
            criterion_ids: &req.criterion_ids,
            nomenclature_ids: req.positions.iter().map(|p| p.nomenclature_id).collect(),
        },
    )
    .await?;

    let numbering = store::next_numbering(&mut tx, kind, company_id, req.parent_id).await?;

    let tender_id = sqlx::query_scalar::<_, Uuid>(&format!(
        r#"
        INSERT INTO {} (
            company_id, parent_id, number, tour_number, name, stage,
            category_id, cpv_category_id, expense_article_id, estimated_budget,
            branch_id, department_id, conduct_type, publication_type, currency_id,
            general_terms, created_by, start_at, end_at,
            price_criterion_vat, price_criterion_delivery
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        RETURNING id
        "#,
        kind.tenders()
    ))
    .bind(company_id)
    .bind(req.parent_id)
    .bind(numbering.number)
    .bind(numbering.tour_number)
    .bind(req.name.trim())
    .bind(req.stage.as_str())
    .bind(req.category_id)
    .bind(req.cpv_category_id)
    .bind(req.expense_article_id)
    .bind(req.estimated_budget)
    .bind(req.branch_id)
    .bind(req.department_id)
    .bind(req.conduct_type.as_str())
    .bind(req.publication_type.as_str())
    .bind(req.currency_id)
    .bind(req.general_terms.as_deref())
    .bind(scope.user_id())
    .bind(req.start_at)
    .bind(req.end_at)
    .bind(req.price_criterion_vat)
    .bind(req.price_criterion_delivery)
    .fetch_one(&mut *tx)
    .await?;

    store::replace_cpvs(&mut tx, kind, tender_id, &req.cpv_ids).await?;
    store::replace_criteria(&mut tx, kind, tender_id, &req.criterion_ids).await?;
    store::sync_positions(&mut tx, kind, tender_id, req.positions).await?;

    let row = store::load_tender(&mut tx, kind, tender_id, None).await?;
    let tender = store::assemble_one(&mut tx, kind, row).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        company_id = %company_id,
        tender_id = %tender_id,
        kind = kind.as_str(),
        number = numbering.number,
        tour_number = numbering.tour_number,
        "Tender created"
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(tender))))
}

/// PATCH /<kind>-tenders/:id
pub async fn update_tender(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path(tender_id): Path<Uuid>,
    Json(req): Json<UpdateTenderRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.begin().await?;
    let current = store::load_tender(&mut tx, kind, tender_id, scope.visible()).await?;
    scope.ensure(current.company_id)?;
    req.validate(&current)?;

    // References are checked with the values the row will end up holding
    store::validate_refs(
        &mut tx,
        current.company_id,
        &TenderRefs {
            category_id: req.category_id.unwrap_or(current.category_id),
            expense_article_id: req.expense_article_id.unwrap_or(current.expense_article_id),
            branch_id: req.branch_id.unwrap_or(current.branch_id),
            department_id: req.department_id.unwrap_or(current.department_id),
            currency_id: req.currency_id.unwrap_or(current.currency_id),
            cpv_category_id: req.cpv_category_id.unwrap_or(current.cpv_category_id),
            cpv_ids: req.cpv_ids.as_deref().unwrap_or_default(),
            criterion_ids: req.criterion_ids.as_deref().unwrap_or_default(),
            nomenclature_ids: req
                .positions
                .iter()
                .flatten()
                .map(|p| p.nomenclature_id)
                .collect(),
        },
    )
    .await?;

    sqlx::query(&format!(
        r#"
        UPDATE {} SET
            name = COALESCE($2, name),
            stage = COALESCE($3, stage),
            category_id = CASE WHEN $4 THEN $5 ELSE category_id END,
            cpv_category_id = CASE WHEN $6 THEN $7 ELSE cpv_category_id END,
            expense_article_id = CASE WHEN $8 THEN $9 ELSE expense_article_id END,
            estimated_budget = CASE WHEN $10 THEN $11 ELSE estimated_budget END,
            branch_id = CASE WHEN $12 THEN $13 ELSE branch_id END,
            department_id = CASE WHEN $14 THEN $15 ELSE department_id END,
            conduct_type = COALESCE($16, conduct_type),
            publication_type = COALESCE($17, publication_type),
            currency_id = CASE WHEN $18 THEN $19 ELSE currency_id END,
            general_terms = COALESCE($20, general_terms),
            start_at = CASE WHEN $21 THEN $22 ELSE start_at END,
            end_at = CASE WHEN $23 THEN $24 ELSE end_at END,
            price_criterion_vat = COALESCE($25, price_criterion_vat),
            price_criterion_delivery = COALESCE($26, price_criterion_delivery),
            updated_at = NOW()
        WHERE id = $1
        "#,
        kind.tenders()
    ))
    .bind(tender_id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.stage.map(|s| s.as_str()))
    .bind(req.category_id.is_some())
    .bind(req.category_id.flatten())
    .bind(req.cpv_category_id.is_some())
    .bind(req.cpv_category_id.flatten())
    .bind(req.expense_article_id.is_some())
    .bind(req.expense_article_id.flatten())
    .bind(req.estimated_budget.is_some())
    .bind(req.estimated_budget.flatten())
    .bind(req.branch_id.is_some())
    .bind(req.branch_id.flatten())
    .bind(req.department_id.is_some())
    .bind(req.department_id.flatten())
    .bind(req.conduct_type.map(|c| c.as_str()))
    .bind(req.publication_type.map(|p| p.as_str()))
    .bind(req.currency_id.is_some())
    .bind(req.currency_id.flatten())
    .bind(req.general_terms.as_deref())
    .bind(req.start_at.is_some())
    .bind(req.start_at.flatten())
    .bind(req.end_at.is_some())
    .bind(req.end_at.flatten())
    .bind(req.price_criterion_vat)
    .bind(req.price_criterion_delivery)
    .execute(&mut *tx)
    .await?;

    if let Some(cpv_ids) = &req.cpv_ids {
        store::replace_cpvs(&mut tx, kind, tender_id, cpv_ids).await?;
    }
    if let Some(criterion_ids) = &req.criterion_ids {
        store::replace_criteria(&mut tx, kind, tender_id, criterion_ids).await?;
    }
    if let Some(positions) = req.positions {
        store::sync_positions(&mut tx, kind, tender_id, positions).await?;
    }

    let row = store::load_tender(&mut tx, kind, tender_id, None).await?;
    let tender = store::assemble_one(&mut tx, kind, row).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), tender_id = %tender_id, kind = kind.as_str(), "Tender updated");
    Ok(DataResponse::new(tender))
}

/// DELETE /<kind>-tenders/:id
pub async fn delete_tender(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.db.acquire().await?;
    store::load_tender(&mut conn, kind, tender_id, scope.visible()).await?;

    let stored: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT stored_path FROM {} WHERE tender_id = $1",
        kind.files()
    ))
    .bind(tender_id)
    .fetch_all(&mut *conn)
    .await?;

    sqlx::query(&format!("DELETE FROM {} WHERE id = $1", kind.tenders()))
        .bind(tender_id)
        .execute(&mut *conn)
        .await?;

    for path in &stored {
        storage::discard(&state.settings.media_root, path).await;
    }

    tracing::info!(user_id = %scope.user_id(), tender_id = %tender_id, kind = kind.as_str(), "Tender deleted");
    Ok(StatusCode::NO_CONTENT)
}
