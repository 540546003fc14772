//! Company directory and supplier relations

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
use crate::domain::companies::{
    normalize_edrpou, AddSupplierRequest, Company, CompanyQuery, CompanyResponse, SupplierResponse,
    SupplierRow, SupplierSource, SupplierTarget,
};
use crate::error::{ApiError, ApiResult};

const SUPPLIER_SELECT: &str = r#"
    SELECT s.id, s.supplier_company_id, c.edrpou AS supplier_edrpou, c.name AS supplier_name,
           s.source, s.created_at
    FROM company_suppliers s
    JOIN companies c ON c.id = s.supplier_company_id
"#;

/// GET /companies
///
/// Public list of active companies for the onboarding picker.
pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompanyQuery>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM companies
        WHERE status = 'active' AND ($1::text IS NULL OR name ILIKE $1 OR edrpou ILIKE $1)
        "#,
    )
    .bind(&search)
    .fetch_one(&state.db)
    .await?;

    let companies = sqlx::query_as::<_, Company>(
        r#"
        SELECT * FROM companies
        WHERE status = 'active' AND ($1::text IS NULL OR name ILIKE $1 OR edrpou ILIKE $1)
        ORDER BY name
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(&search)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let data: Vec<CompanyResponse> = companies.into_iter().map(Into::into).collect();
    Ok(Paginated::new(data, &pagination, total))
}

/// GET /companies/:id
pub async fn get_company(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let company = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE id = $1 AND status = 'active'")
        .bind(company_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))?;

    Ok(DataResponse::new(CompanyResponse::from(company)))
}

// ============================================================================
// Suppliers
// ============================================================================

/// GET /companies/:id/suppliers
pub async fn list_suppliers(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    scope.ensure(company_id)?;

    let rows = sqlx::query_as::<_, SupplierRow>(&format!(
        "{SUPPLIER_SELECT} WHERE s.owner_company_id = $1 ORDER BY c.name"
    ))
    .bind(company_id)
    .fetch_all(&state.db)
    .await?;

    let data: Vec<SupplierResponse> = rows.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(data))
}

/// POST /companies/:id/suppliers
///
/// Unknown EDRPOU codes create an inactive placeholder company.
pub async fn add_supplier(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<Uuid>,
    Json(req): Json<AddSupplierRequest>,
) -> ApiResult<impl IntoResponse> {
    scope.ensure(company_id)?;
    let target = req.target()?;

    let mut tx = state.db.begin().await?;

    let supplier_id = match target {
        SupplierTarget::Existing(id) => {
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM companies WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ApiError::field("supplier_company_id", "Company not found"))?
        }
        SupplierTarget::ByCode { edrpou, name } => {
            sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO companies (edrpou, name, status)
                VALUES ($1, $2, 'inactive')
                ON CONFLICT (edrpou) DO UPDATE SET edrpou = EXCLUDED.edrpou
                RETURNING id
                "#,
            )
            .bind(normalize_edrpou(&edrpou))
            .bind(&name)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    if supplier_id == company_id {
        return Err(ApiError::field("supplier_company_id", "A company cannot be its own supplier"));
    }

    let relation_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO company_suppliers (owner_company_id, supplier_company_id, source)
        VALUES ($1, $2, $3)
        ON CONFLICT (owner_company_id, supplier_company_id) DO UPDATE SET source = company_suppliers.source
        RETURNING id
        "#,
    )
    .bind(company_id)
    .bind(supplier_id)
    .bind(SupplierSource::Manual.as_str())
    .fetch_one(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, SupplierRow>(&format!("{SUPPLIER_SELECT} WHERE s.id = $1"))
        .bind(relation_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        company_id = %company_id,
        supplier_company_id = %supplier_id,
        "Supplier added"
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(SupplierResponse::from(row)))))
}

/// DELETE /companies/:id/suppliers/:supplier_id
pub async fn remove_supplier(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path((company_id, relation_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    scope.ensure(company_id)?;

    let removed = sqlx::query("DELETE FROM company_suppliers WHERE id = $1 AND owner_company_id = $2")
        .bind(relation_id)
        .bind(company_id)
        .execute(&state.db)
        .await?
        .rows_affected();

    if removed == 0 {
        return Err(ApiError::not_found("Supplier not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
