//! Units of measure and nomenclature catalog

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{DataResponse, Paginated, PaginationParams};
use crate::app::AppState;
use crate::auth::CompanyScope;
use crate::domain::cpv::CpvShort;
use crate::domain::nomenclature::*;
use crate::error::{ApiError, ApiResult, Violations};
use crate::services::refs::{self, Owned};

// ============================================================================
// Units of measure
// ============================================================================

async fn load_unit(state: &AppState, scope: &CompanyScope, id: Uuid) -> ApiResult<Unit> {
    sqlx::query_as::<_, Unit>(
        "SELECT * FROM units_of_measure WHERE id = $1 AND ($2::uuid[] IS NULL OR company_id = ANY($2))",
    )
    .bind(id)
    .bind(scope.visible())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Unit of measure not found"))
}

/// GET /units
pub async fn list_units(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnitQuery>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let units = sqlx::query_as::<_, Unit>(
        "SELECT * FROM units_of_measure WHERE ($1::uuid[] IS NULL OR company_id = ANY($1)) ORDER BY name",
    )
    .bind(&companies)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(units))
}

/// GET /units/:id
pub async fn get_unit(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(load_unit(&state, &scope, id).await?))
}

/// POST /units
pub async fn create_unit(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUnitRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    v.require("name", &req.name);
    v.finish()?;
    let company_id = scope.target_company(req.company_id)?;

    let unit = sqlx::query_as::<_, Unit>(
        "INSERT INTO units_of_measure (company_id, name, is_active) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(company_id)
    .bind(req.name.trim())
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %scope.user_id(), company_id = %company_id, unit_id = %unit.id, "Unit created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(unit))))
}

/// PATCH /units/:id
pub async fn update_unit(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateUnitRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    if let Some(name) = &req.name {
        v.require("name", name);
    }
    v.finish()?;
    load_unit(&state, &scope, id).await?;

    let unit = sqlx::query_as::<_, Unit>(
        r#"
        UPDATE units_of_measure SET
            name = COALESCE($2, name),
            is_active = COALESCE($3, is_active)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.is_active)
    .fetch_one(&state.db)
    .await?;

    Ok(DataResponse::new(unit))
}

/// DELETE /units/:id
pub async fn delete_unit(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    load_unit(&state, &scope, id).await?;
    sqlx::query("DELETE FROM units_of_measure WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), unit_id = %id, "Unit deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Nomenclatures
// ============================================================================

#[derive(sqlx::FromRow)]
struct NomenclatureCpvRow {
    nomenclature_id: Uuid,
    id: i64,
    cpv_code: String,
    name_ua: String,
}

async fn with_cpvs<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    rows: Vec<NomenclatureRow>,
) -> ApiResult<Vec<NomenclatureResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let links = sqlx::query_as::<_, NomenclatureCpvRow>(
        r#"
        SELECT nc.nomenclature_id, d.id, d.cpv_code, d.name_ua
        FROM nomenclature_cpvs nc
        JOIN cpv_dictionary d ON d.id = nc.cpv_id
        WHERE nc.nomenclature_id = ANY($1)
        ORDER BY d.cpv_code
        "#,
    )
    .bind(&ids)
    .fetch_all(executor)
    .await?;

    let mut by_item: HashMap<Uuid, Vec<CpvShort>> = HashMap::new();
    for link in links {
        by_item.entry(link.nomenclature_id).or_default().push(CpvShort {
            id: link.id,
            cpv_code: link.cpv_code,
            name_ua: link.name_ua,
        });
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let cpvs = by_item.remove(&row.id).unwrap_or_default();
            NomenclatureResponse::new(row, cpvs)
        })
        .collect())
}

async fn load_nomenclature(
    conn: &mut sqlx::PgConnection,
    scope: &CompanyScope,
    id: Uuid,
) -> ApiResult<NomenclatureResponse> {
    let row = sqlx::query_as::<_, NomenclatureRow>(&format!(
        "{NOMENCLATURE_SELECT} WHERE n.id = $1 AND ($2::uuid[] IS NULL OR n.company_id = ANY($2))"
    ))
    .bind(id)
    .bind(scope.visible())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::not_found("Nomenclature not found"))?;

    with_cpvs(&mut *conn, vec![row])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Nomenclature not found"))
}

async fn replace_nomenclature_cpvs(conn: &mut sqlx::PgConnection, id: Uuid, cpv_ids: &[i64]) -> ApiResult<()> {
    sqlx::query("DELETE FROM nomenclature_cpvs WHERE nomenclature_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO nomenclature_cpvs (nomenclature_id, cpv_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
    )
    .bind(id)
    .bind(cpv_ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Unit and category in the same company, CPV ids known
async fn validate_nomenclature_refs(
    conn: &mut sqlx::PgConnection,
    company_id: Uuid,
    unit_id: Option<Uuid>,
    category_id: Option<Uuid>,
    cpv_category_id: Option<i64>,
    cpv_ids: &[i64],
) -> ApiResult<()> {
    if let Some(unit_id) = unit_id {
        refs::ensure_owned(&mut *conn, Owned::Unit, "unit_id", &[unit_id], company_id).await?;
    }
    if let Some(category_id) = category_id {
        refs::ensure_owned(&mut *conn, Owned::Category, "category_id", &[category_id], company_id).await?;
    }
    if let Some(cpv_id) = cpv_category_id {
        refs::ensure_cpvs_exist(&mut *conn, "cpv_category_id", &[cpv_id]).await?;
    }
    refs::ensure_cpvs_exist(&mut *conn, "cpv_ids", cpv_ids).await
}

const NOMENCLATURE_FILTER: &str = r#"
    WHERE ($1::uuid[] IS NULL OR n.company_id = ANY($1))
      AND ($2::text IS NULL OR n.name ILIKE $2)
      AND ($3::uuid IS NULL OR n.category_id = $3)
      AND ($4::bigint IS NULL OR n.cpv_category_id = $4
           OR EXISTS(SELECT 1 FROM nomenclature_cpvs nc WHERE nc.nomenclature_id = n.id AND nc.cpv_id = $4))
"#;

/// GET /nomenclatures
pub async fn list_nomenclatures(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<NomenclatureQuery>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let name = query
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM nomenclatures n {NOMENCLATURE_FILTER}"))
        .bind(&companies)
        .bind(&name)
        .bind(query.category_id)
        .bind(query.cpv_id)
        .fetch_one(&state.db)
        .await?;

    let rows = sqlx::query_as::<_, NomenclatureRow>(&format!(
        "{NOMENCLATURE_SELECT} {NOMENCLATURE_FILTER} ORDER BY n.name, n.id LIMIT $5 OFFSET $6"
    ))
    .bind(&companies)
    .bind(&name)
    .bind(query.category_id)
    .bind(query.cpv_id)
    .bind(pagination.limit())
    .bind(pagination.offset())
    .fetch_all(&state.db)
    .await?;

    let data = with_cpvs(&state.db, rows).await?;
    Ok(Paginated::new(data, &pagination, total))
}

/// GET /nomenclatures/:id
pub async fn get_nomenclature(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.db.acquire().await?;
    Ok(DataResponse::new(load_nomenclature(&mut conn, &scope, id).await?))
}

/// POST /nomenclatures
pub async fn create_nomenclature(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNomenclatureRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let company_id = scope.target_company(req.company_id)?;

    let mut tx = state.db.begin().await?;
    validate_nomenclature_refs(&mut tx, company_id, req.unit_id, req.category_id, req.cpv_category_id, &req.cpv_ids)
        .await?;

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO nomenclatures (
            company_id, name, unit_id, code, external_number, description,
            specification_file, image_file, category_id, cpv_category_id, is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id
        "#,
    )
    .bind(company_id)
    .bind(req.name.trim())
    .bind(req.unit_id)
    .bind(req.code.as_deref())
    .bind(req.external_number.as_deref())
    .bind(req.description.as_deref())
    .bind(req.specification_file.as_deref())
    .bind(req.image_file.as_deref())
    .bind(req.category_id)
    .bind(req.cpv_category_id)
    .bind(req.is_active)
    .fetch_one(&mut *tx)
    .await?;
    replace_nomenclature_cpvs(&mut tx, id, &req.cpv_ids).await?;

    let item = load_nomenclature(&mut tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), company_id = %company_id, nomenclature_id = %id, "Nomenclature created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(item))))
}

/// PATCH /nomenclatures/:id
pub async fn update_nomenclature(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateNomenclatureRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let current = load_nomenclature(&mut tx, &scope, id).await?;
    validate_nomenclature_refs(
        &mut tx,
        current.company_id,
        req.unit_id.flatten(),
        req.category_id.flatten(),
        req.cpv_category_id.flatten(),
        req.cpv_ids.as_deref().unwrap_or_default(),
    )
    .await?;

    sqlx::query(
        r#"
        UPDATE nomenclatures SET
            name = COALESCE($2, name),
            unit_id = CASE WHEN $3 THEN $4 ELSE unit_id END,
            code = COALESCE($5, code),
            external_number = COALESCE($6, external_number),
            description = COALESCE($7, description),
            specification_file = COALESCE($8, specification_file),
            image_file = COALESCE($9, image_file),
            category_id = CASE WHEN $10 THEN $11 ELSE category_id END,
            cpv_category_id = CASE WHEN $12 THEN $13 ELSE cpv_category_id END,
            is_active = COALESCE($14, is_active),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.name.as_deref().map(str::trim))
    .bind(req.unit_id.is_some())
    .bind(req.unit_id.flatten())
    .bind(req.code.as_deref())
    .bind(req.external_number.as_deref())
    .bind(req.description.as_deref())
    .bind(req.specification_file.as_deref())
    .bind(req.image_file.as_deref())
    .bind(req.category_id.is_some())
    .bind(req.category_id.flatten())
    .bind(req.cpv_category_id.is_some())
    .bind(req.cpv_category_id.flatten())
    .bind(req.is_active)
    .execute(&mut *tx)
    .await?;
    if let Some(cpv_ids) = &req.cpv_ids {
        replace_nomenclature_cpvs(&mut tx, id, cpv_ids).await?;
    }

    let item = load_nomenclature(&mut tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), nomenclature_id = %id, "Nomenclature updated");
    Ok(DataResponse::new(item))
}

/// DELETE /nomenclatures/:id
pub async fn delete_nomenclature(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let removed = sqlx::query("DELETE FROM nomenclatures WHERE id = $1 AND ($2::uuid[] IS NULL OR company_id = ANY($2))")
        .bind(id)
        .bind(scope.visible())
        .execute(&state.db)
        .await?
        .rows_affected();

    if removed == 0 {
        return Err(ApiError::not_found("Nomenclature not found"));
    }
    tracing::info!(user_id = %scope.user_id(), nomenclature_id = %id, "Nomenclature deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn set_nomenclature_active(
    scope: &CompanyScope,
    state: &AppState,
    id: Uuid,
    active: bool,
) -> ApiResult<NomenclatureResponse> {
    let mut conn = state.db.acquire().await?;
    let updated = sqlx::query(
        r#"
        UPDATE nomenclatures SET is_active = $3, updated_at = NOW()
        WHERE id = $1 AND ($2::uuid[] IS NULL OR company_id = ANY($2))
        "#,
    )
    .bind(id)
    .bind(scope.visible())
    .bind(active)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(ApiError::not_found("Nomenclature not found"));
    }
    tracing::info!(user_id = %scope.user_id(), nomenclature_id = %id, active, "Nomenclature activity changed");
    load_nomenclature(&mut conn, scope, id).await
}

/// POST /nomenclatures/:id/activate
pub async fn activate_nomenclature(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(set_nomenclature_active(&scope, &state, id, true).await?))
}

/// POST /nomenclatures/:id/deactivate
pub async fn deactivate_nomenclature(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(set_nomenclature_active(&scope, &state, id, false).await?))
}
