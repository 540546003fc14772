//! Tender proposals, per-position bids and attachments

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::CompanyScope;
use crate::domain::companies::SupplierSource;
use crate::domain::proposals::{
    CreateProposalRequest, PositionValue, ProposalResponse, ProposalRow, TenderFile, UpsertPositionValuesRequest,
};
use crate::domain::tenders::{TenderKind, TenderRow};
use crate::error::{ApiError, ApiResult};
use crate::services::{storage, tenders as store};

fn proposal_select(kind: TenderKind) -> String {
    format!(
        r#"
        SELECT p.id, p.tender_id, p.supplier_company_id, c.edrpou AS supplier_edrpou,
               c.name AS supplier_name, p.created_at
        FROM {} p
        JOIN companies c ON c.id = p.supplier_company_id
        "#,
        kind.proposals()
    )
}

/// Tender the caller may write to
async fn writable_tender(
    conn: &mut sqlx::PgConnection,
    scope: &CompanyScope,
    kind: TenderKind,
    tender_id: Uuid,
) -> ApiResult<TenderRow> {
    let tender = store::load_tender(conn, kind, tender_id, scope.visible()).await?;
    scope.ensure(tender.company_id)?;
    Ok(tender)
}

async fn with_values(
    conn: &mut sqlx::PgConnection,
    kind: TenderKind,
    rows: Vec<ProposalRow>,
) -> ApiResult<Vec<ProposalResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let values = sqlx::query_as::<_, PositionValue>(&format!(
        r#"
        SELECT id, proposal_id, tender_position_id, price, criterion_values, updated_at
        FROM {}
        WHERE proposal_id = ANY($1)
        ORDER BY updated_at, id
        "#,
        kind.proposal_values()
    ))
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_proposal: HashMap<Uuid, Vec<PositionValue>> = HashMap::new();
    for value in values {
        by_proposal.entry(value.proposal_id).or_default().push(value);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let values = by_proposal.remove(&row.id).unwrap_or_default();
            ProposalResponse::new(row, values)
        })
        .collect())
}

async fn load_proposal(
    conn: &mut sqlx::PgConnection,
    kind: TenderKind,
    tender_id: Uuid,
    proposal_id: Uuid,
) -> ApiResult<ProposalResponse> {
    let row = sqlx::query_as::<_, ProposalRow>(&format!(
        "{} WHERE p.id = $1 AND p.tender_id = $2",
        proposal_select(kind)
    ))
    .bind(proposal_id)
    .bind(tender_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::not_found("Proposal not found"))?;

    with_values(conn, kind, vec![row])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Proposal not found"))
}

// ============================================================================
// Proposals
// ============================================================================

/// GET /<kind>-tenders/:id/proposals
pub async fn list_proposals(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.db.acquire().await?;
    store::load_tender(&mut conn, kind, tender_id, scope.visible()).await?;

    let rows = sqlx::query_as::<_, ProposalRow>(&format!(
        "{} WHERE p.tender_id = $1 ORDER BY p.created_at",
        proposal_select(kind)
    ))
    .bind(tender_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(DataResponse::new(with_values(&mut conn, kind, rows).await?))
}

/// POST /<kind>-tenders/:id/proposals
///
/// Also records the supplier as a counterparty of the tender's company.
pub async fn create_proposal(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path(tender_id): Path<Uuid>,
    Json(req): Json<CreateProposalRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.begin().await?;
    let tender = writable_tender(&mut tx, &scope, kind, tender_id).await?;

    let supplier_exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM companies WHERE id = $1)")
        .bind(req.supplier_company_id)
        .fetch_one(&mut *tx)
        .await?;
    if !supplier_exists {
        return Err(ApiError::field("supplier_company_id", "Company not found"));
    }

    let proposal_id = sqlx::query_scalar::<_, Uuid>(&format!(
        "INSERT INTO {} (tender_id, supplier_company_id) VALUES ($1, $2) RETURNING id",
        kind.proposals()
    ))
    .bind(tender_id)
    .bind(req.supplier_company_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => {
            ApiError::field("supplier_company_id", "This supplier already has a proposal for the tender")
        }
        other => other,
    })?;

    if req.supplier_company_id != tender.company_id {
        sqlx::query(
            r#"
            INSERT INTO company_suppliers (owner_company_id, supplier_company_id, source)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_company_id, supplier_company_id) DO NOTHING
            "#,
        )
        .bind(tender.company_id)
        .bind(req.supplier_company_id)
        .bind(SupplierSource::Participation.as_str())
        .execute(&mut *tx)
        .await?;
    }

    let proposal = load_proposal(&mut tx, kind, tender_id, proposal_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        tender_id = %tender_id,
        supplier_company_id = %req.supplier_company_id,
        "Proposal added"
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(proposal))))
}

/// DELETE /<kind>-tenders/:id/proposals/:proposal_id
pub async fn delete_proposal(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path((tender_id, proposal_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let mut conn = state.db.acquire().await?;
    writable_tender(&mut conn, &scope, kind, tender_id).await?;

    let removed = sqlx::query(&format!("DELETE FROM {} WHERE id = $1 AND tender_id = $2", kind.proposals()))
        .bind(proposal_id)
        .bind(tender_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if removed == 0 {
        return Err(ApiError::not_found("Proposal not found"));
    }
    tracing::info!(user_id = %scope.user_id(), tender_id = %tender_id, proposal_id = %proposal_id, "Proposal removed");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /<kind>-tenders/:id/proposals/:proposal_id/positions
///
/// Upserts prices and criterion values; positions must belong to the tender.
pub async fn upsert_position_values(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path((tender_id, proposal_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpsertPositionValuesRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let mut tx = state.db.begin().await?;
    writable_tender(&mut tx, &scope, kind, tender_id).await?;
    load_proposal(&mut tx, kind, tender_id, proposal_id).await?;

    let position_ids = req.position_ids();
    let owned = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM {} WHERE id = ANY($1) AND tender_id = $2",
        kind.positions()
    ))
    .bind(&position_ids)
    .bind(tender_id)
    .fetch_one(&mut *tx)
    .await?;
    if owned as usize != position_ids.len() {
        return Err(ApiError::field("position_values", "Position does not belong to this tender"));
    }

    for value in &req.position_values {
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (proposal_id, tender_position_id, price, criterion_values)
            VALUES ($1, $2, $3, COALESCE($4, '{{}}'::jsonb))
            ON CONFLICT (proposal_id, tender_position_id) DO UPDATE SET
                price = CASE WHEN $5 THEN EXCLUDED.price ELSE {table}.price END,
                criterion_values = COALESCE($4, {table}.criterion_values),
                updated_at = NOW()
            "#,
            table = kind.proposal_values()
        ))
        .bind(proposal_id)
        .bind(value.tender_position_id)
        .bind(value.price.flatten())
        .bind(value.criterion_values.clone().map(sqlx::types::Json))
        .bind(value.price.is_some())
        .execute(&mut *tx)
        .await?;
    }

    let proposal = load_proposal(&mut tx, kind, tender_id, proposal_id).await?;
    tx.commit().await?;

    tracing::info!(
        user_id = %scope.user_id(),
        tender_id = %tender_id,
        proposal_id = %proposal_id,
        values = req.position_values.len(),
        "Proposal positions saved"
    );
    Ok(DataResponse::new(proposal))
}

// ============================================================================
// Files
// ============================================================================

/// GET /<kind>-tenders/:id/files
pub async fn list_files(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path(tender_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.db.acquire().await?;
    store::load_tender(&mut conn, kind, tender_id, scope.visible()).await?;

    let files = sqlx::query_as::<_, TenderFile>(&format!(
        "SELECT * FROM {} WHERE tender_id = $1 ORDER BY uploaded_at, id",
        kind.files()
    ))
    .bind(tender_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(DataResponse::new(files))
}

struct Upload {
    file_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// POST /<kind>-tenders/:id/files
///
/// Multipart body with a `file` part and an optional `name` text part.
pub async fn upload_file(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path(tender_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    {
        let mut conn = state.db.acquire().await?;
        writable_tender(&mut conn, &scope, kind, tender_id).await?;
    }

    let mut upload: Option<Upload> = None;
    let mut display_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
                upload = Some(Upload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid name field: {e}")))?;
                display_name = Some(text.trim().to_string()).filter(|n| !n.is_empty());
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::field("file", "No file was submitted"))?;
    let name = display_name.unwrap_or_else(|| upload.file_name.clone());
    let file_id = Uuid::new_v4();
    let stored_path = storage::attachment_path(kind, tender_id, file_id, &upload.file_name);

    storage::save(&state.settings.media_root, &stored_path, &upload.bytes).await?;

    let inserted = sqlx::query_as::<_, TenderFile>(&format!(
        r#"
        INSERT INTO {} (id, tender_id, name, stored_path, content_type, size_bytes)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
        kind.files()
    ))
    .bind(file_id)
    .bind(tender_id)
    .bind(&name)
    .bind(&stored_path)
    .bind(upload.content_type.as_deref())
    .bind(upload.bytes.len() as i64)
    .fetch_one(&state.db)
    .await;

    let file = match inserted {
        Ok(file) => file,
        Err(e) => {
            if let Err(cleanup) = storage::remove(&state.settings.media_root, &stored_path).await {
                tracing::warn!(error = %cleanup, path = %stored_path, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        user_id = %scope.user_id(),
        tender_id = %tender_id,
        file_id = %file_id,
        bytes = file.size_bytes,
        "Tender file uploaded"
    );
    Ok((StatusCode::CREATED, Json(DataResponse::new(file))))
}

/// DELETE /<kind>-tenders/:id/files/:file_id
pub async fn delete_file(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<TenderKind>,
    Path((tender_id, file_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let mut conn = state.db.acquire().await?;
    writable_tender(&mut conn, &scope, kind, tender_id).await?;

    let stored_path = sqlx::query_scalar::<_, String>(&format!(
        "DELETE FROM {} WHERE id = $1 AND tender_id = $2 RETURNING stored_path",
        kind.files()
    ))
    .bind(file_id)
    .bind(tender_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::not_found("File not found"))?;

    storage::discard(&state.settings.media_root, &stored_path).await;

    tracing::info!(user_id = %scope.user_id(), tender_id = %tender_id, file_id = %file_id, "Tender file deleted");
    Ok(StatusCode::NO_CONTENT)
}
