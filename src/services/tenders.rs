//! Tender persistence shared by the procurement and sales resources

use std::collections::HashMap;

use sqlx::PgConnection;
use uuid::Uuid;

use super::refs::{ensure_cpvs_exist, ensure_currency_exists, ensure_owned, Owned};
use crate::domain::cpv::CpvShort;
use crate::domain::tenders::{
    assign_numbering, plan_positions, tender_select, CriterionBrief, CriterionBriefRow, Numbering,
    NumberingBasis, PositionInput, PositionRow, TenderCpvRow, TenderKind, TenderResponse, TenderRow,
};
use crate::error::{ApiError, ApiResult};

/// Number a new tender; the company row stays locked until the caller commits
pub async fn next_numbering(
    conn: &mut PgConnection,
    kind: TenderKind,
    company_id: Uuid,
    parent_id: Option<Uuid>,
) -> ApiResult<Numbering> {
    sqlx::query("SELECT id FROM companies WHERE id = $1 FOR UPDATE")
        .bind(company_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Company not found"))?;

    let basis = match parent_id {
        Some(parent_id) => {
            let parent: Option<(Uuid, i32)> =
                sqlx::query_as(&format!("SELECT company_id, number FROM {} WHERE id = $1", kind.tenders()))
                    .bind(parent_id)
                    .fetch_optional(&mut *conn)
                    .await?;

            let number = match parent {
                Some((parent_company, number)) if parent_company == company_id => number,
                Some(_) => {
                    return Err(ApiError::field("parent_id", "Previous tour belongs to another company"))
                }
                None => return Err(ApiError::field("parent_id", "Previous tour not found")),
            };

            let max_tour = sqlx::query_scalar::<_, Option<i32>>(&format!(
                "SELECT MAX(tour_number) FROM {} WHERE company_id = $1 AND number = $2",
                kind.tenders()
            ))
            .bind(company_id)
            .bind(number)
            .fetch_one(&mut *conn)
            .await?;

            NumberingBasis::NextTour { number, max_tour }
        }
        None => {
            let max_number = sqlx::query_scalar::<_, Option<i32>>(&format!(
                "SELECT MAX(number) FROM {} WHERE company_id = $1",
                kind.tenders()
            ))
            .bind(company_id)
            .fetch_one(&mut *conn)
            .await?;

            NumberingBasis::Fresh { max_number }
        }
    };

    Ok(assign_numbering(basis))
}

/// Tender row if visible to the caller, 404 otherwise
pub async fn load_tender(
    conn: &mut PgConnection,
    kind: TenderKind,
    tender_id: Uuid,
    visible: Option<Vec<Uuid>>,
) -> ApiResult<TenderRow> {
    let sql = format!(
        "{} WHERE t.id = $1 AND ($2::uuid[] IS NULL OR t.company_id = ANY($2))",
        tender_select(kind)
    );

    sqlx::query_as::<_, TenderRow>(&sql)
        .bind(tender_id)
        .bind(visible)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Tender not found"))
}

/// Attach CPVs, criteria and positions to each row, one query per relation
pub async fn assemble(
    conn: &mut PgConnection,
    kind: TenderKind,
    rows: Vec<TenderRow>,
) -> ApiResult<Vec<TenderResponse>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

    let cpv_rows = sqlx::query_as::<_, TenderCpvRow>(&format!(
        r#"
        SELECT l.tender_id, c.id, c.cpv_code, c.name_ua
        FROM {} l
        JOIN cpv_dictionary c ON c.id = l.cpv_id
        WHERE l.tender_id = ANY($1)
        ORDER BY c.cpv_code
        "#,
        kind.cpvs()
    ))
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let criterion_rows = sqlx::query_as::<_, CriterionBriefRow>(&format!(
        r#"
        SELECT l.tender_id, c.id, c.name, c.type
        FROM {} l
        JOIN tender_criteria c ON c.id = l.criterion_id
        WHERE l.tender_id = ANY($1)
        ORDER BY c.name
        "#,
        kind.criteria()
    ))
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let position_rows = sqlx::query_as::<_, PositionRow>(&format!(
        r#"
        SELECT p.id, p.tender_id, p.nomenclature_id, n.name AS nomenclature_name,
               u.name AS unit_name, p.quantity, p.description
        FROM {} p
        JOIN nomenclatures n ON n.id = p.nomenclature_id
        LEFT JOIN units_of_measure u ON u.id = n.unit_id
        WHERE p.tender_id = ANY($1)
        ORDER BY p.created_at, p.id
        "#,
        kind.positions()
    ))
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut cpvs: HashMap<Uuid, Vec<CpvShort>> = HashMap::new();
    for r in cpv_rows {
        cpvs.entry(r.tender_id).or_default().push(CpvShort {
            id: r.id,
            cpv_code: r.cpv_code,
            name_ua: r.name_ua,
        });
    }
    let mut criteria: HashMap<Uuid, Vec<CriterionBrief>> = HashMap::new();
    for r in criterion_rows {
        criteria.entry(r.tender_id).or_default().push(r.into());
    }
    let mut positions: HashMap<Uuid, Vec<PositionRow>> = HashMap::new();
    for r in position_rows {
        positions.entry(r.tender_id).or_default().push(r);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let id = row.id;
            TenderResponse::assemble(
                kind,
                row,
                cpvs.remove(&id).unwrap_or_default(),
                criteria.remove(&id).unwrap_or_default(),
                positions.remove(&id).unwrap_or_default(),
            )
        })
        .collect())
}

pub async fn assemble_one(conn: &mut PgConnection, kind: TenderKind, row: TenderRow) -> ApiResult<TenderResponse> {
    assemble(conn, kind, vec![row])
        .await?
        .pop()
        .ok_or_else(|| ApiError::internal("Tender vanished while loading"))
}

pub async fn replace_cpvs(conn: &mut PgConnection, kind: TenderKind, tender_id: Uuid, cpv_ids: &[i64]) -> ApiResult<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE tender_id = $1", kind.cpvs()))
        .bind(tender_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(&format!(
        "INSERT INTO {} (tender_id, cpv_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
        kind.cpvs()
    ))
    .bind(tender_id)
    .bind(cpv_ids)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn replace_criteria(
    conn: &mut PgConnection,
    kind: TenderKind,
    tender_id: Uuid,
    criterion_ids: &[Uuid],
) -> ApiResult<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE tender_id = $1", kind.criteria()))
        .bind(tender_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(&format!(
        "INSERT INTO {} (tender_id, criterion_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
        kind.criteria()
    ))
    .bind(tender_id)
    .bind(criterion_ids)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Make the tender's positions match `incoming`, matched by nomenclature
pub async fn sync_positions(
    conn: &mut PgConnection,
    kind: TenderKind,
    tender_id: Uuid,
    incoming: Vec<PositionInput>,
) -> ApiResult<()> {
    let existing: Vec<(Uuid, Uuid)> = sqlx::query_as(&format!(
        "SELECT id, nomenclature_id FROM {} WHERE tender_id = $1",
        kind.positions()
    ))
    .bind(tender_id)
    .fetch_all(&mut *conn)
    .await?;

    let plan = plan_positions(&existing, incoming);

    if !plan.delete.is_empty() {
        sqlx::query(&format!("DELETE FROM {} WHERE id = ANY($1)", kind.positions()))
            .bind(&plan.delete)
            .execute(&mut *conn)
            .await?;
    }

    for (position_id, input) in &plan.update {
        sqlx::query(&format!(
            "UPDATE {} SET quantity = $2, description = $3 WHERE id = $1",
            kind.positions()
        ))
        .bind(position_id)
        .bind(input.quantity_or_default())
        .bind(&input.description)
        .execute(&mut *conn)
        .await?;
    }

    for input in &plan.create {
        sqlx::query(&format!(
            "INSERT INTO {} (tender_id, nomenclature_id, quantity, description) VALUES ($1, $2, $3, $4)",
            kind.positions()
        ))
        .bind(tender_id)
        .bind(input.nomenclature_id)
        .bind(input.quantity_or_default())
        .bind(&input.description)
        .execute(&mut *conn)
        .await?;
    }

    tracing::debug!(
        tender_id = %tender_id,
        updated = plan.update.len(),
        created = plan.create.len(),
        deleted = plan.delete.len(),
        "Tender positions reconciled"
    );
    Ok(())
}

/// Foreign keys a create or update wants to set
#[derive(Debug, Default)]
pub struct TenderRefs<'a> {
    pub category_id: Option<Uuid>,
    pub expense_article_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub currency_id: Option<Uuid>,
    pub cpv_category_id: Option<i64>,
    pub cpv_ids: &'a [i64],
    pub criterion_ids: &'a [Uuid],
    pub nomenclature_ids: Vec<Uuid>,
}

/// Every reference must exist in `company_id` (currencies and CPVs are global)
pub async fn validate_refs(conn: &mut PgConnection, company_id: Uuid, refs: &TenderRefs<'_>) -> ApiResult<()> {
    let single = [
        (Owned::Category, "category_id", refs.category_id),
        (Owned::ExpenseArticle, "expense_article_id", refs.expense_article_id),
        (Owned::Branch, "branch_id", refs.branch_id),
        (Owned::Department, "department_id", refs.department_id),
    ];
    for (owned, field, id) in single {
        if let Some(id) = id {
            ensure_owned(&mut *conn, owned, field, &[id], company_id).await?;
        }
    }

    if let (Some(branch_id), Some(department_id)) = (refs.branch_id, refs.department_id) {
        let matches = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE id = $1 AND branch_id = $2)",
        )
        .bind(department_id)
        .bind(branch_id)
        .fetch_one(&mut *conn)
        .await?;
        if !matches {
            return Err(ApiError::field("department_id", "Department belongs to another branch"));
        }
    }

    if let Some(currency_id) = refs.currency_id {
        ensure_currency_exists(&mut *conn, currency_id).await?;
    }
    if let Some(cpv_id) = refs.cpv_category_id {
        ensure_cpvs_exist(&mut *conn, "cpv_category_id", &[cpv_id]).await?;
    }
    ensure_cpvs_exist(&mut *conn, "cpv_ids", refs.cpv_ids).await?;
    ensure_owned(&mut *conn, Owned::Criterion, "criterion_ids", refs.criterion_ids, company_id).await?;
    ensure_owned(&mut *conn, Owned::Nomenclature, "positions", &refs.nomenclature_ids, company_id).await?;

    Ok(())
}
