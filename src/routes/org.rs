//! Organisation trees: branches, departments, categories and expense articles
//!
//! Lists load one flat, scoped query and nest it in memory; only roots are
//! returned at the top level. Every re-parenting is checked for ownership and
//! cycles before it is written.

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
use crate::auth::CompanyScope;
use crate::domain::cpv::CpvShort;
use crate::domain::org::*;
use crate::domain::tree::{build_forest, creates_cycle};
use crate::error::{ApiError, ApiResult, Violations};
use crate::services::refs;

// ============================================================================
// Shared helpers
// ============================================================================

#[derive(sqlx::FromRow)]
struct ParentLink {
    id: Uuid,
    parent_id: Option<Uuid>,
}

/// Parent must live under the same owner and must not descend from `node`
///
/// `links_sql` selects `id, parent_id` of every node under owner `$1`.
async fn check_parent(
    conn: &mut sqlx::PgConnection,
    links_sql: &str,
    owner_id: Uuid,
    node: Option<Uuid>,
    parent: Uuid,
    same_owner: &str,
) -> ApiResult<()> {
    let links = sqlx::query_as::<_, ParentLink>(links_sql)
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await?;
    let parents: HashMap<Uuid, Option<Uuid>> = links.into_iter().map(|l| (l.id, l.parent_id)).collect();

    if !parents.contains_key(&parent) {
        return Err(ApiError::field("parent_id", same_owner.to_string()));
    }
    if let Some(node) = node {
        if creates_cycle(node, parent, &parents) {
            return Err(ApiError::field("parent_id", "A node cannot be moved under itself or its descendant"));
        }
    }
    Ok(())
}

fn name_conflict(err: sqlx::Error) -> ApiError {
    match ApiError::from(err) {
        ApiError::Conflict(_) => ApiError::field("name", "This name is already used in the company"),
        other => other,
    }
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim)
}

// ============================================================================
// Branches
// ============================================================================

const BRANCH_SELECT: &str = r#"
    SELECT b.id, b.company_id, b.parent_id, b.name, b.code, b.created_at,
           (SELECT COUNT(*) FROM branch_users bu WHERE bu.branch_id = b.id) AS user_count
    FROM branches b
"#;

const BRANCH_LINKS: &str = "SELECT id, parent_id FROM branches WHERE company_id = $1";

async fn load_branch<'e, E: sqlx::PgExecutor<'e>>(executor: E, scope: &CompanyScope, id: Uuid) -> ApiResult<Branch> {
    sqlx::query_as::<_, Branch>(&format!(
        "{BRANCH_SELECT} WHERE b.id = $1 AND ($2::uuid[] IS NULL OR b.company_id = ANY($2))"
    ))
    .bind(id)
    .bind(scope.visible())
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| ApiError::not_found("Branch not found"))
}

/// GET /branches
pub async fn list_branches(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<BranchQuery>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let rows = sqlx::query_as::<_, Branch>(&format!(
        "{BRANCH_SELECT} WHERE ($1::uuid[] IS NULL OR b.company_id = ANY($1)) ORDER BY b.name"
    ))
    .bind(&companies)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(build_forest(rows)))
}

/// GET /branches/:id
pub async fn get_branch(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(load_branch(&state.db, &scope, id).await?))
}

/// POST /branches
pub async fn create_branch(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateBranchRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    check_name(&mut v, Some(&req.name));
    v.finish()?;
    let company_id = scope.target_company(req.company_id)?;

    let mut tx = state.db.begin().await?;
    if let Some(parent) = req.parent_id {
        check_parent(&mut tx, BRANCH_LINKS, company_id, None, parent, "Parent branch must belong to the same company").await?;
    }

    let id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO branches (company_id, parent_id, name, code) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(company_id)
    .bind(req.parent_id)
    .bind(req.name.trim())
    .bind(trimmed(req.code.as_deref()))
    .fetch_one(&mut *tx)
    .await?;
    let branch = load_branch(&mut *tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), company_id = %company_id, branch_id = %id, "Branch created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(branch))))
}

/// PATCH /branches/:id
pub async fn update_branch(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateBranchRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    check_name(&mut v, req.name.as_deref());
    v.finish()?;

    let mut tx = state.db.begin().await?;
    let current = load_branch(&mut *tx, &scope, id).await?;
    if let Some(Some(parent)) = req.parent_id {
        check_parent(&mut tx, BRANCH_LINKS, current.company_id, Some(id), parent, "Parent branch must belong to the same company").await?;
    }

    sqlx::query(
        r#"
        UPDATE branches SET
            parent_id = CASE WHEN $2 THEN $3 ELSE parent_id END,
            name = COALESCE($4, name),
            code = COALESCE($5, code)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.parent_id.is_some())
    .bind(req.parent_id.flatten())
    .bind(trimmed(req.name.as_deref()))
    .bind(trimmed(req.code.as_deref()))
    .execute(&mut *tx)
    .await?;
    let branch = load_branch(&mut *tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), branch_id = %id, "Branch updated");
    Ok(DataResponse::new(branch))
}

/// DELETE /branches/:id
pub async fn delete_branch(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    load_branch(&state.db, &scope, id).await?;
    sqlx::query("DELETE FROM branches WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), branch_id = %id, "Branch deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Departments
// ============================================================================

const DEPARTMENT_SELECT: &str = r#"
    SELECT d.id, d.branch_id, d.parent_id, d.name, d.created_at,
           (SELECT COUNT(*) FROM department_users du WHERE du.department_id = d.id) AS user_count
    FROM departments d
    JOIN branches b ON b.id = d.branch_id
"#;

const DEPARTMENT_LINKS: &str = "SELECT id, parent_id FROM departments WHERE branch_id = $1";

async fn load_department<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    scope: &CompanyScope,
    id: Uuid,
) -> ApiResult<Department> {
    sqlx::query_as::<_, Department>(&format!(
        "{DEPARTMENT_SELECT} WHERE d.id = $1 AND ($2::uuid[] IS NULL OR b.company_id = ANY($2))"
    ))
    .bind(id)
    .bind(scope.visible())
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| ApiError::not_found("Department not found"))
}

/// GET /departments?branch_id=
pub async fn list_departments(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DepartmentQuery>,
) -> ApiResult<impl IntoResponse> {
    let branch_id = query
        .branch_id
        .ok_or_else(|| ApiError::field("branch_id", "This query parameter is required"))?;
    load_branch(&state.db, &scope, branch_id).await?;

    let rows = sqlx::query_as::<_, Department>(&format!("{DEPARTMENT_SELECT} WHERE d.branch_id = $1 ORDER BY d.name"))
        .bind(branch_id)
        .fetch_all(&state.db)
        .await?;

    Ok(DataResponse::new(build_forest(rows)))
}

/// GET /departments/:id
pub async fn get_department(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(load_department(&state.db, &scope, id).await?))
}

/// POST /departments
pub async fn create_department(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDepartmentRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    check_name(&mut v, Some(&req.name));
    v.finish()?;

    let mut tx = state.db.begin().await?;
    let branch = load_branch(&mut *tx, &scope, req.branch_id)
        .await
        .map_err(|e| match e {
            ApiError::NotFound(_) => ApiError::field("branch_id", "Branch not found"),
            other => other,
        })?;
    scope.ensure(branch.company_id)?;
    if let Some(parent) = req.parent_id {
        check_parent(&mut tx, DEPARTMENT_LINKS, branch.id, None, parent, "Parent department must belong to the same branch").await?;
    }

    let id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO departments (branch_id, parent_id, name) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(branch.id)
    .bind(req.parent_id)
    .bind(req.name.trim())
    .fetch_one(&mut *tx)
    .await?;
    let department = load_department(&mut *tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), branch_id = %branch.id, department_id = %id, "Department created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(department))))
}

/// PATCH /departments/:id
pub async fn update_department(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDepartmentRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    check_name(&mut v, req.name.as_deref());
    v.finish()?;

    let mut tx = state.db.begin().await?;
    let current = load_department(&mut *tx, &scope, id).await?;
    if let Some(Some(parent)) = req.parent_id {
        check_parent(&mut tx, DEPARTMENT_LINKS, current.branch_id, Some(id), parent, "Parent department must belong to the same branch").await?;
    }

    sqlx::query(
        r#"
        UPDATE departments SET
            parent_id = CASE WHEN $2 THEN $3 ELSE parent_id END,
            name = COALESCE($4, name)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.parent_id.is_some())
    .bind(req.parent_id.flatten())
    .bind(trimmed(req.name.as_deref()))
    .execute(&mut *tx)
    .await?;
    let department = load_department(&mut *tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), department_id = %id, "Department updated");
    Ok(DataResponse::new(department))
}

/// DELETE /departments/:id
pub async fn delete_department(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    load_department(&state.db, &scope, id).await?;
    sqlx::query("DELETE FROM departments WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), department_id = %id, "Department deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Categories
// ============================================================================

const CATEGORY_SELECT: &str = r#"
    SELECT c.id, c.company_id, c.parent_id, c.name, c.code, c.description, c.created_at,
           (SELECT COUNT(*) FROM category_users cu WHERE cu.category_id = c.id) AS user_count
    FROM categories c
"#;

const CATEGORY_LINKS: &str = "SELECT id, parent_id FROM categories WHERE company_id = $1";

#[derive(sqlx::FromRow)]
struct CategoryCpvRow {
    category_id: Uuid,
    id: i64,
    cpv_code: String,
    name_ua: String,
}

/// Attach the short CPV list to every category row
async fn with_cpvs<'e, E: sqlx::PgExecutor<'e>>(executor: E, rows: Vec<CategoryRow>) -> ApiResult<Vec<Category>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let links = sqlx::query_as::<_, CategoryCpvRow>(
        r#"
        SELECT cc.category_id, d.id, d.cpv_code, d.name_ua
        FROM category_cpvs cc
        JOIN cpv_dictionary d ON d.id = cc.cpv_id
        WHERE cc.category_id = ANY($1)
        ORDER BY d.cpv_code
        "#,
    )
    .bind(&ids)
    .fetch_all(executor)
    .await?;

    let mut by_category: HashMap<Uuid, Vec<CpvShort>> = HashMap::new();
    for link in links {
        by_category.entry(link.category_id).or_default().push(CpvShort {
            id: link.id,
            cpv_code: link.cpv_code,
            name_ua: link.name_ua,
        });
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let cpvs = by_category.remove(&row.id).unwrap_or_default();
            Category::new(row, cpvs)
        })
        .collect())
}

async fn load_category(conn: &mut sqlx::PgConnection, scope: &CompanyScope, id: Uuid) -> ApiResult<Category> {
    let row = sqlx::query_as::<_, CategoryRow>(&format!(
        "{CATEGORY_SELECT} WHERE c.id = $1 AND ($2::uuid[] IS NULL OR c.company_id = ANY($2))"
    ))
    .bind(id)
    .bind(scope.visible())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ApiError::not_found("Category not found"))?;

    with_cpvs(&mut *conn, vec![row])
        .await?
        .pop()
        .ok_or_else(|| ApiError::not_found("Category not found"))
}

async fn replace_category_cpvs(conn: &mut sqlx::PgConnection, category_id: Uuid, cpv_ids: &[i64]) -> ApiResult<()> {
    refs::ensure_cpvs_exist(&mut *conn, "cpv_ids", cpv_ids).await?;
    sqlx::query("DELETE FROM category_cpvs WHERE category_id = $1")
        .bind(category_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO category_cpvs (category_id, cpv_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
    )
    .bind(category_id)
    .bind(cpv_ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// GET /categories
pub async fn list_categories(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompanyTreeQuery>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let rows = sqlx::query_as::<_, CategoryRow>(&format!(
        "{CATEGORY_SELECT} WHERE ($1::uuid[] IS NULL OR c.company_id = ANY($1)) ORDER BY c.name"
    ))
    .bind(&companies)
    .fetch_all(&state.db)
    .await?;

    let categories = with_cpvs(&state.db, rows).await?;
    Ok(DataResponse::new(build_forest(categories)))
}

/// GET /categories/:id
pub async fn get_category(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.db.acquire().await?;
    Ok(DataResponse::new(load_category(&mut conn, &scope, id).await?))
}

/// POST /categories
pub async fn create_category(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    check_name(&mut v, Some(&req.name));
    v.finish()?;
    let company_id = scope.target_company(req.company_id)?;

    let mut tx = state.db.begin().await?;
    if let Some(parent) = req.parent_id {
        check_parent(&mut tx, CATEGORY_LINKS, company_id, None, parent, "Parent category must belong to the same company").await?;
    }

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO categories (company_id, parent_id, name, code, description)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(company_id)
    .bind(req.parent_id)
    .bind(req.name.trim())
    .bind(trimmed(req.code.as_deref()))
    .bind(req.description.as_deref())
    .fetch_one(&mut *tx)
    .await
    .map_err(name_conflict)?;
    replace_category_cpvs(&mut tx, id, &req.cpv_ids).await?;

    let category = load_category(&mut tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), company_id = %company_id, category_id = %id, "Category created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(category))))
}

/// PATCH /categories/:id
pub async fn update_category(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCategoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    check_name(&mut v, req.name.as_deref());
    v.finish()?;

    let mut tx = state.db.begin().await?;
    let current = load_category(&mut tx, &scope, id).await?;
    if let Some(Some(parent)) = req.parent_id {
        check_parent(&mut tx, CATEGORY_LINKS, current.company_id, Some(id), parent, "Parent category must belong to the same company").await?;
    }

    sqlx::query(
        r#"
        UPDATE categories SET
            parent_id = CASE WHEN $2 THEN $3 ELSE parent_id END,
            name = COALESCE($4, name),
            code = COALESCE($5, code),
            description = COALESCE($6, description)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.parent_id.is_some())
    .bind(req.parent_id.flatten())
    .bind(trimmed(req.name.as_deref()))
    .bind(trimmed(req.code.as_deref()))
    .bind(req.description.as_deref())
    .execute(&mut *tx)
    .await
    .map_err(name_conflict)?;
    if let Some(cpv_ids) = &req.cpv_ids {
        replace_category_cpvs(&mut tx, id, cpv_ids).await?;
    }

    let category = load_category(&mut tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), category_id = %id, "Category updated");
    Ok(DataResponse::new(category))
}

/// DELETE /categories/:id
pub async fn delete_category(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.db.acquire().await?;
    load_category(&mut conn, &scope, id).await?;
    sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    tracing::info!(user_id = %scope.user_id(), category_id = %id, "Category deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Expense articles
// ============================================================================

const EXPENSE_SELECT: &str = r#"
    SELECT e.id, e.company_id, e.parent_id, e.name, e.code, e.year_start, e.year_end,
           e.description, e.created_at,
           (SELECT COUNT(*) FROM expense_article_users eu WHERE eu.expense_article_id = e.id) AS user_count
    FROM expense_articles e
"#;

const EXPENSE_LINKS: &str = "SELECT id, parent_id FROM expense_articles WHERE company_id = $1";

async fn load_expense<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    scope: &CompanyScope,
    id: Uuid,
) -> ApiResult<ExpenseArticle> {
    sqlx::query_as::<_, ExpenseArticle>(&format!(
        "{EXPENSE_SELECT} WHERE e.id = $1 AND ($2::uuid[] IS NULL OR e.company_id = ANY($2))"
    ))
    .bind(id)
    .bind(scope.visible())
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| ApiError::not_found("Expense article not found"))
}

/// GET /expenses
pub async fn list_expenses(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompanyTreeQuery>,
) -> ApiResult<impl IntoResponse> {
    let companies = scope.narrow(query.company_id)?;
    let rows = sqlx::query_as::<_, ExpenseArticle>(&format!(
        "{EXPENSE_SELECT} WHERE ($1::uuid[] IS NULL OR e.company_id = ANY($1)) ORDER BY e.name"
    ))
    .bind(&companies)
    .fetch_all(&state.db)
    .await?;

    Ok(DataResponse::new(build_forest(rows)))
}

/// GET /expenses/:id
pub async fn get_expense(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(DataResponse::new(load_expense(&state.db, &scope, id).await?))
}

/// POST /expenses
pub async fn create_expense(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateExpenseArticleRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut v = Violations::new();
    check_name(&mut v, Some(&req.name));
    check_years(&mut v, req.year_start, req.year_end);
    v.finish()?;
    let company_id = scope.target_company(req.company_id)?;

    let mut tx = state.db.begin().await?;
    if let Some(parent) = req.parent_id {
        check_parent(&mut tx, EXPENSE_LINKS, company_id, None, parent, "Parent article must belong to the same company").await?;
    }

    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO expense_articles (company_id, parent_id, name, code, year_start, year_end, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(company_id)
    .bind(req.parent_id)
    .bind(req.name.trim())
    .bind(trimmed(req.code.as_deref()))
    .bind(req.year_start)
    .bind(req.year_end)
    .bind(req.description.as_deref())
    .fetch_one(&mut *tx)
    .await?;
    let expense = load_expense(&mut *tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), company_id = %company_id, expense_article_id = %id, "Expense article created");
    Ok((StatusCode::CREATED, Json(DataResponse::new(expense))))
}

/// PATCH /expenses/:id
pub async fn update_expense(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateExpenseArticleRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut tx = state.db.begin().await?;
    let current = load_expense(&mut *tx, &scope, id).await?;

    // Years are validated against the values the row will end up with
    let mut v = Violations::new();
    check_name(&mut v, req.name.as_deref());
    check_years(
        &mut v,
        req.year_start.unwrap_or(current.year_start),
        req.year_end.unwrap_or(current.year_end),
    );
    v.finish()?;

    if let Some(Some(parent)) = req.parent_id {
        check_parent(&mut tx, EXPENSE_LINKS, current.company_id, Some(id), parent, "Parent article must belong to the same company").await?;
    }

    sqlx::query(
        r#"
        UPDATE expense_articles SET
            parent_id = CASE WHEN $2 THEN $3 ELSE parent_id END,
            name = COALESCE($4, name),
            code = COALESCE($5, code),
            year_start = CASE WHEN $6 THEN $7 ELSE year_start END,
            year_end = CASE WHEN $8 THEN $9 ELSE year_end END,
            description = COALESCE($10, description)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(req.parent_id.is_some())
    .bind(req.parent_id.flatten())
    .bind(trimmed(req.name.as_deref()))
    .bind(trimmed(req.code.as_deref()))
    .bind(req.year_start.is_some())
    .bind(req.year_start.flatten())
    .bind(req.year_end.is_some())
    .bind(req.year_end.flatten())
    .bind(req.description.as_deref())
    .execute(&mut *tx)
    .await?;
    let expense = load_expense(&mut *tx, &scope, id).await?;
    tx.commit().await?;

    tracing::info!(user_id = %scope.user_id(), expense_article_id = %id, "Expense article updated");
    Ok(DataResponse::new(expense))
}

/// DELETE /expenses/:id
pub async fn delete_expense(
    scope: CompanyScope,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    load_expense(&state.db, &scope, id).await?;
    sqlx::query("DELETE FROM expense_articles WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %scope.user_id(), expense_article_id = %id, "Expense article deleted");
    Ok(StatusCode::NO_CONTENT)
}
