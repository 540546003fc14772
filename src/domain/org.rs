//! Organisation trees: branches, departments, categories, expense articles,
//! and the user assignments hanging off each of them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::cpv::CpvShort;
use super::nullable;
use super::tree::TreeItem;
use super::users::full_name;
use crate::error::{ApiError, ApiResult, Violations};

// ============================================================================
// Branches
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Branch {
    pub id: Uuid,
    pub company_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TreeItem for Branch {
    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBranchRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBranchRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

// ============================================================================
// Departments
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Department {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TreeItem for Department {
    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDepartmentRequest {
    pub branch_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDepartmentRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepartmentQuery {
    #[serde(default)]
    pub branch_id: Option<Uuid>,
}

// ============================================================================
// Categories
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: Uuid,
    pub company_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub user_count: i64,
    pub cpvs: Vec<CpvShort>,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(row: CategoryRow, cpvs: Vec<CpvShort>) -> Self {
        Self {
            id: row.id,
            company_id: row.company_id,
            parent_id: row.parent_id,
            name: row.name,
            code: row.code,
            description: row.description,
            user_count: row.user_count,
            cpvs,
            created_at: row.created_at,
        }
    }
}

impl TreeItem for Category {
    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategoryRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cpv_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategoryRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cpv_ids: Option<Vec<i64>>,
}

// ============================================================================
// Expense articles
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExpenseArticle {
    pub id: Uuid,
    pub company_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    pub description: Option<String>,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TreeItem for ExpenseArticle {
    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExpenseArticleRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub year_start: Option<i32>,
    #[serde(default)]
    pub year_end: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateExpenseArticleRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub year_start: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub year_end: Option<Option<i32>>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Company filter shared by the company-level trees
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyTreeQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

/// The start year may not come after the end year
pub fn check_years(v: &mut Violations, year_start: Option<i32>, year_end: Option<i32>) {
    if let (Some(start), Some(end)) = (year_start, year_end) {
        if start > end {
            v.add("year_end", "End year must not be earlier than start year");
        }
    }
}

/// Tree node name rule shared by every create/update
pub fn check_name(v: &mut Violations, name: Option<&str>) {
    if let Some(name) = name {
        v.require("name", name);
        if name.chars().count() > 255 {
            v.add("name", "Ensure this field has no more than 255 characters");
        }
    }
}

// ============================================================================
// User assignments
// ============================================================================

/// Which tree an assignment resource attaches users to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentKind {
    Branch,
    Department,
    Category,
    Expense,
}

impl AssignmentKind {
    /// Link table
    pub fn table(&self) -> &'static str {
        match self {
            Self::Branch => "branch_users",
            Self::Department => "department_users",
            Self::Category => "category_users",
            Self::Expense => "expense_article_users",
        }
    }

    /// Node column in the link table
    pub fn node_column(&self) -> &'static str {
        match self {
            Self::Branch => "branch_id",
            Self::Department => "department_id",
            Self::Category => "category_id",
            Self::Expense => "expense_article_id",
        }
    }

    /// Resolves a node id (`$1`) to its owning company
    pub fn company_sql(&self) -> &'static str {
        match self {
            Self::Branch => "SELECT company_id FROM branches WHERE id = $1",
            Self::Department => {
                "SELECT b.company_id FROM departments d JOIN branches b ON b.id = d.branch_id WHERE d.id = $1"
            }
            Self::Category => "SELECT company_id FROM categories WHERE id = $1",
            Self::Expense => "SELECT company_id FROM expense_articles WHERE id = $1",
        }
    }

    /// Node ids visible to the company set `$1` (NULL means all)
    pub fn visible_nodes_sql(&self) -> &'static str {
        match self {
            Self::Branch => "SELECT id FROM branches WHERE ($1::uuid[] IS NULL OR company_id = ANY($1))",
            Self::Department => {
                "SELECT d.id FROM departments d JOIN branches b ON b.id = d.branch_id WHERE ($1::uuid[] IS NULL OR b.company_id = ANY($1))"
            }
            Self::Category => "SELECT id FROM categories WHERE ($1::uuid[] IS NULL OR company_id = ANY($1))",
            Self::Expense => "SELECT id FROM expense_articles WHERE ($1::uuid[] IS NULL OR company_id = ANY($1))",
        }
    }

    pub fn node_name(&self) -> &'static str {
        match self {
            Self::Branch => "Branch",
            Self::Department => "Department",
            Self::Category => "Category",
            Self::Expense => "Expense article",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AssignmentRow {
    pub id: Uuid,
    pub node_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub node_id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub user_full_name: String,
    pub created_at: DateTime<Utc>,
}

impl From<AssignmentRow> for AssignmentResponse {
    fn from(r: AssignmentRow) -> Self {
        Self {
            id: r.id,
            node_id: r.node_id,
            user_id: r.user_id,
            user_full_name: full_name(&r.last_name, &r.first_name, r.middle_name.as_deref()),
            user_email: r.email,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentQuery {
    #[serde(
        default,
        alias = "branch_id",
        alias = "department_id",
        alias = "category_id",
        alias = "expense_id"
    )]
    pub node_id: Option<Uuid>,
}

/// `{<node>: id, user_ids: [...]}`; the node key matches the resource
#[derive(Debug, Clone, Deserialize)]
pub struct AssignUsersRequest {
    #[serde(alias = "branch", alias = "department", alias = "category", alias = "expense")]
    pub node: Uuid,
    #[serde(default)]
    pub user_ids: serde_json::Value,
}

impl AssignUsersRequest {
    pub fn user_ids(&self) -> ApiResult<Vec<Uuid>> {
        parse_user_ids(&self.user_ids)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkUnassignRequest {
    #[serde(alias = "department")]
    pub node: Uuid,
    #[serde(default)]
    pub user_ids: serde_json::Value,
}

impl BulkUnassignRequest {
    pub fn user_ids(&self) -> ApiResult<Vec<Uuid>> {
        parse_user_ids(&self.user_ids)
    }
}

/// `user_ids` must be a JSON list of UUIDs; duplicates are dropped
fn parse_user_ids(value: &serde_json::Value) -> ApiResult<Vec<Uuid>> {
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::field("user_ids", "user_ids must be a list"))?;

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let id = item
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| ApiError::field("user_ids", format!("Invalid user id: {item}")))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expense_years_must_be_ordered() {
        let mut v = Violations::new();
        check_years(&mut v, Some(2024), Some(2023));
        assert!(!v.is_empty());

        let mut v = Violations::new();
        check_years(&mut v, Some(2023), Some(2023));
        check_years(&mut v, None, Some(2020));
        assert!(v.is_empty());
    }

    #[test]
    fn assignment_payload_accepts_resource_specific_key() {
        let node = Uuid::new_v4();
        let user = Uuid::new_v4();
        let req: AssignUsersRequest =
            serde_json::from_value(json!({ "department": node, "user_ids": [user, user] })).unwrap();

        assert_eq!(req.node, node);
        assert_eq!(req.user_ids().unwrap(), vec![user]);
    }

    #[test]
    fn user_ids_must_be_a_list() {
        let req: AssignUsersRequest =
            serde_json::from_value(json!({ "branch": Uuid::new_v4(), "user_ids": "x" })).unwrap();
        assert!(req.user_ids().is_err());

        let req: AssignUsersRequest =
            serde_json::from_value(json!({ "branch": Uuid::new_v4(), "user_ids": ["nope"] })).unwrap();
        assert!(req.user_ids().is_err());
    }

    #[test]
    fn assignment_kinds_map_to_tables() {
        assert_eq!(AssignmentKind::Expense.table(), "expense_article_users");
        assert_eq!(AssignmentKind::Department.node_column(), "department_id");
    }
}
