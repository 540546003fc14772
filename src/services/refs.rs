//! Same-company checks for foreign keys supplied by clients

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Company-owned reference kinds that requests may point at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owned {
    Category,
    ExpenseArticle,
    Branch,
    Department,
    Unit,
    Nomenclature,
    Criterion,
}

impl Owned {
    /// Counts rows among `$1` owned by company `$2`
    fn count_sql(&self) -> &'static str {
        match self {
            Self::Category => "SELECT COUNT(*) FROM categories WHERE id = ANY($1) AND company_id = $2",
            Self::ExpenseArticle => {
                "SELECT COUNT(*) FROM expense_articles WHERE id = ANY($1) AND company_id = $2"
            }
            Self::Branch => "SELECT COUNT(*) FROM branches WHERE id = ANY($1) AND company_id = $2",
            Self::Department => {
                "SELECT COUNT(*) FROM departments d JOIN branches b ON b.id = d.branch_id WHERE d.id = ANY($1) AND b.company_id = $2"
            }
            Self::Unit => "SELECT COUNT(*) FROM units_of_measure WHERE id = ANY($1) AND company_id = $2",
            Self::Nomenclature => {
                "SELECT COUNT(*) FROM nomenclatures WHERE id = ANY($1) AND company_id = $2"
            }
            Self::Criterion => {
                "SELECT COUNT(*) FROM tender_criteria WHERE id = ANY($1) AND company_id = $2"
            }
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Category => "Category",
            Self::ExpenseArticle => "Expense article",
            Self::Branch => "Branch",
            Self::Department => "Department",
            Self::Unit => "Unit of measure",
            Self::Nomenclature => "Nomenclature",
            Self::Criterion => "Criterion",
        }
    }
}

fn dedup<T: Copy + Ord>(ids: &[T]) -> Vec<T> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Field error unless every id exists and belongs to `company_id`
pub async fn ensure_owned<'e, E: PgExecutor<'e>>(
    executor: E,
    owned: Owned,
    field: &str,
    ids: &[Uuid],
    company_id: Uuid,
) -> ApiResult<()> {
    let ids = dedup(ids);
    if ids.is_empty() {
        return Ok(());
    }

    let found = sqlx::query_scalar::<_, i64>(owned.count_sql())
        .bind(&ids)
        .bind(company_id)
        .fetch_one(executor)
        .await?;

    if found as usize == ids.len() {
        Ok(())
    } else {
        Err(ApiError::field(
            field,
            format!("{} does not exist or belongs to another company", owned.describe()),
        ))
    }
}

pub async fn ensure_cpvs_exist<'e, E: PgExecutor<'e>>(executor: E, field: &str, ids: &[i64]) -> ApiResult<()> {
    let ids = dedup(ids);
    if ids.is_empty() {
        return Ok(());
    }

    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cpv_dictionary WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_one(executor)
        .await?;

    if found as usize == ids.len() {
        Ok(())
    } else {
        Err(ApiError::field(field, "Unknown CPV code"))
    }
}

pub async fn ensure_currency_exists<'e, E: PgExecutor<'e>>(executor: E, currency_id: Uuid) -> ApiResult<()> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM currencies WHERE id = $1)")
        .bind(currency_id)
        .fetch_one(executor)
        .await?;

    if exists {
        Ok(())
    } else {
        Err(ApiError::field("currency_id", "Unknown currency"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deduplicated_before_counting() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup(&[a, b, a]).len(), 2);
        assert_eq!(dedup(&[3i64, 1, 3]), vec![1, 3]);
    }

    #[test]
    fn department_ownership_goes_through_branch() {
        assert!(Owned::Department.count_sql().contains("JOIN branches"));
        assert_eq!(Owned::Unit.describe(), "Unit of measure");
    }
}
