//! Companies and supplier (counterparty) relations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;
use crate::error::{ApiError, ApiResult, Violations};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    #[default]
    Active,
    Inactive,
}

text_enum!(CompanyStatus {
    Active => "active": "Активна",
    Inactive => "inactive": "Неактивна",
});

/// Company entity
#[derive(Debug, Clone, FromRow)]
pub struct Company {
    pub id: Uuid,
    pub edrpou: String,
    pub name: String,
    pub goal_tenders: bool,
    pub goal_participation: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanyResponse {
    pub id: Uuid,
    pub edrpou: String,
    pub name: String,
    pub goal_tenders: bool,
    pub goal_participation: bool,
    pub status: CompanyStatus,
    pub status_label: &'static str,
    pub created_at: DateTime<Utc>,
}

impl From<Company> for CompanyResponse {
    fn from(c: Company) -> Self {
        let status = CompanyStatus::parse(&c.status).unwrap_or_default();
        Self {
            id: c.id,
            edrpou: c.edrpou,
            name: c.name,
            goal_tenders: c.goal_tenders,
            goal_participation: c.goal_participation,
            status,
            status_label: status.label(),
            created_at: c.created_at,
        }
    }
}

/// Compact company reference embedded in other responses
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CompanyBrief {
    pub id: Uuid,
    pub edrpou: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyQuery {
    #[serde(default)]
    pub search: Option<String>,
}

// ============================================================================
// Onboarding step two
// ============================================================================

/// Register a brand-new company and become its administrator
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterCompanyRequest {
    pub user_id: Uuid,
    pub edrpou: String,
    pub name: String,
    #[serde(default)]
    pub goal_tenders: bool,
    #[serde(default)]
    pub goal_participation: bool,
}

impl RegisterCompanyRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        check_edrpou(&mut v, &self.edrpou);
        v.require("name", &self.name);
        if !self.goal_tenders && !self.goal_participation {
            v.add("goals", "Choose at least one goal");
        }
        v.finish()
    }
}

/// Ask to join a company that already exists
#[derive(Debug, Clone, Deserialize)]
pub struct JoinCompanyRequest {
    pub user_id: Uuid,
    pub edrpou: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl JoinCompanyRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        check_edrpou(&mut v, &self.edrpou);
        v.finish()
    }
}

/// EDRPOU codes are stored trimmed
pub fn normalize_edrpou(raw: &str) -> String {
    raw.trim().to_string()
}

fn check_edrpou(v: &mut Violations, edrpou: &str) {
    let edrpou = edrpou.trim();
    if edrpou.is_empty() {
        v.add("edrpou", "This field is required");
    } else if edrpou.chars().count() > 20 {
        v.add("edrpou", "Ensure this field has no more than 20 characters");
    }
}

// ============================================================================
// Suppliers
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupplierSource {
    Manual,
    Participation,
}

text_enum!(SupplierSource {
    Manual => "manual": "Додано вручну",
    Participation => "participation": "Участь у тендері",
});

#[derive(Debug, Clone, FromRow)]
pub struct SupplierRow {
    pub id: Uuid,
    pub supplier_company_id: Uuid,
    pub supplier_edrpou: String,
    pub supplier_name: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupplierResponse {
    pub id: Uuid,
    pub supplier: CompanyBrief,
    pub source: SupplierSource,
    pub source_label: &'static str,
    pub created_at: DateTime<Utc>,
}

impl From<SupplierRow> for SupplierResponse {
    fn from(r: SupplierRow) -> Self {
        let source = SupplierSource::parse(&r.source).unwrap_or(SupplierSource::Manual);
        Self {
            id: r.id,
            supplier: CompanyBrief {
                id: r.supplier_company_id,
                edrpou: r.supplier_edrpou,
                name: r.supplier_name,
            },
            source,
            source_label: source.label(),
            created_at: r.created_at,
        }
    }
}

/// Either an existing company id or an EDRPOU/name pair, never both
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddSupplierRequest {
    #[serde(default)]
    pub supplier_company_id: Option<Uuid>,
    #[serde(default)]
    pub edrpou: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// How the supplier company should be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplierTarget {
    Existing(Uuid),
    ByCode { edrpou: String, name: String },
}

impl AddSupplierRequest {
    pub fn target(&self) -> ApiResult<SupplierTarget> {
        let edrpou = self.edrpou.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let name = self.name.as_deref().map(str::trim).filter(|s| !s.is_empty());

        match (self.supplier_company_id, edrpou) {
            (Some(_), Some(_)) => Err(ApiError::field(
                "supplier_company_id",
                "Provide either supplier_company_id or edrpou, not both",
            )),
            (Some(id), None) => Ok(SupplierTarget::Existing(id)),
            (None, Some(edrpou)) => match name {
                Some(name) => Ok(SupplierTarget::ByCode {
                    edrpou: edrpou.to_string(),
                    name: name.to_string(),
                }),
                None => Err(ApiError::field("name", "Name is required when adding a supplier by EDRPOU")),
            },
            (None, None) => Err(ApiError::field("supplier_company_id", "Provide supplier_company_id or edrpou")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(goal_tenders: bool, goal_participation: bool) -> RegisterCompanyRequest {
        RegisterCompanyRequest {
            user_id: Uuid::new_v4(),
            edrpou: " 12345678 ".into(),
            name: "Agro LLC".into(),
            goal_tenders,
            goal_participation,
        }
    }

    #[test]
    fn registration_needs_a_goal() {
        assert!(register(false, false).validate().is_err());
        assert!(register(true, false).validate().is_ok());
        assert!(register(false, true).validate().is_ok());
        assert_eq!(normalize_edrpou(" 12345678 "), "12345678");
    }

    #[test]
    fn supplier_target_is_exclusive() {
        let id = Uuid::new_v4();
        let by_id = AddSupplierRequest {
            supplier_company_id: Some(id),
            ..Default::default()
        };
        assert_eq!(by_id.target().unwrap(), SupplierTarget::Existing(id));

        let both = AddSupplierRequest {
            supplier_company_id: Some(id),
            edrpou: Some("123".into()),
            name: Some("X".into()),
        };
        assert!(both.target().is_err());

        let code_without_name = AddSupplierRequest {
            edrpou: Some("123".into()),
            ..Default::default()
        };
        assert!(code_without_name.target().is_err());

        assert!(AddSupplierRequest::default().target().is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!(CompanyStatus::parse("inactive"), Some(CompanyStatus::Inactive));
        assert_eq!(CompanyStatus::Active.as_str(), "active");
        assert_eq!(SupplierSource::parse("participation"), Some(SupplierSource::Participation));
    }
}
