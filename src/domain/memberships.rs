//! Company memberships

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::companies::CompanyBrief;
use super::text_enum;
use super::users::{full_name, RegisterUserRequest};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

text_enum!(MembershipStatus {
    Pending => "pending": "Очікує",
    Approved => "approved": "Підтверджено",
    Rejected => "rejected": "Відхилено",
});

/// Membership joined with its user, company and role
#[derive(Debug, Clone, FromRow)]
pub struct MembershipRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role_id: Uuid,
    pub status: String,
    pub invited_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_email: String,
    pub user_first_name: String,
    pub user_last_name: String,
    pub user_middle_name: Option<String>,
    pub user_phone: Option<String>,
    pub user_is_active: bool,
    pub company_edrpou: String,
    pub company_name: String,
    pub role_name: String,
}

/// Shared SELECT for [`MembershipRow`]; callers append WHERE/ORDER
pub const MEMBERSHIP_SELECT: &str = r#"
    SELECT cu.id, cu.user_id, cu.company_id, cu.role_id, cu.status, cu.invited_by,
           cu.created_at, cu.updated_at,
           u.email AS user_email, u.first_name AS user_first_name,
           u.last_name AS user_last_name, u.middle_name AS user_middle_name,
           u.phone AS user_phone, u.is_active AS user_is_active,
           c.edrpou AS company_edrpou, c.name AS company_name,
           r.name AS role_name
    FROM company_users cu
    JOIN users u ON u.id = cu.user_id
    JOIN companies c ON c.id = cu.company_id
    JOIN roles r ON r.id = cu.role_id
"#;

#[derive(Debug, Clone, Serialize)]
pub struct MemberUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleBrief {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MembershipResponse {
    pub id: Uuid,
    pub user: MemberUser,
    pub company: CompanyBrief,
    pub role: RoleBrief,
    pub status: MembershipStatus,
    pub status_label: &'static str,
    pub invited_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MembershipRow> for MembershipResponse {
    fn from(r: MembershipRow) -> Self {
        let status = MembershipStatus::parse(&r.status).unwrap_or_default();
        Self {
            id: r.id,
            user: MemberUser {
                id: r.user_id,
                full_name: full_name(&r.user_last_name, &r.user_first_name, r.user_middle_name.as_deref()),
                email: r.user_email,
                phone: r.user_phone,
                is_active: r.user_is_active,
            },
            company: CompanyBrief {
                id: r.company_id,
                edrpou: r.company_edrpou,
                name: r.company_name,
            },
            role: RoleBrief {
                id: r.role_id,
                name: r.role_name,
            },
            status,
            status_label: status.label(),
            invited_by: r.invited_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MembershipQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<MembershipStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMembershipRequest {
    pub user_id: Uuid,
    pub company_id: Uuid,
    /// Defaults to the company's member role
    #[serde(default)]
    pub role_id: Option<Uuid>,
    #[serde(default)]
    pub status: MembershipStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMembershipRequest {
    #[serde(default)]
    pub role_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<MembershipStatus>,
}

/// Create an account directly inside the caller's company
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCompanyUserRequest {
    #[serde(flatten)]
    pub user: RegisterUserRequest,
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

/// Pending is the only state approve/reject may leave
pub fn can_decide(status: MembershipStatus) -> bool {
    status == MembershipStatus::Pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_can_be_decided() {
        assert!(can_decide(MembershipStatus::Pending));
        assert!(!can_decide(MembershipStatus::Approved));
        assert!(!can_decide(MembershipStatus::Rejected));
    }

    #[test]
    fn create_user_payload_is_flat() {
        let company_id = Uuid::new_v4();
        let req: CreateCompanyUserRequest = serde_json::from_value(serde_json::json!({
            "first_name": "Ivan",
            "last_name": "Petrenko",
            "phone": "+380",
            "email": "ivan@x.ua",
            "password": "Tender-Flow-77",
            "company_id": company_id,
        }))
        .unwrap();

        assert_eq!(req.company_id, Some(company_id));
        assert_eq!(req.user.email, "ivan@x.ua");
    }

    #[test]
    fn status_labels() {
        assert_eq!(MembershipStatus::Pending.label(), "Очікує");
        assert_eq!(MembershipStatus::parse("approved"), Some(MembershipStatus::Approved));
    }
}
