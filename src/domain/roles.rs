//! Roles and the permission catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{ApiResult, Violations};

/// System role created with every company, holds all permissions
pub const ADMIN_ROLE_NAME: &str = "Адміністратор";
/// System role given to members joining an existing company
pub const MEMBER_ROLE_NAME: &str = "Користувач";

/// Permission codes and their display labels
pub const PERMISSION_CATALOG: &[(&str, &str)] = &[
    ("dashboard.view", "Загальна аналітика"),
    ("tenders.view", "Тендери"),
    ("tenders.create", "Створення тендерів"),
    ("tenders.participate", "Участь в тендерах"),
    ("tenders.journal.view", "Журнал тендерів"),
    ("participation.view", "Участь в тендерах"),
    ("participation.journal.view", "Журнал участі"),
    ("suppliers.view", "Контрагенти"),
    ("reference.view", "Довідник"),
    ("nomenclature.view", "Номенклатури"),
    ("categories.view", "Категорії"),
    ("expenses.view", "Статті витрат"),
    ("branches.view", "Філіали підрозділи"),
    ("templates.view", "Шаблони"),
    ("settings.view", "Налаштування"),
    ("users.manage", "Користувачі"),
    ("permissions.manage", "Права доступу"),
    ("roles.manage", "Ролі"),
];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub code: String,
    pub label: String,
}

/// Role entity
#[derive(Debug, Clone, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub is_system: bool,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
}

impl RoleResponse {
    pub fn new(role: Role, permissions: Vec<Permission>) -> Self {
        Self {
            id: role.id,
            company_id: role.company_id,
            name: role.name,
            is_system: role.is_system,
            permissions,
            created_at: role.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoleRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub permission_ids: Vec<Uuid>,
}

impl CreateRoleRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        v.require("name", &self.name);
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Replaces the whole permission set when present
    #[serde(default)]
    pub permission_ids: Option<Vec<Uuid>>,
}

impl UpdateRoleRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        if let Some(name) = &self.name {
            v.require("name", name);
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_codes_are_unique() {
        let codes: HashSet<_> = PERMISSION_CATALOG.iter().map(|(code, _)| *code).collect();
        assert_eq!(codes.len(), PERMISSION_CATALOG.len());
        assert!(codes.contains("roles.manage"));
    }
}
