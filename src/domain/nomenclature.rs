//! Units of measure and the nomenclature catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::cpv::{cpv_label, CpvShort};
use super::nullable;
use crate::error::{ApiResult, Violations};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Unit {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUnitRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUnitRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

/// Nomenclature row joined with unit, category and legacy CPV
#[derive(Debug, Clone, FromRow)]
pub struct NomenclatureRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub unit_id: Option<Uuid>,
    pub unit_name: Option<String>,
    pub code: Option<String>,
    pub external_number: Option<String>,
    pub description: Option<String>,
    pub specification_file: Option<String>,
    pub image_file: Option<String>,
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub cpv_category_id: Option<i64>,
    pub cpv_category_code: Option<String>,
    pub cpv_category_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const NOMENCLATURE_SELECT: &str = r#"
    SELECT n.id, n.company_id, n.name, n.unit_id, u.name AS unit_name, n.code,
           n.external_number, n.description, n.specification_file, n.image_file,
           n.category_id, c.name AS category_name,
           n.cpv_category_id, cpv.cpv_code AS cpv_category_code, cpv.name_ua AS cpv_category_name,
           n.is_active, n.created_at, n.updated_at
    FROM nomenclatures n
    LEFT JOIN units_of_measure u ON u.id = n.unit_id
    LEFT JOIN categories c ON c.id = n.category_id
    LEFT JOIN cpv_dictionary cpv ON cpv.id = n.cpv_category_id
"#;

#[derive(Debug, Clone, Serialize)]
pub struct NomenclatureResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub unit_id: Option<Uuid>,
    pub unit_name: Option<String>,
    pub code: Option<String>,
    pub external_number: Option<String>,
    pub description: Option<String>,
    pub specification_file: Option<String>,
    pub image_file: Option<String>,
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub cpv_category_id: Option<i64>,
    pub cpv_label: Option<String>,
    pub cpv_categories: Vec<CpvShort>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NomenclatureResponse {
    pub fn new(row: NomenclatureRow, cpv_categories: Vec<CpvShort>) -> Self {
        let legacy = row
            .cpv_category_code
            .as_deref()
            .zip(row.cpv_category_name.as_deref());
        let cpv_label = primary_cpv_label(&cpv_categories, legacy);

        Self {
            id: row.id,
            company_id: row.company_id,
            name: row.name,
            unit_id: row.unit_id,
            unit_name: row.unit_name,
            code: row.code,
            external_number: row.external_number,
            description: row.description,
            specification_file: row.specification_file,
            image_file: row.image_file,
            category_id: row.category_id,
            category_name: row.category_name,
            cpv_category_id: row.cpv_category_id,
            cpv_label,
            cpv_categories,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// First linked CPV wins, then the legacy single reference
pub fn primary_cpv_label(linked: &[CpvShort], legacy: Option<(&str, &str)>) -> Option<String> {
    linked
        .first()
        .map(|c| cpv_label(&c.cpv_code, &c.name_ua))
        .or_else(|| legacy.map(|(code, name)| cpv_label(code, name)))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNomenclatureRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub unit_id: Option<Uuid>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub external_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub specification_file: Option<String>,
    #[serde(default)]
    pub image_file: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub cpv_category_id: Option<i64>,
    #[serde(default)]
    pub cpv_ids: Vec<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CreateNomenclatureRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        v.require("name", &self.name);
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateNomenclatureRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub unit_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub external_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub specification_file: Option<String>,
    #[serde(default)]
    pub image_file: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub category_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub cpv_category_id: Option<Option<i64>>,
    #[serde(default)]
    pub cpv_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UpdateNomenclatureRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        if let Some(name) = &self.name {
            v.require("name", name);
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NomenclatureQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub cpv_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_cpv_takes_precedence_over_legacy() {
        let linked = vec![CpvShort {
            id: 1,
            cpv_code: "03110000".into(),
            name_ua: "Культури".into(),
        }];

        assert_eq!(
            primary_cpv_label(&linked, Some(("45000000", "Будівництво"))).as_deref(),
            Some("03110000 - Культури")
        );
        assert_eq!(
            primary_cpv_label(&[], Some(("45000000", "Будівництво"))).as_deref(),
            Some("45000000 - Будівництво")
        );
        assert_eq!(primary_cpv_label(&[], None), None);
    }
}
