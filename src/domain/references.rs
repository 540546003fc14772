//! Currencies and tender evaluation criteria

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;
use crate::error::{ApiResult, Violations};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Currency {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CriterionType {
    #[default]
    Numeric,
    Text,
    Boolean,
    Choice,
}

text_enum!(CriterionType {
    Numeric => "numeric": "Числовий",
    Text => "text": "Текстовий",
    Boolean => "boolean": "Так/Ні",
    Choice => "choice": "Вибір зі списку",
});

#[derive(Debug, Clone, FromRow)]
pub struct TenderCriterion {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    #[sqlx(rename = "type")]
    pub criterion_type: String,
    pub options: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenderCriterionResponse {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub criterion_type: CriterionType,
    pub type_label: &'static str,
    pub options: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<TenderCriterion> for TenderCriterionResponse {
    fn from(c: TenderCriterion) -> Self {
        let criterion_type = CriterionType::parse(&c.criterion_type).unwrap_or_default();
        Self {
            id: c.id,
            company_id: c.company_id,
            name: c.name,
            criterion_type,
            type_label: criterion_type.label(),
            options: c.options.0,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCriterionRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    pub name: String,
    #[serde(rename = "type", default)]
    pub criterion_type: CriterionType,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

impl CreateCriterionRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        v.require("name", &self.name);
        check_options(&mut v, self.criterion_type, self.options.as_ref());
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCriterionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub criterion_type: Option<CriterionType>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

impl UpdateCriterionRequest {
    pub fn validate(&self, current: CriterionType) -> ApiResult<()> {
        let mut v = Violations::new();
        if let Some(name) = &self.name {
            v.require("name", name);
        }
        if self.criterion_type.is_some() || self.options.is_some() {
            check_options(&mut v, self.criterion_type.unwrap_or(current), self.options.as_ref());
        }
        v.finish()
    }
}

/// Choice criteria need a non-empty list of options
fn check_options(v: &mut Violations, criterion_type: CriterionType, options: Option<&serde_json::Value>) {
    if criterion_type == CriterionType::Choice {
        let ok = options
            .and_then(|o| o.as_array())
            .map(|items| !items.is_empty())
            .unwrap_or(false);
        if !ok {
            v.add("options", "Choice criteria need a non-empty list of options");
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CriterionQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn choice_requires_options() {
        let req = CreateCriterionRequest {
            company_id: None,
            name: "Колір".into(),
            criterion_type: CriterionType::Choice,
            options: Some(json!([])),
        };
        assert!(req.validate().is_err());

        let req = CreateCriterionRequest {
            options: Some(json!(["червоний", "синій"])),
            ..req
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn type_is_read_from_type_key() {
        let req: CreateCriterionRequest =
            serde_json::from_value(json!({ "name": "Гарантія", "type": "boolean" })).unwrap();
        assert_eq!(req.criterion_type, CriterionType::Boolean);
        assert_eq!(req.criterion_type.label(), "Так/Ні");
    }
}
