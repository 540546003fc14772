//! Supplier proposals and tender attachments

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::companies::CompanyBrief;
use super::nullable;
use crate::error::{ApiResult, Violations};

#[derive(Debug, Clone, FromRow)]
pub struct ProposalRow {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub supplier_company_id: Uuid,
    pub supplier_edrpou: String,
    pub supplier_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PositionValue {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub tender_position_id: Uuid,
    pub price: Option<Decimal>,
    pub criterion_values: sqlx::types::Json<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposalResponse {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub supplier: CompanyBrief,
    pub position_values: Vec<PositionValue>,
    pub created_at: DateTime<Utc>,
}

impl ProposalResponse {
    pub fn new(row: ProposalRow, position_values: Vec<PositionValue>) -> Self {
        Self {
            id: row.id,
            tender_id: row.tender_id,
            supplier: CompanyBrief {
                id: row.supplier_company_id,
                edrpou: row.supplier_edrpou,
                name: row.supplier_name,
            },
            position_values,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProposalRequest {
    pub supplier_company_id: Uuid,
}

/// Omitted `price` keeps the stored one; an explicit `null` clears it
#[derive(Debug, Clone, Deserialize)]
pub struct PositionValueInput {
    pub tender_position_id: Uuid,
    #[serde(default, deserialize_with = "nullable")]
    pub price: Option<Option<Decimal>>,
    #[serde(default)]
    pub criterion_values: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertPositionValuesRequest {
    pub position_values: Vec<PositionValueInput>,
}

impl UpsertPositionValuesRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        for value in &self.position_values {
            if value.price.flatten().is_some_and(|p| p < Decimal::ZERO) {
                v.add("position_values", "Price cannot be negative");
            }
            if let Some(criteria) = &value.criterion_values {
                if !criteria.is_object() {
                    v.add("position_values", "criterion_values must be an object");
                }
            }
        }
        v.finish()
    }

    pub fn position_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.position_values.iter().map(|v| v.tender_position_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TenderFile {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub name: String,
    #[serde(rename = "file")]
    pub stored_path: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn negative_price_and_non_object_criteria_fail() {
        let position = Uuid::new_v4();
        let req: UpsertPositionValuesRequest = serde_json::from_value(json!({
            "position_values": [
                { "tender_position_id": position, "price": "-1.00" },
                { "tender_position_id": position, "criterion_values": [1, 2] }
            ]
        }))
        .unwrap();

        assert!(req.validate().is_err());
        assert_eq!(req.position_ids(), vec![position]);
    }

    #[test]
    fn prices_accept_numbers_and_strings() {
        let req: UpsertPositionValuesRequest = serde_json::from_value(json!({
            "position_values": [
                { "tender_position_id": Uuid::new_v4(), "price": 12.5 },
                { "tender_position_id": Uuid::new_v4(), "price": "99.99", "criterion_values": { "warranty": true } }
            ]
        }))
        .unwrap();

        assert!(req.validate().is_ok());
        assert_eq!(req.position_values[1].price, Some(Some(Decimal::new(9999, 2))));
    }

    #[test]
    fn omitted_price_differs_from_null_price() {
        let req: UpsertPositionValuesRequest = serde_json::from_value(json!({
            "position_values": [
                { "tender_position_id": Uuid::new_v4(), "criterion_values": { "delivery_days": 10 } },
                { "tender_position_id": Uuid::new_v4(), "price": null },
                { "tender_position_id": Uuid::new_v4(), "price": "5" }
            ]
        }))
        .unwrap();

        assert!(req.validate().is_ok());
        assert_eq!(req.position_values[0].price, None);
        assert_eq!(req.position_values[1].price, Some(None));
        assert_eq!(req.position_values[2].price, Some(Some(Decimal::new(5, 0))));
    }
}
