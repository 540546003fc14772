//! Procurement and sales tenders
//!
//! Both aggregates share one shape; [`TenderKind`] selects the tables.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::cpv::CpvShort;
use super::nomenclature::primary_cpv_label;
use super::nullable;
use super::references::CriterionType;
use super::text_enum;
use crate::error::{ApiResult, Violations};

/// Which tender aggregate a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenderKind {
    Procurement,
    Sales,
}

impl TenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement",
            Self::Sales => "sales",
        }
    }

    pub fn tenders(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement_tenders",
            Self::Sales => "sales_tenders",
        }
    }

    pub fn positions(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement_tender_positions",
            Self::Sales => "sales_tender_positions",
        }
    }

    pub fn cpvs(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement_tender_cpvs",
            Self::Sales => "sales_tender_cpvs",
        }
    }

    pub fn criteria(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement_tender_criteria",
            Self::Sales => "sales_tender_criteria",
        }
    }

    pub fn proposals(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement_tender_proposals",
            Self::Sales => "sales_tender_proposals",
        }
    }

    pub fn proposal_values(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement_proposal_positions",
            Self::Sales => "sales_proposal_positions",
        }
    }

    pub fn files(&self) -> &'static str {
        match self {
            Self::Procurement => "procurement_tender_files",
            Self::Sales => "sales_tender_files",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenderStage {
    #[default]
    Passport,
    Preparation,
    Acceptance,
    Decision,
    Approval,
    Completed,
}

text_enum!(TenderStage {
    Passport => "passport": "Паспорт тендера",
    Preparation => "preparation": "Підготовка процедури",
    Acceptance => "acceptance": "Прийом пропозицій",
    Decision => "decision": "Вибір рішення",
    Approval => "approval": "Затвердження",
    Completed => "completed": "Завершений",
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConductType {
    Registration,
    #[default]
    Rfx,
    OnlineAuction,
}

text_enum!(ConductType {
    Registration => "registration": "Реєстрація закупівлі",
    Rfx => "rfx": "Збір пропозицій (RFx)",
    OnlineAuction => "online_auction": "Онлайн торги",
});

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublicationType {
    #[default]
    Open,
    Closed,
}

text_enum!(PublicationType {
    Open => "open": "Відкрита процедура",
    Closed => "closed": "Закрита процедура",
});

// ============================================================================
// Rows
// ============================================================================

/// Tender joined with the names of everything it references
#[derive(Debug, Clone, FromRow)]
pub struct TenderRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub number: i32,
    pub tour_number: i32,
    pub name: String,
    pub stage: String,
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub cpv_category_id: Option<i64>,
    pub cpv_category_code: Option<String>,
    pub cpv_category_name: Option<String>,
    pub expense_article_id: Option<Uuid>,
    pub expense_article_name: Option<String>,
    pub estimated_budget: Option<Decimal>,
    pub branch_id: Option<Uuid>,
    pub branch_name: Option<String>,
    pub department_id: Option<Uuid>,
    pub department_name: Option<String>,
    pub conduct_type: String,
    pub publication_type: String,
    pub currency_id: Option<Uuid>,
    pub currency_code: Option<String>,
    pub general_terms: Option<String>,
    pub created_by: Option<Uuid>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub price_criterion_vat: bool,
    pub price_criterion_delivery: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SELECT for [`TenderRow`] over the given kind; callers append WHERE/ORDER
pub fn tender_select(kind: TenderKind) -> String {
    format!(
        r#"
        SELECT t.id, t.company_id, t.parent_id, t.number, t.tour_number, t.name, t.stage,
               t.category_id, cat.name AS category_name,
               t.cpv_category_id, cpv.cpv_code AS cpv_category_code, cpv.name_ua AS cpv_category_name,
               t.expense_article_id, ea.name AS expense_article_name,
               t.estimated_budget,
               t.branch_id, b.name AS branch_name,
               t.department_id, d.name AS department_name,
               t.conduct_type, t.publication_type,
               t.currency_id, cur.code AS currency_code,
               t.general_terms, t.created_by, t.start_at, t.end_at,
               t.price_criterion_vat, t.price_criterion_delivery,
               t.created_at, t.updated_at
        FROM {tenders} t
        LEFT JOIN categories cat ON cat.id = t.category_id
        LEFT JOIN cpv_dictionary cpv ON cpv.id = t.cpv_category_id
        LEFT JOIN expense_articles ea ON ea.id = t.expense_article_id
        LEFT JOIN branches b ON b.id = t.branch_id
        LEFT JOIN departments d ON d.id = t.department_id
        LEFT JOIN currencies cur ON cur.id = t.currency_id
        "#,
        tenders = kind.tenders()
    )
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PositionRow {
    pub id: Uuid,
    pub tender_id: Uuid,
    pub nomenclature_id: Uuid,
    pub nomenclature_name: String,
    pub unit_name: Option<String>,
    pub quantity: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CriterionBriefRow {
    pub tender_id: Uuid,
    pub id: Uuid,
    pub name: String,
    #[sqlx(rename = "type")]
    pub criterion_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CriterionBrief {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub criterion_type: CriterionType,
    pub type_label: &'static str,
}

impl From<CriterionBriefRow> for CriterionBrief {
    fn from(r: CriterionBriefRow) -> Self {
        let criterion_type = CriterionType::parse(&r.criterion_type).unwrap_or_default();
        Self {
            id: r.id,
            name: r.name,
            criterion_type,
            type_label: criterion_type.label(),
        }
    }
}

/// CPV link row tagged with its tender, for batch loading
#[derive(Debug, Clone, FromRow)]
pub struct TenderCpvRow {
    pub tender_id: Uuid,
    pub id: i64,
    pub cpv_code: String,
    pub name_ua: String,
}

// ============================================================================
// Response
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TenderResponse {
    pub id: Uuid,
    pub kind: &'static str,
    pub company_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub number: i32,
    pub tour_number: i32,
    pub name: String,
    pub stage: TenderStage,
    pub stage_label: &'static str,
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub cpv_category_id: Option<i64>,
    pub cpv_label: Option<String>,
    pub cpv_categories: Vec<CpvShort>,
    pub expense_article_id: Option<Uuid>,
    pub expense_article_name: Option<String>,
    pub estimated_budget: Option<Decimal>,
    pub branch_id: Option<Uuid>,
    pub branch_name: Option<String>,
    pub department_id: Option<Uuid>,
    pub department_name: Option<String>,
    pub conduct_type: ConductType,
    pub conduct_type_label: &'static str,
    pub publication_type: PublicationType,
    pub publication_type_label: &'static str,
    pub currency_id: Option<Uuid>,
    pub currency_code: Option<String>,
    pub general_terms: Option<String>,
    pub created_by: Option<Uuid>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub price_criterion_vat: bool,
    pub price_criterion_delivery: bool,
    pub criteria: Vec<CriterionBrief>,
    pub positions: Vec<PositionRow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenderResponse {
    pub fn assemble(
        kind: TenderKind,
        row: TenderRow,
        cpv_categories: Vec<CpvShort>,
        criteria: Vec<CriterionBrief>,
        positions: Vec<PositionRow>,
    ) -> Self {
        let stage = TenderStage::parse(&row.stage).unwrap_or_default();
        let conduct_type = ConductType::parse(&row.conduct_type).unwrap_or_default();
        let publication_type = PublicationType::parse(&row.publication_type).unwrap_or_default();
        let legacy = row
            .cpv_category_code
            .as_deref()
            .zip(row.cpv_category_name.as_deref());
        let cpv_label = primary_cpv_label(&cpv_categories, legacy);

        Self {
            id: row.id,
            kind: kind.as_str(),
            company_id: row.company_id,
            parent_id: row.parent_id,
            number: row.number,
            tour_number: row.tour_number,
            name: row.name,
            stage,
            stage_label: stage.label(),
            category_id: row.category_id,
            category_name: row.category_name,
            cpv_category_id: row.cpv_category_id,
            cpv_label,
            cpv_categories,
            expense_article_id: row.expense_article_id,
            expense_article_name: row.expense_article_name,
            estimated_budget: row.estimated_budget,
            branch_id: row.branch_id,
            branch_name: row.branch_name,
            department_id: row.department_id,
            department_name: row.department_name,
            conduct_type,
            conduct_type_label: conduct_type.label(),
            publication_type,
            publication_type_label: publication_type.label(),
            currency_id: row.currency_id,
            currency_code: row.currency_code,
            general_terms: row.general_terms,
            created_by: row.created_by,
            start_at: row.start_at,
            end_at: row.end_at,
            price_criterion_vat: row.price_criterion_vat,
            price_criterion_delivery: row.price_criterion_delivery,
            criteria,
            positions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PositionInput {
    pub nomenclature_id: Uuid,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PositionInput {
    pub fn quantity_or_default(&self) -> Decimal {
        self.quantity.unwrap_or(Decimal::ONE)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenderRequest {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    /// Previous tour; the new tender inherits its number
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub stage: TenderStage,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub cpv_category_id: Option<i64>,
    #[serde(default)]
    pub cpv_ids: Vec<i64>,
    #[serde(default)]
    pub expense_article_id: Option<Uuid>,
    #[serde(default)]
    pub estimated_budget: Option<Decimal>,
    #[serde(default)]
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub department_id: Option<Uuid>,
    #[serde(default)]
    pub conduct_type: ConductType,
    #[serde(default)]
    pub publication_type: PublicationType,
    #[serde(default)]
    pub currency_id: Option<Uuid>,
    #[serde(default)]
    pub general_terms: Option<String>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub price_criterion_vat: bool,
    #[serde(default)]
    pub price_criterion_delivery: bool,
    #[serde(default)]
    pub criterion_ids: Vec<Uuid>,
    #[serde(default)]
    pub positions: Vec<PositionInput>,
}

impl CreateTenderRequest {
    pub fn validate(&self) -> ApiResult<()> {
        let mut v = Violations::new();
        v.require("name", &self.name);
        check_common(&mut v, self.estimated_budget, self.start_at, self.end_at, Some(&self.positions));
        v.finish()
    }
}

/// Partial update; `number` and `tour_number` are not accepted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTenderRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stage: Option<TenderStage>,
    #[serde(default, deserialize_with = "nullable")]
    pub category_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub cpv_category_id: Option<Option<i64>>,
    #[serde(default)]
    pub cpv_ids: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "nullable")]
    pub expense_article_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub estimated_budget: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub branch_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub department_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub conduct_type: Option<ConductType>,
    #[serde(default)]
    pub publication_type: Option<PublicationType>,
    #[serde(default, deserialize_with = "nullable")]
    pub currency_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub general_terms: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub start_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_at: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub price_criterion_vat: Option<bool>,
    #[serde(default)]
    pub price_criterion_delivery: Option<bool>,
    #[serde(default)]
    pub criterion_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub positions: Option<Vec<PositionInput>>,
}

impl UpdateTenderRequest {
    pub fn validate(&self, current: &TenderRow) -> ApiResult<()> {
        let mut v = Violations::new();
        if let Some(name) = &self.name {
            v.require("name", name);
        }
        let start_at = self.start_at.unwrap_or(current.start_at);
        let end_at = self.end_at.unwrap_or(current.end_at);
        check_common(
            &mut v,
            self.estimated_budget.flatten(),
            start_at,
            end_at,
            self.positions.as_deref(),
        );
        v.finish()
    }
}

fn check_common(
    v: &mut Violations,
    budget: Option<Decimal>,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    positions: Option<&[PositionInput]>,
) {
    if budget.is_some_and(|b| b < Decimal::ZERO) {
        v.add("estimated_budget", "Budget cannot be negative");
    }
    if let (Some(start), Some(end)) = (start_at, end_at) {
        if start > end {
            v.add("end_at", "End must not be earlier than start");
        }
    }
    if let Some(positions) = positions {
        let mut seen = Vec::with_capacity(positions.len());
        for position in positions {
            if position.quantity_or_default() <= Decimal::ZERO {
                v.add("positions", "Quantity must be greater than zero");
            }
            if seen.contains(&position.nomenclature_id) {
                v.add("positions", format!("Duplicate nomenclature {}", position.nomenclature_id));
            }
            seen.push(position.nomenclature_id);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenderQuery {
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub stage: Option<TenderStage>,
    #[serde(default)]
    pub search: Option<String>,
}

// ============================================================================
// Numbering
// ============================================================================

/// Number and tour assigned to a new tender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Numbering {
    pub number: i32,
    pub tour_number: i32,
}

/// What the numbering transaction read under the company lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberingBasis {
    /// A first tour: current maximum number in the company
    Fresh { max_number: Option<i32> },
    /// A later tour of `number`: highest tour recorded for it
    NextTour { number: i32, max_tour: Option<i32> },
}

pub fn assign_numbering(basis: NumberingBasis) -> Numbering {
    match basis {
        NumberingBasis::Fresh { max_number } => Numbering {
            number: max_number.unwrap_or(0) + 1,
            tour_number: 1,
        },
        NumberingBasis::NextTour { number, max_tour } => Numbering {
            number,
            tour_number: max_tour.unwrap_or(0) + 1,
        },
    }
}

// ============================================================================
// Position reconciliation
// ============================================================================

/// Changes needed to make stored positions match the submitted list
#[derive(Debug, Default)]
pub struct PositionPlan {
    /// Existing position id with its new values
    pub update: Vec<(Uuid, PositionInput)>,
    pub create: Vec<PositionInput>,
    pub delete: Vec<Uuid>,
}

/// Match by nomenclature id. `existing` is `(position id, nomenclature id)`.
pub fn plan_positions(existing: &[(Uuid, Uuid)], incoming: Vec<PositionInput>) -> PositionPlan {
    let by_nomenclature: HashMap<Uuid, Uuid> = existing
        .iter()
        .map(|(position_id, nomenclature_id)| (*nomenclature_id, *position_id))
        .collect();

    // Last entry wins when a nomenclature repeats
    let mut wanted: Vec<PositionInput> = Vec::with_capacity(incoming.len());
    for input in incoming {
        match wanted.iter_mut().find(|w| w.nomenclature_id == input.nomenclature_id) {
            Some(slot) => *slot = input,
            None => wanted.push(input),
        }
    }

    let mut plan = PositionPlan::default();
    for input in wanted {
        match by_nomenclature.get(&input.nomenclature_id) {
            Some(position_id) => plan.update.push((*position_id, input)),
            None => plan.create.push(input),
        }
    }

    let kept: Vec<Uuid> = plan.update.iter().map(|(id, _)| *id).collect();
    plan.delete = existing
        .iter()
        .map(|(position_id, _)| *position_id)
        .filter(|id| !kept.contains(id))
        .collect();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn input(nomenclature_id: Uuid, qty: i64) -> PositionInput {
        PositionInput {
            nomenclature_id,
            quantity: Some(Decimal::from(qty)),
            description: None,
        }
    }

    #[test]
    fn first_tender_of_company_is_number_one() {
        assert_eq!(
            assign_numbering(NumberingBasis::Fresh { max_number: None }),
            Numbering { number: 1, tour_number: 1 }
        );
        assert_eq!(
            assign_numbering(NumberingBasis::Fresh { max_number: Some(41) }),
            Numbering { number: 42, tour_number: 1 }
        );
    }

    #[test]
    fn next_tour_keeps_number() {
        assert_eq!(
            assign_numbering(NumberingBasis::NextTour { number: 7, max_tour: Some(2) }),
            Numbering { number: 7, tour_number: 3 }
        );
    }

    #[test]
    fn reconcile_updates_creates_and_deletes() {
        let (p1, n1) = (Uuid::new_v4(), Uuid::new_v4());
        let (p2, n2) = (Uuid::new_v4(), Uuid::new_v4());
        let n3 = Uuid::new_v4();

        let plan = plan_positions(&[(p1, n1), (p2, n2)], vec![input(n1, 5), input(n3, 2)]);

        assert_eq!(plan.update.len(), 1);
        assert_eq!(plan.update[0].0, p1);
        assert_eq!(plan.update[0].1.quantity, Some(Decimal::from(5)));
        assert_eq!(plan.create.len(), 1);
        assert_eq!(plan.create[0].nomenclature_id, n3);
        assert_eq!(plan.delete, vec![p2]);
    }

    #[test]
    fn empty_submission_deletes_everything() {
        let p1 = Uuid::new_v4();
        let plan = plan_positions(&[(p1, Uuid::new_v4())], vec![]);
        assert!(plan.update.is_empty() && plan.create.is_empty());
        assert_eq!(plan.delete, vec![p1]);
    }

    #[test]
    fn quantity_defaults_to_one_and_duplicates_are_rejected() {
        let n = Uuid::new_v4();
        let position = PositionInput {
            nomenclature_id: n,
            quantity: None,
            description: None,
        };
        assert_eq!(position.quantity_or_default(), Decimal::ONE);

        let mut v = Violations::new();
        check_common(&mut v, None, None, None, Some(&[input(n, 1), input(n, 2)]));
        assert!(!v.is_empty());

        let mut v = Violations::new();
        check_common(&mut v, Some(Decimal::from(-5)), None, None, None);
        assert!(!v.is_empty());
    }

    #[test]
    fn labels_are_ukrainian() {
        assert_eq!(TenderStage::Acceptance.label(), "Прийом пропозицій");
        assert_eq!(ConductType::default(), ConductType::Rfx);
        assert_eq!(PublicationType::Closed.label(), "Закрита процедура");
        assert_eq!(TenderKind::Sales.positions(), "sales_tender_positions");
    }

    proptest! {
        // Replays a random sequence of "new tender" / "next tour of tender k"
        // against the numbering rule and checks the invariants hold.
        #[test]
        fn numbering_is_unique_and_monotonic(ops in prop::collection::vec(prop::option::of(0usize..20), 1..80)) {
            let mut issued: Vec<Numbering> = Vec::new();
            let mut seen = HashSet::new();
            let mut last_fresh = 0;

            for op in ops {
                let basis = match op.filter(|k| *k < issued.len()) {
                    Some(k) => {
                        let number = issued[k].number;
                        let max_tour = issued.iter().filter(|n| n.number == number).map(|n| n.tour_number).max();
                        NumberingBasis::NextTour { number, max_tour }
                    }
                    None => NumberingBasis::Fresh { max_number: issued.iter().map(|n| n.number).max() },
                };

                let next = assign_numbering(basis);
                prop_assert!(seen.insert((next.number, next.tour_number)));
                if next.tour_number == 1 {
                    prop_assert!(next.number > last_fresh);
                    last_fresh = next.number;
                }
                issued.push(next);
            }
        }

        #[test]
        fn reconcile_covers_every_existing_position(keep in prop::collection::vec(any::<bool>(), 0..20), extra in 0usize..5) {
            let existing: Vec<(Uuid, Uuid)> = keep.iter().map(|_| (Uuid::new_v4(), Uuid::new_v4())).collect();
            let mut incoming: Vec<PositionInput> = existing
                .iter()
                .zip(&keep)
                .filter(|(_, k)| **k)
                .map(|((_, n), _)| input(*n, 1))
                .collect();
            incoming.extend((0..extra).map(|_| input(Uuid::new_v4(), 1)));

            let plan = plan_positions(&existing, incoming);
            prop_assert_eq!(plan.update.len() + plan.delete.len(), existing.len());
            prop_assert_eq!(plan.create.len(), extra);
        }
    }
}
