pub mod assignments;
pub mod auth;
pub mod companies;
pub mod cpv;
pub mod health;
pub mod memberships;
pub mod nomenclature;
pub mod notifications;
pub mod org;
pub mod proposals;
pub mod references;
pub mod registration;
pub mod roles;
pub mod tenders;

use axum::{
    routing::{delete, get, patch, post, put},
    Extension, Router,
};
use std::sync::Arc;

use crate::app::AppState;
use crate::domain::org::AssignmentKind;
use crate::domain::tenders::TenderKind;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        .route("/registration/step1", post(registration::register_user))
        .route("/registration/step2/new", post(registration::register_company))
        .route("/registration/step2/existing", post(registration::join_company))
        .route("/companies", get(companies::list_companies))
        .route("/companies/:id", get(companies::get_company))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/me", get(auth::me).patch(auth::update_me))
        .route("/auth/password-change", post(auth::change_password))
        .route("/auth/password-reset", post(auth::request_password_reset))
        .route("/auth/password-reset/confirm", post(auth::confirm_password_reset))
        // Suppliers
        .route(
            "/companies/:id/suppliers",
            get(companies::list_suppliers).post(companies::add_supplier),
        )
        .route("/companies/:id/suppliers/:supplier_id", delete(companies::remove_supplier))
        // Memberships
        .route(
            "/memberships",
            get(memberships::list_memberships).post(memberships::create_membership),
        )
        .route("/memberships/create-user", post(memberships::create_company_user))
        .route(
            "/memberships/:id",
            get(memberships::get_membership)
                .patch(memberships::update_membership)
                .delete(memberships::delete_membership),
        )
        .route("/memberships/:id/approve", post(memberships::approve_membership))
        .route("/memberships/:id/reject", post(memberships::reject_membership))
        .route("/memberships/:id/update-user", patch(memberships::update_member_user))
        .route("/memberships/:id/activate", post(memberships::activate_member))
        .route("/memberships/:id/deactivate", post(memberships::deactivate_member))
        // Roles & permissions
        .route("/permissions", get(roles::list_permissions))
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route(
            "/roles/:id",
            get(roles::get_role).patch(roles::update_role).delete(roles::delete_role),
        )
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/mark-all-read", post(notifications::mark_all_read))
        .route("/notifications/:id", get(notifications::get_notification))
        .route("/notifications/:id/mark-read", post(notifications::mark_read))
        // Organisation trees
        .route("/branches", get(org::list_branches).post(org::create_branch))
        .route(
            "/branches/:id",
            get(org::get_branch).patch(org::update_branch).delete(org::delete_branch),
        )
        .route("/departments", get(org::list_departments).post(org::create_department))
        .route(
            "/departments/:id",
            get(org::get_department)
                .patch(org::update_department)
                .delete(org::delete_department),
        )
        .route("/categories", get(org::list_categories).post(org::create_category))
        .route(
            "/categories/:id",
            get(org::get_category).patch(org::update_category).delete(org::delete_category),
        )
        .route("/expenses", get(org::list_expenses).post(org::create_expense))
        .route(
            "/expenses/:id",
            get(org::get_expense).patch(org::update_expense).delete(org::delete_expense),
        )
        .merge(assignment_routes("/branch-users", AssignmentKind::Branch))
        .merge(assignment_routes("/department-users", AssignmentKind::Department))
        .merge(assignment_routes("/category-users", AssignmentKind::Category))
        .merge(assignment_routes("/expense-users", AssignmentKind::Expense))
        .merge(
            Router::new()
                .route("/department-users/bulk-delete", post(assignments::bulk_delete_assignments))
                .layer(Extension(AssignmentKind::Department)),
        )
        // CPV
        .route("/cpv/tree", get(cpv::cpv_tree))
        .route("/cpv/children", get(cpv::cpv_children))
        // Nomenclature
        .route("/units", get(nomenclature::list_units).post(nomenclature::create_unit))
        .route(
            "/units/:id",
            get(nomenclature::get_unit)
                .patch(nomenclature::update_unit)
                .delete(nomenclature::delete_unit),
        )
        .route(
            "/nomenclatures",
            get(nomenclature::list_nomenclatures).post(nomenclature::create_nomenclature),
        )
        .route(
            "/nomenclatures/:id",
            get(nomenclature::get_nomenclature)
                .patch(nomenclature::update_nomenclature)
                .delete(nomenclature::delete_nomenclature),
        )
        .route("/nomenclatures/:id/activate", post(nomenclature::activate_nomenclature))
        .route("/nomenclatures/:id/deactivate", post(nomenclature::deactivate_nomenclature))
        // References
        .route("/currencies", get(references::list_currencies))
        .route("/currencies/:id", get(references::get_currency))
        .route(
            "/tender-criteria",
            get(references::list_criteria).post(references::create_criterion),
        )
        .route(
            "/tender-criteria/:id",
            get(references::get_criterion)
                .patch(references::update_criterion)
                .delete(references::delete_criterion),
        )
        // Tenders
        .merge(tender_routes("/procurement-tenders", TenderKind::Procurement))
        .merge(tender_routes("/sales-tenders", TenderKind::Sales))
}

/// List/create/delete for one assignment resource
fn assignment_routes(prefix: &str, kind: AssignmentKind) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            prefix,
            get(assignments::list_assignments).post(assignments::create_assignments),
        )
        .route(&format!("{prefix}/:id"), delete(assignments::delete_assignment))
        .layer(Extension(kind))
}

/// The full tender resource for one aggregate
fn tender_routes(prefix: &str, kind: TenderKind) -> Router<Arc<AppState>> {
    Router::new()
        .route(prefix, get(tenders::list_tenders).post(tenders::create_tender))
        .route(
            &format!("{prefix}/:id"),
            get(tenders::get_tender)
                .patch(tenders::update_tender)
                .delete(tenders::delete_tender),
        )
        .route(
            &format!("{prefix}/:id/proposals"),
            get(proposals::list_proposals).post(proposals::create_proposal),
        )
        .route(
            &format!("{prefix}/:id/proposals/:proposal_id"),
            delete(proposals::delete_proposal),
        )
        .route(
            &format!("{prefix}/:id/proposals/:proposal_id/positions"),
            put(proposals::upsert_position_values),
        )
        .route(
            &format!("{prefix}/:id/files"),
            get(proposals::list_files).post(proposals::upload_file),
        )
        .route(&format!("{prefix}/:id/files/:file_id"), delete(proposals::delete_file))
        .layer(Extension(kind))
}
