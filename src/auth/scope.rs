//! Company-scoped authorization extractors
//!
//! `CompanyScope` resolves the companies in which the caller holds an
//! approved membership. Handlers filter every query by that set and call
//! [`CompanyScope::ensure`] before writing to a company. `AdminScope` narrows
//! the set to companies where the caller holds the administrator role.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use uuid::Uuid;

use super::middleware::{AuthError, AuthRejection};
use super::{AuthContext, RequireAuth};
use crate::app::AppState;
use crate::domain::roles::ADMIN_ROLE_NAME;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct CompanyScope {
    pub auth: AuthContext,
    companies: Vec<Uuid>,
}

impl CompanyScope {
    pub fn new(auth: AuthContext, companies: Vec<Uuid>) -> Self {
        Self { auth, companies }
    }

    pub fn user_id(&self) -> Uuid {
        self.auth.user_id
    }

    pub fn is_superuser(&self) -> bool {
        self.auth.is_superuser
    }

    /// Companies with an approved membership, in join order
    pub fn company_ids(&self) -> &[Uuid] {
        &self.companies
    }

    pub fn allows(&self, company_id: Uuid) -> bool {
        self.auth.is_superuser || self.companies.contains(&company_id)
    }

    /// 403 unless the caller may write to `company_id`
    pub fn ensure(&self, company_id: Uuid) -> ApiResult<()> {
        if self.allows(company_id) {
            Ok(())
        } else {
            Err(ApiError::forbidden("You are not an approved member of this company"))
        }
    }

    /// Bind value for `($1::uuid[] IS NULL OR company_id = ANY($1))`
    pub fn visible(&self) -> Option<Vec<Uuid>> {
        if self.auth.is_superuser {
            None
        } else {
            Some(self.companies.clone())
        }
    }

    /// Narrow a caller-supplied company filter to what is visible
    pub fn narrow(&self, requested: Option<Uuid>) -> ApiResult<Option<Vec<Uuid>>> {
        match requested {
            Some(company_id) if self.allows(company_id) => Ok(Some(vec![company_id])),
            Some(_) => Err(ApiError::forbidden("You are not an approved member of this company")),
            None => Ok(self.visible()),
        }
    }

    /// Explicit company or the first approved one
    pub fn target_company(&self, requested: Option<Uuid>) -> ApiResult<Uuid> {
        match requested {
            Some(company_id) => {
                self.ensure(company_id)?;
                Ok(company_id)
            }
            None => match self.companies.first() {
                Some(company_id) => Ok(*company_id),
                None if self.auth.is_superuser => {
                    Err(ApiError::field("company_id", "Superusers must specify company_id"))
                }
                None => Err(ApiError::forbidden("You have no approved company membership")),
            },
        }
    }
}

/// Companies where the caller administers roles
#[derive(Debug, Clone)]
pub struct AdminScope(pub CompanyScope);

impl std::ops::Deref for AdminScope {
    type Target = CompanyScope;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

async fn approved_companies(
    state: &AppState,
    user_id: Uuid,
    admin_only: bool,
) -> Result<Vec<Uuid>, AuthError> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT cu.company_id
        FROM company_users cu
        JOIN roles r ON r.id = cu.role_id
        WHERE cu.user_id = $1
          AND cu.status = 'approved'
          AND ($2::bool = false OR (r.is_system AND r.name = $3))
        ORDER BY cu.created_at
        "#,
    )
    .bind(user_id)
    .bind(admin_only)
    .bind(ADMIN_ROLE_NAME)
    .fetch_all(&state.db)
    .await
    .map_err(|e| AuthError::Database(e.to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CompanyScope {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let RequireAuth(auth) = RequireAuth::from_request_parts(parts, state).await?;
        let companies = approved_companies(state, auth.user_id, false)
            .await
            .map_err(|e| AuthRejection::new(e, parts))?;

        Ok(CompanyScope::new(auth, companies))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminScope {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let RequireAuth(auth) = RequireAuth::from_request_parts(parts, state).await?;
        let companies = approved_companies(state, auth.user_id, true)
            .await
            .map_err(|e| AuthRejection::new(e, parts))?;

        Ok(AdminScope(CompanyScope::new(auth, companies)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn member(companies: Vec<Uuid>) -> CompanyScope {
        CompanyScope::new(AuthContext::new(Uuid::new_v4(), "m@x.ua".into(), false), companies)
    }

    #[test]
    fn approved_company_is_allowed_others_forbidden() {
        let mine = Uuid::new_v4();
        let scope = member(vec![mine]);

        assert!(scope.ensure(mine).is_ok());
        let err = scope.ensure(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(scope.visible(), Some(vec![mine]));
    }

    #[test]
    fn superuser_sees_everything() {
        let scope = CompanyScope::new(AuthContext::new(Uuid::new_v4(), "root@x.ua".into(), true), vec![]);

        assert!(scope.allows(Uuid::new_v4()));
        assert_eq!(scope.visible(), None);
        assert_eq!(scope.narrow(None).unwrap(), None);
    }

    #[test]
    fn narrowing_respects_membership() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let scope = member(vec![a, b]);

        assert_eq!(scope.narrow(Some(b)).unwrap(), Some(vec![b]));
        assert_eq!(scope.narrow(None).unwrap(), Some(vec![a, b]));
        assert!(scope.narrow(Some(Uuid::new_v4())).is_err());
    }

    #[test]
    fn target_company_defaults_to_first_membership() {
        let a = Uuid::new_v4();
        assert_eq!(member(vec![a]).target_company(None).unwrap(), a);

        let err = member(vec![]).target_company(None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn superuser_without_membership_must_name_company() {
        let root = CompanyScope::new(AuthContext::new(Uuid::new_v4(), "root@x.ua".into(), true), vec![]);

        match root.target_company(None) {
            Err(ApiError::Validation(fields)) => assert!(fields.contains_key("company_id")),
            other => panic!("expected company_id field error, got {other:?}"),
        }
        let any = Uuid::new_v4();
        assert_eq!(root.target_company(Some(any)).unwrap(), any);
    }
}
