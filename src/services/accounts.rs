//! Account and membership helpers shared by onboarding, member management
//! and the command line

use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::auth::password::hash_password_blocking;
use crate::domain::roles::{ADMIN_ROLE_NAME, MEMBER_ROLE_NAME};
use crate::domain::users::{normalize_email, User};
use crate::error::{ApiError, ApiResult};

/// Fields needed to insert a user; the password is still plain text
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub middle_name: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub is_superuser: bool,
}

pub async fn email_taken<'e, E: PgExecutor<'e>>(
    executor: E,
    email: &str,
    except: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = lower($1) AND ($2::uuid IS NULL OR id <> $2))",
    )
    .bind(email)
    .bind(except)
    .fetch_one(executor)
    .await
}

/// Insert a user after checking the email is free
pub async fn create_user(conn: &mut PgConnection, new_user: NewUser<'_>) -> ApiResult<User> {
    let email = normalize_email(new_user.email);
    if email_taken(&mut *conn, &email, None).await? {
        return Err(ApiError::field("email", "A user with this email already exists"));
    }

    let password_hash = hash_password_blocking(new_user.password.to_string()).await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, first_name, last_name, middle_name, phone, is_superuser)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(new_user.first_name.trim())
    .bind(new_user.last_name.trim())
    .bind(new_user.middle_name.map(str::trim).filter(|s| !s.is_empty()))
    .bind(new_user.phone.map(str::trim).filter(|s| !s.is_empty()))
    .bind(new_user.is_superuser)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(user_id = %user.id, "User created");
    Ok(user)
}

/// Get-or-create the company's administrator role, synced to hold every permission
pub async fn ensure_admin_role(conn: &mut PgConnection, company_id: Uuid) -> Result<Uuid, sqlx::Error> {
    let role_id = ensure_system_role(&mut *conn, company_id, ADMIN_ROLE_NAME).await?;

    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT $1, id FROM permissions
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(role_id)
    .execute(&mut *conn)
    .await?;

    Ok(role_id)
}

/// Get-or-create the company's default member role
pub async fn ensure_member_role(conn: &mut PgConnection, company_id: Uuid) -> Result<Uuid, sqlx::Error> {
    ensure_system_role(conn, company_id, MEMBER_ROLE_NAME).await
}

async fn ensure_system_role(conn: &mut PgConnection, company_id: Uuid, name: &str) -> Result<Uuid, sqlx::Error> {
    // The no-op update makes RETURNING yield the existing row too
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO roles (company_id, name, is_system)
        VALUES ($1, $2, true)
        ON CONFLICT (company_id, name) DO UPDATE SET is_system = true
        RETURNING id
        "#,
    )
    .bind(company_id)
    .bind(name)
    .fetch_one(&mut *conn)
    .await
}

/// Whether the caller is an approved member of the company holding the
/// administrator role
pub async fn is_company_admin<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    company_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM company_users cu
            JOIN roles r ON r.id = cu.role_id
            WHERE cu.user_id = $1 AND cu.company_id = $2
              AND cu.status = 'approved' AND r.is_system AND r.name = $3
        )
        "#,
    )
    .bind(user_id)
    .bind(company_id)
    .bind(ADMIN_ROLE_NAME)
    .fetch_one(executor)
    .await
}
