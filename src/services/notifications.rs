//! Notification service
//!
//! Called by routes when membership events should reach a user. Functions
//! take an executor so they can join the caller's transaction.

use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::domain::notifications::NotificationType;
use crate::domain::roles::ADMIN_ROLE_NAME;

/// Create a notification for a user
pub async fn create_notification<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    notification_type: NotificationType,
    title: &str,
    body: &str,
    meta: serde_json::Value,
) -> Result<Uuid, sqlx::Error> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO notifications (user_id, type, title, body, meta)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(notification_type.as_str())
    .bind(title)
    .bind(body)
    .bind(&meta)
    .fetch_one(executor)
    .await?;

    tracing::info!(
        user_id = %user_id,
        notification_type = %notification_type,
        notification_id = %id,
        "Notification created"
    );

    Ok(id)
}

/// Who asked to join, for the administrators' notification
pub struct JoinRequester<'a> {
    pub user_id: Uuid,
    pub full_name: &'a str,
    pub email: &'a str,
}

/// Tell every approved administrator of the company about a join request
pub async fn notify_membership_request(
    conn: &mut PgConnection,
    membership_id: Uuid,
    company_id: Uuid,
    company_name: &str,
    requester: &JoinRequester<'_>,
) -> Result<usize, sqlx::Error> {
    let admins = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT cu.user_id
        FROM company_users cu
        JOIN roles r ON r.id = cu.role_id
        WHERE cu.company_id = $1
          AND cu.status = 'approved'
          AND r.is_system AND r.name = $2
        "#,
    )
    .bind(company_id)
    .bind(ADMIN_ROLE_NAME)
    .fetch_all(&mut *conn)
    .await?;

    let who = if requester.full_name.trim().is_empty() {
        requester.email
    } else {
        requester.full_name
    };
    let title = format!("Запит на приєднання від {who}");
    let body = format!(
        "Користувач {who} ({}) хоче приєднатися до компанії {company_name}.",
        requester.email
    );
    let meta = serde_json::json!({
        "membership_id": membership_id,
        "user_id": requester.user_id,
        "company_id": company_id,
    });

    for admin in &admins {
        create_notification(
            &mut *conn,
            *admin,
            NotificationType::MembershipRequest,
            &title,
            &body,
            meta.clone(),
        )
        .await?;
    }

    Ok(admins.len())
}

/// Tell the member their request was approved or rejected
pub async fn notify_membership_decision<'e, E: PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    membership_id: Uuid,
    company_id: Uuid,
    company_name: &str,
    approved: bool,
) -> Result<Uuid, sqlx::Error> {
    let (title, body) = if approved {
        (
            "Ваш запит підтверджено",
            format!("Ваш запит на приєднання до компанії {company_name} підтверджено."),
        )
    } else {
        (
            "Ваш запит відхилено",
            format!("Ваш запит на приєднання до компанії {company_name} відхилено."),
        )
    };

    create_notification(
        executor,
        user_id,
        NotificationType::MembershipDecision,
        title,
        &body,
        serde_json::json!({
            "membership_id": membership_id,
            "company_id": company_id,
        }),
    )
    .await
}
