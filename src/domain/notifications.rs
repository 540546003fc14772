//! Notification domain types
//!
//! In-app notifications addressed to a single user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Notification type enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Someone asked to join a company
    MembershipRequest,
    /// A join request was approved or rejected
    MembershipDecision,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MembershipRequest => "membership_request",
            Self::MembershipDecision => "membership_decision",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    pub meta: sqlx::types::Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            notification_type: n.notification_type,
            title: n.title,
            body: n.body,
            is_read: n.is_read,
            meta: n.meta.0,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkAllReadResponse {
    pub count: u64,
}
