use super::pagination::Pagination;
use crate::{
    db::models::notifications::{NotificationDBResponse, NotificationType},
    types::NotificationId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: NotificationId,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub related_url: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<NotificationDBResponse> for NotificationResponse {
    fn from(db: NotificationDBResponse) -> Self {
        Self {
            id: db.id,
            title: db.title,
            message: db.message,
            notification_type: db.notification_type,
            related_url: db.related_url,
            is_read: db.is_read,
            created_at: db.created_at,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListNotificationsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only unread notifications
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub unread_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    pub count: i64,
}

/// `{ "status": "success" }`, with `count` on clear-all.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            count: None,
        }
    }

    pub fn success_with_count(count: i64) -> Self {
        Self {
            status: "success".to_string(),
            count: Some(count),
        }
    }
}
