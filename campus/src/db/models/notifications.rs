//! Database models for the per-user notification feed.

use crate::types::{NotificationId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "notification_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Exam,
    Assignment,
    #[default]
    General,
    Message,
}

#[derive(Debug, Clone, FromRow)]
pub struct NotificationDBResponse {
    pub id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub related_url: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Content of a notification, independent of who receives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub related_url: Option<String>,
}

impl NotificationContent {
    pub fn new_exam(name: &str, subject: &str, date: NaiveDate) -> Self {
        Self {
            title: format!("New Exam: {name}"),
            message: format!("A new {name} exam for {subject} is scheduled on {date}"),
            notification_type: NotificationType::Exam,
            related_url: Some("/exams".to_string()),
        }
    }

    pub fn new_message(sender: &str, subject: &str, message_id: i64) -> Self {
        Self {
            title: "New Message".to_string(),
            message: format!("New message from {sender}: {subject}"),
            notification_type: NotificationType::Message,
            related_url: Some(format!("/messages/{message_id}")),
        }
    }

    pub fn message_deleted(subject: &str) -> Self {
        Self {
            title: "Message Deleted".to_string(),
            message: format!("Message '{subject}' deleted"),
            notification_type: NotificationType::General,
            related_url: None,
        }
    }

    pub fn student_added(first_name: &str, last_name: &str, slug: &str) -> Self {
        Self {
            title: "Student Added".to_string(),
            message: format!("Student {first_name} {last_name} added successfully"),
            notification_type: NotificationType::General,
            related_url: Some(format!("/students/{slug}")),
        }
    }

    pub fn student_deleted(first_name: &str, last_name: &str) -> Self {
        Self {
            title: "Student Deleted".to_string(),
            message: format!("Student {first_name} {last_name} deleted"),
            notification_type: NotificationType::General,
            related_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationFilter {
    pub user_id: UserId,
    pub unread_only: bool,
    pub skip: i64,
    pub limit: i64,
}
