//! Database models for internal messaging.

use crate::types::{AttachmentId, MessageId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct MessageDBResponse {
    pub id: MessageId,
    pub sender_id: UserId,
    pub parent_id: Option<MessageId>,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// A message as seen from one recipient's inbox.
#[derive(Debug, Clone, FromRow)]
pub struct InboxMessageDBResponse {
    pub id: MessageId,
    pub sender_id: UserId,
    pub parent_id: Option<MessageId>,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRecipientDBResponse {
    pub message_id: MessageId,
    pub recipient_id: UserId,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AttachmentDBResponse {
    pub id: AttachmentId,
    pub message_id: MessageId,
    pub file_path: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageCreateDBRequest {
    pub sender_id: UserId,
    pub parent_id: Option<MessageId>,
    pub subject: String,
    pub body: String,
    pub recipient_ids: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub struct AttachmentCreateDBRequest {
    pub message_id: MessageId,
    pub file_path: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}
