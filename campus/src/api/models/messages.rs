//! API models for internal messaging.

use super::{pagination::Pagination, users::UserSummary};
use crate::{
    db::models::messages::{AttachmentDBResponse, InboxMessageDBResponse, MessageDBResponse},
    types::{AttachmentId, MessageId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// JSON form of compose. The multipart form carries the same fields plus `attachments` files,
/// with `recipient_ids` repeated once per recipient.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MessageCompose {
    /// Defaults to "Re: {parent subject}" on replies
    pub subject: Option<String>,
    pub body: String,
    /// Defaults to the parent's sender on replies
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub recipient_ids: Vec<UserId>,
    pub parent_id: Option<MessageId>,
}

/// A file received with a multipart compose, already read into memory.
#[derive(Debug, Clone)]
pub struct IncomingAttachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttachmentResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AttachmentId,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Download link, only usable by whoever can see the message
    pub url: String,
}

impl From<AttachmentDBResponse> for AttachmentResponse {
    fn from(db: AttachmentDBResponse) -> Self {
        Self {
            url: format!("/api/v1/messages/{}/attachments/{}", db.message_id, db.id),
            id: db.id,
            original_filename: db.original_filename,
            content_type: db.content_type,
            size_bytes: db.size_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: MessageId,
    #[schema(value_type = String, format = "uuid")]
    pub sender_id: UserId,
    pub sender: Option<UserSummary>,
    pub parent_id: Option<MessageId>,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// Present on inbox listings only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
}

impl From<MessageDBResponse> for MessageResponse {
    fn from(db: MessageDBResponse) -> Self {
        Self {
            id: db.id,
            sender_id: db.sender_id,
            sender: None,
            parent_id: db.parent_id,
            subject: db.subject,
            body: db.body,
            sent_at: db.sent_at,
            is_read: None,
        }
    }
}

impl From<InboxMessageDBResponse> for MessageResponse {
    fn from(db: InboxMessageDBResponse) -> Self {
        Self {
            id: db.id,
            sender_id: db.sender_id,
            sender: None,
            parent_id: db.parent_id,
            subject: db.subject,
            body: db.body,
            sent_at: db.sent_at,
            is_read: Some(db.is_read),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecipientResponse {
    pub user: UserSummary,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

/// A message with everything the detail page shows.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub message: MessageResponse,
    pub recipients: Vec<RecipientResponse>,
    /// Direct replies, oldest first
    pub replies: Vec<MessageResponse>,
    pub attachments: Vec<AttachmentResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InboxResponse {
    pub data: Vec<MessageResponse>,
    pub total_count: i64,
    pub unread_count: i64,
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListMessagesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

/// What a delete did: removed for everyone, or only from the caller's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    Everyone,
    Recipient,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageDeleted {
    pub id: MessageId,
    pub scope: DeleteScope,
}
