//! Internal messaging.
//!
//! A message is visible to its sender, its recipients and admins. Deleting as the sender (or an
//! admin) removes the message for everyone; deleting as a recipient only drops that recipient's
//! copy.

use crate::{
    AppState,
    api::models::{
        messages::{
            AttachmentResponse, DeleteScope, IncomingAttachment, InboxResponse, ListMessagesQuery, MessageCompose, MessageDeleted,
            MessageDetail, MessageResponse, RecipientResponse,
        },
        pagination::PaginatedResponse,
        users::{CurrentUser, UserSummary},
    },
    auth::permissions::RequireAdmin,
    db::{
        handlers::{Messages, Notifications, Repository, Users},
        models::{
            messages::{AttachmentCreateDBRequest, MessageCreateDBRequest, MessageDBResponse},
            notifications::NotificationContent,
        },
    },
    errors::Error,
    types::{AttachmentId, MessageId, Operation, Resource, UserId},
    uploads::{StoredFile, UploadKind, Uploads},
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use sqlx::PgConnection;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// Compose input from either a JSON body or a `multipart/form-data` form with files.
pub struct ComposeForm {
    pub compose: MessageCompose,
    pub attachments: Vec<IncomingAttachment>,
}

fn bad_request(message: impl Into<String>) -> Error {
    Error::BadRequest { message: message.into() }
}

impl FromRequest<AppState> for ComposeForm {
    type Rejection = Error;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(compose) = Json::<MessageCompose>::from_request(req, state)
                .await
                .map_err(|e| bad_request(e.body_text()))?;
            return Ok(Self {
                compose,
                attachments: Vec::new(),
            });
        }

        let mut multipart = Multipart::from_request(req, state).await.map_err(|e| bad_request(e.body_text()))?;
        let uploads = state.uploads();
        let mut compose = MessageCompose::default();
        let mut attachments = Vec::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(format!("Invalid multipart data: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "attachments" {
                let filename = field.file_name().unwrap_or("attachment").to_string();
                let content_type = field.content_type().map(str::to_string);
                let content = uploads.read_field(field).await?;
                // Browsers send an empty part when no file was picked
                if !content.is_empty() {
                    attachments.push(IncomingAttachment {
                        filename,
                        content_type,
                        content,
                    });
                }
                continue;
            }

            let value = field.text().await.map_err(|e| bad_request(format!("Invalid field {name}: {e}")))?;
            match name.as_str() {
                "subject" => compose.subject = Some(value),
                "body" => compose.body = value,
                "recipient_ids" => {
                    let id = value.trim().parse().map_err(|_| bad_request(format!("Invalid recipient: {value}")))?;
                    compose.recipient_ids.push(id);
                }
                "parent_id" if !value.trim().is_empty() => {
                    let id = value.trim().parse().map_err(|_| bad_request(format!("Invalid parent message: {value}")))?;
                    compose.parent_id = Some(id);
                }
                _ => {}
            }
        }

        Ok(Self { compose, attachments })
    }
}

/// Whether `user` may read `message`.
async fn can_view(conn: &mut PgConnection, user: &CurrentUser, message: &MessageDBResponse) -> Result<bool, Error> {
    if user.is_admin || message.sender_id == user.id {
        return Ok(true);
    }
    Ok(Messages::new(conn).is_recipient(message.id, user.id).await?)
}

async fn visible_message(conn: &mut PgConnection, user: &CurrentUser, id: MessageId) -> Result<MessageDBResponse, Error> {
    let message = Messages::new(&mut *conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Message".to_string(),
        id: id.to_string(),
    })?;
    if !can_view(conn, user, &message).await? {
        return Err(Error::InsufficientPermissions {
            action: Operation::Read,
            resource: Resource::Messages,
        });
    }
    Ok(message)
}

/// Message `id` with its sender filled in, if `user` may see it. Used to prefill a reply.
pub async fn visible_with_sender(state: &AppState, user: &CurrentUser, id: MessageId) -> Result<MessageResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let message = visible_message(&mut conn, user, id).await?;
    with_senders(&mut conn, vec![MessageResponse::from(message)])
        .await?
        .pop()
        .ok_or(Error::Internal {
            operation: "load message sender".to_string(),
        })
}

async fn with_senders(conn: &mut PgConnection, messages: Vec<MessageResponse>) -> Result<Vec<MessageResponse>, Error> {
    let mut ids: Vec<UserId> = messages.iter().map(|m| m.sender_id).collect();
    ids.sort();
    ids.dedup();
    let senders = Users::new(conn).get_bulk(ids).await?;
    Ok(messages
        .into_iter()
        .map(|m| MessageResponse {
            sender: senders.get(&m.sender_id).map(UserSummary::from),
            ..m
        })
        .collect())
}

/// Validate, store and deliver a message. Attachment files written before a failure are removed.
pub async fn send_message(state: &AppState, sender: &CurrentUser, form: ComposeForm) -> Result<MessageDetail, Error> {
    let ComposeForm { compose, attachments } = form;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let parent = match compose.parent_id {
        Some(parent_id) => Some(visible_message(&mut conn, sender, parent_id).await?),
        None => None,
    };

    let subject = match (compose.subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()), &parent) {
        (Some(subject), _) => subject,
        (None, Some(parent)) => format!("Re: {}", parent.subject),
        (None, None) => return Err(bad_request("Subject is required")),
    };
    if compose.body.trim().is_empty() {
        return Err(bad_request("Message body is required"));
    }

    let mut recipient_ids = compose.recipient_ids;
    if let (true, Some(parent)) = (recipient_ids.is_empty(), &parent) {
        recipient_ids.push(parent.sender_id);
    }
    recipient_ids.retain(|id| *id != sender.id);
    recipient_ids.sort();
    recipient_ids.dedup();
    if recipient_ids.is_empty() {
        return Err(bad_request("Please select at least one recipient"));
    }
    let known = Users::new(&mut conn).get_bulk(recipient_ids.clone()).await?;
    if let Some(missing) = recipient_ids.iter().find(|id| !known.contains_key(id)) {
        return Err(bad_request(format!("Unknown recipient: {missing}")));
    }
    drop(conn);

    let uploads = state.uploads();
    let mut stored = Vec::with_capacity(attachments.len());
    for attachment in &attachments {
        match uploads
            .store(
                UploadKind::MessageAttachments,
                &attachment.filename,
                attachment.content_type.as_deref(),
                &attachment.content,
            )
            .await
        {
            Ok(file) => stored.push(file),
            Err(e) => {
                discard(&uploads, &stored).await;
                return Err(e);
            }
        }
    }

    let request = MessageCreateDBRequest {
        sender_id: sender.id,
        parent_id: parent.as_ref().map(|p| p.id),
        subject,
        body: compose.body,
        recipient_ids,
    };
    match deliver(state, sender, &request, &stored).await {
        Ok(detail) => Ok(detail),
        Err(e) => {
            discard(&uploads, &stored).await;
            Err(e)
        }
    }
}

async fn discard(uploads: &Uploads, stored: &[StoredFile]) {
    for file in stored {
        uploads.discard(&file.relative_path).await;
    }
}

async fn deliver(state: &AppState, sender: &CurrentUser, request: &MessageCreateDBRequest, stored: &[StoredFile]) -> Result<MessageDetail, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut messages = Messages::new(&mut tx);
    let message = messages.create(request).await?;

    let mut attachments = Vec::with_capacity(stored.len());
    for file in stored {
        let attachment = messages
            .add_attachment(&AttachmentCreateDBRequest {
                message_id: message.id,
                file_path: file.relative_path.clone(),
                original_filename: file.original_filename.clone(),
                content_type: file.content_type.clone(),
                size_bytes: file.size_bytes,
            })
            .await?;
        attachments.push(AttachmentResponse::from(attachment));
    }

    let content = NotificationContent::new_message(&sender.display_name(), &message.subject, message.id);
    Notifications::new(&mut tx).create_for_users(&request.recipient_ids, &content).await?;

    let recipients = Users::new(&mut tx).get_bulk(request.recipient_ids.clone()).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(message_id = message.id, recipients = request.recipient_ids.len(), "Message sent");

    let mut response = MessageResponse::from(message);
    response.sender = Some(UserSummary {
        id: sender.id,
        full_name: sender.display_name(),
        email: sender.email.clone(),
    });
    Ok(MessageDetail {
        message: response,
        recipients: request
            .recipient_ids
            .iter()
            .filter_map(|id| recipients.get(id))
            .map(|user| RecipientResponse {
                user: UserSummary::from(user),
                is_read: false,
                read_at: None,
            })
            .collect(),
        replies: Vec::new(),
        attachments,
    })
}

#[utoipa::path(
    get,
    path = "/messages/inbox",
    tag = "messages",
    summary = "Inbox",
    params(ListMessagesQuery),
    responses((status = 200, description = "Received messages, newest first, with the unread count", body = InboxResponse)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn inbox(State(state): State<AppState>, current_user: CurrentUser, Query(query): Query<ListMessagesQuery>) -> Result<Json<InboxResponse>, Error> {
    let (skip, limit) = query.pagination.params();
    Ok(Json(inbox_for(&state, &current_user, skip, limit).await?))
}

pub async fn inbox_for(state: &AppState, user: &CurrentUser, skip: i64, limit: i64) -> Result<InboxResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut messages = Messages::new(&mut conn);
    let rows = messages.inbox(user.id, skip, limit).await?;
    let (total_count, unread_count) = messages.inbox_counts(user.id).await?;
    let data = with_senders(&mut conn, rows.into_iter().map(MessageResponse::from).collect()).await?;

    Ok(InboxResponse {
        data,
        total_count,
        unread_count,
        skip,
        limit,
    })
}

#[utoipa::path(
    get,
    path = "/messages/sent",
    tag = "messages",
    summary = "Sent messages",
    params(ListMessagesQuery),
    responses((status = 200, description = "Messages the caller sent, newest first", body = PaginatedResponse<MessageResponse>)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn sent(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<PaginatedResponse<MessageResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut messages = Messages::new(&mut conn);
    let rows = messages.sent(current_user.id, skip, limit).await?;
    let total = messages.count_sent(current_user.id).await?;
    let data = with_senders(&mut conn, rows.into_iter().map(MessageResponse::from).collect()).await?;
    Ok(Json(PaginatedResponse::new(data, total, skip, limit)))
}

#[utoipa::path(
    get,
    path = "/messages",
    tag = "messages",
    summary = "All messages",
    params(ListMessagesQuery),
    responses(
        (status = 200, description = "Every message, newest first", body = PaginatedResponse<MessageResponse>),
        (status = 403, description = "Forbidden - admin access required"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_all_messages(
    State(state): State<AppState>,
    _: RequireAdmin,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<PaginatedResponse<MessageResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    Ok(Json(all_messages(&state, skip, limit).await?))
}

/// Every message, newest first. Callers check for admin first.
pub async fn all_messages(state: &AppState, skip: i64, limit: i64) -> Result<PaginatedResponse<MessageResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut messages = Messages::new(&mut conn);
    let rows = messages.list_all(skip, limit).await?;
    let total = messages.count_all().await?;
    let data = with_senders(&mut conn, rows.into_iter().map(MessageResponse::from).collect()).await?;
    Ok(PaginatedResponse::new(data, total, skip, limit))
}

#[utoipa::path(
    post,
    path = "/messages",
    tag = "messages",
    summary = "Send message",
    description = "Accepts JSON, or `multipart/form-data` with the same fields plus `attachments` files. \
                   With `parent_id` set this is a reply: the subject defaults to \"Re: {parent subject}\" and \
                   the recipients to the parent's sender.",
    request_body = MessageCompose,
    responses(
        (status = 201, description = "Message sent", body = MessageDetail),
        (status = 400, description = "Missing subject/body/recipients, unknown recipient, or oversized file"),
        (status = 404, description = "Parent message not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn send(State(state): State<AppState>, current_user: CurrentUser, form: ComposeForm) -> Result<(StatusCode, Json<MessageDetail>), Error> {
    let detail = send_message(&state, &current_user, form).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

#[utoipa::path(
    get,
    path = "/messages/{id}",
    tag = "messages",
    summary = "Read message",
    description = "Marks the caller's copy as read.",
    params(("id" = i64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "Message with recipients, replies and attachments", body = MessageDetail),
        (status = 403, description = "Not the sender, a recipient or an admin"),
        (status = 404, description = "Message not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_message(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<MessageId>) -> Result<Json<MessageDetail>, Error> {
    Ok(Json(message_detail(&state, &current_user, id).await?))
}

/// The message with its recipients, replies and attachments. Marks the caller's copy read.
pub async fn message_detail(state: &AppState, user: &CurrentUser, id: MessageId) -> Result<MessageDetail, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let message = visible_message(&mut conn, user, id).await?;

    let mut messages = Messages::new(&mut conn);
    messages.mark_read(id, user.id).await?;
    let recipient_rows = messages.recipients(id).await?;
    let replies = messages.replies(id).await?;
    let attachments = messages.attachments(id).await?;

    let user_ids = recipient_rows.iter().map(|r| r.recipient_id).collect();
    let users = Users::new(&mut conn).get_bulk(user_ids).await?;
    let recipients = recipient_rows
        .into_iter()
        .filter_map(|r| {
            Some(RecipientResponse {
                user: UserSummary::from(users.get(&r.recipient_id)?),
                is_read: r.is_read,
                read_at: r.read_at,
            })
        })
        .collect();

    let mut thread = vec![MessageResponse::from(message)];
    thread.extend(replies.into_iter().map(MessageResponse::from));
    let mut thread = with_senders(&mut conn, thread).await?.into_iter();
    let message = thread.next().ok_or(Error::Internal {
        operation: "load message sender".to_string(),
    })?;

    Ok(MessageDetail {
        message,
        recipients,
        replies: thread.collect(),
        attachments: attachments.into_iter().map(AttachmentResponse::from).collect(),
    })
}

#[utoipa::path(
    delete,
    path = "/messages/{id}",
    tag = "messages",
    summary = "Delete message",
    description = "The sender or an admin deletes the message for everyone; a recipient removes only their copy.",
    params(("id" = i64, Path, description = "Message ID")),
    responses(
        (status = 200, description = "What was deleted", body = MessageDeleted),
        (status = 403, description = "Not the sender, a recipient or an admin"),
        (status = 404, description = "Message not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_message(State(state): State<AppState>, current_user: CurrentUser, Path(id): Path<MessageId>) -> Result<Json<MessageDeleted>, Error> {
    Ok(Json(remove_message(&state, &current_user, id).await?))
}

pub async fn remove_message(state: &AppState, user: &CurrentUser, id: MessageId) -> Result<MessageDeleted, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let message = visible_message(&mut tx, user, id).await?;

    let mut messages = Messages::new(&mut tx);
    let (scope, orphaned) = if message.sender_id == user.id || user.is_admin {
        let attachments = messages.attachments(id).await?;
        messages.delete(id).await?;
        (DeleteScope::Everyone, attachments)
    } else {
        messages.remove_recipient(id, user.id).await?;
        (DeleteScope::Recipient, Vec::new())
    };
    Notifications::new(&mut tx)
        .create(user.id, &NotificationContent::message_deleted(&message.subject))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    let uploads = state.uploads();
    for attachment in orphaned {
        uploads.discard(&attachment.file_path).await;
    }
    info!(message_id = id, ?scope, "Message deleted");
    Ok(MessageDeleted { id, scope })
}

#[utoipa::path(
    get,
    path = "/messages/{message_id}/attachments/{id}",
    tag = "messages",
    summary = "Download attachment",
    params(
        ("message_id" = i64, Path, description = "Message ID"),
        ("id" = uuid::Uuid, Path, description = "Attachment ID"),
    ),
    responses(
        (status = 200, description = "File content with its stored content type", content_type = "application/octet-stream"),
        (status = 403, description = "Not the sender, a recipient or an admin"),
        (status = 404, description = "Attachment not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn download_attachment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((message_id, id)): Path<(MessageId, AttachmentId)>,
) -> Result<Response, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    visible_message(&mut conn, &current_user, message_id).await?;
    let attachment = Messages::new(&mut conn)
        .get_attachment(id)
        .await?
        .filter(|a| a.message_id == message_id)
        .ok_or_else(|| Error::NotFound {
            resource: "Attachment".to_string(),
            id: id.to_string(),
        })?;
    drop(conn);

    let path = state.uploads().resolve(&attachment.file_path)?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        warn!(path = %path.display(), "Attachment file missing: {e}");
        Error::NotFound {
            resource: "Attachment".to_string(),
            id: id.to_string(),
        }
    })?;

    let disposition = format!("attachment; filename=\"{}\"", attachment.original_filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, attachment.content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, attachment.size_bytes.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::{notifications::NotificationFilter, users::RoleFlag},
        test_utils::{create_test_app, create_test_user, session_header},
    };
    use axum_test::multipart::{MultipartForm, Part};
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_send_notifies_and_inbox_counts(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let student = create_test_user(&pool, RoleFlag::Student).await;

        let response = app
            .post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "subject": "Homework", "body": "Page 12", "recipient_ids": [student.id, teacher.id] }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let sent: MessageDetail = response.json();
        assert_eq!(sent.recipients.len(), 1);

        let inbox: InboxResponse = app
            .get("/api/v1/messages/inbox")
            .add_header(session_header(&student).0, session_header(&student).1)
            .await
            .json();
        assert_eq!((inbox.total_count, inbox.unread_count), (1, 1));
        assert_eq!(inbox.data[0].is_read, Some(false));

        let mut conn = pool.acquire().await.unwrap();
        let notifications = Notifications::new(&mut conn)
            .list(&NotificationFilter {
                user_id: student.id,
                unread_only: true,
                skip: 0,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].message.ends_with(": Homework"));
        assert_eq!(notifications[0].related_url, Some(format!("/messages/{}", sent.message.id)));

        // Reading marks the copy read
        app.get(&format!("/api/v1/messages/{}", sent.message.id))
            .add_header(session_header(&student).0, session_header(&student).1)
            .await
            .assert_status_ok();
        let inbox: InboxResponse = app
            .get("/api/v1/messages/inbox")
            .add_header(session_header(&student).0, session_header(&student).1)
            .await
            .json();
        assert_eq!(inbox.unread_count, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reply_defaults(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let student = create_test_user(&pool, RoleFlag::Student).await;

        let original: MessageDetail = app
            .post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "subject": "Trip", "body": "Forms due Friday", "recipient_ids": [student.id] }))
            .await
            .json();

        let response = app
            .post("/api/v1/messages")
            .add_header(session_header(&student).0, session_header(&student).1)
            .json(&json!({ "body": "Handed in", "parent_id": original.message.id }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let reply: MessageDetail = response.json();
        assert_eq!(reply.message.subject, "Re: Trip");
        assert_eq!(reply.recipients[0].user.id, teacher.id);

        let thread: MessageDetail = app
            .get(&format!("/api/v1/messages/{}", original.message.id))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await
            .json();
        assert_eq!(thread.replies.len(), 1);
        assert_eq!(thread.replies[0].id, reply.message.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_compose_validation_and_visibility(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let student = create_test_user(&pool, RoleFlag::Student).await;
        let outsider = create_test_user(&pool, RoleFlag::Student).await;
        let admin = create_test_user(&pool, RoleFlag::Admin).await;

        app.post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "subject": "Only me", "body": "x", "recipient_ids": [teacher.id] }))
            .await
            .assert_status_bad_request();
        app.post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "body": "x", "recipient_ids": [student.id] }))
            .await
            .assert_status_bad_request();

        let sent: MessageDetail = app
            .post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "subject": "Grades", "body": "A+", "recipient_ids": [student.id] }))
            .await
            .json();
        app.get(&format!("/api/v1/messages/{}", sent.message.id))
            .add_header(session_header(&outsider).0, session_header(&outsider).1)
            .await
            .assert_status_forbidden();
        app.get(&format!("/api/v1/messages/{}", sent.message.id))
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .await
            .assert_status_ok();

        let all: PaginatedResponse<MessageResponse> = app
            .get("/api/v1/messages")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .await
            .json();
        assert_eq!(all.total_count, 1);
        app.get("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await
            .assert_status_forbidden();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_recipient_delete_hides_only_their_copy(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let first = create_test_user(&pool, RoleFlag::Student).await;
        let second = create_test_user(&pool, RoleFlag::Student).await;

        let sent: MessageDetail = app
            .post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "subject": "Notice", "body": "No school Monday", "recipient_ids": [first.id, second.id] }))
            .await
            .json();

        let deleted: MessageDeleted = app
            .delete(&format!("/api/v1/messages/{}", sent.message.id))
            .add_header(session_header(&first).0, session_header(&first).1)
            .await
            .json();
        assert_eq!(deleted.scope, DeleteScope::Recipient);

        let inbox = |user: &crate::db::models::users::UserDBResponse| {
            let header = session_header(user);
            app.get("/api/v1/messages/inbox").add_header(header.0, header.1)
        };
        assert_eq!(inbox(&first).await.json::<InboxResponse>().total_count, 0);
        assert_eq!(inbox(&second).await.json::<InboxResponse>().total_count, 1);

        let deleted: MessageDeleted = app
            .delete(&format!("/api/v1/messages/{}", sent.message.id))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await
            .json();
        assert_eq!(deleted.scope, DeleteScope::Everyone);
        assert_eq!(inbox(&second).await.json::<InboxResponse>().total_count, 0);

        let mut conn = pool.acquire().await.unwrap();
        let teacher_notes = Notifications::new(&mut conn)
            .list(&NotificationFilter {
                user_id: teacher.id,
                unread_only: false,
                skip: 0,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(teacher_notes[0].message, "Message 'Notice' deleted");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_multipart_compose_with_attachment(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let student = create_test_user(&pool, RoleFlag::Student).await;
        let outsider = create_test_user(&pool, RoleFlag::Student).await;

        let form = MultipartForm::new()
            .add_text("subject", "Worksheet")
            .add_text("body", "See attached")
            .add_text("recipient_ids", student.id.to_string())
            .add_part(
                "attachments",
                Part::bytes(b"x,y\n1,2\n".to_vec()).file_name("sheet.csv").mime_type("text/csv"),
            );
        let response = app
            .post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .multipart(form)
            .await;
        response.assert_status(StatusCode::CREATED);
        let sent: MessageDetail = response.json();
        assert_eq!(sent.attachments.len(), 1);
        let attachment = &sent.attachments[0];
        assert_eq!(attachment.original_filename, "sheet.csv");

        let download = app
            .get(&attachment.url)
            .add_header(session_header(&student).0, session_header(&student).1)
            .await;
        download.assert_status_ok();
        assert_eq!(download.header(header::CONTENT_TYPE), "text/csv");
        assert_eq!(download.as_bytes().as_ref(), b"x,y\n1,2\n");

        app.get(&attachment.url)
            .add_header(session_header(&outsider).0, session_header(&outsider).1)
            .await
            .assert_status_forbidden();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_sender_delete_keeps_replies_and_their_files(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let student = create_test_user(&pool, RoleFlag::Student).await;

        let original: MessageDetail = app
            .post("/api/v1/messages")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "subject": "Essay", "body": "Send me your draft", "recipient_ids": [student.id] }))
            .await
            .json();

        let form = MultipartForm::new()
            .add_text("body", "Draft attached")
            .add_text("parent_id", original.message.id.to_string())
            .add_part(
                "attachments",
                Part::bytes(b"my draft".to_vec()).file_name("draft.txt").mime_type("text/plain"),
            );
        let response = app
            .post("/api/v1/messages")
            .add_header(session_header(&student).0, session_header(&student).1)
            .multipart(form)
            .await;
        response.assert_status(StatusCode::CREATED);
        let reply: MessageDetail = response.json();
        assert_eq!(reply.attachments.len(), 1);

        let deleted: MessageDeleted = app
            .delete(&format!("/api/v1/messages/{}", original.message.id))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await
            .json();
        assert_eq!(deleted.scope, DeleteScope::Everyone);

        // The student's reply outlives the deleted parent, attachment included
        let thread: MessageDetail = app
            .get(&format!("/api/v1/messages/{}", reply.message.id))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await
            .json();
        assert_eq!(thread.message.parent_id, None);
        assert_eq!(thread.attachments.len(), 1);

        let download = app
            .get(&thread.attachments[0].url)
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await;
        download.assert_status_ok();
        assert_eq!(download.as_bytes().as_ref(), b"my draft");
    }
}
