//! Database repository for messages, their recipients and attachments.
//!
//! Read state lives on the recipient row, so each recipient tracks it independently. Removing a
//! recipient row hides the message from that recipient only; deleting the message row removes it
//! for everyone.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::messages::{
            AttachmentCreateDBRequest, AttachmentDBResponse, InboxMessageDBResponse, MessageCreateDBRequest, MessageDBResponse,
            MessageRecipientDBResponse,
        },
    },
    types::{AttachmentId, MessageId, UserId, abbrev_uuid},
};

const MESSAGE_COLUMNS: &str = "id, sender_id, parent_id, subject, body, sent_at";
const ATTACHMENT_COLUMNS: &str = "id, message_id, file_path, original_filename, content_type, size_bytes, uploaded_at";

pub struct Messages<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Messages<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert the message and one unread recipient row per recipient.
    #[instrument(skip(self, request), fields(sender = %abbrev_uuid(&request.sender_id), recipients = request.recipient_ids.len()), err)]
    pub async fn create(&mut self, request: &MessageCreateDBRequest) -> Result<MessageDBResponse> {
        let message = sqlx::query_as::<_, MessageDBResponse>(&format!(
            "INSERT INTO messages (sender_id, parent_id, subject, body) VALUES ($1, $2, $3, $4) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(request.sender_id)
        .bind(request.parent_id)
        .bind(&request.subject)
        .bind(&request.body)
        .fetch_one(&mut *self.db)
        .await?;

        sqlx::query(
            "INSERT INTO message_recipients (message_id, recipient_id)
             SELECT $1, recipient FROM UNNEST($2::UUID[]) AS recipient
             ON CONFLICT DO NOTHING",
        )
        .bind(message.id)
        .bind(&request.recipient_ids)
        .execute(&mut *self.db)
        .await?;

        Ok(message)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: MessageId) -> Result<Option<MessageDBResponse>> {
        let message = sqlx::query_as::<_, MessageDBResponse>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(message)
    }

    #[instrument(skip(self), err)]
    pub async fn recipients(&mut self, message_id: MessageId) -> Result<Vec<MessageRecipientDBResponse>> {
        let recipients = sqlx::query_as::<_, MessageRecipientDBResponse>(
            "SELECT message_id, recipient_id, is_read, read_at FROM message_recipients WHERE message_id = $1 ORDER BY recipient_id",
        )
        .bind(message_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(recipients)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn is_recipient(&mut self, message_id: MessageId, user_id: UserId) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM message_recipients WHERE message_id = $1 AND recipient_id = $2)",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exists)
    }

    /// Newest first.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn inbox(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<InboxMessageDBResponse>> {
        let messages = sqlx::query_as::<_, InboxMessageDBResponse>(
            r#"
            SELECT m.id, m.sender_id, m.parent_id, m.subject, m.body, m.sent_at, r.is_read
            FROM messages m
            JOIN message_recipients r ON r.message_id = m.id
            WHERE r.recipient_id = $1
            ORDER BY m.sent_at DESC, m.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(messages)
    }

    /// Returns `(total, unread)` for a user's inbox.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn inbox_counts(&mut self, user_id: UserId) -> Result<(i64, i64)> {
        let counts = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE NOT is_read) FROM message_recipients WHERE recipient_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(counts)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn sent(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<MessageDBResponse>> {
        let messages = sqlx::query_as::<_, MessageDBResponse>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = $1 ORDER BY sent_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(messages)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn count_sent(&mut self, user_id: UserId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages WHERE sender_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self), err)]
    pub async fn list_all(&mut self, skip: i64, limit: i64) -> Result<Vec<MessageDBResponse>> {
        let messages = sqlx::query_as::<_, MessageDBResponse>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY sent_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(messages)
    }

    #[instrument(skip(self), err)]
    pub async fn count_all(&mut self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages").fetch_one(&mut *self.db).await?)
    }

    /// Direct replies, oldest first.
    #[instrument(skip(self), err)]
    pub async fn replies(&mut self, parent_id: MessageId) -> Result<Vec<MessageDBResponse>> {
        let messages = sqlx::query_as::<_, MessageDBResponse>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE parent_id = $1 ORDER BY sent_at, id"
        ))
        .bind(parent_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(messages)
    }

    /// Returns `true` if the recipient row went from unread to read.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn mark_read(&mut self, message_id: MessageId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE message_recipients SET is_read = TRUE, read_at = NOW()
             WHERE message_id = $1 AND recipient_id = $2 AND NOT is_read",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the message for everyone. Recipients, attachments and replies go with it.
    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, id: MessageId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hide the message from one recipient.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn remove_recipient(&mut self, message_id: MessageId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM message_recipients WHERE message_id = $1 AND recipient_id = $2")
            .bind(message_id)
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(message_id = request.message_id), err)]
    pub async fn add_attachment(&mut self, request: &AttachmentCreateDBRequest) -> Result<AttachmentDBResponse> {
        let attachment = sqlx::query_as::<_, AttachmentDBResponse>(&format!(
            r#"
            INSERT INTO message_attachments (message_id, file_path, original_filename, content_type, size_bytes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ATTACHMENT_COLUMNS}
            "#
        ))
        .bind(request.message_id)
        .bind(&request.file_path)
        .bind(&request.original_filename)
        .bind(&request.content_type)
        .bind(request.size_bytes)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(attachment)
    }

    #[instrument(skip(self), err)]
    pub async fn attachments(&mut self, message_id: MessageId) -> Result<Vec<AttachmentDBResponse>> {
        let attachments = sqlx::query_as::<_, AttachmentDBResponse>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM message_attachments WHERE message_id = $1 ORDER BY uploaded_at, id"
        ))
        .bind(message_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(attachments)
    }

    #[instrument(skip(self), err)]
    pub async fn get_attachment(&mut self, id: AttachmentId) -> Result<Option<AttachmentDBResponse>> {
        let attachment =
            sqlx::query_as::<_, AttachmentDBResponse>(&format!("SELECT {ATTACHMENT_COLUMNS} FROM message_attachments WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(attachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{Repository, Users};
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;

    async fn user(conn: &mut PgConnection, email: &str) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                username: email.to_string(),
                email: email.to_string(),
                is_teacher: true,
                auth_source: "native".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    fn message(sender: UserId, recipients: Vec<UserId>, parent_id: Option<MessageId>) -> MessageCreateDBRequest {
        MessageCreateDBRequest {
            sender_id: sender,
            parent_id,
            subject: "Timetable change".to_string(),
            body: "Room 4 is closed on Friday.".to_string(),
            recipient_ids: recipients,
        }
    }

    #[sqlx::test]
    async fn test_per_recipient_read_state(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let sender = user(&mut conn, "sender@school.test").await;
        let a = user(&mut conn, "a@school.test").await;
        let b = user(&mut conn, "b@school.test").await;
        let mut repo = Messages::new(&mut conn);

        let sent = repo.create(&message(sender, vec![a, b], None)).await.unwrap();
        assert_eq!(repo.inbox_counts(a).await.unwrap(), (1, 1));

        assert!(repo.mark_read(sent.id, a).await.unwrap());
        assert!(!repo.mark_read(sent.id, a).await.unwrap());
        assert_eq!(repo.inbox_counts(a).await.unwrap(), (1, 0));
        assert_eq!(repo.inbox_counts(b).await.unwrap(), (1, 1));

        let inbox = repo.inbox(a, 0, 10).await.unwrap();
        assert!(inbox[0].is_read);
        assert_eq!(repo.count_sent(sender).await.unwrap(), 1);
    }

    #[sqlx::test]
    async fn test_recipient_removal_hides_only_their_copy(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let sender = user(&mut conn, "sender@school.test").await;
        let a = user(&mut conn, "a@school.test").await;
        let b = user(&mut conn, "b@school.test").await;
        let mut repo = Messages::new(&mut conn);

        let sent = repo.create(&message(sender, vec![a, b], None)).await.unwrap();
        assert!(repo.remove_recipient(sent.id, a).await.unwrap());

        assert!(repo.inbox(a, 0, 10).await.unwrap().is_empty());
        assert_eq!(repo.inbox(b, 0, 10).await.unwrap().len(), 1);
        assert!(repo.get_by_id(sent.id).await.unwrap().is_some());
        assert!(!repo.is_recipient(sent.id, a).await.unwrap());
        assert!(repo.is_recipient(sent.id, b).await.unwrap());
    }

    #[sqlx::test]
    async fn test_delete_cascades_to_thread_and_attachments(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let sender = user(&mut conn, "sender@school.test").await;
        let a = user(&mut conn, "a@school.test").await;
        let mut repo = Messages::new(&mut conn);

        let root = repo.create(&message(sender, vec![a], None)).await.unwrap();
        let reply = repo.create(&message(a, vec![sender], Some(root.id))).await.unwrap();
        let attachment = repo
            .add_attachment(&AttachmentCreateDBRequest {
                message_id: root.id,
                file_path: "message_attachments/2030/01/01/x-notes.txt".to_string(),
                original_filename: "notes.txt".to_string(),
                content_type: "text/plain".to_string(),
                size_bytes: 12,
            })
            .await
            .unwrap();

        assert_eq!(repo.replies(root.id).await.unwrap().len(), 1);
        assert_eq!(repo.attachments(root.id).await.unwrap().len(), 1);

        assert!(repo.delete(root.id).await.unwrap());
        assert!(repo.get_by_id(reply.id).await.unwrap().is_none());
        assert!(repo.get_attachment(attachment.id).await.unwrap().is_none());
        assert_eq!(repo.inbox_counts(a).await.unwrap(), (0, 0));
    }
}
