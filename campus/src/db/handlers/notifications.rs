//! Database repository for notifications.
//!
//! Every method is scoped to a single owner: a notification id belonging to someone else behaves
//! exactly like a missing one.

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::{
            exams::ExamDBResponse,
            notifications::{NotificationContent, NotificationDBResponse, NotificationFilter},
        },
    },
    types::{NotificationId, UserId, abbrev_uuid},
};

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, notification_type, related_url, is_read, created_at";

pub struct Notifications<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Notifications<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, content), fields(user_id = %abbrev_uuid(&user_id), kind = ?content.notification_type), err)]
    pub async fn create(&mut self, user_id: UserId, content: &NotificationContent) -> Result<NotificationDBResponse> {
        let notification = sqlx::query_as::<_, NotificationDBResponse>(&format!(
            r#"
            INSERT INTO notifications (user_id, title, message, notification_type, related_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&content.title)
        .bind(&content.message)
        .bind(content.notification_type)
        .bind(&content.related_url)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(notification)
    }

    /// One notification per user in `user_ids`, in a single statement.
    #[instrument(skip(self, user_ids, content), fields(count = user_ids.len()), err)]
    pub async fn create_for_users(&mut self, user_ids: &[UserId], content: &NotificationContent) -> Result<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, title, message, notification_type, related_url)
            SELECT recipient, $2, $3, $4, $5 FROM UNNEST($1::UUID[]) AS recipient
            "#,
        )
        .bind(user_ids)
        .bind(&content.title)
        .bind(&content.message)
        .bind(content.notification_type)
        .bind(&content.related_url)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Notify every student account in the exam's class (and section, when the exam has one).
    ///
    /// Students without a linked user account are skipped.
    #[instrument(skip(self, exam), fields(exam_id = exam.id), err)]
    pub async fn fan_out_exam(&mut self, exam: &ExamDBResponse) -> Result<u64> {
        let content = NotificationContent::new_exam(&exam.name, &exam.subject, exam.date);
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, title, message, notification_type, related_url)
            SELECT s.user_id, $3, $4, $5, $6
            FROM students s
            WHERE s.user_id IS NOT NULL
              AND s.student_class = $1
              AND ($2::VARCHAR IS NULL OR s.section = $2)
            "#,
        )
        .bind(&exam.student_class)
        .bind(&exam.section)
        .bind(&content.title)
        .bind(&content.message)
        .bind(content.notification_type)
        .bind(&content.related_url)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Newest first.
    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&filter.user_id), unread_only = filter.unread_only), err)]
    pub async fn list(&mut self, filter: &NotificationFilter) -> Result<Vec<NotificationDBResponse>> {
        let notifications = sqlx::query_as::<_, NotificationDBResponse>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR NOT is_read)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(filter.user_id)
        .bind(filter.unread_only)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(notifications)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn count(&mut self, user_id: UserId, unread_only: bool) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT is_read)")
            .bind(user_id)
            .bind(unread_only)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_for_user(&mut self, user_id: UserId, id: NotificationId) -> Result<Option<NotificationDBResponse>> {
        let notification = sqlx::query_as::<_, NotificationDBResponse>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(notification)
    }

    /// Returns the updated row, or `None` if the caller owns no such notification.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn mark_read(&mut self, user_id: UserId, id: NotificationId) -> Result<Option<NotificationDBResponse>> {
        let notification = sqlx::query_as::<_, NotificationDBResponse>(&format!(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2 RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(notification)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn mark_all_read(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete_for_user(&mut self, user_id: UserId, id: NotificationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn clear_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
