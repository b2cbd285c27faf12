//! Database repository for timetable entries.
//!
//! Slot uniqueness per (day, start_time, class, section) is enforced by the
//! `timetable_entries_slot_unique` constraint, so concurrent inserts for the same slot surface as
//! [`DbError::UniqueViolation`].

use std::collections::HashMap;

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::timetable::{TimetableEntryCreateDBRequest, TimetableEntryDBResponse, TimetableEntryUpdateDBRequest, TimetableFilter},
    },
    types::{TimetableEntryId, UserId, abbrev_uuid},
};

const ENTRY_COLUMNS: &str =
    "id, day, start_time, end_time, subject, teacher_id, student_class, section, classroom, color, created_at, updated_at";

pub struct TimetableEntries<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for TimetableEntries<'c> {
    type CreateRequest = TimetableEntryCreateDBRequest;
    type UpdateRequest = TimetableEntryUpdateDBRequest;
    type Response = TimetableEntryDBResponse;
    type Id = TimetableEntryId;
    type Filter = TimetableFilter;

    #[instrument(skip(self, request), fields(day = ?request.day, class = %request.student_class, section = %request.section), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let entry = sqlx::query_as::<_, TimetableEntryDBResponse>(&format!(
            r#"
            INSERT INTO timetable_entries (day, start_time, end_time, subject, teacher_id, student_class, section, classroom, color)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(request.day)
        .bind(request.start_time)
        .bind(request.end_time)
        .bind(&request.subject)
        .bind(request.teacher_id)
        .bind(&request.student_class)
        .bind(&request.section)
        .bind(&request.classroom)
        .bind(&request.color)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(entry)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let entry = sqlx::query_as::<_, TimetableEntryDBResponse>(&format!("SELECT {ENTRY_COLUMNS} FROM timetable_entries WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(entry)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let entries =
            sqlx::query_as::<_, TimetableEntryDBResponse>(&format!("SELECT {ENTRY_COLUMNS} FROM timetable_entries WHERE id = ANY($1)"))
                .bind(&ids)
                .fetch_all(&mut *self.db)
                .await?;
        Ok(entries.into_iter().map(|e| (e.id, e)).collect())
    }

    /// Entries ordered by day, then start time.
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {ENTRY_COLUMNS} FROM timetable_entries WHERE TRUE"));
        if let Some(teacher_id) = filter.teacher_id {
            query.push(" AND teacher_id = ").push_bind(teacher_id);
        }
        if let Some(class) = &filter.student_class {
            query.push(" AND student_class = ").push_bind(class.clone());
        }
        if let Some(section) = &filter.section {
            query.push(" AND section = ").push_bind(section.clone());
        }
        if let Some(day) = filter.day {
            query.push(" AND day = ").push_bind(day);
        }
        query
            .push(" ORDER BY day, start_time, student_class, section LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.skip);
        Ok(query.build_query_as::<TimetableEntryDBResponse>().fetch_all(&mut *self.db).await?)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM timetable_entries WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let entry = sqlx::query_as::<_, TimetableEntryDBResponse>(&format!(
            r#"
            UPDATE timetable_entries SET
                day = COALESCE($2, day),
                start_time = COALESCE($3, start_time),
                end_time = COALESCE($4, end_time),
                subject = COALESCE($5, subject),
                teacher_id = COALESCE($6, teacher_id),
                student_class = COALESCE($7, student_class),
                section = COALESCE($8, section),
                classroom = COALESCE($9, classroom),
                color = COALESCE($10, color),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.day)
        .bind(request.start_time)
        .bind(request.end_time)
        .bind(&request.subject)
        .bind(request.teacher_id)
        .bind(&request.student_class)
        .bind(&request.section)
        .bind(&request.classroom)
        .bind(&request.color)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(entry)
    }
}

impl<'c> TimetableEntries<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Number of distinct (class, section) pairs a teacher has in the timetable.
    #[instrument(skip(self), fields(teacher = %abbrev_uuid(&teacher_id)), err)]
    pub async fn count_classes_for_teacher(&mut self, teacher_id: UserId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM (SELECT DISTINCT student_class, section FROM timetable_entries WHERE teacher_id = $1) AS classes",
        )
        .bind(teacher_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(count)
    }
}
