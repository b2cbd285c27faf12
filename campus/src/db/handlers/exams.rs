//! Database repository for exams.

use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::exams::{ExamCreateDBRequest, ExamDBResponse, ExamFilter, ExamUpdateDBRequest},
    },
    types::{ExamId, UserId, abbrev_uuid},
};

const EXAM_COLUMNS: &str = "id, name, subject, date, start_time, end_time, student_class, section, teacher_id, room, max_marks, \
     description, created_at, updated_at";

pub struct Exams<'c> {
    db: &'c mut PgConnection,
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &ExamFilter) {
    query.push(" WHERE TRUE");
    if let Some(teacher_id) = filter.teacher_id {
        query.push(" AND teacher_id = ").push_bind(teacher_id);
    }
    if let Some(class) = &filter.student_class {
        query.push(" AND student_class = ").push_bind(class.clone());
    }
    if let Some(section) = &filter.section_or_whole_class {
        query.push(" AND (section IS NULL OR section = ").push_bind(section.clone()).push(")");
    }
    if let Some(from) = filter.from_date {
        query.push(" AND date >= ").push_bind(from);
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Exams<'c> {
    type CreateRequest = ExamCreateDBRequest;
    type UpdateRequest = ExamUpdateDBRequest;
    type Response = ExamDBResponse;
    type Id = ExamId;
    type Filter = ExamFilter;

    #[instrument(skip(self, request), fields(teacher = %abbrev_uuid(&request.teacher_id), date = %request.date), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let exam = sqlx::query_as::<_, ExamDBResponse>(&format!(
            r#"
            INSERT INTO exams (name, subject, date, start_time, end_time, student_class, section, teacher_id, room, max_marks, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, 100), $11)
            RETURNING {EXAM_COLUMNS}
            "#
        ))
        .bind(&request.name)
        .bind(&request.subject)
        .bind(request.date)
        .bind(request.start_time)
        .bind(request.end_time)
        .bind(&request.student_class)
        .bind(&request.section)
        .bind(request.teacher_id)
        .bind(&request.room)
        .bind(request.max_marks)
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(exam)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let exam = sqlx::query_as::<_, ExamDBResponse>(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(exam)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let exams = sqlx::query_as::<_, ExamDBResponse>(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(exams.into_iter().map(|e| (e.id, e)).collect())
    }

    /// Exams ordered by date, then start time.
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {EXAM_COLUMNS} FROM exams"));
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY date, start_time LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.skip);
        Ok(query.build_query_as::<ExamDBResponse>().fetch_all(&mut *self.db).await?)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM exams WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let exam = sqlx::query_as::<_, ExamDBResponse>(&format!(
            r#"
            UPDATE exams SET
                name = COALESCE($2, name),
                subject = COALESCE($3, subject),
                date = COALESCE($4, date),
                start_time = COALESCE($5, start_time),
                end_time = COALESCE($6, end_time),
                student_class = COALESCE($7, student_class),
                section = CASE WHEN $8 THEN $9 ELSE section END,
                teacher_id = COALESCE($10, teacher_id),
                room = COALESCE($11, room),
                max_marks = COALESCE($12, max_marks),
                description = CASE WHEN $13 THEN $14 ELSE description END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {EXAM_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.name)
        .bind(&request.subject)
        .bind(request.date)
        .bind(request.start_time)
        .bind(request.end_time)
        .bind(&request.student_class)
        .bind(request.section.is_some())
        .bind(request.section.clone().flatten())
        .bind(request.teacher_id)
        .bind(&request.room)
        .bind(request.max_marks)
        .bind(request.description.is_some())
        .bind(request.description.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(exam)
    }
}

impl<'c> Exams<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Exams a teacher has on a date, optionally ignoring one exam (the one being edited).
    ///
    /// Callers enforcing the daily limit must hold the teacher's row lock
    /// ([`crate::db::handlers::Users::lock_for_update`]) in the same transaction.
    #[instrument(skip(self), fields(teacher = %abbrev_uuid(&teacher_id)), err)]
    pub async fn count_for_teacher_on(&mut self, teacher_id: UserId, date: NaiveDate, excluding: Option<ExamId>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM exams WHERE teacher_id = $1 AND date = $2 AND ($3::BIGINT IS NULL OR id <> $3)",
        )
        .bind(teacher_id)
        .bind(date)
        .bind(excluding)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(count)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &ExamFilter) -> Result<i64> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM exams");
        push_filter(&mut query, filter);
        Ok(query.build_query_scalar::<i64>().fetch_one(&mut *self.db).await?)
    }
}
