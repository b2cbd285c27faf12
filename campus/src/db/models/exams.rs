//! Database models for exams.

use crate::types::{ExamId, UserId};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ExamDBResponse {
    pub id: ExamId,
    pub name: String,
    pub subject: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub student_class: String,
    pub section: Option<String>,
    pub teacher_id: UserId,
    pub room: String,
    pub max_marks: i32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExamCreateDBRequest {
    pub name: String,
    pub subject: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub student_class: String,
    pub section: Option<String>,
    pub teacher_id: UserId,
    pub room: String,
    pub max_marks: Option<i32>,
    pub description: Option<String>,
}

/// `section` and `description` use a double option so they can be cleared:
/// `None` leaves the column alone, `Some(None)` sets it to NULL.
#[derive(Debug, Clone, Default)]
pub struct ExamUpdateDBRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub student_class: Option<String>,
    pub section: Option<Option<String>>,
    pub teacher_id: Option<UserId>,
    pub room: Option<String>,
    pub max_marks: Option<i32>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExamFilter {
    pub teacher_id: Option<UserId>,
    pub student_class: Option<String>,
    /// Matches exams for this section and exams that apply to the whole class.
    pub section_or_whole_class: Option<String>,
    /// Only exams on or after this date.
    pub from_date: Option<NaiveDate>,
    pub skip: i64,
    pub limit: i64,
}
