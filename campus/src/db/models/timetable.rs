//! Database models for timetable entries.

use crate::types::{TimetableEntryId, UserId};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Day of the week. Postgres orders the enum in declaration order, Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "weekday")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];
}

#[derive(Debug, Clone, FromRow)]
pub struct TimetableEntryDBResponse {
    pub id: TimetableEntryId,
    pub day: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub subject: String,
    pub teacher_id: UserId,
    pub student_class: String,
    pub section: String,
    pub classroom: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TimetableEntryCreateDBRequest {
    pub day: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub subject: String,
    pub teacher_id: UserId,
    pub student_class: String,
    pub section: String,
    pub classroom: String,
    pub color: String,
}

#[derive(Debug, Clone, Default)]
pub struct TimetableEntryUpdateDBRequest {
    pub day: Option<Weekday>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub subject: Option<String>,
    pub teacher_id: Option<UserId>,
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub classroom: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TimetableFilter {
    pub teacher_id: Option<UserId>,
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub day: Option<Weekday>,
    pub skip: i64,
    pub limit: i64,
}
