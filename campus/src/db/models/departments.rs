//! Database models for departments, subjects and holidays.

use crate::types::{DepartmentId, HolidayId, SubjectId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct DepartmentDBResponse {
    pub id: DepartmentId,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub head_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DepartmentCreateDBRequest {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub head_id: Option<UserId>,
}

/// `Some(None)` clears the nullable columns.
#[derive(Debug, Clone, Default)]
pub struct DepartmentUpdateDBRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<Option<String>>,
    pub head_id: Option<Option<UserId>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubjectDBResponse {
    pub id: SubjectId,
    pub name: String,
    pub code: String,
    pub department_id: DepartmentId,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubjectCreateDBRequest {
    pub name: String,
    pub code: String,
    pub department_id: DepartmentId,
    pub description: Option<String>,
    pub teacher_ids: Vec<UserId>,
}

/// `teacher_ids: Some(..)` replaces the whole teacher set.
#[derive(Debug, Clone, Default)]
pub struct SubjectUpdateDBRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub department_id: Option<DepartmentId>,
    pub description: Option<Option<String>>,
    pub teacher_ids: Option<Vec<UserId>>,
}

#[derive(Debug, Clone, Default)]
pub struct SubjectFilter {
    pub department_id: Option<DepartmentId>,
    pub teacher_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct HolidayDBResponse {
    pub id: HolidayId,
    pub name: String,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HolidayCreateDBRequest {
    pub name: String,
    pub date: NaiveDate,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HolidayUpdateDBRequest {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct HolidayFilter {
    /// Only holidays on or after this date.
    pub from_date: Option<NaiveDate>,
    pub skip: i64,
    pub limit: i64,
}

/// Plain pagination for tables without filters.
#[derive(Debug, Clone, Default)]
pub struct PageFilter {
    pub skip: i64,
    pub limit: i64,
}
