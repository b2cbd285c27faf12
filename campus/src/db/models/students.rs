//! Database models for students and their parents.

use crate::types::{ParentId, StudentId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "gender")]
pub enum Gender {
    #[default]
    Male,
    Female,
    Others,
}

/// Placeholder text used for parent fields that were never collected.
pub const NOT_PROVIDED: &str = "Not provided";

/// Birth date used when none was supplied.
pub fn default_date_of_birth() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

#[derive(Debug, Clone, FromRow)]
pub struct ParentDBResponse {
    pub id: ParentId,
    pub father_name: String,
    pub father_occupation: String,
    pub father_mobile: String,
    pub father_email: String,
    pub mother_name: String,
    pub mother_occupation: Option<String>,
    pub mother_mobile: String,
    pub mother_email: String,
    pub present_address: String,
    pub permanent_address: String,
}

#[derive(Debug, Clone)]
pub struct ParentCreateDBRequest {
    pub father_name: String,
    pub father_occupation: String,
    pub father_mobile: String,
    pub father_email: String,
    pub mother_name: String,
    pub mother_occupation: Option<String>,
    pub mother_mobile: String,
    pub mother_email: String,
    pub present_address: String,
    pub permanent_address: String,
}

impl ParentCreateDBRequest {
    /// A parent record with every required field set to [`NOT_PROVIDED`].
    pub fn placeholder() -> Self {
        let np = || NOT_PROVIDED.to_string();
        Self {
            father_name: np(),
            father_occupation: np(),
            father_mobile: np(),
            father_email: np(),
            mother_name: np(),
            mother_occupation: None,
            mother_mobile: np(),
            mother_email: np(),
            present_address: np(),
            permanent_address: np(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParentUpdateDBRequest {
    pub father_name: Option<String>,
    pub father_occupation: Option<String>,
    pub father_mobile: Option<String>,
    pub father_email: Option<String>,
    pub mother_name: Option<String>,
    pub mother_occupation: Option<String>,
    pub mother_mobile: Option<String>,
    pub mother_email: Option<String>,
    pub present_address: Option<String>,
    pub permanent_address: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StudentDBResponse {
    pub id: StudentId,
    pub user_id: Option<UserId>,
    pub parent_id: ParentId,
    pub first_name: String,
    pub last_name: String,
    pub student_id: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    pub student_class: String,
    pub section: String,
    pub joining_date: NaiveDate,
    pub mobile_number: String,
    pub admission_number: String,
    pub student_image: Option<String>,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Absent optional fields fall back to the documented defaults when the row is inserted.
#[derive(Debug, Clone, Default)]
pub struct StudentCreateDBRequest {
    pub user_id: Option<UserId>,
    pub parent_id: ParentId,
    pub first_name: String,
    pub last_name: String,
    pub student_id: String,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub joining_date: Option<NaiveDate>,
    pub mobile_number: Option<String>,
    pub admission_number: String,
    pub student_image: Option<String>,
}

/// The slug is derived once at creation and is not touched by updates.
#[derive(Debug, Clone, Default)]
pub struct StudentUpdateDBRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub student_id: Option<String>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub joining_date: Option<NaiveDate>,
    pub mobile_number: Option<String>,
    pub admission_number: Option<String>,
    pub student_image: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub search: Option<String>,
    pub skip: i64,
    pub limit: i64,
}
