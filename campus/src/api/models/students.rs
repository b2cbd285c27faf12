//! API models for students and their parents.

use super::pagination::Pagination;
use crate::{
    db::models::students::{
        Gender, ParentCreateDBRequest, ParentDBResponse, ParentUpdateDBRequest, StudentDBResponse, StudentUpdateDBRequest,
    },
    types::{ParentId, StudentId, UserId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Parent details captured with a student. Required fields default to "Not provided".
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ParentFields {
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

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl From<ParentFields> for ParentCreateDBRequest {
    fn from(fields: ParentFields) -> Self {
        let base = ParentCreateDBRequest::placeholder();
        Self {
            father_name: non_empty(fields.father_name).unwrap_or(base.father_name),
            father_occupation: non_empty(fields.father_occupation).unwrap_or(base.father_occupation),
            father_mobile: non_empty(fields.father_mobile).unwrap_or(base.father_mobile),
            father_email: non_empty(fields.father_email).unwrap_or(base.father_email),
            mother_name: non_empty(fields.mother_name).unwrap_or(base.mother_name),
            mother_occupation: non_empty(fields.mother_occupation),
            mother_mobile: non_empty(fields.mother_mobile).unwrap_or(base.mother_mobile),
            mother_email: non_empty(fields.mother_email).unwrap_or(base.mother_email),
            present_address: non_empty(fields.present_address).unwrap_or(base.present_address),
            permanent_address: non_empty(fields.permanent_address).unwrap_or(base.permanent_address),
        }
    }
}

impl From<ParentFields> for ParentUpdateDBRequest {
    fn from(fields: ParentFields) -> Self {
        Self {
            father_name: non_empty(fields.father_name),
            father_occupation: non_empty(fields.father_occupation),
            father_mobile: non_empty(fields.father_mobile),
            father_email: non_empty(fields.father_email),
            mother_name: non_empty(fields.mother_name),
            mother_occupation: non_empty(fields.mother_occupation),
            mother_mobile: non_empty(fields.mother_mobile),
            mother_email: non_empty(fields.mother_email),
            present_address: non_empty(fields.present_address),
            permanent_address: non_empty(fields.permanent_address),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ParentResponse {
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

impl From<ParentDBResponse> for ParentResponse {
    fn from(db: ParentDBResponse) -> Self {
        Self {
            id: db.id,
            father_name: db.father_name,
            father_occupation: db.father_occupation,
            father_mobile: db.father_mobile,
            father_email: db.father_email,
            mother_name: db.mother_name,
            mother_occupation: db.mother_occupation,
            mother_mobile: db.mother_mobile,
            mother_email: db.mother_email,
            present_address: db.present_address,
            permanent_address: db.permanent_address,
        }
    }
}

/// Admin request to enrol a student.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StudentCreate {
    pub first_name: String,
    pub last_name: String,
    pub student_id: String,
    pub admission_number: String,
    /// Link the record to an existing user account
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub joining_date: Option<NaiveDate>,
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub parent: ParentFields,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StudentUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub student_id: Option<String>,
    pub admission_number: Option<String>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<NaiveDate>,
    pub student_class: Option<String>,
    pub section: Option<String>,
    pub joining_date: Option<NaiveDate>,
    pub mobile_number: Option<String>,
    pub parent: Option<ParentFields>,
}

impl StudentUpdate {
    pub fn db_request(&self) -> StudentUpdateDBRequest {
        StudentUpdateDBRequest {
            first_name: non_empty(self.first_name.clone()),
            last_name: non_empty(self.last_name.clone()),
            student_id: non_empty(self.student_id.clone()),
            gender: self.gender,
            date_of_birth: self.date_of_birth,
            student_class: self.student_class.clone(),
            section: self.section.clone(),
            joining_date: self.joining_date,
            mobile_number: self.mobile_number.clone(),
            admission_number: non_empty(self.admission_number.clone()),
            student_image: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StudentResponse {
    pub id: StudentId,
    pub slug: String,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub student_id: String,
    pub admission_number: String,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    pub student_class: String,
    pub section: String,
    pub joining_date: NaiveDate,
    pub mobile_number: String,
    pub student_image_url: Option<String>,
    /// Only included on the detail view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentResponse>,
    pub created_at: DateTime<Utc>,
}

impl From<StudentDBResponse> for StudentResponse {
    fn from(db: StudentDBResponse) -> Self {
        Self {
            id: db.id,
            slug: db.slug,
            user_id: db.user_id,
            first_name: db.first_name,
            last_name: db.last_name,
            student_id: db.student_id,
            admission_number: db.admission_number,
            gender: db.gender,
            date_of_birth: db.date_of_birth,
            student_class: db.student_class,
            section: db.section,
            joining_date: db.joining_date,
            mobile_number: db.mobile_number,
            student_image_url: db.student_image.map(|path| format!("/media/{path}")),
            parent: None,
            created_at: db.created_at,
        }
    }
}

impl StudentResponse {
    pub fn with_parent(mut self, parent: ParentDBResponse) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListStudentsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only students in this class, e.g. "Class 3"
    pub student_class: Option<String>,
    pub section: Option<String>,
    /// Case-insensitive match on name or student id
    pub search: Option<String>,
}
