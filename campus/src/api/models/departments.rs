//! API models for departments, subjects and holidays.

use super::{pagination::Pagination, users::UserSummary};
use crate::{
    db::models::departments::{DepartmentDBResponse, HolidayDBResponse, SubjectDBResponse},
    types::{DepartmentId, HolidayId, SubjectId, UserId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepartmentCreate {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    /// Must be a teacher
    #[schema(value_type = Option<String>, format = "uuid")]
    pub head_id: Option<UserId>,
}

/// Nullable fields accept `null` to clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DepartmentUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub head_id: Option<Option<UserId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepartmentResponse {
    pub id: DepartmentId,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub head: Option<UserSummary>,
}

impl DepartmentResponse {
    pub fn new(db: DepartmentDBResponse, head: Option<UserSummary>) -> Self {
        Self {
            id: db.id,
            name: db.name,
            code: db.code,
            description: db.description,
            head,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubjectCreate {
    pub name: String,
    pub code: String,
    pub department_id: DepartmentId,
    pub description: Option<String>,
    /// Every id must belong to a teacher
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub teacher_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubjectUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    pub department_id: Option<DepartmentId>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    /// Replaces the whole set when present
    #[schema(value_type = Option<Vec<String>>)]
    pub teacher_ids: Option<Vec<UserId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubjectResponse {
    pub id: SubjectId,
    pub name: String,
    pub code: String,
    pub department_id: DepartmentId,
    pub description: Option<String>,
    #[schema(value_type = Vec<String>)]
    pub teacher_ids: Vec<UserId>,
}

impl SubjectResponse {
    pub fn new(db: SubjectDBResponse, teacher_ids: Vec<UserId>) -> Self {
        Self {
            id: db.id,
            name: db.name,
            code: db.code,
            department_id: db.department_id,
            description: db.description,
            teacher_ids,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListSubjectsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub teacher_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HolidayCreate {
    pub name: String,
    pub date: NaiveDate,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct HolidayUpdate {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HolidayResponse {
    pub id: HolidayId,
    pub name: String,
    pub date: NaiveDate,
    pub description: Option<String>,
}

impl From<HolidayDBResponse> for HolidayResponse {
    fn from(db: HolidayDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            date: db.date,
            description: db.description,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListHolidaysQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only holidays from today onwards
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub upcoming: Option<bool>,
}
