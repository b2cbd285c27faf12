use super::{pagination::Pagination, users::UserSummary};
use crate::{
    db::models::exams::ExamDBResponse,
    types::{ExamId, UserId},
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExamCreate {
    pub name: String,
    pub subject: String,
    pub date: NaiveDate,
    #[schema(value_type = String, example = "10:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "12:00:00")]
    pub end_time: NaiveTime,
    pub student_class: String,
    /// Leave empty for an exam that covers every section of the class
    pub section: Option<String>,
    /// Required for admins; teachers always create exams for themselves
    #[schema(value_type = Option<String>, format = "uuid")]
    pub teacher_id: Option<UserId>,
    pub room: String,
    /// Defaults to 100
    pub max_marks: Option<i32>,
    pub description: Option<String>,
}

/// `section` and `description` accept `null` to clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ExamUpdate {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub date: Option<NaiveDate>,
    #[schema(value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    pub student_class: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub section: Option<Option<String>>,
    /// Admin only
    #[schema(value_type = Option<String>, format = "uuid")]
    pub teacher_id: Option<UserId>,
    pub room: Option<String>,
    pub max_marks: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExamResponse {
    pub id: ExamId,
    pub name: String,
    pub subject: String,
    pub date: NaiveDate,
    #[schema(value_type = String)]
    pub start_time: NaiveTime,
    #[schema(value_type = String)]
    pub end_time: NaiveTime,
    pub student_class: String,
    pub section: Option<String>,
    #[schema(value_type = String, format = "uuid")]
    pub teacher_id: UserId,
    pub teacher: Option<UserSummary>,
    pub room: String,
    pub max_marks: i32,
    pub description: Option<String>,
}

impl From<ExamDBResponse> for ExamResponse {
    fn from(db: ExamDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            subject: db.subject,
            date: db.date,
            start_time: db.start_time,
            end_time: db.end_time,
            student_class: db.student_class,
            section: db.section,
            teacher_id: db.teacher_id,
            teacher: None,
            room: db.room,
            max_marks: db.max_marks,
            description: db.description,
        }
    }
}

/// Returned from create so the caller can see how many students were told about the exam.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExamCreated {
    #[serde(flatten)]
    pub exam: ExamResponse,
    pub notified_students: u64,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListExamsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only exams on or after this date
    pub from_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let update: ExamUpdate = serde_json::from_str(r#"{"section": null}"#).unwrap();
        assert_eq!(update.section, Some(None));
        assert_eq!(update.description, None);

        let update: ExamUpdate = serde_json::from_str(r#"{"section": "B", "room": "Hall 2"}"#).unwrap();
        assert_eq!(update.section, Some(Some("B".to_string())));
        assert_eq!(update.room.as_deref(), Some("Hall 2"));
    }
}
