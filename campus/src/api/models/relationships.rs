use super::{pagination::Pagination, users::UserSummary};
use crate::types::{RelationshipId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Assign a teacher to a student for a subject.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RelationshipCreate {
    #[schema(value_type = String, format = "uuid")]
    pub student_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub teacher_id: UserId,
    pub subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RelationshipResponse {
    pub id: RelationshipId,
    pub student: UserSummary,
    pub teacher: UserSummary,
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListRelationshipsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub student_id: Option<UserId>,
    #[param(value_type = Option<String>, format = "uuid")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub teacher_id: Option<UserId>,
}

/// One of the caller's teachers, as listed on the student "my teachers" page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssignedTeacher {
    pub teacher: UserSummary,
    pub subject: String,
    pub department: Option<String>,
    pub phone: Option<String>,
}
