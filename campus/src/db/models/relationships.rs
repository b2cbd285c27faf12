//! Database models for student-teacher assignments.

use crate::types::{RelationshipId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct RelationshipDBResponse {
    pub id: RelationshipId,
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub subject: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RelationshipCreateDBRequest {
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub subject: String,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipFilter {
    pub student_id: Option<UserId>,
    pub teacher_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}
