//! Database models for users.

use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

/// A row of the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_student: bool,
    pub is_teacher: bool,
    pub is_admin: bool,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
    pub bio: Option<String>,
    pub joining_date: Option<NaiveDate>,
    pub profile_picture: Option<String>,
    pub auth_source: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDBResponse {
    pub fn has_role(&self) -> bool {
        self.is_student || self.is_teacher || self.is_admin
    }
}

/// Database request for creating a new user
#[derive(Debug, Clone, Default)]
pub struct UserCreateDBRequest {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_student: bool,
    pub is_teacher: bool,
    pub is_admin: bool,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
    pub joining_date: Option<NaiveDate>,
    pub auth_source: String,
}

/// Database request for updating a user. `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub password_hash: Option<String>,
}

/// Which role flag a listing is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFlag {
    Student,
    Teacher,
    Admin,
}

impl RoleFlag {
    pub(crate) fn column(self) -> &'static str {
        match self {
            RoleFlag::Student => "is_student",
            RoleFlag::Teacher => "is_teacher",
            RoleFlag::Admin => "is_admin",
        }
    }
}

/// Filter for listing users
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub role: Option<RoleFlag>,
    /// Case-insensitive substring match on names, username and email
    pub search: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            role: None,
            search: None,
            skip,
            limit,
        }
    }

    pub fn with_role(mut self, role: RoleFlag) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_search(mut self, search: Option<String>) -> Self {
        self.search = search.filter(|s| !s.trim().is_empty());
        self
    }
}
