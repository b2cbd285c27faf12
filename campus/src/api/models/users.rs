//! API request/response models for users, teachers and profiles.

use super::pagination::Pagination;
use crate::db::models::users::UserDBResponse;
use crate::types::UserId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// The three role flags, as a single value for routing and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    pub fn dashboard_path(self) -> &'static str {
        match self {
            UserRole::Student => "/student/dashboard",
            UserRole::Teacher => "/teacher/dashboard",
            UserRole::Admin => "/admin/dashboard",
        }
    }
}

/// The authenticated caller, loaded fresh from the database on every request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_student: bool,
    pub is_teacher: bool,
    pub is_admin: bool,
}

impl CurrentUser {
    /// Highest role held, checked admin first.
    pub fn primary_role(&self) -> Option<UserRole> {
        if self.is_admin {
            Some(UserRole::Admin)
        } else if self.is_teacher {
            Some(UserRole::Teacher)
        } else if self.is_student {
            Some(UserRole::Student)
        } else {
            None
        }
    }

    pub fn has_role(&self, role: UserRole) -> bool {
        match role {
            UserRole::Student => self.is_student,
            UserRole::Teacher => self.is_teacher,
            UserRole::Admin => self.is_admin,
        }
    }

    /// Teachers and admins.
    pub fn is_staff(&self) -> bool {
        self.is_teacher || self.is_admin
    }

    /// "First Last", falling back to the username.
    pub fn display_name(&self) -> String {
        full_name(self.first_name.as_deref(), self.last_name.as_deref()).unwrap_or_else(|| self.username.clone())
    }
}

fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let name = [first, last].into_iter().flatten().map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
    (!name.is_empty()).then_some(name)
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            username: db.username,
            email: db.email,
            first_name: db.first_name,
            last_name: db.last_name,
            is_student: db.is_student,
            is_teacher: db.is_teacher,
            is_admin: db.is_admin,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: String,
    pub is_student: bool,
    pub is_teacher: bool,
    pub is_admin: bool,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
    pub bio: Option<String>,
    pub joining_date: Option<NaiveDate>,
    /// Public URL of the profile picture, if one was uploaded
    pub profile_picture_url: Option<String>,
    pub auth_source: String,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        let full_name = full_name(db.first_name.as_deref(), db.last_name.as_deref()).unwrap_or_else(|| db.username.clone());
        Self {
            id: db.id,
            full_name,
            username: db.username,
            email: db.email,
            first_name: db.first_name,
            last_name: db.last_name,
            is_student: db.is_student,
            is_teacher: db.is_teacher,
            is_admin: db.is_admin,
            phone: db.phone,
            department: db.department,
            qualification: db.qualification,
            specialization: db.specialization,
            bio: db.bio,
            joining_date: db.joining_date,
            profile_picture_url: db.profile_picture.map(|path| format!("/media/{path}")),
            auth_source: db.auth_source,
            last_login: db.last_login,
            created_at: db.created_at,
        }
    }
}

/// Short form used when a user is embedded in another resource.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub full_name: String,
    pub email: String,
}

impl From<&UserDBResponse> for UserSummary {
    fn from(db: &UserDBResponse) -> Self {
        Self {
            id: db.id,
            full_name: full_name(db.first_name.as_deref(), db.last_name.as_deref()).unwrap_or_else(|| db.username.clone()),
            email: db.email.clone(),
        }
    }
}

/// Editable fields of one's own profile. The teacher-only fields are ignored for other roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TeacherCreate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
    pub joining_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TeacherUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub qualification: Option<String>,
    pub specialization: Option<String>,
}

/// Query parameters for listing users
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListUsersQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Case-insensitive substring match on name, username or email
    pub search: Option<String>,
}
