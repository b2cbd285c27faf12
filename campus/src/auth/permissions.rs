//! Role guards.
//!
//! Handlers take one of these extractors instead of checking role flags by hand:
//!
//! | Extractor | Admits |
//! |---|---|
//! | [`RequireAdmin`] | `is_admin` |
//! | [`RequireTeacher`] | `is_teacher` |
//! | [`RequireStaff`] | `is_teacher` or `is_admin` |
//! | [`RequireStudent`] | `is_student` |
//!
//! Rejections are 403 with no detail beyond the generic message.

use axum::{
    extract::FromRequestParts,
    http::{Method, request::Parts},
};
use tracing::info;

use crate::{
    AppState,
    api::models::users::{CurrentUser, UserRole},
    errors::Error,
    types::{Operation, Resource},
};

/// Best-effort description of what a rejected request was trying to do, for the logs.
pub fn describe_request(method: &Method, path: &str) -> (Operation, Resource) {
    let operation = match *method {
        Method::POST => Operation::Create,
        Method::PUT | Method::PATCH => Operation::Update,
        Method::DELETE => Operation::Delete,
        _ => Operation::Read,
    };

    let path = path.trim_start_matches("/api/v1");
    let resource = match path.trim_start_matches('/').split('/').next().unwrap_or_default() {
        "teachers" => Resource::Teachers,
        "students" => Resource::Students,
        "relationships" => Resource::Relationships,
        "timetable" => Resource::Timetable,
        "exams" => Resource::Exams,
        "notifications" => Resource::Notifications,
        "messages" => Resource::Messages,
        "departments" => Resource::Departments,
        "subjects" => Resource::Subjects,
        "holidays" => Resource::Holidays,
        "student" => Resource::StudentDashboard,
        "teacher" => Resource::TeacherDashboard,
        "admin" => Resource::AdminDashboard,
        _ => Resource::Users,
    };
    (operation, resource)
}

pub fn forbidden(parts: &Parts) -> Error {
    let (action, resource) = describe_request(&parts.method, parts.uri.path());
    Error::InsufficientPermissions { action, resource }
}

async fn require(parts: &mut Parts, state: &AppState, admits: impl Fn(&CurrentUser) -> bool) -> Result<CurrentUser, Error> {
    let user = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(parts, state).await?;
    if admits(&user) {
        Ok(user)
    } else {
        info!(user_id = %user.id, path = %parts.uri.path(), "Role check failed");
        Err(forbidden(parts))
    }
}

macro_rules! role_guard {
    ($(#[$doc:meta])* $name:ident, $admits:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name(pub CurrentUser);

        impl FromRequestParts<AppState> for $name {
            type Rejection = Error;

            async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
                require(parts, state, $admits).await.map($name)
            }
        }
    };
}

role_guard!(
    /// Admits admins only.
    RequireAdmin,
    |u: &CurrentUser| u.has_role(UserRole::Admin)
);
role_guard!(
    /// Admits teachers only.
    RequireTeacher,
    |u: &CurrentUser| u.has_role(UserRole::Teacher)
);
role_guard!(
    /// Admits teachers and admins.
    RequireStaff,
    |u: &CurrentUser| u.is_staff()
);
role_guard!(
    /// Admits students only.
    RequireStudent,
    |u: &CurrentUser| u.has_role(UserRole::Student)
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::session::create_session_token,
        db::models::users::RoleFlag,
        test_utils::{create_test_config, create_test_state, create_test_user},
    };
    use axum::http::{Request, StatusCode, header};
    use sqlx::PgPool;

    #[test]
    fn test_describe_request() {
        assert_eq!(
            describe_request(&Method::DELETE, "/api/v1/students/jane-doe-s1"),
            (Operation::Delete, Resource::Students)
        );
        assert_eq!(
            describe_request(&Method::GET, "/admin/dashboard"),
            (Operation::Read, Resource::AdminDashboard)
        );
        assert_eq!(describe_request(&Method::PATCH, "/api/v1/exams/4"), (Operation::Update, Resource::Exams));
    }

    #[sqlx::test]
    async fn test_guards_follow_role_flags(pool: PgPool) {
        let state = create_test_state(pool.clone(), create_test_config());
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let token = create_session_token(&CurrentUser::from(teacher), &state.config).unwrap();
        let parts = || {
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/departments")
                .header(header::COOKIE, format!("campus_session={token}"))
                .body(())
                .unwrap()
                .into_parts()
                .0
        };

        assert!(RequireStaff::from_request_parts(&mut parts(), &state).await.is_ok());
        assert!(RequireTeacher::from_request_parts(&mut parts(), &state).await.is_ok());

        let err = RequireAdmin::from_request_parts(&mut parts(), &state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(matches!(
            err,
            Error::InsufficientPermissions {
                action: Operation::Create,
                resource: Resource::Departments
            }
        ));
        assert!(RequireStudent::from_request_parts(&mut parts(), &state).await.is_err());
    }
}
