//! OpenAPI document for the JSON API under `/api/v1`.
//!
//! Served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{api, db};

/// Session cookie issued by the login endpoints.
struct SessionCookieAddon;

impl Modify for SessionCookieAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "session_cookie".to_string(),
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                "campus_session",
                "Signed session token set by `POST /authentication/login` or the `/login` form.",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Campus API",
        description = "School management: students, teachers, timetables, exams, messaging and notifications."
    ),
    servers(
        (url = "/api/v1", description = "JSON API")
    ),
    modifiers(&SessionCookieAddon),
    paths(
        api::handlers::auth::get_registration_info,
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::request_password_reset,
        api::handlers::auth::confirm_password_reset,
        api::handlers::auth::change_password,
        api::handlers::users::get_current_user,
        api::handlers::users::update_current_user,
        api::handlers::users::upload_profile_picture,
        api::handlers::users::list_my_teachers,
        api::handlers::users::list_teachers,
        api::handlers::users::create_teacher,
        api::handlers::users::get_teacher,
        api::handlers::users::update_teacher,
        api::handlers::dashboard::student_dashboard,
        api::handlers::dashboard::teacher_dashboard,
        api::handlers::dashboard::admin_dashboard,
        api::handlers::students::list_students,
        api::handlers::students::create_student,
        api::handlers::students::get_student,
        api::handlers::students::update_student,
        api::handlers::students::delete_student,
        api::handlers::students::upload_student_image,
        api::handlers::relationships::list_relationships,
        api::handlers::relationships::create_relationship,
        api::handlers::relationships::delete_relationship,
        api::handlers::timetable::list_timetable,
        api::handlers::timetable::timetable_calendar,
        api::handlers::timetable::timetable_choices,
        api::handlers::timetable::create_timetable_entry,
        api::handlers::timetable::update_timetable_entry,
        api::handlers::timetable::delete_timetable_entry,
        api::handlers::exams::list_exams,
        api::handlers::exams::get_exam,
        api::handlers::exams::create_exam,
        api::handlers::exams::update_exam,
        api::handlers::exams::delete_exam,
        api::handlers::notifications::list_notifications,
        api::handlers::notifications::list_unread_notifications,
        api::handlers::notifications::unread_count,
        api::handlers::notifications::mark_all_read,
        api::handlers::notifications::mark_read,
        api::handlers::notifications::delete_notification,
        api::handlers::notifications::clear_notifications,
        api::handlers::messages::inbox,
        api::handlers::messages::sent,
        api::handlers::messages::list_all_messages,
        api::handlers::messages::send,
        api::handlers::messages::get_message,
        api::handlers::messages::delete_message,
        api::handlers::messages::download_attachment,
        api::handlers::departments::list_departments,
        api::handlers::departments::get_department,
        api::handlers::departments::create_department,
        api::handlers::departments::update_department,
        api::handlers::departments::delete_department,
        api::handlers::departments::list_subjects,
        api::handlers::departments::create_subject,
        api::handlers::departments::update_subject,
        api::handlers::departments::delete_subject,
        api::handlers::departments::list_holidays,
        api::handlers::departments::create_holiday,
        api::handlers::departments::update_holiday,
        api::handlers::departments::delete_holiday,
    ),
    components(
        schemas(
            api::models::auth::RegistrationInfo,
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::AuthResponse,
            api::models::auth::AuthSuccessResponse,
            api::models::auth::PasswordResetRequest,
            api::models::auth::PasswordResetConfirmRequest,
            api::models::auth::PasswordResetResponse,
            api::models::auth::ChangePasswordRequest,
            api::models::users::UserRole,
            api::models::users::UserResponse,
            api::models::users::UserSummary,
            api::models::users::ProfileUpdate,
            api::models::users::TeacherCreate,
            api::models::users::TeacherUpdate,
            api::models::students::ParentFields,
            api::models::students::ParentResponse,
            api::models::students::StudentCreate,
            api::models::students::StudentUpdate,
            api::models::students::StudentResponse,
            api::models::relationships::RelationshipCreate,
            api::models::relationships::RelationshipResponse,
            api::models::relationships::AssignedTeacher,
            api::models::timetable::TimetableEntryCreate,
            api::models::timetable::TimetableEntryUpdate,
            api::models::timetable::TimetableEntryResponse,
            api::models::timetable::TimetableChoices,
            api::models::timetable::CalendarSlot,
            api::models::timetable::CalendarResponse,
            api::models::exams::ExamCreate,
            api::models::exams::ExamUpdate,
            api::models::exams::ExamResponse,
            api::models::exams::ExamCreated,
            api::models::notifications::NotificationResponse,
            api::models::notifications::CountResponse,
            api::models::notifications::StatusResponse,
            api::models::messages::MessageCompose,
            api::models::messages::AttachmentResponse,
            api::models::messages::MessageResponse,
            api::models::messages::RecipientResponse,
            api::models::messages::MessageDetail,
            api::models::messages::InboxResponse,
            api::models::messages::DeleteScope,
            api::models::messages::MessageDeleted,
            api::models::departments::DepartmentCreate,
            api::models::departments::DepartmentUpdate,
            api::models::departments::DepartmentResponse,
            api::models::departments::SubjectCreate,
            api::models::departments::SubjectUpdate,
            api::models::departments::SubjectResponse,
            api::models::departments::HolidayCreate,
            api::models::departments::HolidayUpdate,
            api::models::departments::HolidayResponse,
            api::models::dashboard::StudentDashboard,
            api::models::dashboard::TeacherDashboard,
            api::models::dashboard::AdminDashboard,
            db::models::notifications::NotificationType,
            db::models::students::Gender,
            db::models::timetable::Weekday,
        )
    ),
    tags(
        (name = "authentication", description = "Sign-up, login, logout and password management"),
        (name = "users", description = "Your own profile"),
        (name = "teachers", description = "Teacher accounts"),
        (name = "dashboard", description = "Per-role dashboard data"),
        (name = "students", description = "Student records and their parents"),
        (name = "relationships", description = "Which teacher teaches which student, and what"),
        (name = "timetable", description = "Weekly class schedule"),
        (name = "exams", description = "Exam scheduling"),
        (name = "notifications", description = "Your notification feed"),
        (name = "messages", description = "Internal messaging with attachments"),
        (name = "departments", description = "Departments"),
        (name = "subjects", description = "Subjects and who teaches them"),
        (name = "holidays", description = "School holidays"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_covers_every_area() {
        let doc = ApiDoc::openapi();
        for path in [
            "/authentication/login",
            "/students/{slug}",
            "/timetable/calendar",
            "/exams/{id}",
            "/notifications/unread/count",
            "/messages/{message_id}/attachments/{id}",
            "/holidays",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
        let schemes = &doc.components.as_ref().unwrap().security_schemes;
        assert!(schemes.contains_key("session_cookie"));
    }

    #[test]
    fn test_user_filters_are_documented_as_uuid_strings() {
        use crate::api::models::{departments::ListSubjectsQuery, relationships::ListRelationshipsQuery};
        use utoipa::PartialSchema;

        // Flattened pagination may wrap the fields in `allOf`
        fn property<'a>(schema: &'a serde_json::Value, name: &str) -> Option<&'a serde_json::Value> {
            if let Some(found) = schema.get("properties").and_then(|p| p.get(name)) {
                return Some(found);
            }
            schema.get("allOf")?.as_array()?.iter().find_map(|part| property(part, name))
        }

        let relationships = serde_json::to_value(ListRelationshipsQuery::schema()).unwrap();
        for field in ["student_id", "teacher_id"] {
            assert_eq!(property(&relationships, field).unwrap()["format"], "uuid", "{field}");
        }
        let subjects = serde_json::to_value(ListSubjectsQuery::schema()).unwrap();
        assert_eq!(property(&subjects, "teacher_id").unwrap()["format"], "uuid");

        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let params = doc["paths"]["/relationships"]["get"]["parameters"].as_array().unwrap();
        let teacher = params.iter().find(|p| p["name"] == "teacher_id").unwrap();
        assert_eq!(teacher["schema"]["format"], "uuid");
    }
}
