//! Per-role dashboard summaries.
//!
//! The loaders here are also what the server-rendered dashboards display.

use crate::{
    AppState,
    api::models::{
        dashboard::{AdminDashboard, StudentDashboard, TeacherDashboard},
        notifications::NotificationResponse,
        pagination::MAX_LIMIT,
        timetable::TimetableEntryResponse,
        users::CurrentUser,
    },
    auth::permissions::{RequireAdmin, RequireStudent, RequireTeacher},
    db::{
        handlers::{Departments, Exams, Notifications, Relationships, Students, TimetableEntries, Users, repository::Repository},
        models::{
            exams::ExamFilter,
            notifications::NotificationFilter,
            students::StudentFilter,
            timetable::TimetableFilter,
            users::{RoleFlag, UserFilter},
        },
    },
    errors::Error,
};
use axum::{extract::State, response::Json};
use chrono::Utc;
use sqlx::PgConnection;

/// Upcoming classes shown on the teacher dashboard.
const UPCOMING_CLASSES: i64 = 5;

async fn unread_notifications(conn: &mut PgConnection, user: &CurrentUser) -> Result<(Vec<NotificationResponse>, i64), Error> {
    let mut notifications = Notifications::new(conn);
    let unread = notifications
        .list(&NotificationFilter {
            user_id: user.id,
            unread_only: true,
            skip: 0,
            limit: MAX_LIMIT,
        })
        .await?;
    let count = notifications.count(user.id, true).await?;
    Ok((unread.into_iter().map(NotificationResponse::from).collect(), count))
}

pub(crate) async fn load_student_dashboard(state: &AppState, user: &CurrentUser) -> Result<StudentDashboard, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let (notifications, unread_count) = unread_notifications(&mut conn, user).await?;
    Ok(StudentDashboard {
        notifications,
        unread_count,
    })
}

pub(crate) async fn load_teacher_dashboard(state: &AppState, user: &CurrentUser) -> Result<TeacherDashboard, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let (notifications, unread_count) = unread_notifications(&mut conn, user).await?;

    let mut timetable = TimetableEntries::new(&mut conn);
    let classes_teaching = timetable.count_classes_for_teacher(user.id).await?;
    let upcoming_classes = timetable
        .list(&TimetableFilter {
            teacher_id: Some(user.id),
            skip: 0,
            limit: UPCOMING_CLASSES,
            ..Default::default()
        })
        .await?;
    let students_taught = Relationships::new(&mut conn).count_students_for_teacher(user.id).await?;

    Ok(TeacherDashboard {
        notifications,
        unread_count,
        classes_teaching,
        students_taught,
        upcoming_classes: upcoming_classes.into_iter().map(TimetableEntryResponse::from).collect(),
    })
}

pub(crate) async fn load_admin_dashboard(state: &AppState, user: &CurrentUser) -> Result<AdminDashboard, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let (notifications, unread_count) = unread_notifications(&mut conn, user).await?;

    let total_students = Students::new(&mut conn).count(&StudentFilter::default()).await?;
    let total_teachers = Users::new(&mut conn)
        .count(&UserFilter::new(0, 1).with_role(RoleFlag::Teacher))
        .await?;
    let total_departments = Departments::new(&mut conn).count().await?;
    let upcoming_exams = Exams::new(&mut conn)
        .count(&ExamFilter {
            from_date: Some(Utc::now().date_naive()),
            ..Default::default()
        })
        .await?;

    Ok(AdminDashboard {
        notifications,
        unread_count,
        total_students,
        total_teachers,
        total_departments,
        upcoming_exams,
    })
}

#[utoipa::path(
    get,
    path = "/dashboard/student",
    tag = "dashboard",
    summary = "Student dashboard",
    responses(
        (status = 200, description = "Unread notifications and their count", body = StudentDashboard),
        (status = 403, description = "Forbidden - student access required"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn student_dashboard(State(state): State<AppState>, RequireStudent(user): RequireStudent) -> Result<Json<StudentDashboard>, Error> {
    Ok(Json(load_student_dashboard(&state, &user).await?))
}

#[utoipa::path(
    get,
    path = "/dashboard/teacher",
    tag = "dashboard",
    summary = "Teacher dashboard",
    responses(
        (status = 200, description = "Notifications, class and student counts, upcoming classes", body = TeacherDashboard),
        (status = 403, description = "Forbidden - teacher access required"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn teacher_dashboard(State(state): State<AppState>, RequireTeacher(user): RequireTeacher) -> Result<Json<TeacherDashboard>, Error> {
    Ok(Json(load_teacher_dashboard(&state, &user).await?))
}

#[utoipa::path(
    get,
    path = "/dashboard/admin",
    tag = "dashboard",
    summary = "Admin dashboard",
    responses(
        (status = 200, description = "Notifications and school-wide counts", body = AdminDashboard),
        (status = 403, description = "Forbidden - admin access required"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn admin_dashboard(State(state): State<AppState>, RequireAdmin(user): RequireAdmin) -> Result<Json<AdminDashboard>, Error> {
    Ok(Json(load_admin_dashboard(&state, &user).await?))
}
