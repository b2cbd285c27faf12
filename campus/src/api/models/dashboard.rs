//! Role dashboard payloads, shared by the JSON API and the HTML pages.

use super::{notifications::NotificationResponse, timetable::TimetableEntryResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StudentDashboard {
    /// Unread notifications, newest first
    pub notifications: Vec<NotificationResponse>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TeacherDashboard {
    pub notifications: Vec<NotificationResponse>,
    pub unread_count: i64,
    /// Distinct class and section pairs on the teacher's timetable
    pub classes_teaching: i64,
    /// Distinct students assigned to the teacher
    pub students_taught: i64,
    /// First five timetable entries, by day then start time
    pub upcoming_classes: Vec<TimetableEntryResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminDashboard {
    pub notifications: Vec<NotificationResponse>,
    pub unread_count: i64,
    pub total_students: i64,
    pub total_teachers: i64,
    pub total_departments: i64,
    /// Exams from today onwards
    pub upcoming_exams: i64,
}
