//! Common type definitions and access-control vocabulary.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, StudentId, etc.)
//! - The [`Resource`] and [`Operation`] enums used when reporting authorization failures
//! - The fixed class, section and colour choices shared by students, timetables and exams
//!
//! # ID Types
//!
//! Users, notifications and message attachments are keyed by UUID. The remaining school records
//! use database sequences, so their IDs are `i64`.
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use std::fmt;
use uuid::Uuid;

pub type UserId = Uuid;
pub type NotificationId = Uuid;
pub type AttachmentId = Uuid;
pub type StudentId = i64;
pub type ParentId = i64;
pub type TimetableEntryId = i64;
pub type ExamId = i64;
pub type MessageId = i64;
pub type DepartmentId = i64;
pub type SubjectId = i64;
pub type HolidayId = i64;
pub type RelationshipId = i64;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Teachers,
    Students,
    Relationships,
    Timetable,
    Exams,
    Notifications,
    Messages,
    Departments,
    Subjects,
    Holidays,
    StudentDashboard,
    TeacherDashboard,
    AdminDashboard,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Read => write!(f, "read"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Users => "users",
            Resource::Teachers => "teachers",
            Resource::Students => "students",
            Resource::Relationships => "student-teacher relationships",
            Resource::Timetable => "timetable entries",
            Resource::Exams => "exams",
            Resource::Notifications => "notifications",
            Resource::Messages => "messages",
            Resource::Departments => "departments",
            Resource::Subjects => "subjects",
            Resource::Holidays => "holidays",
            Resource::StudentDashboard => "the student dashboard",
            Resource::TeacherDashboard => "the teacher dashboard",
            Resource::AdminDashboard => "the admin dashboard",
        };
        f.write_str(name)
    }
}

/// Classes a student, timetable entry or exam can belong to.
pub const CLASS_CHOICES: [&str; 12] = [
    "Class 1", "Class 2", "Class 3", "Class 4", "Class 5", "Class 6", "Class 7", "Class 8", "Class 9", "Class 10", "Class 11", "Class 12",
];

pub const SECTION_CHOICES: [&str; 4] = ["A", "B", "C", "D"];

/// Timetable colour palette; the third entry is the default.
pub const COLOR_CHOICES: [&str; 6] = ["#FF5733", "#33FF57", "#3357FF", "#F333FF", "#FF33F3", "#33FFF5"];

pub const DEFAULT_COLOR: &str = "#3357FF";
pub const DEFAULT_CLASS: &str = "Class 1";
pub const DEFAULT_SECTION: &str = "A";

pub fn is_valid_class(class: &str) -> bool {
    CLASS_CHOICES.contains(&class)
}

pub fn is_valid_section(section: &str) -> bool {
    SECTION_CHOICES.contains(&section)
}

pub fn is_valid_color(color: &str) -> bool {
    COLOR_CHOICES.iter().any(|c| c.eq_ignore_ascii_case(color))
}
