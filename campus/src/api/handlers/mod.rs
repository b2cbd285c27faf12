//! HTTP request handlers for the JSON API.
//!
//! Handlers are grouped by resource:
//!
//! - [`auth`]: registration, login/logout, password reset and change
//! - [`users`]: the current user's profile, and teacher management
//! - [`dashboard`]: per-role summaries
//! - [`students`]: student records and their parents
//! - [`relationships`]: which teacher teaches which student what
//! - [`timetable`]: the weekly timetable and its calendar view
//! - [`exams`]: exam scheduling, with per-teacher daily limits
//! - [`notifications`]: the caller's notifications
//! - [`messages`]: internal messaging with attachments
//! - [`departments`]: departments, subjects and holidays
//!
//! Role checks go through the extractors in [`crate::auth::permissions`]; errors are
//! [`crate::errors::Error`], which renders as a JSON error body.

use crate::{
    errors::Error,
    types::{is_valid_class, is_valid_color, is_valid_section},
};

pub mod auth;
pub mod dashboard;
pub mod departments;
pub mod exams;
pub mod messages;
pub mod notifications;
pub mod relationships;
pub mod students;
pub mod timetable;
pub mod users;

pub(crate) fn check_class_and_section(class: &str, section: &str) -> Result<(), Error> {
    if !is_valid_class(class) {
        return Err(Error::BadRequest {
            message: format!("Invalid class: {class}"),
        });
    }
    if !is_valid_section(section) {
        return Err(Error::BadRequest {
            message: format!("Invalid section: {section}"),
        });
    }
    Ok(())
}

pub(crate) fn check_color(color: &str) -> Result<(), Error> {
    if is_valid_color(color) {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: format!("Invalid color: {color}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_and_section_checks() {
        assert!(check_class_and_section("Class 12", "D").is_ok());
        assert!(check_class_and_section("Class 0", "A").is_err());
        assert!(check_class_and_section("Class 1", "E").is_err());
        assert!(check_color("#33FFF5").is_ok());
        assert!(check_color("red").is_err());
    }
}
