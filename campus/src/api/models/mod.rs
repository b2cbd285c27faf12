//! API request and response data models.
//!
//! These types define the JSON contract of `/api/v1`. They are kept apart from the row types in
//! [`crate::db::models`] so storage and wire formats can change independently, and every public
//! type carries a `utoipa` schema for the generated OpenAPI document.
//!
//! - [`auth`]: login, registration and password management payloads
//! - [`users`]: the current user, profiles and teachers
//! - [`students`], [`relationships`]: student records and teacher assignments
//! - [`timetable`], [`exams`]: scheduling records
//! - [`notifications`], [`messages`]: the notification feed and internal messaging
//! - [`departments`]: departments, subjects and holidays
//! - [`dashboard`]: per-role dashboard summaries
//! - [`pagination`]: shared `skip`/`limit` parameters

pub mod auth;
pub mod dashboard;
pub mod departments;
pub mod exams;
pub mod messages;
pub mod notifications;
pub mod pagination;
pub mod relationships;
pub mod students;
pub mod timetable;
pub mod users;
