//! Database record models matching table schemas.
//!
//! Row types derive `sqlx::FromRow` and are named `*DBResponse`; inputs are `*CreateDBRequest` /
//! `*UpdateDBRequest`. They are kept separate from the API models in [`crate::api::models`] so
//! the storage and wire representations can change independently.

pub mod departments;
pub mod exams;
pub mod messages;
pub mod notifications;
pub mod password_reset_tokens;
pub mod relationships;
pub mod students;
pub mod timetable;
pub mod users;
