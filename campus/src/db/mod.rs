//! Database layer: PostgreSQL access through sqlx.
//!
//! ```text
//! api::handlers ──> db::handlers (repositories) ──> db::models (rows) ──> PostgreSQL
//! ```
//!
//! - [`handlers`]: one repository per table or table group
//! - [`models`]: row structs and create/update requests
//! - [`errors`]: [`errors::DbError`], the classification of `sqlx::Error` callers can act on
//!
//! Writes that touch more than one table (a student plus its parent, an exam plus its
//! notifications) open a transaction and build every repository from it, so the whole operation
//! commits or rolls back together:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let exam = Exams::new(&mut tx).create(&request).await?;
//! Notifications::new(&mut tx).fan_out_exam(&exam).await?;
//! tx.commit().await?;
//! ```
//!
//! Migrations live in `migrations/` and are applied through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
