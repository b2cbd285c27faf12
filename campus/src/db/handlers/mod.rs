//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` (a pooled connection or an open transaction) and
//! exposes strongly-typed queries over one table or a small group of tables. Repositories that
//! map cleanly onto create/read/update/delete implement [`Repository`]; the rest expose only the
//! operations their callers need.
//!
//! ```ignore
//! use campus::db::handlers::{Repository, Users};
//!
//! let mut tx = pool.begin().await?;
//! let user = Users::new(&mut tx).get_user_by_email("teacher@school.test").await?;
//! tx.commit().await?;
//! ```

pub mod departments;
pub mod exams;
pub mod messages;
pub mod notifications;
pub mod password_reset_tokens;
pub mod relationships;
pub mod repository;
pub mod students;
pub mod timetable;
pub mod users;

pub use departments::{Departments, Holidays, Subjects};
pub use exams::Exams;
pub use messages::Messages;
pub use notifications::Notifications;
pub use password_reset_tokens::PasswordResetTokens;
pub use relationships::Relationships;
pub use repository::Repository;
pub use students::{Parents, Students};
pub use timetable::TimetableEntries;
pub use users::Users;
