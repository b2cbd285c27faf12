//! Authentication and authorization.
//!
//! # Authentication
//!
//! - **Session cookie**: `POST /api/v1/authentication/login` (or the `/login` form) issues a
//!   signed JWT in an HTTP-only cookie. The token only names the user; role flags are reloaded
//!   from the database on each request.
//! - **Trusted proxy header**: when `auth.proxy_header.enabled`, an upstream identity proxy
//!   passes the user's email in a header. Unknown emails become student accounts.
//!
//! # Authorization
//!
//! Every user carries three independent flags: `is_student`, `is_teacher`, `is_admin`. Handlers
//! declare what they need through the extractors in [`permissions`]; the HTML role areas are
//! guarded by [`middleware::role_access_middleware`].
//!
//! # Modules
//!
//! - [`current_user`]: the [`CurrentUser`](crate::api::models::users::CurrentUser) extractor
//! - [`middleware`]: role-access guard for `/student`, `/teacher` and `/admin` pages
//! - [`password`]: Argon2 hashing and password rules
//! - [`permissions`]: role-guard extractors
//! - [`session`]: JWT session tokens
//! - [`utils`]: cookie helpers

pub mod current_user;
pub mod middleware;
pub mod password;
pub mod permissions;
pub mod session;
pub mod utils;
