//! HTTP API: JSON handlers and their request/response models.
//!
//! - **[`handlers`]**: Axum route handlers, mounted under `/api/v1`
//! - **[`models`]**: Request/response data structures
//!
//! Every endpoint is annotated with `utoipa`; the rendered reference lives at `/docs`.

pub mod handlers;
pub mod models;
