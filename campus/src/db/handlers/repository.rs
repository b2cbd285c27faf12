//! The CRUD shape shared by the school record repositories.
//!
//! Implementors borrow a `&mut PgConnection`, so the same repository runs on a pooled connection
//! or inside a handler's transaction. Operations that don't fit this shape (slug lookups, exam
//! counts per teacher, notification fan-out) live as inherent methods on the repository.

use std::collections::HashMap;

use crate::db::errors::Result;

#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;

    /// Partial update; `None` fields are left alone
    type UpdateRequest;

    type Response;

    /// `UserId` for users, sequence ids for everything else
    type Id: Send + Sync;

    /// Filter plus `skip`/`limit` for [`Repository::list`]
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// Fetch many rows in one query, keyed by id. Missing ids are absent from the map.
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// `Ok(false)` when no row had that id
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    /// Errors with `DbError::NotFound` when no row had that id
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;
}
