//! The caller's notifications. Every route here only ever touches the caller's own rows; an id
//! belonging to someone else is reported as not found.

use crate::{
    AppState,
    api::models::{
        notifications::{CountResponse, ListNotificationsQuery, NotificationResponse, StatusResponse},
        pagination::{PaginatedResponse, Pagination},
        users::CurrentUser,
    },
    db::{handlers::Notifications, models::notifications::NotificationFilter},
    errors::Error,
    types::NotificationId,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};

fn not_found(id: NotificationId) -> Error {
    Error::NotFound {
        resource: "Notification".to_string(),
        id: id.to_string(),
    }
}

async fn page(state: &AppState, user: &CurrentUser, pagination: &Pagination, unread_only: bool) -> Result<PaginatedResponse<NotificationResponse>, Error> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut notifications = Notifications::new(&mut conn);
    let rows = notifications
        .list(&NotificationFilter {
            user_id: user.id,
            unread_only,
            skip,
            limit,
        })
        .await?;
    let total = notifications.count(user.id, unread_only).await?;
    Ok(PaginatedResponse::new(
        rows.into_iter().map(NotificationResponse::from).collect(),
        total,
        skip,
        limit,
    ))
}

#[utoipa::path(
    get,
    path = "/notifications",
    tag = "notifications",
    summary = "List notifications",
    params(ListNotificationsQuery),
    responses((status = 200, description = "Newest first", body = PaginatedResponse<NotificationResponse>)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_notifications(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<PaginatedResponse<NotificationResponse>>, Error> {
    let unread_only = query.unread_only.unwrap_or(false);
    Ok(Json(page(&state, &current_user, &query.pagination, unread_only).await?))
}

#[utoipa::path(
    get,
    path = "/notifications/unread",
    tag = "notifications",
    summary = "List unread notifications",
    params(Pagination),
    responses((status = 200, description = "Unread, newest first", body = PaginatedResponse<NotificationResponse>)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_unread_notifications(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<NotificationResponse>>, Error> {
    Ok(Json(page(&state, &current_user, &pagination, true).await?))
}

#[utoipa::path(
    get,
    path = "/notifications/unread/count",
    tag = "notifications",
    summary = "Unread count",
    responses((status = 200, description = "`{ \"count\": n }`", body = CountResponse)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn unread_count(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<CountResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let count = Notifications::new(&mut conn).count(current_user.id, true).await?;
    Ok(Json(CountResponse { count }))
}

#[utoipa::path(
    post,
    path = "/notifications/read-all",
    tag = "notifications",
    summary = "Mark all read",
    responses((status = 200, description = "`{ \"status\": \"success\" }`", body = StatusResponse)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn mark_all_read(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<StatusResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Notifications::new(&mut conn).mark_all_read(current_user.id).await?;
    Ok(Json(StatusResponse::success()))
}

#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    tag = "notifications",
    summary = "Mark read",
    params(("id" = uuid::Uuid, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "The notification, now read", body = NotificationResponse),
        (status = 404, description = "No such notification for this user"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn mark_read(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<NotificationId>,
) -> Result<Json<NotificationResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let notification = Notifications::new(&mut conn)
        .mark_read(current_user.id, id)
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(NotificationResponse::from(notification)))
}

#[utoipa::path(
    delete,
    path = "/notifications/{id}",
    tag = "notifications",
    summary = "Delete notification",
    params(("id" = uuid::Uuid, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "`{ \"status\": \"success\" }`", body = StatusResponse),
        (status = 404, description = "No such notification for this user"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_notification(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<NotificationId>,
) -> Result<Json<StatusResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Notifications::new(&mut conn).delete_for_user(current_user.id, id).await? {
        Ok(Json(StatusResponse::success()))
    } else {
        Err(not_found(id))
    }
}

#[utoipa::path(
    delete,
    path = "/notifications",
    tag = "notifications",
    summary = "Clear all",
    description = "Deletes every notification the caller has. `count` is what remains, always 0.",
    responses((status = 200, description = "`{ \"status\": \"success\", \"count\": 0 }`", body = StatusResponse)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn clear_notifications(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<StatusResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut notifications = Notifications::new(&mut conn);
    notifications.clear_for_user(current_user.id).await?;
    let remaining = notifications.count(current_user.id, false).await?;
    Ok(Json(StatusResponse::success_with_count(remaining)))
}
