//! Inbox, message detail and the compose form.

use super::{PageIdentity, failure, form_page, page_links, redirect_with_flash, refused, render};
use crate::{
    AppState,
    api::{
        handlers::{
            messages::{ComposeForm, all_messages, inbox_for, message_detail, remove_message, send_message, visible_with_sender},
            users::user_choices,
        },
        models::{messages::MessageResponse, pagination::Pagination, users::CurrentUser},
    },
    auth::middleware::PageUser,
    errors::Error,
    types::MessageId,
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use minijinja::context;
use tracing::instrument;

/// `GET /inbox`
#[instrument(skip_all)]
pub async fn inbox_page(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    Query(pagination): Query<Pagination>,
    headers: HeaderMap,
) -> Response {
    let (skip, limit) = pagination.params();
    match inbox_for(&state, &user, skip, limit).await {
        Ok(inbox) => {
            let (previous, next) = page_links(skip, limit, inbox.total_count);
            form_page(
                "inbox.html",
                &headers,
                context! {
                    user => PageIdentity::from(&user),
                    inbox => inbox,
                    previous => previous,
                    next => next
                },
            )
        }
        Err(e) => failure(e),
    }
}

/// `GET /inbox/{id}`: marks the message read for a recipient.
#[instrument(skip_all, fields(message_id = id))]
pub async fn message_page(State(state): State<AppState>, PageUser(user): PageUser, Path(id): Path<MessageId>, headers: HeaderMap) -> Response {
    match message_detail(&state, &user, id).await {
        Ok(message) => form_page(
            "message.html",
            &headers,
            context! {
                user => PageIdentity::from(&user),
                message => message
            },
        ),
        Err(e) => failure(e),
    }
}

/// `GET /messages/{id}`: the link stored on message notifications.
pub async fn message_link(Path(id): Path<MessageId>) -> Redirect {
    Redirect::to(&format!("/inbox/{id}"))
}

async fn compose_form(state: &AppState, user: &CurrentUser, headers: &HeaderMap, action: String, parent: Option<MessageResponse>) -> Response {
    match user_choices(state, None).await {
        Ok(mut recipients) => {
            recipients.retain(|r| r.id != user.id);
            form_page(
                "compose.html",
                headers,
                context! {
                    user => PageIdentity::from(user),
                    action => action,
                    parent => parent,
                    recipients => recipients
                },
            )
        }
        Err(e) => failure(e),
    }
}

/// `GET /inbox/compose`
#[instrument(skip_all)]
pub async fn compose_page(State(state): State<AppState>, PageUser(user): PageUser, headers: HeaderMap) -> Response {
    compose_form(&state, &user, &headers, "/inbox/compose".to_string(), None).await
}

/// `GET /inbox/compose/{reply_to}`: the parent's sender is preselected and the subject prefilled.
#[instrument(skip_all, fields(message_id = reply_to))]
pub async fn reply_page(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    Path(reply_to): Path<MessageId>,
    headers: HeaderMap,
) -> Response {
    match visible_with_sender(&state, &user, reply_to).await {
        Ok(parent) => compose_form(&state, &user, &headers, format!("/inbox/compose/{reply_to}"), Some(parent)).await,
        Err(e) => failure(e),
    }
}

async fn deliver(state: &AppState, user: &CurrentUser, origin: &str, form: Result<ComposeForm, Error>) -> Response {
    let outcome = match form {
        Ok(form) => send_message(state, user, form).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(_) => redirect_with_flash("/inbox", "Message sent successfully"),
        Err(e) => refused(origin, e),
    }
}

/// `POST /inbox/compose`
#[instrument(skip_all)]
pub async fn compose_submit(State(state): State<AppState>, PageUser(user): PageUser, form: Result<ComposeForm, Error>) -> Response {
    deliver(&state, &user, "/inbox/compose", form).await
}

/// `POST /inbox/compose/{reply_to}`
#[instrument(skip_all, fields(message_id = reply_to))]
pub async fn reply_submit(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    Path(reply_to): Path<MessageId>,
    form: Result<ComposeForm, Error>,
) -> Response {
    let form = form.map(|mut form| {
        form.compose.parent_id = Some(reply_to);
        form
    });
    deliver(&state, &user, &format!("/inbox/compose/{reply_to}"), form).await
}

/// `POST /inbox/{id}/delete`
#[instrument(skip_all, fields(message_id = id))]
pub async fn message_delete(State(state): State<AppState>, PageUser(user): PageUser, Path(id): Path<MessageId>) -> Response {
    match remove_message(&state, &user, id).await {
        Ok(_) => redirect_with_flash("/inbox", "Message deleted successfully"),
        Err(e) => refused("/inbox", e),
    }
}

/// `GET /admin/messages`: every message, newest first.
#[instrument(skip_all)]
pub async fn admin_messages(State(state): State<AppState>, PageUser(user): PageUser, Query(pagination): Query<Pagination>) -> Response {
    let (skip, limit) = pagination.params();
    match all_messages(&state, skip, limit).await {
        Ok(page) => {
            let (previous, next) = page_links(skip, limit, page.total_count);
            render(
                "admin_messages.html",
                context! {
                    user => PageIdentity::from(&user),
                    messages => page.data,
                    total => page.total_count,
                    previous => previous,
                    next => next
                },
            )
            .map_or_else(failure, IntoResponse::into_response)
        }
        Err(e) => failure(e),
    }
}
