//! Role-access middleware for the server-rendered pages.
//!
//! Paths under `/student/`, `/teacher/` and `/admin/` need the matching role flag. Anonymous
//! callers are sent to the login page; signed-in callers without the role get a 403 page.

use crate::{
    AppState,
    api::models::users::{CurrentUser, UserRole},
    auth::permissions::forbidden,
    pages,
};
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, trace};

/// Role a page path requires, if any.
pub fn required_role(path: &str) -> Option<UserRole> {
    let (first, rest) = path.trim_start_matches('/').split_once('/')?;
    if rest.is_empty() {
        return None;
    }
    match first {
        "student" => Some(UserRole::Student),
        "teacher" => Some(UserRole::Teacher),
        "admin" => Some(UserRole::Admin),
        _ => None,
    }
}

/// Implementation of [`role_access_middleware`]: `Ok` lets the request through.
pub(crate) async fn role_access(state: &AppState, request: Request) -> Result<Request, Response> {
    let Some(role) = required_role(request.uri().path()) else {
        return Ok(request);
    };

    let (mut parts, body) = request.into_parts();
    let user = match <CurrentUser as OptionalFromRequestParts<AppState>>::from_request_parts(&mut parts, state).await {
        Ok(user) => user,
        Err(e) => return Err(e.into_response()),
    };

    match user {
        None => {
            debug!("Anonymous request for {}, redirecting to login", parts.uri.path());
            Err(Redirect::to("/login").into_response())
        }
        Some(user) if user.has_role(role) => {
            trace!("User {} has role {:?}", user.id, role);
            parts.extensions.insert(user);
            Ok(Request::from_parts(parts, body))
        }
        Some(user) => {
            let err = forbidden(&parts);
            debug!("User {} refused: {}", user.id, err);
            Err(pages::error_page(StatusCode::FORBIDDEN, &err.user_message()))
        }
    }
}

pub async fn role_access_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match role_access(&state, request).await {
        Ok(request) => next.run(request).await,
        Err(response) => response,
    }
}

/// Extractor for page handlers behind [`role_access_middleware`]; reuses the user it resolved.
#[derive(Debug, Clone)]
pub struct PageUser(pub CurrentUser);

impl FromRequestParts<AppState> for PageUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(PageUser(user.clone()));
        }
        match <CurrentUser as OptionalFromRequestParts<AppState>>::from_request_parts(parts, state).await {
            Ok(Some(user)) => Ok(PageUser(user)),
            Ok(None) => Err(Redirect::to("/login").into_response()),
            Err(e) => Err(e.into_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_role() {
        assert_eq!(required_role("/student/dashboard"), Some(UserRole::Student));
        assert_eq!(required_role("/teacher/dashboard"), Some(UserRole::Teacher));
        assert_eq!(required_role("/admin/dashboard"), Some(UserRole::Admin));
        assert_eq!(required_role("/admin"), None);
        assert_eq!(required_role("/admin/"), None);
        assert_eq!(required_role("/dashboard"), None);
        assert_eq!(required_role("/administrator/x"), None);
        assert_eq!(required_role("/api/v1/students"), None);
    }
}
