//! The [`CurrentUser`] extractor.
//!
//! A caller is identified, in order, by:
//! 1. the session cookie (a signed JWT naming the user), or
//! 2. the trusted proxy header carrying an email, when `auth.proxy_header.enabled`.
//!
//! The user row is then reloaded so role flags are always current. A user that holds no role
//! flag at all is promoted to student on the way through.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::{session, utils::read_cookie},
    config::Config,
    db::{
        errors::DbError,
        handlers::{Repository, Students, Users},
        models::users::{UserCreateDBRequest, UserDBResponse},
    },
    errors::{Error, Result},
};
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use sqlx::PgPool;
use tracing::{debug, instrument, trace};

/// Resolve the session cookie to a user row.
///
/// Returns `None` when there is no usable cookie. Invalid and expired tokens are treated as
/// absent so a stale cookie does not block the other methods.
#[instrument(skip_all)]
async fn try_session_auth(parts: &Parts, config: &Config, db: &PgPool) -> Option<Result<UserDBResponse>> {
    let token = read_cookie(&parts.headers, &config.auth.session.cookie_name)?;
    let claims = match session::verify_session_token(&token, config) {
        Ok(claims) => claims,
        Err(Error::Unauthenticated { .. }) => {
            trace!("Ignoring invalid session cookie");
            return None;
        }
        Err(e) => return Some(Err(e)),
    };

    let mut conn = match db.acquire().await {
        Ok(conn) => conn,
        Err(e) => return Some(Err(DbError::from(e).into())),
    };
    match Users::new(&mut conn).get_by_id(claims.sub).await {
        Ok(Some(user)) => Some(Ok(user)),
        // The account was removed after the token was issued
        Ok(None) => Some(Err(Error::Unauthenticated { message: None })),
        Err(e) => Some(Err(e.into())),
    }
}

/// Resolve the trusted proxy header to a user row, creating a student account on first sight.
#[instrument(skip_all)]
async fn try_proxy_header_auth(parts: &Parts, config: &Config, db: &PgPool) -> Option<Result<UserDBResponse>> {
    let email = parts
        .headers
        .get(&config.auth.proxy_header.header_name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|email| !email.is_empty())?;

    Some(find_or_create_federated_user(email, config, db).await)
}

async fn find_or_create_federated_user(email: &str, config: &Config, db: &PgPool) -> Result<UserDBResponse> {
    let mut tx = db.begin().await.map_err(DbError::from)?;

    if let Some(user) = Users::new(&mut tx).get_user_by_email(email).await? {
        return Ok(user);
    }
    if !config.auth.proxy_header.auto_create_users {
        return Err(Error::Unauthenticated {
            message: Some("No account exists for this identity".to_string()),
        });
    }

    let user = Users::new(&mut tx)
        .create(&UserCreateDBRequest {
            username: email.to_string(),
            email: email.to_string(),
            is_student: true,
            auth_source: "proxy-header".to_string(),
            ..Default::default()
        })
        .await?;
    let first_name = email.split('@').next().filter(|s| !s.is_empty()).unwrap_or("Student");
    Students::new(&mut tx).ensure_placeholder_for_user(user.id, first_name, "").await?;
    tx.commit().await.map_err(DbError::from)?;

    debug!("Created federated student account for {}", user.id);
    Ok(user)
}

/// Promote a role-less user to student, persisting the change.
async fn bootstrap_role(mut user: UserDBResponse, db: &PgPool) -> Result<UserDBResponse> {
    if user.has_role() {
        return Ok(user);
    }
    let mut conn = db.acquire().await.map_err(DbError::from)?;
    Users::new(&mut conn).promote_roleless_to_student(user.id).await?;
    debug!("Promoted role-less user {} to student", user.id);
    user.is_student = true;
    Ok(user)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let mut resolved = try_session_auth(parts, &state.config, &state.db).await;

        if !matches!(resolved, Some(Ok(_))) && state.config.auth.proxy_header.enabled {
            if let Some(result) = try_proxy_header_auth(parts, &state.config, &state.db).await {
                resolved = Some(result);
            }
        }

        match resolved {
            Some(Ok(user)) => Ok(bootstrap_role(user, &state.db).await?.into()),
            Some(Err(e)) => {
                trace!("Authentication failed: {:?}", e);
                Err(e)
            }
            None => Err(Error::Unauthenticated { message: None }),
        }
    }
}

/// `Option<CurrentUser>` for routes that behave differently for anonymous callers.
impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>> {
        match <CurrentUser as FromRequestParts<AppState>>::from_request_parts(parts, state).await {
            Ok(user) => Ok(Some(user)),
            Err(Error::Unauthenticated { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::session::create_session_token,
        db::models::users::RoleFlag,
        test_utils::{create_test_config, create_test_state, create_test_user},
    };
    use axum::http::{Request, StatusCode, header};
    use sqlx::PgPool;

    fn parts_with(header_name: &str, value: &str) -> Parts {
        Request::builder()
            .uri("http://localhost/test")
            .header(header_name, value)
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[sqlx::test]
    async fn test_session_cookie_resolves_user(pool: PgPool) {
        let state = create_test_state(pool.clone(), create_test_config());
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let token = create_session_token(&CurrentUser::from(teacher.clone()), &state.config).unwrap();

        let mut parts = parts_with(header::COOKIE.as_str(), &format!("campus_session={token}"));
        let user = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(user.id, teacher.id);
        assert!(user.is_teacher);
    }

    #[sqlx::test]
    async fn test_roleless_user_is_promoted_to_student(pool: PgPool) {
        let state = create_test_state(pool.clone(), create_test_config());
        let mut conn = pool.acquire().await.unwrap();
        let roleless = Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                username: "nobody@school.test".to_string(),
                email: "nobody@school.test".to_string(),
                auth_source: "native".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let token = create_session_token(&CurrentUser::from(roleless.clone()), &state.config).unwrap();

        let mut parts = parts_with(header::COOKIE.as_str(), &format!("campus_session={token}"));
        let user = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(user.is_student);

        let stored = Users::new(&mut conn).get_by_id(roleless.id).await.unwrap().unwrap();
        assert!(stored.is_student && !stored.is_teacher && !stored.is_admin);
    }

    #[sqlx::test]
    async fn test_proxy_header_creates_student_with_placeholder_record(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.proxy_header.enabled = true;
        let state = create_test_state(pool.clone(), config);

        let mut parts = parts_with("x-forwarded-email", "federated@school.test");
        let user = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(user.is_student);
        assert_eq!(user.username, "federated@school.test");

        let mut conn = pool.acquire().await.unwrap();
        let stored = Users::new(&mut conn).get_user_by_email("federated@school.test").await.unwrap().unwrap();
        assert_eq!(stored.auth_source, "proxy-header");
        let student = Students::new(&mut conn).get_by_user_id(stored.id).await.unwrap().unwrap();
        assert_eq!(student.student_class, "Class 1");
        assert_eq!(student.section, "A");

        // Second request reuses the same account
        let mut parts = parts_with("x-forwarded-email", "federated@school.test");
        let again = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(again.id, user.id);
    }

    #[sqlx::test]
    async fn test_proxy_header_ignored_when_disabled(pool: PgPool) {
        let state = create_test_state(pool, create_test_config());
        let mut parts = parts_with("x-forwarded-email", "someone@school.test");
        let err = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_optional_extractor_maps_anonymous_to_none(pool: PgPool) {
        let state = create_test_state(pool, create_test_config());
        let mut parts = parts_with(header::COOKIE.as_str(), "campus_session=not-a-token");
        let user = <CurrentUser as OptionalFromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert!(user.is_none());
    }
}
