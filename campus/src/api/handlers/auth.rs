use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthSuccessResponse, ChangePasswordRequest, LoginRequest, LoginResponse, LogoutResponse,
            PasswordResetConfirmRequest, PasswordResetRequest, PasswordResetResponse, RegisterRequest, RegisterResponse, RegistrationInfo,
            WithSessionCookie,
        },
        users::{CurrentUser, UserResponse},
    },
    auth::{
        password,
        session,
        utils::{expired_session_cookie, session_cookie},
    },
    config::Config,
    db::{
        handlers::{PasswordResetTokens, Repository, Students, Users},
        models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
    email::EmailService,
    errors::Error,
};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

fn required(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|v| !v.is_empty())
}

/// Create a student account with a placeholder student record. Shared with the signup form.
pub(crate) async fn register_student(state: &AppState, request: RegisterRequest) -> Result<UserDBResponse, Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let (Some(first_name), Some(last_name), Some(email)) =
        (required(&request.first_name), required(&request.last_name), required(&request.email))
    else {
        return Err(Error::BadRequest {
            message: "Please fill in all required fields".to_string(),
        });
    };
    if request.password.is_empty() {
        return Err(Error::BadRequest {
            message: "Please fill in all required fields".to_string(),
        });
    }
    if request.confirm_password.as_deref().is_some_and(|confirm| confirm != request.password) {
        return Err(Error::BadRequest {
            message: "Passwords do not match".to_string(),
        });
    }
    password::validate_password(&request.password, &state.config.auth.password)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    if Users::new(&mut tx).get_user_by_email(email).await?.is_some() {
        return Err(Error::Conflict {
            message: "Email already exists".to_string(),
        });
    }

    let password_hash = password::hash_string_blocking(request.password.clone()).await?;
    let user = Users::new(&mut tx)
        .create(&UserCreateDBRequest {
            username: email.to_string(),
            email: email.to_string(),
            password_hash: Some(password_hash),
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            is_student: true,
            auth_source: "native".to_string(),
            ..Default::default()
        })
        .await?;
    Students::new(&mut tx).ensure_placeholder_for_user(user.id, first_name, last_name).await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(user_id = %user.id, "Registered new student account");
    Ok(user)
}

/// Check an email and password pair. Shared with the login form.
pub(crate) async fn authenticate(state: &AppState, email: &str, password: &str) -> Result<UserDBResponse, Error> {
    let invalid = || Error::Unauthenticated {
        message: Some(INVALID_CREDENTIALS.to_string()),
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut conn);

    let user = users.get_user_by_email(email.trim()).await?.ok_or_else(invalid)?;
    let hash = user.password_hash.clone().ok_or_else(invalid)?;

    if !password::verify_string_blocking(password.to_string(), hash).await? {
        debug!(user_id = %user.id, "Password mismatch");
        return Err(invalid());
    }

    users.record_login(user.id).await?;
    Ok(user)
}

/// Where a freshly signed-in user should land.
pub(crate) fn landing_page(user: &CurrentUser) -> &'static str {
    user.primary_role().map(|role| role.dashboard_path()).unwrap_or("/dashboard")
}

/// Sign a session token for `user` and wrap it in a `Set-Cookie` value.
pub(crate) fn issue_session_cookie(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    let token = session::create_session_token(user, config)?;
    Ok(session_cookie(&token, config))
}

fn auth_response(user: UserDBResponse, status: StatusCode, message: &str, config: &Config) -> Result<WithSessionCookie<AuthResponse>, Error> {
    let current = CurrentUser::from(user.clone());
    let cookie = issue_session_cookie(&current, config)?;

    Ok(WithSessionCookie {
        status,
        body: AuthResponse {
            user: UserResponse::from(user),
            redirect_to: landing_page(&current).to_string(),
            message: message.to_string(),
        },
        cookie,
    })
}

/// Get registration information
#[utoipa::path(
    get,
    path = "/authentication/register",
    tag = "authentication",
    responses(
        (status = 200, description = "Registration info", body = RegistrationInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_registration_info(State(state): State<AppState>) -> Json<RegistrationInfo> {
    let enabled = state.config.auth.allow_registration;
    Json(RegistrationInfo {
        enabled,
        message: if enabled {
            "Registration is enabled".to_string()
        } else {
            "Registration is disabled".to_string()
        },
    })
}

/// Register a new student account
#[utoipa::path(
    post,
    path = "/authentication/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Missing fields, mismatched or invalid password"),
        (status = 409, description = "Email already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<RegisterResponse, Error> {
    let user = register_student(&state, request).await?;
    auth_response(user, StatusCode::CREATED, "Registration successful", &state.config)
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let user = authenticate(&state, &request.email, &request.password).await?;
    auth_response(user, StatusCode::OK, "Login successful", &state.config)
}

/// Logout (clear session)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> LogoutResponse {
    WithSessionCookie {
        status: StatusCode::OK,
        body: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookie: expired_session_cookie(&state.config),
    }
}

/// Request password reset (send email)
///
/// Always succeeds, so the response does not reveal which emails have accounts.
#[utoipa::path(
    post,
    path = "/authentication/password-resets",
    request_body = PasswordResetRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password reset email sent if the account exists", body = PasswordResetResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<PasswordResetResponse>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let user = Users::new(&mut tx).get_user_by_email(request.email.trim()).await?;

    // Federated accounts have no password to reset
    if let Some(user) = user.filter(|u| u.password_hash.is_some()) {
        let (raw_token, token) = PasswordResetTokens::new(&mut tx)
            .create_for_user(user.id, state.config.auth.password_reset_token_duration)
            .await?;

        let name = user.first_name.as_deref();
        EmailService::new(&state.config)?
            .send_password_reset_email(&user.email, name, &token.id, &raw_token)
            .await?;
    }
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(PasswordResetResponse {
        message: "If an account with that email exists, a password reset link has been sent.".to_string(),
    }))
}

/// Confirm password reset with token
#[utoipa::path(
    post,
    path = "/authentication/password-resets/{token_id}/confirm",
    request_body = PasswordResetConfirmRequest,
    tag = "authentication",
    params(
        ("token_id" = uuid::Uuid, Path, description = "Token ID from the reset link"),
    ),
    responses(
        (status = 200, description = "Password reset successful", body = PasswordResetResponse),
        (status = 400, description = "Invalid or expired token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Path(token_id): Path<Uuid>,
    Json(request): Json<PasswordResetConfirmRequest>,
) -> Result<Json<PasswordResetResponse>, Error> {
    password::validate_password(&request.new_password, &state.config.auth.password)?;
    let new_password_hash = password::hash_string_blocking(request.new_password.clone()).await?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let token = PasswordResetTokens::new(&mut tx)
        .find_valid_token_by_id(token_id, &request.token)
        .await?
        .ok_or_else(|| Error::BadRequest {
            message: "Invalid or expired reset token".to_string(),
        })?;

    Users::new(&mut tx)
        .update(
            token.user_id,
            &UserUpdateDBRequest {
                password_hash: Some(new_password_hash),
                ..Default::default()
            },
        )
        .await?;

    // Burns the used token and any others still outstanding
    PasswordResetTokens::new(&mut tx).invalidate_for_user(token.user_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(PasswordResetResponse {
        message: "Password has been reset successfully".to_string(),
    }))
}

/// Change password for authenticated user
#[utoipa::path(
    post,
    path = "/authentication/password-change",
    request_body = ChangePasswordRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password changed successfully", body = AuthSuccessResponse),
        (status = 400, description = "Invalid new password or account without a password"),
        (status = 401, description = "Current password is incorrect"),
    ),
    security(
        ("session_cookie" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<AuthSuccessResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut conn);

    let user = users.get_by_id(current_user.id).await?.ok_or_else(|| Error::Unauthenticated {
        message: Some("User not found".to_string()),
    })?;
    let hash = user.password_hash.clone().ok_or_else(|| Error::BadRequest {
        message: "Cannot change password for accounts without a password".to_string(),
    })?;

    if !password::verify_string_blocking(request.current_password.clone(), hash).await? {
        return Err(Error::Unauthenticated {
            message: Some("Current password is incorrect".to_string()),
        });
    }
    password::validate_password(&request.new_password, &state.config.auth.password)?;

    let new_password_hash = password::hash_string_blocking(request.new_password.clone()).await?;
    users
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                password_hash: Some(new_password_hash),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(AuthSuccessResponse {
        message: "Password changed successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EmailTransportConfig,
        db::models::users::RoleFlag,
        test_utils::{
            TEST_PASSWORD, create_test_app, create_test_app_with_config, create_test_config, create_test_user_with_password,
            session_header,
        },
    };
    use serde_json::json;
    use sqlx::PgPool;

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            password: "analytical-engine".to_string(),
            confirm_password: Some("analytical-engine".to_string()),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_creates_student_with_placeholder_record(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;

        let response = server
            .post("/api/v1/authentication/register")
            .json(&registration("ada@school.test"))
            .await;

        response.assert_status(StatusCode::CREATED);
        let cookie = response.header("set-cookie");
        assert!(cookie.to_str().unwrap().starts_with("campus_session="));

        let body: AuthResponse = response.json();
        assert_eq!(body.user.email, "ada@school.test");
        assert_eq!(body.user.username, "ada@school.test");
        assert!(body.user.is_student && !body.user.is_teacher && !body.user.is_admin);
        assert_eq!(body.redirect_to, "/student/dashboard");

        let mut conn = pool.acquire().await.unwrap();
        let student = Students::new(&mut conn).get_by_user_id(body.user.id).await.unwrap().unwrap();
        assert_eq!(student.first_name, "Ada");
        assert_eq!(student.student_class, "Class 1");
        assert_eq!(student.section, "A");
    }

    #[sqlx::test]
    async fn test_register_rejects_bad_input(pool: PgPool) {
        let server = create_test_app(pool).await;

        let mut missing = registration("missing@school.test");
        missing.last_name = "  ".to_string();
        let response = server.post("/api/v1/authentication/register").json(&missing).await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<serde_json::Value>()["message"], "Please fill in all required fields");

        let mut mismatch = registration("mismatch@school.test");
        mismatch.confirm_password = Some("something-else".to_string());
        let response = server.post("/api/v1/authentication/register").json(&mismatch).await;
        response.assert_status_bad_request();
        assert_eq!(response.json::<serde_json::Value>()["message"], "Passwords do not match");

        let mut short = registration("short@school.test");
        short.password = "abc".to_string();
        short.confirm_password = None;
        server.post("/api/v1/authentication/register").json(&short).await.assert_status_bad_request();
    }

    #[sqlx::test]
    async fn test_register_duplicate_email_conflicts(pool: PgPool) {
        let server = create_test_app(pool).await;
        server
            .post("/api/v1/authentication/register")
            .json(&registration("twice@school.test"))
            .await
            .assert_status(StatusCode::CREATED);

        let response = server
            .post("/api/v1/authentication/register")
            .json(&registration("twice@school.test"))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<serde_json::Value>()["message"], "Email already exists");
    }

    #[sqlx::test]
    async fn test_register_disabled(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.allow_registration = false;
        let server = create_test_app_with_config(pool, config).await;

        server
            .post("/api/v1/authentication/register")
            .json(&registration("closed@school.test"))
            .await
            .assert_status_bad_request();
        let info: RegistrationInfo = server.get("/api/v1/authentication/register").await.json();
        assert!(!info.enabled);
    }

    #[sqlx::test]
    async fn test_login_redirects_by_role(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let teacher = create_test_user_with_password(&pool, RoleFlag::Teacher).await;

        let response = server
            .post("/api/v1/authentication/login")
            .json(&json!({ "email": teacher.email, "password": TEST_PASSWORD }))
            .await;
        response.assert_status_ok();
        let body: AuthResponse = response.json();
        assert_eq!(body.redirect_to, "/teacher/dashboard");

        let mut conn = pool.acquire().await.unwrap();
        let stored = Users::new(&mut conn).get_by_id(teacher.id).await.unwrap().unwrap();
        assert!(stored.last_login.is_some());
    }

    #[sqlx::test]
    async fn test_login_with_wrong_password(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let admin = create_test_user_with_password(&pool, RoleFlag::Admin).await;

        let response = server
            .post("/api/v1/authentication/login")
            .json(&json!({ "email": admin.email, "password": "not-the-password" }))
            .await;
        response.assert_status_unauthorized();
        assert_eq!(response.json::<serde_json::Value>()["message"], INVALID_CREDENTIALS);

        let response = server
            .post("/api/v1/authentication/login")
            .json(&json!({ "email": "nobody@school.test", "password": "whatever-it-is" }))
            .await;
        response.assert_status_unauthorized();
    }

    #[sqlx::test]
    async fn test_logout_expires_cookie(pool: PgPool) {
        let server = create_test_app(pool).await;
        let response = server.post("/api/v1/authentication/logout").await;
        response.assert_status_ok();
        let cookie = response.header("set-cookie");
        assert!(cookie.to_str().unwrap().contains("Max-Age=0"));
    }

    #[sqlx::test]
    async fn test_password_reset_request_sends_email_only_for_known_users(pool: PgPool) {
        let config = create_test_config();
        let EmailTransportConfig::File { path } = config.email.transport.clone() else {
            panic!("test config uses the file transport");
        };
        let server = create_test_app_with_config(pool.clone(), config).await;
        let student = create_test_user_with_password(&pool, RoleFlag::Student).await;

        let response = server
            .post("/api/v1/authentication/password-resets")
            .json(&json!({ "email": "ghost@school.test" }))
            .await;
        response.assert_status_ok();

        server
            .post("/api/v1/authentication/password-resets")
            .json(&json!({ "email": student.email }))
            .await
            .assert_status_ok();

        let sent = std::fs::read_dir(&path).unwrap().count();
        assert_eq!(sent, 1);
    }

    #[sqlx::test]
    async fn test_password_reset_confirm(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let teacher = create_test_user_with_password(&pool, RoleFlag::Teacher).await;

        let mut conn = pool.acquire().await.unwrap();
        let (raw, token) = PasswordResetTokens::new(&mut conn)
            .create_for_user(teacher.id, std::time::Duration::from_secs(3600))
            .await
            .unwrap();

        let response = server
            .post(&format!("/api/v1/authentication/password-resets/{}/confirm", token.id))
            .json(&json!({ "token": "wrong-token", "new_password": "brand-new-password" }))
            .await;
        response.assert_status_bad_request();

        server
            .post(&format!("/api/v1/authentication/password-resets/{}/confirm", token.id))
            .json(&json!({ "token": raw, "new_password": "brand-new-password" }))
            .await
            .assert_status_ok();

        // Token is single use
        server
            .post(&format!("/api/v1/authentication/password-resets/{}/confirm", token.id))
            .json(&json!({ "token": raw, "new_password": "another-password" }))
            .await
            .assert_status_bad_request();

        server
            .post("/api/v1/authentication/login")
            .json(&json!({ "email": teacher.email, "password": "brand-new-password" }))
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    async fn test_change_password(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let student = create_test_user_with_password(&pool, RoleFlag::Student).await;
        let (name, value) = session_header(&student);

        server
            .post("/api/v1/authentication/password-change")
            .add_header(name.clone(), value.clone())
            .json(&json!({ "current_password": "wrong-password", "new_password": "next-password-1" }))
            .await
            .assert_status_unauthorized();

        server
            .post("/api/v1/authentication/password-change")
            .add_header(name, value)
            .json(&json!({ "current_password": TEST_PASSWORD, "new_password": "next-password-1" }))
            .await
            .assert_status_ok();

        server
            .post("/api/v1/authentication/login")
            .json(&json!({ "email": student.email, "password": "next-password-1" }))
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    async fn test_change_password_requires_session(pool: PgPool) {
        let server = create_test_app(pool).await;
        server
            .post("/api/v1/authentication/password-change")
            .json(&json!({ "current_password": "a", "new_password": "b" }))
            .await
            .assert_status_unauthorized();
    }
}
