//! Fixtures shared by the unit and HTTP tests.

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::{password, session::create_session_token},
    config::{Config, EmailTransportConfig},
    db::{
        handlers::{Parents, Repository, Students, Users},
        models::{
            students::{ParentCreateDBRequest, StudentCreateDBRequest, StudentDBResponse},
            users::{RoleFlag, UserCreateDBRequest, UserDBResponse},
        },
    },
};
use axum::http::{HeaderName, HeaderValue, header};
use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Config with a signing key, plain-HTTP cookies and throwaway email/upload directories.
pub fn create_test_config() -> Config {
    let scratch = std::env::temp_dir().join(format!("campus-test-{}", Uuid::new_v4().simple()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        ..Default::default()
    };
    config.auth.session.cookie_secure = false;
    config.email.transport = EmailTransportConfig::File {
        path: scratch.join("emails").to_string_lossy().to_string(),
    };
    config.uploads.root = scratch.join("media");
    config
}

pub fn create_test_state(pool: PgPool, config: Config) -> AppState {
    AppState::builder().db(pool).config(config).build()
}

/// The full router, including the page middleware, behind an in-process test server.
pub async fn create_test_app(pool: PgPool) -> TestServer {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestServer {
    let app = crate::Application::new_with_pool(config, pool)
        .await
        .expect("Failed to create application");
    app.into_test_server()
}

fn user_request(role: RoleFlag) -> UserCreateDBRequest {
    let tag = Uuid::new_v4().simple().to_string();
    let email = format!("{}_{}@school.test", format!("{role:?}").to_lowercase(), &tag[..12]);
    UserCreateDBRequest {
        username: email.clone(),
        email,
        first_name: Some(format!("{role:?}")),
        last_name: Some(tag[..6].to_string()),
        is_student: role == RoleFlag::Student,
        is_teacher: role == RoleFlag::Teacher,
        is_admin: role == RoleFlag::Admin,
        auth_source: "native".to_string(),
        ..Default::default()
    }
}

/// A user holding exactly one role flag, with a unique email.
pub async fn create_test_user(pool: &PgPool, role: RoleFlag) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&user_request(role))
        .await
        .expect("Failed to create test user")
}

/// Like [`create_test_user`], but with [`TEST_PASSWORD`] set so native login works.
pub async fn create_test_user_with_password(pool: &PgPool, role: RoleFlag) -> UserDBResponse {
    let hash = password::hash_string(TEST_PASSWORD).expect("Failed to hash password");
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            password_hash: Some(hash),
            ..user_request(role)
        })
        .await
        .expect("Failed to create test user")
}

/// A student user plus their student record in the given class and section.
pub async fn create_test_student(pool: &PgPool, class: &str, section: &str) -> (UserDBResponse, StudentDBResponse) {
    let user = create_test_user(pool, RoleFlag::Student).await;
    let mut tx = pool.begin().await.expect("Failed to begin transaction");
    let parent = Parents::new(&mut tx)
        .create(&ParentCreateDBRequest::placeholder())
        .await
        .expect("Failed to create parent");
    let tag = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    let student = Students::new(&mut tx)
        .create(&StudentCreateDBRequest {
            user_id: Some(user.id),
            parent_id: parent.id,
            first_name: user.first_name.clone().unwrap_or_default(),
            last_name: user.last_name.clone().unwrap_or_default(),
            student_id: format!("S-{tag}"),
            admission_number: format!("A-{tag}"),
            student_class: Some(class.to_string()),
            section: Some(section.to_string()),
            ..Default::default()
        })
        .await
        .expect("Failed to create student");
    tx.commit().await.expect("Failed to commit");
    (user, student)
}

/// `Cookie` header carrying a valid session for `user`.
pub fn session_header(user: &UserDBResponse) -> (HeaderName, HeaderValue) {
    let config = create_test_config();
    let token = create_session_token(&CurrentUser::from(user.clone()), &config).expect("Failed to create session token");
    let value = format!("{}={}", config.auth.session.cookie_name, token);
    (header::COOKIE, HeaderValue::from_str(&value).expect("valid header value"))
}
