//! # campus: school management service
//!
//! `campus` runs a school's day-to-day administration behind one axum server: student and
//! teacher records, the weekly timetable, exam scheduling, internal messaging and a per-user
//! notification feed. Every account carries three independent role flags (student, teacher,
//! admin) and what a caller may see or change follows from those flags.
//!
//! ## Surfaces
//!
//! - **HTML pages** ([`pages`]): login and signup forms, one dashboard per role, the timetable
//!   and exam forms, and the inbox. The role areas `/student/*`, `/teacher/*` and `/admin/*` sit behind
//!   [`auth::middleware::role_access_middleware`].
//! - **JSON API** ([`api`]) under `/api/v1`, documented with OpenAPI at `/api-docs/openapi.json`
//!   and browsable at `/docs`.
//! - **Media**: profile pictures and student photos are served from `/media`; message
//!   attachments only through the message API, which checks who is asking.
//!
//! ## Data
//!
//! PostgreSQL through sqlx, one repository per table ([`db`]). Multi-table writes (a student
//! with its parent, an exam with its notifications) run in a single transaction. The schema is
//! applied at startup by [`migrator`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use campus::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = campus::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     campus::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
mod email;
pub mod errors;
mod openapi;
pub mod pages;
mod static_assets;
pub mod telemetry;
mod types;
mod uploads;

#[cfg(test)]
pub mod test_utils;

use crate::{
    config::CorsOrigin,
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    openapi::ApiDoc,
    uploads::{UploadKind, Uploads},
};
use auth::password;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{delete, get, patch, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::UserId;

/// Request bodies may carry several files; each one is still capped at `uploads.max_file_size`.
const FILES_PER_REQUEST: usize = 4;

/// Shared by every handler.
///
/// ```ignore
/// let state = AppState::builder().db(pool).config(config).build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
}

impl AppState {
    pub fn uploads(&self) -> Uploads {
        Uploads::new(&self.config.uploads)
    }
}

/// Get the campus database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Make sure an admin account exists for `email`.
///
/// Idempotent: an existing user keeps their id, gains the admin flag if they lacked it, and has
/// their password replaced when one is given.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, password: Option<&str>, db: &PgPool) -> anyhow::Result<UserId> {
    let password_hash = password.map(password::hash_string).transpose()?;

    let mut tx = db.begin().await?;
    let mut users = Users::new(&mut tx);

    if let Some(existing) = users.get_user_by_email(email).await? {
        if !existing.is_admin {
            users
                .set_role_flags(existing.id, existing.is_student, existing.is_teacher, true)
                .await?;
        }
        if let Some(password_hash) = password_hash {
            users
                .update(
                    existing.id,
                    &UserUpdateDBRequest {
                        password_hash: Some(password_hash),
                        ..Default::default()
                    },
                )
                .await?;
        }
        tx.commit().await?;
        return Ok(existing.id);
    }

    let created = users
        .create(&UserCreateDBRequest {
            username: email.to_string(),
            email: email.to_string(),
            password_hash,
            first_name: Some("Admin".to_string()),
            is_admin: true,
            auth_source: "system".to_string(),
            ..Default::default()
        })
        .await?;
    tx.commit().await?;
    info!(user_id = %created.id, "Created initial admin user");
    Ok(created.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.cors.allow_credentials)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH, http::Method::DELETE])
        .allow_headers([http::header::CONTENT_TYPE])
        .expose_headers([http::header::LOCATION, http::header::CONTENT_DISPOSITION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

fn api_routes(state: &AppState) -> Router {
    use api::handlers::{auth, dashboard, departments, exams, messages, notifications, relationships, students, timetable, users};

    Router::new()
        // Authentication
        .route("/authentication/register", get(auth::get_registration_info).post(auth::register))
        .route("/authentication/login", post(auth::login))
        .route("/authentication/logout", post(auth::logout))
        .route("/authentication/password-resets", post(auth::request_password_reset))
        .route("/authentication/password-resets/{token_id}/confirm", post(auth::confirm_password_reset))
        .route("/authentication/password-change", post(auth::change_password))
        // Own profile
        .route("/users/current", get(users::get_current_user).patch(users::update_current_user))
        .route("/users/current/profile-picture", post(users::upload_profile_picture))
        .route("/users/current/teachers", get(users::list_my_teachers))
        // Teachers
        .route("/teachers", get(users::list_teachers).post(users::create_teacher))
        .route("/teachers/{id}", get(users::get_teacher).patch(users::update_teacher))
        // Dashboards
        .route("/dashboard/student", get(dashboard::student_dashboard))
        .route("/dashboard/teacher", get(dashboard::teacher_dashboard))
        .route("/dashboard/admin", get(dashboard::admin_dashboard))
        // Students
        .route("/students", get(students::list_students).post(students::create_student))
        .route(
            "/students/{slug}",
            get(students::get_student).patch(students::update_student).delete(students::delete_student),
        )
        .route("/students/{slug}/image", post(students::upload_student_image))
        // Teacher-student relationships
        .route("/relationships", get(relationships::list_relationships).post(relationships::create_relationship))
        .route("/relationships/{id}", delete(relationships::delete_relationship))
        // Timetable
        .route("/timetable", get(timetable::list_timetable).post(timetable::create_timetable_entry))
        .route("/timetable/calendar", get(timetable::timetable_calendar))
        .route("/timetable/choices", get(timetable::timetable_choices))
        .route(
            "/timetable/{id}",
            patch(timetable::update_timetable_entry).delete(timetable::delete_timetable_entry),
        )
        // Exams
        .route("/exams", get(exams::list_exams).post(exams::create_exam))
        .route("/exams/{id}", get(exams::get_exam).patch(exams::update_exam).delete(exams::delete_exam))
        // Notifications
        .route(
            "/notifications",
            get(notifications::list_notifications).delete(notifications::clear_notifications),
        )
        .route("/notifications/unread", get(notifications::list_unread_notifications))
        .route("/notifications/unread/count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/notifications/{id}", delete(notifications::delete_notification))
        // Messages
        .route("/messages", get(messages::list_all_messages).post(messages::send))
        .route("/messages/inbox", get(messages::inbox))
        .route("/messages/sent", get(messages::sent))
        .route("/messages/{id}", get(messages::get_message).delete(messages::delete_message))
        .route("/messages/{message_id}/attachments/{id}", get(messages::download_attachment))
        // Reference data
        .route("/departments", get(departments::list_departments).post(departments::create_department))
        .route(
            "/departments/{id}",
            get(departments::get_department)
                .patch(departments::update_department)
                .delete(departments::delete_department),
        )
        .route("/subjects", get(departments::list_subjects).post(departments::create_subject))
        .route("/subjects/{id}", patch(departments::update_subject).delete(departments::delete_subject))
        .route("/holidays", get(departments::list_holidays).post(departments::create_holiday))
        .route("/holidays/{id}", patch(departments::update_holiday).delete(departments::delete_holiday))
        .with_state(state.clone())
}

/// Build the main application router with all endpoints and middleware.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let uploads = state.uploads();
    let body_limit = state.config.uploads.max_file_size.saturating_mul(FILES_PER_REQUEST);

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/v1", api_routes(state))
        .nest_service(
            "/media/profile_pictures",
            ServeDir::new(uploads.public_dir(UploadKind::ProfilePictures)),
        )
        .nest_service("/media/student_images", ServeDir::new(uploads.public_dir(UploadKind::StudentImages)))
        .merge(pages::router(state.clone()))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// The running service: a migrated pool plus the router built on it.
///
/// 1. **Create**: [`Application::new`] connects, migrates and ensures the initial admin
/// 2. **Serve**: [`Application::serve`] binds and handles requests until `shutdown` resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting campus with configuration: {:#?}", config);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        migrator().run(&pool).await?;

        create_initial_admin_user(&config.admin_email, config.admin_password.as_deref(), &pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {e}"))?;

        Self::new_with_pool(config, pool).await
    }

    /// Build on an existing, already migrated pool.
    pub async fn new_with_pool(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        for kind in [UploadKind::ProfilePictures, UploadKind::StudentImages, UploadKind::MessageAttachments] {
            tokio::fs::create_dir_all(config.uploads.root.join(kind.dir())).await?;
        }

        let state = AppState::builder().db(pool.clone()).config(config.clone()).build();
        let router = build_router(&state)?;

        Ok(Self { router, config, pool })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("campus listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;
        Ok(())
    }
}
