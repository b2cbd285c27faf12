//! Server-rendered HTML: login and signup forms, the role dashboards and error pages. The
//! timetable and exam screens live in [`schedule`], messaging in [`inbox`].
//!
//! Form posts never render errors inline. A failure is stored as a one-line flash message in a
//! short-lived `campus_flash` cookie and the browser is sent back (303) to the form, which shows
//! the message once and clears the cookie.

use crate::{
    AppState,
    api::{
        handlers::{
            auth::{authenticate, issue_session_cookie, landing_page, register_student},
            dashboard::{load_admin_dashboard, load_student_dashboard, load_teacher_dashboard},
            users::assigned_teachers,
        },
        models::{
            auth::{LoginRequest, RegisterRequest},
            users::CurrentUser,
        },
    },
    auth::{
        middleware::{PageUser, role_access_middleware},
        utils::{expired_session_cookie, read_cookie},
    },
    errors::Error,
    static_assets,
};
use axum::{
    Form, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    middleware::from_fn_with_state,
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use minijinja::{Environment, Value, context};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, error, info, instrument};
use url::form_urlencoded;

mod inbox;
mod schedule;

pub const FLASH_COOKIE: &str = "campus_flash";

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_loader(|name| Ok(static_assets::template_source(name)));
    env
});

/// What the page chrome needs to know about the signed-in user.
#[derive(Debug, Serialize)]
struct PageIdentity {
    name: String,
    is_student: bool,
    is_teacher: bool,
    is_admin: bool,
}

impl From<&CurrentUser> for PageIdentity {
    fn from(user: &CurrentUser) -> Self {
        Self {
            name: user.display_name(),
            is_student: user.is_student,
            is_teacher: user.is_teacher,
            is_admin: user.is_admin,
        }
    }
}

fn render(template: &str, ctx: Value) -> Result<Html<String>, Error> {
    TEMPLATES
        .get_template(template)
        .and_then(|t| t.render(ctx))
        .map(Html)
        .map_err(|e| Error::Internal {
            operation: format!("render {template}: {e:#}"),
        })
}

/// A full HTML error page. Also used by the role-access middleware for its 403s.
pub fn error_page(status: StatusCode, message: &str) -> Response {
    match render("error.html", context! { status => status.as_u16(), message => message }) {
        Ok(html) => (status, html).into_response(),
        Err(e) => {
            error!("Failed to render error page: {e}");
            (status, message.to_string()).into_response()
        }
    }
}

fn failure(e: Error) -> Response {
    if e.status_code().is_server_error() {
        error!("Page failed: {e:#}");
    } else {
        debug!("Page refused: {e}");
    }
    error_page(e.status_code(), &e.user_message())
}

fn flash_cookie(message: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(message.as_bytes()).collect();
    format!("{FLASH_COOKIE}={encoded}; Path=/; Max-Age=60; HttpOnly; SameSite=Lax")
}

fn cleared_flash_cookie() -> String {
    format!("{FLASH_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

/// The pending flash message, if the request carries one.
pub fn read_flash(headers: &HeaderMap) -> Option<String> {
    let raw = read_cookie(headers, FLASH_COOKIE)?;
    form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(message, _)| message.into_owned())
        .filter(|message| !message.is_empty())
}

fn redirect_with_flash(to: &str, message: &str) -> Response {
    (AppendHeaders([(header::SET_COOKIE, flash_cookie(message))]), Redirect::to(to)).into_response()
}

/// A refused form post. Validation and conflict errors go back to `origin` as a flash; anything
/// else (forbidden, missing, server errors) gets a full error page.
fn refused(origin: &str, e: Error) -> Response {
    match e.status_code() {
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT => {
            debug!(origin, "Form refused: {e}");
            redirect_with_flash(origin, &e.user_message())
        }
        _ => failure(e),
    }
}

/// `skip` values for the previous and next page links, when there is such a page.
fn page_links(skip: i64, limit: i64, total: i64) -> (Option<i64>, Option<i64>) {
    let next = (skip + limit < total).then_some(skip + limit);
    let previous = (skip > 0).then(|| (skip - limit).max(0));
    (previous, next)
}

/// Render a form page, consuming any flash message.
fn form_page(template: &str, headers: &HeaderMap, extra: Value) -> Response {
    let flash = read_flash(headers);
    let had_flash = flash.is_some();
    match render(template, context! { flash => flash, ..extra }) {
        Ok(html) if had_flash => (AppendHeaders([(header::SET_COOKIE, cleared_flash_cookie())]), html).into_response(),
        Ok(html) => html.into_response(),
        Err(e) => failure(e),
    }
}

fn signed_in(user: &CurrentUser, state: &AppState) -> Response {
    match issue_session_cookie(user, &state.config) {
        Ok(cookie) => (
            AppendHeaders([(header::SET_COOKIE, cookie), (header::SET_COOKIE, cleared_flash_cookie())]),
            Redirect::to(landing_page(user)),
        )
            .into_response(),
        Err(e) => failure(e),
    }
}

/// `GET /`
pub async fn index(user: Option<CurrentUser>) -> Redirect {
    match user {
        Some(_) => Redirect::to("/dashboard"),
        None => Redirect::to("/login"),
    }
}

/// `GET /dashboard`: admin, then teacher, then student.
pub async fn dashboard(PageUser(user): PageUser) -> Redirect {
    Redirect::to(landing_page(&user))
}

#[instrument(skip_all)]
pub async fn login_page(State(state): State<AppState>, user: Option<CurrentUser>, headers: HeaderMap) -> Response {
    if let Some(user) = user {
        return Redirect::to(landing_page(&user)).into_response();
    }
    form_page(
        "login.html",
        &headers,
        context! { allow_registration => state.config.auth.allow_registration },
    )
}

#[instrument(skip_all)]
pub async fn login_submit(State(state): State<AppState>, Form(form): Form<LoginRequest>) -> Response {
    match authenticate(&state, &form.email, &form.password).await {
        Ok(user) => {
            info!(user_id = %user.id, "Signed in through the login form");
            signed_in(&CurrentUser::from(user), &state)
        }
        Err(e) => redirect_with_flash("/login", &e.user_message()),
    }
}

#[instrument(skip_all)]
pub async fn signup_page(State(state): State<AppState>, user: Option<CurrentUser>, headers: HeaderMap) -> Response {
    if let Some(user) = user {
        return Redirect::to(landing_page(&user)).into_response();
    }
    if !state.config.auth.allow_registration {
        return redirect_with_flash("/login", "User registration is disabled");
    }
    form_page("signup.html", &headers, context! {})
}

#[instrument(skip_all)]
pub async fn signup_submit(State(state): State<AppState>, Form(form): Form<RegisterRequest>) -> Response {
    match register_student(&state, form).await {
        Ok(user) => signed_in(&CurrentUser::from(user), &state),
        Err(e) => redirect_with_flash("/signup", &e.user_message()),
    }
}

pub async fn logout(State(state): State<AppState>) -> Response {
    (
        AppendHeaders([(header::SET_COOKIE, expired_session_cookie(&state.config))]),
        Redirect::to("/login"),
    )
        .into_response()
}

#[instrument(skip_all)]
pub async fn student_dashboard(State(state): State<AppState>, PageUser(user): PageUser) -> Response {
    match load_student_dashboard(&state, &user).await {
        Ok(dashboard) => render(
            "student_dashboard.html",
            context! { user => PageIdentity::from(&user), dashboard => dashboard },
        )
        .map_or_else(failure, IntoResponse::into_response),
        Err(e) => failure(e),
    }
}

#[instrument(skip_all)]
pub async fn student_teachers(State(state): State<AppState>, PageUser(user): PageUser) -> Response {
    match assigned_teachers(&state, user.id).await {
        Ok(teachers) => render(
            "student_teachers.html",
            context! { user => PageIdentity::from(&user), teachers => teachers },
        )
        .map_or_else(failure, IntoResponse::into_response),
        Err(e) => failure(e),
    }
}

#[instrument(skip_all)]
pub async fn teacher_dashboard(State(state): State<AppState>, PageUser(user): PageUser) -> Response {
    match load_teacher_dashboard(&state, &user).await {
        Ok(dashboard) => render(
            "teacher_dashboard.html",
            context! { user => PageIdentity::from(&user), dashboard => dashboard },
        )
        .map_or_else(failure, IntoResponse::into_response),
        Err(e) => failure(e),
    }
}

#[instrument(skip_all)]
pub async fn admin_dashboard(State(state): State<AppState>, PageUser(user): PageUser) -> Response {
    match load_admin_dashboard(&state, &user).await {
        Ok(dashboard) => render(
            "admin_dashboard.html",
            context! { user => PageIdentity::from(&user), dashboard => dashboard },
        )
        .map_or_else(failure, IntoResponse::into_response),
        Err(e) => failure(e),
    }
}

/// The HTML routes, with the role areas behind [`role_access_middleware`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/dashboard", get(dashboard))
        .route("/login", get(login_page).post(login_submit))
        .route("/signup", get(signup_page).post(signup_submit))
        .route("/logout", post(logout))
        .route("/student/dashboard", get(student_dashboard))
        .route("/student/teachers", get(student_teachers))
        .route("/teacher/dashboard", get(teacher_dashboard))
        .route("/admin/dashboard", get(admin_dashboard))
        .route("/admin/messages", get(inbox::admin_messages))
        .route("/time-table", get(schedule::timetable_list))
        .route("/time-table/calendar", get(schedule::timetable_calendar))
        .route("/time-table/add", get(schedule::timetable_add_page).post(schedule::timetable_add))
        .route("/time-table/{id}/edit", get(schedule::timetable_edit_page).post(schedule::timetable_edit))
        .route("/time-table/{id}/delete", post(schedule::timetable_delete))
        .route("/exams", get(schedule::exam_list))
        .route("/exams/add", get(schedule::exam_add_page).post(schedule::exam_add))
        .route("/exams/{id}/edit", get(schedule::exam_edit_page).post(schedule::exam_edit))
        .route("/exams/{id}/delete", post(schedule::exam_delete))
        .route("/inbox", get(inbox::inbox_page))
        .route("/inbox/compose", get(inbox::compose_page).post(inbox::compose_submit))
        .route("/inbox/compose/{reply_to}", get(inbox::reply_page).post(inbox::reply_submit))
        .route("/inbox/{id}", get(inbox::message_page))
        .route("/inbox/{id}/delete", post(inbox::message_delete))
        .route("/messages/{id}", get(inbox::message_link))
        .route("/static/{*path}", get(static_assets::serve_asset))
        .layer(from_fn_with_state(state.clone(), role_access_middleware))
        .with_state(state)
}
