//! Timetable and exam screens.
//!
//! Writes go through the same operations as the JSON API, so class and section checks, slot
//! conflicts and the daily exam limit behave identically here. A refused write is flashed on the
//! form it was posted from.

use super::{PageIdentity, failure, form_page, page_links, redirect_with_flash, refused, render};
use crate::{
    AppState,
    api::{
        handlers::{
            exams::{edit_exam, exam_for_edit, remove_exam, schedule_exam, visible_exams},
            timetable::{add_entry, calendar_for, edit_entry, entry_for_edit, remove_entry, visible_entries},
            users::user_choices,
        },
        models::{
            exams::{ExamCreate, ExamResponse, ExamUpdate},
            pagination::Pagination,
            timetable::{TimetableChoices, TimetableEntryCreate, TimetableEntryResponse, TimetableEntryUpdate},
            users::{CurrentUser, UserSummary},
        },
    },
    auth::middleware::PageUser,
    db::models::{
        timetable::{TimetableFilter, Weekday},
        users::RoleFlag,
    },
    errors::Error,
    types::{ExamId, Operation, Resource, TimetableEntryId, UserId},
};
use axum::{
    Form,
    extract::{Path, Query, State, rejection::FormRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::{NaiveDate, NaiveTime};
use minijinja::context;
use serde::Deserialize;
use tracing::instrument;

const MISSING_FIELDS: &str = "Please fill in all required fields";

fn require_staff(user: &CurrentUser, action: Operation, resource: Resource) -> Result<(), Error> {
    if user.is_staff() {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions { action, resource })
    }
}

fn invalid(message: String) -> Error {
    Error::BadRequest { message }
}

/// `HH:MM` from a time input, or `HH:MM:SS` when the browser sends seconds.
fn parse_time(value: &str) -> Result<NaiveTime, Error> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| invalid(format!("Invalid time: {value}")))
}

fn parse_date(value: &str) -> Result<NaiveDate, Error> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid(format!("Invalid date: {value}")))
}

/// The teacher select is only shown to admins; an empty value means "not chosen".
fn parse_teacher(value: &str) -> Result<Option<UserId>, Error> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| invalid(format!("Invalid teacher: {value}")))
}

fn blank_to_none(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

async fn teacher_choices(state: &AppState, user: &CurrentUser) -> Result<Vec<UserSummary>, Error> {
    if user.is_admin {
        user_choices(state, Some(RoleFlag::Teacher)).await
    } else {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
pub struct TimetableForm {
    day: Weekday,
    start_time: String,
    end_time: String,
    subject: String,
    student_class: String,
    section: String,
    #[serde(default)]
    classroom: String,
    #[serde(default)]
    color: String,
    #[serde(default)]
    teacher_id: String,
}

impl TimetableForm {
    fn into_create(self) -> Result<TimetableEntryCreate, Error> {
        Ok(TimetableEntryCreate {
            day: self.day,
            start_time: parse_time(&self.start_time)?,
            end_time: parse_time(&self.end_time)?,
            subject: self.subject,
            teacher_id: parse_teacher(&self.teacher_id)?,
            student_class: self.student_class,
            section: self.section,
            classroom: self.classroom,
            color: blank_to_none(self.color),
        })
    }

    fn into_update(self) -> Result<TimetableEntryUpdate, Error> {
        let create = self.into_create()?;
        Ok(TimetableEntryUpdate {
            day: Some(create.day),
            start_time: Some(create.start_time),
            end_time: Some(create.end_time),
            subject: Some(create.subject),
            teacher_id: create.teacher_id,
            student_class: Some(create.student_class),
            section: Some(create.section),
            classroom: Some(create.classroom),
            color: create.color,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ExamForm {
    name: String,
    subject: String,
    date: String,
    start_time: String,
    end_time: String,
    student_class: String,
    /// Empty for the whole class
    #[serde(default)]
    section: String,
    #[serde(default)]
    room: String,
    #[serde(default)]
    max_marks: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    teacher_id: String,
}

impl ExamForm {
    fn max_marks(&self) -> Result<Option<i32>, Error> {
        let value = self.max_marks.trim();
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse()
            .map(Some)
            .map_err(|_| invalid("Maximum marks must be a whole number".to_string()))
    }

    fn into_create(self) -> Result<ExamCreate, Error> {
        Ok(ExamCreate {
            max_marks: self.max_marks()?,
            date: parse_date(&self.date)?,
            start_time: parse_time(&self.start_time)?,
            end_time: parse_time(&self.end_time)?,
            teacher_id: parse_teacher(&self.teacher_id)?,
            name: self.name,
            subject: self.subject,
            student_class: self.student_class,
            section: blank_to_none(self.section),
            room: self.room,
            description: blank_to_none(self.description),
        })
    }

    fn into_update(self) -> Result<ExamUpdate, Error> {
        let create = self.into_create()?;
        Ok(ExamUpdate {
            name: Some(create.name),
            subject: Some(create.subject),
            date: Some(create.date),
            start_time: Some(create.start_time),
            end_time: Some(create.end_time),
            student_class: Some(create.student_class),
            section: Some(create.section),
            teacher_id: create.teacher_id,
            room: Some(create.room),
            max_marks: create.max_marks,
            description: Some(create.description),
        })
    }
}

/// `GET /time-table`
#[instrument(skip_all)]
pub async fn timetable_list(State(state): State<AppState>, PageUser(user): PageUser, headers: HeaderMap) -> Response {
    let everything = TimetableFilter {
        skip: 0,
        limit: i64::from(i32::MAX),
        ..Default::default()
    };
    match visible_entries(&state, &user, everything).await {
        Ok(entries) => form_page(
            "timetable.html",
            &headers,
            context! {
                user => PageIdentity::from(&user),
                me => user.id.to_string(),
                can_edit => user.is_staff(),
                entries => entries
            },
        ),
        Err(e) => failure(e),
    }
}

/// `GET /time-table/calendar`
#[instrument(skip_all)]
pub async fn timetable_calendar(State(state): State<AppState>, PageUser(user): PageUser) -> Response {
    match calendar_for(&state, &user).await {
        Ok(calendar) => render(
            "timetable_calendar.html",
            context! { user => PageIdentity::from(&user), calendar => calendar },
        )
        .map_or_else(failure, IntoResponse::into_response),
        Err(e) => failure(e),
    }
}

async fn timetable_form(
    state: &AppState,
    user: &CurrentUser,
    headers: &HeaderMap,
    action: String,
    entry: Option<TimetableEntryResponse>,
) -> Response {
    match teacher_choices(state, user).await {
        Ok(teachers) => form_page(
            "timetable_form.html",
            headers,
            context! {
                user => PageIdentity::from(user),
                action => action,
                entry => entry,
                teachers => teachers,
                choices => TimetableChoices::default()
            },
        ),
        Err(e) => failure(e),
    }
}

/// `GET /time-table/add`
#[instrument(skip_all)]
pub async fn timetable_add_page(State(state): State<AppState>, PageUser(user): PageUser, headers: HeaderMap) -> Response {
    if let Err(e) = require_staff(&user, Operation::Create, Resource::Timetable) {
        return failure(e);
    }
    timetable_form(&state, &user, &headers, "/time-table/add".to_string(), None).await
}

/// `POST /time-table/add`
#[instrument(skip_all)]
pub async fn timetable_add(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    form: Result<Form<TimetableForm>, FormRejection>,
) -> Response {
    const ORIGIN: &str = "/time-table/add";
    if let Err(e) = require_staff(&user, Operation::Create, Resource::Timetable) {
        return failure(e);
    }
    let Ok(Form(form)) = form else {
        return redirect_with_flash(ORIGIN, MISSING_FIELDS);
    };
    let outcome = match form.into_create() {
        Ok(create) => add_entry(&state, &user, create).await.map(drop),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(()) => redirect_with_flash("/time-table", "Timetable entry added successfully"),
        Err(e) => refused(ORIGIN, e),
    }
}

/// `GET /time-table/{id}/edit`
#[instrument(skip_all, fields(entry_id = id))]
pub async fn timetable_edit_page(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    Path(id): Path<TimetableEntryId>,
    headers: HeaderMap,
) -> Response {
    match entry_for_edit(&state, &user, id).await {
        Ok(entry) => timetable_form(&state, &user, &headers, format!("/time-table/{id}/edit"), Some(entry)).await,
        Err(e) => failure(e),
    }
}

/// `POST /time-table/{id}/edit`
#[instrument(skip_all, fields(entry_id = id))]
pub async fn timetable_edit(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    Path(id): Path<TimetableEntryId>,
    form: Result<Form<TimetableForm>, FormRejection>,
) -> Response {
    let origin = format!("/time-table/{id}/edit");
    let Ok(Form(form)) = form else {
        return redirect_with_flash(&origin, MISSING_FIELDS);
    };
    let outcome = match form.into_update() {
        Ok(update) => edit_entry(&state, &user, id, update).await.map(drop),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(()) => redirect_with_flash("/time-table", "Timetable entry updated successfully"),
        Err(e) => refused(&origin, e),
    }
}

/// `POST /time-table/{id}/delete`
#[instrument(skip_all, fields(entry_id = id))]
pub async fn timetable_delete(State(state): State<AppState>, PageUser(user): PageUser, Path(id): Path<TimetableEntryId>) -> Response {
    match remove_entry(&state, &user, id).await {
        Ok(()) => redirect_with_flash("/time-table", "Timetable entry deleted successfully"),
        Err(e) => refused("/time-table", e),
    }
}

/// `GET /exams`
#[instrument(skip_all)]
pub async fn exam_list(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    Query(pagination): Query<Pagination>,
    headers: HeaderMap,
) -> Response {
    let (skip, limit) = pagination.params();
    match visible_exams(&state, &user, None, skip, limit).await {
        Ok(page) => {
            let (previous, next) = page_links(skip, limit, page.total_count);
            form_page(
                "exams.html",
                &headers,
                context! {
                    user => PageIdentity::from(&user),
                    me => user.id.to_string(),
                    can_edit => user.is_staff(),
                    exams => page.data,
                    total => page.total_count,
                    limit => limit,
                    next => next,
                    previous => previous
                },
            )
        }
        Err(e) => failure(e),
    }
}

async fn exam_form(state: &AppState, user: &CurrentUser, headers: &HeaderMap, action: String, exam: Option<ExamResponse>) -> Response {
    match teacher_choices(state, user).await {
        Ok(teachers) => form_page(
            "exam_form.html",
            headers,
            context! {
                user => PageIdentity::from(user),
                action => action,
                exam => exam,
                teachers => teachers,
                choices => TimetableChoices::default()
            },
        ),
        Err(e) => failure(e),
    }
}

/// `GET /exams/add`
#[instrument(skip_all)]
pub async fn exam_add_page(State(state): State<AppState>, PageUser(user): PageUser, headers: HeaderMap) -> Response {
    if let Err(e) = require_staff(&user, Operation::Create, Resource::Exams) {
        return failure(e);
    }
    exam_form(&state, &user, &headers, "/exams/add".to_string(), None).await
}

/// `POST /exams/add`
#[instrument(skip_all)]
pub async fn exam_add(State(state): State<AppState>, PageUser(user): PageUser, form: Result<Form<ExamForm>, FormRejection>) -> Response {
    const ORIGIN: &str = "/exams/add";
    if let Err(e) = require_staff(&user, Operation::Create, Resource::Exams) {
        return failure(e);
    }
    let Ok(Form(form)) = form else {
        return redirect_with_flash(ORIGIN, MISSING_FIELDS);
    };
    let outcome = match form.into_create() {
        Ok(create) => schedule_exam(&state, &user, create).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(created) => redirect_with_flash(
            "/exams",
            &format!("Exam added successfully; {} students notified", created.notified_students),
        ),
        Err(e) => refused(ORIGIN, e),
    }
}

/// `GET /exams/{id}/edit`
#[instrument(skip_all, fields(exam_id = id))]
pub async fn exam_edit_page(State(state): State<AppState>, PageUser(user): PageUser, Path(id): Path<ExamId>, headers: HeaderMap) -> Response {
    match exam_for_edit(&state, &user, id).await {
        Ok(exam) => exam_form(&state, &user, &headers, format!("/exams/{id}/edit"), Some(exam)).await,
        Err(e) => failure(e),
    }
}

/// `POST /exams/{id}/edit`
#[instrument(skip_all, fields(exam_id = id))]
pub async fn exam_edit(
    State(state): State<AppState>,
    PageUser(user): PageUser,
    Path(id): Path<ExamId>,
    form: Result<Form<ExamForm>, FormRejection>,
) -> Response {
    let origin = format!("/exams/{id}/edit");
    let Ok(Form(form)) = form else {
        return redirect_with_flash(&origin, MISSING_FIELDS);
    };
    let outcome = match form.into_update() {
        Ok(update) => edit_exam(&state, &user, id, update).await.map(drop),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(()) => redirect_with_flash("/exams", "Exam updated successfully"),
        Err(e) => refused(&origin, e),
    }
}

/// `POST /exams/{id}/delete`
#[instrument(skip_all, fields(exam_id = id))]
pub async fn exam_delete(State(state): State<AppState>, PageUser(user): PageUser, Path(id): Path<ExamId>) -> Response {
    match remove_exam(&state, &user, id).await {
        Ok(()) => redirect_with_flash("/exams", "Exam deleted successfully"),
        Err(e) => refused("/exams", e),
    }
}
