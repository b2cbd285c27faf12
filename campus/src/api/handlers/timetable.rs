//! Timetable entries and the weekly calendar.
//!
//! Who sees what depends on the caller's highest role: admins see every entry, teachers their
//! own, students the entries for their class and section.

use crate::{
    AppState,
    api::{
        handlers::{check_class_and_section, check_color},
        models::{
            timetable::{
                CalendarResponse, ListTimetableQuery, TimetableChoices, TimetableEntryCreate, TimetableEntryResponse, TimetableEntryUpdate,
            },
            users::{CurrentUser, UserRole, UserSummary},
        },
    },
    auth::permissions::RequireStaff,
    db::{
        handlers::{Repository, Students, TimetableEntries, Users},
        models::timetable::{TimetableEntryCreateDBRequest, TimetableEntryDBResponse, TimetableEntryUpdateDBRequest, TimetableFilter},
    },
    errors::Error,
    types::{DEFAULT_COLOR, Operation, Resource, TimetableEntryId, UserId},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;
use tracing::info;

/// Narrow `filter` to what `user` may see. `None` means a student without a student record,
/// who sees nothing.
async fn scope_filter(conn: &mut PgConnection, user: &CurrentUser, mut filter: TimetableFilter) -> Result<Option<TimetableFilter>, Error> {
    match user.primary_role() {
        Some(UserRole::Admin) => {}
        Some(UserRole::Teacher) => {
            filter.teacher_id = Some(user.id);
            filter.student_class = None;
            filter.section = None;
        }
        Some(UserRole::Student) | None => {
            let Some(student) = Students::new(conn).get_by_user_id(user.id).await? else {
                return Ok(None);
            };
            filter.teacher_id = None;
            filter.student_class = Some(student.student_class);
            filter.section = Some(student.section);
        }
    }
    Ok(Some(filter))
}

async fn with_teachers(conn: &mut PgConnection, rows: Vec<TimetableEntryDBResponse>) -> Result<Vec<TimetableEntryResponse>, Error> {
    let mut ids: Vec<UserId> = rows.iter().map(|r| r.teacher_id).collect();
    ids.sort();
    ids.dedup();
    let teachers = Users::new(conn).get_bulk(ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let teacher = teachers.get(&row.teacher_id).map(UserSummary::from);
            TimetableEntryResponse {
                teacher,
                ..TimetableEntryResponse::from(row)
            }
        })
        .collect())
}

async fn ensure_teacher(conn: &mut PgConnection, teacher_id: UserId) -> Result<(), Error> {
    if Users::new(conn).get_by_id(teacher_id).await?.is_some_and(|u| u.is_teacher) {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: "The selected teacher is not a teacher".to_string(),
        })
    }
}

/// Entry `id` if `user` may change it: admins any entry, teachers only their own.
async fn editable_entry(conn: &mut PgConnection, user: &CurrentUser, id: TimetableEntryId, action: Operation) -> Result<TimetableEntryDBResponse, Error> {
    let entry = TimetableEntries::new(conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Timetable entry".to_string(),
        id: id.to_string(),
    })?;
    if !user.is_admin && entry.teacher_id != user.id {
        return Err(Error::InsufficientPermissions {
            action,
            resource: Resource::Timetable,
        });
    }
    Ok(entry)
}

fn check_times(start: chrono::NaiveTime, end: chrono::NaiveTime) -> Result<(), Error> {
    if end <= start {
        return Err(Error::BadRequest {
            message: "End time must be after start time".to_string(),
        });
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/timetable",
    tag = "timetable",
    summary = "List timetable entries",
    description = "Admins see all entries and may filter by class and section. Teachers see their own entries, \
                   students the entries for their class and section.",
    params(ListTimetableQuery),
    responses(
        (status = 200, description = "Entries ordered by day, then start time", body = [TimetableEntryResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_timetable(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListTimetableQuery>,
) -> Result<Json<Vec<TimetableEntryResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let requested = TimetableFilter {
        teacher_id: None,
        student_class: query.student_class.filter(|c| !c.is_empty()),
        section: query.section.filter(|s| !s.is_empty()),
        day: query.day,
        skip,
        limit,
    };
    Ok(Json(visible_entries(&state, &current_user, requested).await?))
}

/// The entries `user` may see, narrowed further by `requested`.
pub async fn visible_entries(state: &AppState, user: &CurrentUser, requested: TimetableFilter) -> Result<Vec<TimetableEntryResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let Some(filter) = scope_filter(&mut conn, user, requested).await? else {
        return Ok(Vec::new());
    };
    let rows = TimetableEntries::new(&mut conn).list(&filter).await?;
    with_teachers(&mut conn, rows).await
}

#[utoipa::path(
    get,
    path = "/timetable/calendar",
    tag = "timetable",
    summary = "Weekly calendar",
    description = "The caller's visible entries on a Monday..Sunday by 08:00..17:00 grid. \
                   Each entry sits in the cell for its start hour.",
    responses(
        (status = 200, description = "Calendar grid", body = CalendarResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn timetable_calendar(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<CalendarResponse>, Error> {
    Ok(Json(calendar_for(&state, &current_user).await?))
}

pub async fn calendar_for(state: &AppState, user: &CurrentUser) -> Result<CalendarResponse, Error> {
    let everything = TimetableFilter {
        skip: 0,
        limit: i64::from(i32::MAX),
        ..Default::default()
    };
    Ok(CalendarResponse::build(visible_entries(state, user, everything).await?))
}

#[utoipa::path(
    get,
    path = "/timetable/choices",
    tag = "timetable",
    summary = "Form choices",
    responses((status = 200, description = "Days, classes, sections and colours", body = TimetableChoices)),
    security(("session_cookie" = []))
)]
pub async fn timetable_choices(_: CurrentUser) -> Json<TimetableChoices> {
    Json(TimetableChoices::default())
}

#[utoipa::path(
    post,
    path = "/timetable",
    tag = "timetable",
    summary = "Add timetable entry",
    description = "Teachers always create entries for themselves; admins must name the teacher.",
    request_body = TimetableEntryCreate,
    responses(
        (status = 201, description = "Entry created", body = TimetableEntryResponse),
        (status = 400, description = "Invalid class, section, colour, times or teacher"),
        (status = 403, description = "Forbidden - teacher or admin access required"),
        (status = 409, description = "This time slot is already taken for the selected class and section"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_timetable_entry(
    State(state): State<AppState>,
    RequireStaff(current_user): RequireStaff,
    Json(create): Json<TimetableEntryCreate>,
) -> Result<(StatusCode, Json<TimetableEntryResponse>), Error> {
    let created = add_entry(&state, &current_user, create).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Validate and store a new entry. A taken slot surfaces as a 409 from the unique constraint.
pub async fn add_entry(state: &AppState, user: &CurrentUser, create: TimetableEntryCreate) -> Result<TimetableEntryResponse, Error> {
    let color = create.color.unwrap_or_else(|| DEFAULT_COLOR.to_string());
    check_class_and_section(&create.student_class, &create.section)?;
    check_color(&color)?;
    check_times(create.start_time, create.end_time)?;
    let subject = create.subject.trim().to_string();
    if subject.is_empty() {
        return Err(Error::BadRequest {
            message: "Subject is required".to_string(),
        });
    }

    let teacher_id = if user.is_admin {
        create.teacher_id.ok_or_else(|| Error::BadRequest {
            message: "A teacher must be selected".to_string(),
        })?
    } else {
        user.id
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    ensure_teacher(&mut conn, teacher_id).await?;
    let entry = TimetableEntries::new(&mut conn)
        .create(&TimetableEntryCreateDBRequest {
            day: create.day,
            start_time: create.start_time,
            end_time: create.end_time,
            subject,
            teacher_id,
            student_class: create.student_class,
            section: create.section,
            classroom: create.classroom.trim().to_string(),
            color,
        })
        .await?;
    info!(entry_id = entry.id, "Timetable entry created");

    let mut created = with_teachers(&mut conn, vec![entry]).await?;
    created.pop().ok_or(Error::Internal {
        operation: "load new timetable entry".to_string(),
    })
}

#[utoipa::path(
    patch,
    path = "/timetable/{id}",
    tag = "timetable",
    summary = "Edit timetable entry",
    params(("id" = i64, Path, description = "Timetable entry ID")),
    request_body = TimetableEntryUpdate,
    responses(
        (status = 200, description = "Updated entry", body = TimetableEntryResponse),
        (status = 400, description = "Invalid class, section, colour, times or teacher"),
        (status = 403, description = "Forbidden - not your entry"),
        (status = 404, description = "Entry not found"),
        (status = 409, description = "This time slot is already taken for the selected class and section"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_timetable_entry(
    State(state): State<AppState>,
    RequireStaff(current_user): RequireStaff,
    Path(id): Path<TimetableEntryId>,
    Json(update): Json<TimetableEntryUpdate>,
) -> Result<Json<TimetableEntryResponse>, Error> {
    Ok(Json(edit_entry(&state, &current_user, id, update).await?))
}

/// Entry `id` as `user` may edit it.
pub async fn entry_for_edit(state: &AppState, user: &CurrentUser, id: TimetableEntryId) -> Result<TimetableEntryResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let entry = editable_entry(&mut conn, user, id, Operation::Update).await?;
    with_teachers(&mut conn, vec![entry]).await?.pop().ok_or(Error::Internal {
        operation: "load timetable entry".to_string(),
    })
}

pub async fn edit_entry(
    state: &AppState,
    user: &CurrentUser,
    id: TimetableEntryId,
    update: TimetableEntryUpdate,
) -> Result<TimetableEntryResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let existing = editable_entry(&mut conn, user, id, Operation::Update).await?;

    check_class_and_section(
        update.student_class.as_deref().unwrap_or(&existing.student_class),
        update.section.as_deref().unwrap_or(&existing.section),
    )?;
    if let Some(color) = &update.color {
        check_color(color)?;
    }
    check_times(
        update.start_time.unwrap_or(existing.start_time),
        update.end_time.unwrap_or(existing.end_time),
    )?;

    let teacher_id = match update.teacher_id {
        Some(teacher_id) if user.is_admin => {
            ensure_teacher(&mut conn, teacher_id).await?;
            Some(teacher_id)
        }
        _ => None,
    };

    let entry = TimetableEntries::new(&mut conn)
        .update(
            id,
            &TimetableEntryUpdateDBRequest {
                day: update.day,
                start_time: update.start_time,
                end_time: update.end_time,
                subject: update.subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
                teacher_id,
                student_class: update.student_class,
                section: update.section,
                classroom: update.classroom.map(|c| c.trim().to_string()),
                color: update.color,
            },
        )
        .await?;

    let mut updated = with_teachers(&mut conn, vec![entry]).await?;
    updated.pop().ok_or(Error::Internal {
        operation: "load updated timetable entry".to_string(),
    })
}

#[utoipa::path(
    delete,
    path = "/timetable/{id}",
    tag = "timetable",
    summary = "Delete timetable entry",
    params(("id" = i64, Path, description = "Timetable entry ID")),
    responses(
        (status = 204, description = "Entry deleted"),
        (status = 403, description = "Forbidden - not your entry"),
        (status = 404, description = "Entry not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_timetable_entry(
    State(state): State<AppState>,
    RequireStaff(current_user): RequireStaff,
    Path(id): Path<TimetableEntryId>,
) -> Result<StatusCode, Error> {
    remove_entry(&state, &current_user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_entry(state: &AppState, user: &CurrentUser, id: TimetableEntryId) -> Result<(), Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    editable_entry(&mut conn, user, id, Operation::Delete).await?;
    TimetableEntries::new(&mut conn).delete(id).await?;
    info!(entry_id = id, "Timetable entry deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::users::{RoleFlag, UserDBResponse},
        test_utils::{create_test_app, create_test_student, create_test_user, session_header},
    };
    use serde_json::json;
    use sqlx::PgPool;

    fn slot(teacher_id: Option<UserId>, day: &str, start: &str, end: &str) -> serde_json::Value {
        json!({
            "day": day,
            "start_time": start,
            "end_time": end,
            "subject": "Chemistry",
            "teacher_id": teacher_id,
            "student_class": "Class 9",
            "section": "A",
            "classroom": "Lab 2"
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_slot_is_conflict(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;

        let response = app
            .post("/api/v1/timetable")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&slot(None, "Monday", "09:00:00", "09:45:00"))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: TimetableEntryResponse = response.json();
        assert_eq!(created.teacher_id, teacher.id);
        assert_eq!(created.color, DEFAULT_COLOR);

        let response = app
            .post("/api/v1/timetable")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&slot(None, "Monday", "09:00:00", "10:00:00"))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: serde_json::Value = response.json();
        assert_eq!(body["message"], "This time slot is already taken for the selected class and section");

        // A different day is a different slot
        app.post("/api/v1/timetable")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&slot(None, "Tuesday", "09:00:00", "09:45:00"))
            .await
            .assert_status(StatusCode::CREATED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_into_taken_slot_is_conflict(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;

        for (start, end) in [("09:00:00", "09:45:00"), ("10:00:00", "10:45:00")] {
            app.post("/api/v1/timetable")
                .add_header(session_header(&teacher).0, session_header(&teacher).1)
                .json(&slot(None, "Friday", start, end))
                .await
                .assert_status(StatusCode::CREATED);
        }
        let entries: Vec<TimetableEntryResponse> = app
            .get("/api/v1/timetable")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await
            .json();
        assert_eq!(entries.len(), 2);

        app.patch(&format!("/api/v1/timetable/{}", entries[1].id))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "start_time": "09:00:00", "end_time": "09:30:00" }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_validation(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, RoleFlag::Admin).await;
        let not_a_teacher = create_test_user(&pool, RoleFlag::Student).await;

        app.post("/api/v1/timetable")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&slot(None, "Monday", "09:00:00", "09:45:00"))
            .await
            .assert_status_bad_request();
        app.post("/api/v1/timetable")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&slot(Some(not_a_teacher.id), "Monday", "09:00:00", "09:45:00"))
            .await
            .assert_status_bad_request();

        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        app.post("/api/v1/timetable")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&slot(Some(teacher.id), "Monday", "10:00:00", "09:00:00"))
            .await
            .assert_status_bad_request();

        let mut bad_color = slot(Some(teacher.id), "Monday", "09:00:00", "09:45:00");
        bad_color["color"] = json!("#000000");
        app.post("/api/v1/timetable")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&bad_color)
            .await
            .assert_status_bad_request();
    }

    async fn visible(app: &axum_test::TestServer, user: &UserDBResponse) -> usize {
        app.get("/api/v1/timetable")
            .add_header(session_header(user).0, session_header(user).1)
            .await
            .json::<Vec<TimetableEntryResponse>>()
            .len()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_scoping_and_ownership(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, RoleFlag::Admin).await;
        let owner = create_test_user(&pool, RoleFlag::Teacher).await;
        let other = create_test_user(&pool, RoleFlag::Teacher).await;
        let (student, _) = create_test_student(&pool, "Class 9", "A").await;
        let (elsewhere, _) = create_test_student(&pool, "Class 9", "B").await;
        let unenrolled = create_test_user(&pool, RoleFlag::Student).await;

        let created: TimetableEntryResponse = app
            .post("/api/v1/timetable")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&slot(Some(owner.id), "Wednesday", "11:00:00", "11:45:00"))
            .await
            .json();

        assert_eq!(visible(&app, &student).await, 1);
        assert_eq!(visible(&app, &elsewhere).await, 0);
        assert_eq!(visible(&app, &unenrolled).await, 0);
        assert_eq!(visible(&app, &other).await, 0);
        assert_eq!(visible(&app, &owner).await, 1);

        app.delete(&format!("/api/v1/timetable/{}", created.id))
            .add_header(session_header(&other).0, session_header(&other).1)
            .await
            .assert_status_forbidden();
        app.delete(&format!("/api/v1/timetable/{}", created.id))
            .add_header(session_header(&student).0, session_header(&student).1)
            .await
            .assert_status_forbidden();
        app.delete(&format!("/api/v1/timetable/{}", created.id))
            .add_header(session_header(&owner).0, session_header(&owner).1)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_calendar_places_entry(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        app.post("/api/v1/timetable")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&slot(None, "Thursday", "13:30:00", "14:15:00"))
            .await
            .assert_status(StatusCode::CREATED);

        let calendar: CalendarResponse = app
            .get("/api/v1/timetable/calendar")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await
            .json();
        let one_pm = calendar.slots.iter().find(|s| s.hour == 13).unwrap();
        assert_eq!(one_pm.cells[3].len(), 1);
        assert_eq!(one_pm.cells[3][0].teacher.as_ref().unwrap().id, teacher.id);
    }
}
