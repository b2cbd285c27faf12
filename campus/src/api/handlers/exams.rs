//! Exam scheduling.
//!
//! A teacher may have at most `scheduling.max_exams_per_teacher_per_day` exams on one date. The
//! check runs inside the same transaction as the write, after locking the teacher's user row, so
//! two concurrent submissions for one teacher are serialised and cannot both pass.

use crate::{
    AppState,
    api::{
        handlers::check_class_and_section,
        models::{
            exams::{ExamCreate, ExamCreated, ExamResponse, ExamUpdate, ListExamsQuery},
            pagination::PaginatedResponse,
            users::{CurrentUser, UserRole, UserSummary},
        },
    },
    auth::permissions::RequireStaff,
    db::{
        handlers::{Exams, Notifications, Repository, Students, Users},
        models::exams::{ExamCreateDBRequest, ExamDBResponse, ExamFilter, ExamUpdateDBRequest},
    },
    errors::Error,
    types::{DEFAULT_SECTION, ExamId, Operation, Resource, UserId},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use sqlx::PgConnection;
use tracing::info;

/// Lock the teacher's row, then make sure they have room for another exam on `date`.
///
/// Must run inside the transaction that writes the exam.
async fn reserve_exam_slot(
    conn: &mut PgConnection,
    teacher_id: UserId,
    date: NaiveDate,
    excluding: Option<ExamId>,
    max_per_day: i64,
) -> Result<(), Error> {
    let teacher = Users::new(&mut *conn).lock_for_update(teacher_id).await?;
    if !teacher.is_some_and(|t| t.is_teacher) {
        return Err(Error::BadRequest {
            message: "The selected teacher is not a teacher".to_string(),
        });
    }

    let scheduled = Exams::new(conn).count_for_teacher_on(teacher_id, date, excluding).await?;
    if scheduled >= max_per_day {
        info!(teacher_id = %teacher_id, %date, scheduled, "Exam limit reached");
        return Err(Error::Conflict {
            message: format!("Teacher already has {max_per_day} exams scheduled on this day"),
        });
    }
    Ok(())
}

async fn with_teachers(conn: &mut PgConnection, rows: Vec<ExamDBResponse>) -> Result<Vec<ExamResponse>, Error> {
    let mut ids: Vec<UserId> = rows.iter().map(|r| r.teacher_id).collect();
    ids.sort();
    ids.dedup();
    let teachers = Users::new(conn).get_bulk(ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| ExamResponse {
            teacher: teachers.get(&row.teacher_id).map(UserSummary::from),
            ..ExamResponse::from(row)
        })
        .collect())
}

async fn with_teacher(conn: &mut PgConnection, row: ExamDBResponse) -> Result<ExamResponse, Error> {
    with_teachers(conn, vec![row]).await?.pop().ok_or(Error::Internal {
        operation: "load exam teacher".to_string(),
    })
}

fn check_exam_times(start: chrono::NaiveTime, end: chrono::NaiveTime) -> Result<(), Error> {
    if end <= start {
        return Err(Error::BadRequest {
            message: "End time must be after start time".to_string(),
        });
    }
    Ok(())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[utoipa::path(
    get,
    path = "/exams",
    tag = "exams",
    summary = "List exams",
    description = "Students see exams for their class (their section or the whole class), teachers the exams \
                   they own, admins every exam. Ordered by date, then start time.",
    params(ListExamsQuery),
    responses(
        (status = 200, description = "Paginated exams", body = PaginatedResponse<ExamResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_exams(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListExamsQuery>,
) -> Result<Json<PaginatedResponse<ExamResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    Ok(Json(visible_exams(&state, &current_user, query.from_date, skip, limit).await?))
}

/// One page of the exams `user` may see, from `from_date` onwards when given.
pub async fn visible_exams(
    state: &AppState,
    user: &CurrentUser,
    from_date: Option<NaiveDate>,
    skip: i64,
    limit: i64,
) -> Result<PaginatedResponse<ExamResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let mut filter = ExamFilter {
        from_date,
        skip,
        limit,
        ..Default::default()
    };
    match user.primary_role() {
        Some(UserRole::Admin) => {}
        Some(UserRole::Teacher) => filter.teacher_id = Some(user.id),
        Some(UserRole::Student) | None => match Students::new(&mut conn).get_by_user_id(user.id).await? {
            Some(student) => {
                filter.student_class = Some(student.student_class);
                filter.section_or_whole_class = Some(student.section);
            }
            None => return Ok(PaginatedResponse::new(Vec::new(), 0, skip, limit)),
        },
    }

    let mut exams = Exams::new(&mut conn);
    let rows = exams.list(&filter).await?;
    let total = exams.count(&filter).await?;
    let data = with_teachers(&mut conn, rows).await?;
    Ok(PaginatedResponse::new(data, total, skip, limit))
}

#[utoipa::path(
    get,
    path = "/exams/{id}",
    tag = "exams",
    summary = "Get exam",
    params(("id" = i64, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Exam", body = ExamResponse),
        (status = 404, description = "Exam not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_exam(State(state): State<AppState>, _: CurrentUser, Path(id): Path<ExamId>) -> Result<Json<ExamResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let exam = Exams::new(&mut conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Exam".to_string(),
        id: id.to_string(),
    })?;
    Ok(Json(with_teacher(&mut conn, exam).await?))
}

#[utoipa::path(
    post,
    path = "/exams",
    tag = "exams",
    summary = "Schedule exam",
    description = "Teachers schedule exams for themselves; admins must name the teacher. Every student in the \
                   matching class and section is notified.",
    request_body = ExamCreate,
    responses(
        (status = 201, description = "Exam scheduled", body = ExamCreated),
        (status = 400, description = "Invalid class, section, times or teacher"),
        (status = 403, description = "Forbidden - teacher or admin access required"),
        (status = 409, description = "Teacher already has the maximum number of exams on this day"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_exam(
    State(state): State<AppState>,
    RequireStaff(current_user): RequireStaff,
    Json(create): Json<ExamCreate>,
) -> Result<(StatusCode, Json<ExamCreated>), Error> {
    let created = schedule_exam(&state, &current_user, create).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Validate, check the daily limit, store and fan out, all in one transaction.
pub async fn schedule_exam(state: &AppState, user: &CurrentUser, create: ExamCreate) -> Result<ExamCreated, Error> {
    let section = blank_to_none(create.section);
    check_class_and_section(&create.student_class, section.as_deref().unwrap_or(DEFAULT_SECTION))?;
    check_exam_times(create.start_time, create.end_time)?;
    let (name, subject) = (create.name.trim().to_string(), create.subject.trim().to_string());
    if name.is_empty() || subject.is_empty() {
        return Err(Error::BadRequest {
            message: "Please fill in all required fields".to_string(),
        });
    }

    let teacher_id = if user.is_admin {
        create.teacher_id.ok_or_else(|| Error::BadRequest {
            message: "A teacher must be selected".to_string(),
        })?
    } else {
        user.id
    };

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    reserve_exam_slot(
        &mut tx,
        teacher_id,
        create.date,
        None,
        state.config.scheduling.max_exams_per_teacher_per_day,
    )
    .await?;

    let exam = Exams::new(&mut tx)
        .create(&ExamCreateDBRequest {
            name,
            subject,
            date: create.date,
            start_time: create.start_time,
            end_time: create.end_time,
            student_class: create.student_class,
            section,
            teacher_id,
            room: create.room.trim().to_string(),
            max_marks: create.max_marks,
            description: blank_to_none(create.description),
        })
        .await?;
    let notified_students = Notifications::new(&mut tx).fan_out_exam(&exam).await?;
    let exam = with_teacher(&mut tx, exam).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!(exam_id = exam.id, notified_students, "Exam scheduled");
    Ok(ExamCreated { exam, notified_students })
}

#[utoipa::path(
    patch,
    path = "/exams/{id}",
    tag = "exams",
    summary = "Edit exam",
    description = "Changing the date or teacher re-runs the daily limit, not counting this exam. \
                   Send `null` for `section` or `description` to clear them.",
    params(("id" = i64, Path, description = "Exam ID")),
    request_body = ExamUpdate,
    responses(
        (status = 200, description = "Updated exam", body = ExamResponse),
        (status = 400, description = "Invalid class, section, times or teacher"),
        (status = 403, description = "Forbidden - not your exam"),
        (status = 404, description = "Exam not found"),
        (status = 409, description = "Teacher already has the maximum number of exams on this day"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_exam(
    State(state): State<AppState>,
    RequireStaff(current_user): RequireStaff,
    Path(id): Path<ExamId>,
    Json(update): Json<ExamUpdate>,
) -> Result<Json<ExamResponse>, Error> {
    Ok(Json(edit_exam(&state, &current_user, id, update).await?))
}

/// Exam `id` as `user` may edit it.
pub async fn exam_for_edit(state: &AppState, user: &CurrentUser, id: ExamId) -> Result<ExamResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let exam = owned_exam(&mut conn, user, id, Operation::Update).await?;
    with_teacher(&mut conn, exam).await
}

pub async fn edit_exam(state: &AppState, user: &CurrentUser, id: ExamId, update: ExamUpdate) -> Result<ExamResponse, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let existing = owned_exam(&mut tx, user, id, Operation::Update).await?;

    let section = update.section.map(blank_to_none);
    let effective_section = match &section {
        Some(s) => s.clone(),
        None => existing.section.clone(),
    };
    check_class_and_section(
        update.student_class.as_deref().unwrap_or(&existing.student_class),
        effective_section.as_deref().unwrap_or(DEFAULT_SECTION),
    )?;
    check_exam_times(
        update.start_time.unwrap_or(existing.start_time),
        update.end_time.unwrap_or(existing.end_time),
    )?;

    let teacher_id = update.teacher_id.filter(|_| user.is_admin);
    let target_teacher = teacher_id.unwrap_or(existing.teacher_id);
    let target_date = update.date.unwrap_or(existing.date);
    if target_teacher != existing.teacher_id || target_date != existing.date {
        reserve_exam_slot(
            &mut tx,
            target_teacher,
            target_date,
            Some(id),
            state.config.scheduling.max_exams_per_teacher_per_day,
        )
        .await?;
    }

    let exam = Exams::new(&mut tx)
        .update(
            id,
            &ExamUpdateDBRequest {
                name: blank_to_none(update.name),
                subject: blank_to_none(update.subject),
                date: update.date,
                start_time: update.start_time,
                end_time: update.end_time,
                student_class: update.student_class,
                section,
                teacher_id,
                room: blank_to_none(update.room),
                max_marks: update.max_marks,
                description: update.description.map(blank_to_none),
            },
        )
        .await?;
    let exam = with_teacher(&mut tx, exam).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(exam)
}

#[utoipa::path(
    delete,
    path = "/exams/{id}",
    tag = "exams",
    summary = "Delete exam",
    params(("id" = i64, Path, description = "Exam ID")),
    responses(
        (status = 204, description = "Exam deleted"),
        (status = 403, description = "Forbidden - not your exam"),
        (status = 404, description = "Exam not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_exam(State(state): State<AppState>, RequireStaff(current_user): RequireStaff, Path(id): Path<ExamId>) -> Result<StatusCode, Error> {
    remove_exam(&state, &current_user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_exam(state: &AppState, user: &CurrentUser, id: ExamId) -> Result<(), Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    owned_exam(&mut conn, user, id, Operation::Delete).await?;
    Exams::new(&mut conn).delete(id).await?;
    info!(exam_id = id, "Exam deleted");
    Ok(())
}

/// Exam `id` if `user` owns it or is an admin.
async fn owned_exam(conn: &mut PgConnection, user: &CurrentUser, id: ExamId, action: Operation) -> Result<ExamDBResponse, Error> {
    let exam = Exams::new(conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Exam".to_string(),
        id: id.to_string(),
    })?;
    if !user.is_admin && exam.teacher_id != user.id {
        return Err(Error::InsufficientPermissions {
            action,
            resource: Resource::Exams,
        });
    }
    Ok(exam)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::{notifications::NotificationFilter, users::RoleFlag},
        test_utils::{create_test_app, create_test_app_with_config, create_test_config, create_test_student, create_test_user, session_header},
    };
    use serde_json::json;
    use sqlx::PgPool;
    use std::future::IntoFuture;

    fn exam(date: &str, start: &str, section: Option<&str>) -> serde_json::Value {
        json!({
            "name": "Midterm",
            "subject": "Biology",
            "date": date,
            "start_time": start,
            "end_time": "15:00:00",
            "student_class": "Class 6",
            "section": section,
            "room": "Hall"
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_third_exam_on_same_day_is_rejected(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;

        for start in ["09:00:00", "11:00:00"] {
            app.post("/api/v1/exams")
                .add_header(session_header(&teacher).0, session_header(&teacher).1)
                .json(&exam("2031-03-10", start, Some("A")))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let response = app
            .post("/api/v1/exams")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&exam("2031-03-10", "13:00:00", Some("A")))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: serde_json::Value = response.json();
        assert_eq!(body["message"], "Teacher already has 2 exams scheduled on this day");

        app.post("/api/v1/exams")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&exam("2031-03-11", "13:00:00", Some("A")))
            .await
            .assert_status(StatusCode::CREATED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_creates_for_one_teacher_respect_the_limit(pool: PgPool) {
        let config = create_test_config();
        let limit = config.scheduling.max_exams_per_teacher_per_day;
        let app = create_test_app_with_config(pool.clone(), config).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let (name, value) = session_header(&teacher);

        let submit = |start: &str| {
            app.post("/api/v1/exams")
                .add_header(name.clone(), value.clone())
                .json(&exam("2031-05-20", start, None))
                .into_future()
        };
        let (a, b, c, d, e, f) = tokio::join!(
            submit("08:00:00"),
            submit("09:00:00"),
            submit("10:00:00"),
            submit("11:00:00"),
            submit("12:00:00"),
            submit("13:00:00"),
        );
        let statuses = [a, b, c, d, e, f].map(|response| response.status_code());

        let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
        let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
        assert_eq!(created as i64, limit, "{statuses:?}");
        assert_eq!(conflicts, statuses.len() - created, "{statuses:?}");

        let mut conn = pool.acquire().await.unwrap();
        let date = NaiveDate::from_ymd_opt(2031, 5, 20).unwrap();
        let scheduled = Exams::new(&mut conn).count_for_teacher_on(teacher.id, date, None).await.unwrap();
        assert_eq!(scheduled, limit);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_moving_an_exam_rechecks_the_limit(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;

        let mut ids = Vec::new();
        for (date, start) in [("2031-04-01", "09:00:00"), ("2031-04-01", "11:00:00"), ("2031-04-02", "09:00:00")] {
            let created: ExamCreated = app
                .post("/api/v1/exams")
                .add_header(session_header(&teacher).0, session_header(&teacher).1)
                .json(&exam(date, start, None))
                .await
                .json();
            ids.push(created.exam.id);
        }

        app.patch(&format!("/api/v1/exams/{}", ids[2]))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "date": "2031-04-01" }))
            .await
            .assert_status(StatusCode::CONFLICT);

        // Editing an exam on a full day without moving it is fine
        let response = app
            .patch(&format!("/api/v1/exams/{}", ids[0]))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "room": "Gym", "description": "Bring a pencil" }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<ExamResponse>().room, "Gym");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exam_notifies_matching_students(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let (in_section, _) = create_test_student(&pool, "Class 6", "A").await;
        let (other_section, _) = create_test_student(&pool, "Class 6", "B").await;
        let (other_class, _) = create_test_student(&pool, "Class 7", "A").await;

        let created: ExamCreated = app
            .post("/api/v1/exams")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&exam("2031-05-05", "09:00:00", Some("A")))
            .await
            .json();
        assert_eq!(created.notified_students, 1);

        let mut conn = pool.acquire().await.unwrap();
        let mut notifications = Notifications::new(&mut conn);
        let received = notifications
            .list(&NotificationFilter {
                user_id: in_section.id,
                unread_only: true,
                skip: 0,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].title, "New Exam: Midterm");
        assert_eq!(received[0].related_url.as_deref(), Some("/exams"));
        assert_eq!(notifications.count(other_section.id, false).await.unwrap(), 0);
        assert_eq!(notifications.count(other_class.id, false).await.unwrap(), 0);

        // Whole-class exam reaches every section
        let created: ExamCreated = app
            .post("/api/v1/exams")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&exam("2031-05-06", "09:00:00", None))
            .await
            .json();
        assert_eq!(created.notified_students, 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_listing_is_scoped_and_deletion_owned(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, RoleFlag::Admin).await;
        let owner = create_test_user(&pool, RoleFlag::Teacher).await;
        let other = create_test_user(&pool, RoleFlag::Teacher).await;
        let (student, _) = create_test_student(&pool, "Class 6", "C").await;

        let mut for_owner = exam("2031-06-01", "09:00:00", Some("C"));
        for_owner["teacher_id"] = json!(owner.id);
        let created: ExamCreated = app
            .post("/api/v1/exams")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&for_owner)
            .await
            .json();
        assert_eq!(created.exam.teacher.as_ref().unwrap().id, owner.id);

        // An admin has to name a teacher
        app.post("/api/v1/exams")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&exam("2031-06-01", "11:00:00", None))
            .await
            .assert_status_bad_request();

        for (user, expected) in [(&student, 1), (&owner, 1), (&other, 0), (&admin, 1)] {
            let page: PaginatedResponse<ExamResponse> = app
                .get("/api/v1/exams")
                .add_header(session_header(user).0, session_header(user).1)
                .await
                .json();
            assert_eq!(page.total_count, expected);
        }

        app.delete(&format!("/api/v1/exams/{}", created.exam.id))
            .add_header(session_header(&other).0, session_header(&other).1)
            .await
            .assert_status_forbidden();
        app.delete(&format!("/api/v1/exams/{}", created.exam.id))
            .add_header(session_header(&owner).0, session_header(&owner).1)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }
}
