//! Departments, subjects and holidays. Any signed-in user can read them; only admins write.

use crate::{
    AppState,
    api::models::{
        departments::{
            DepartmentCreate, DepartmentResponse, DepartmentUpdate, HolidayCreate, HolidayResponse, HolidayUpdate, ListHolidaysQuery,
            ListSubjectsQuery, SubjectCreate, SubjectResponse, SubjectUpdate,
        },
        pagination::{PaginatedResponse, Pagination},
        users::{CurrentUser, UserSummary},
    },
    auth::permissions::RequireAdmin,
    db::{
        handlers::{Departments, Holidays, Repository, Subjects, Users},
        models::departments::{
            DepartmentCreateDBRequest, DepartmentDBResponse, DepartmentUpdateDBRequest, HolidayCreateDBRequest, HolidayFilter,
            HolidayUpdateDBRequest, PageFilter, SubjectCreateDBRequest, SubjectDBResponse, SubjectFilter, SubjectUpdateDBRequest,
        },
    },
    errors::Error,
    types::{DepartmentId, HolidayId, SubjectId, UserId},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use sqlx::PgConnection;

fn required(value: &str, field: &str) -> Result<String, Error> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::BadRequest {
            message: format!("{field} is required"),
        })
    } else {
        Ok(value.to_string())
    }
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn not_found(resource: &str, id: i64) -> Error {
    Error::NotFound {
        resource: resource.to_string(),
        id: id.to_string(),
    }
}

/// Every id in `ids` must be a teacher.
async fn ensure_teachers(conn: &mut PgConnection, ids: &[UserId]) -> Result<(), Error> {
    if ids.is_empty() {
        return Ok(());
    }
    let users = Users::new(conn).get_bulk(ids.to_vec()).await?;
    match ids.iter().find(|id| !users.get(id).is_some_and(|u| u.is_teacher)) {
        Some(id) => Err(Error::BadRequest {
            message: format!("User {id} is not a teacher"),
        }),
        None => Ok(()),
    }
}

async fn with_heads(conn: &mut PgConnection, rows: Vec<DepartmentDBResponse>) -> Result<Vec<DepartmentResponse>, Error> {
    let head_ids = rows.iter().filter_map(|d| d.head_id).collect();
    let heads = Users::new(conn).get_bulk(head_ids).await?;
    Ok(rows
        .into_iter()
        .map(|d| {
            let head = d.head_id.and_then(|id| heads.get(&id)).map(UserSummary::from);
            DepartmentResponse::new(d, head)
        })
        .collect())
}

async fn with_head(conn: &mut PgConnection, row: DepartmentDBResponse) -> Result<DepartmentResponse, Error> {
    with_heads(conn, vec![row]).await?.pop().ok_or(Error::Internal {
        operation: "load department head".to_string(),
    })
}

async fn with_teacher_ids(conn: &mut PgConnection, rows: Vec<SubjectDBResponse>) -> Result<Vec<SubjectResponse>, Error> {
    let ids: Vec<SubjectId> = rows.iter().map(|s| s.id).collect();
    let mut teachers = Subjects::new(conn).teachers_for(&ids).await?;
    Ok(rows
        .into_iter()
        .map(|s| {
            let teacher_ids = teachers.remove(&s.id).unwrap_or_default();
            SubjectResponse::new(s, teacher_ids)
        })
        .collect())
}

// Departments

#[utoipa::path(
    get,
    path = "/departments",
    tag = "departments",
    summary = "List departments",
    params(Pagination),
    responses((status = 200, description = "Departments by name", body = PaginatedResponse<DepartmentResponse>)),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_departments(
    State(state): State<AppState>,
    _: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<PaginatedResponse<DepartmentResponse>>, Error> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut departments = Departments::new(&mut conn);
    let rows = departments.list(&PageFilter { skip, limit }).await?;
    let total = departments.count().await?;
    let data = with_heads(&mut conn, rows).await?;
    Ok(Json(PaginatedResponse::new(data, total, skip, limit)))
}

#[utoipa::path(
    get,
    path = "/departments/{id}",
    tag = "departments",
    summary = "Get department",
    params(("id" = i64, Path, description = "Department ID")),
    responses(
        (status = 200, description = "Department", body = DepartmentResponse),
        (status = 404, description = "Department not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_department(State(state): State<AppState>, _: CurrentUser, Path(id): Path<DepartmentId>) -> Result<Json<DepartmentResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let department = Departments::new(&mut conn)
        .get_by_id(id)
        .await?
        .ok_or_else(|| not_found("Department", id))?;
    Ok(Json(with_head(&mut conn, department).await?))
}

#[utoipa::path(
    post,
    path = "/departments",
    tag = "departments",
    summary = "Add department",
    request_body = DepartmentCreate,
    responses(
        (status = 201, description = "Department created", body = DepartmentResponse),
        (status = 400, description = "Missing name/code, or head is not a teacher"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 409, description = "A department with this code already exists"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_department(
    State(state): State<AppState>,
    _: RequireAdmin,
    Json(create): Json<DepartmentCreate>,
) -> Result<(StatusCode, Json<DepartmentResponse>), Error> {
    let name = required(&create.name, "Name")?;
    let code = required(&create.code, "Code")?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if let Some(head_id) = create.head_id {
        ensure_teachers(&mut conn, &[head_id]).await?;
    }
    let department = Departments::new(&mut conn)
        .create(&DepartmentCreateDBRequest {
            name,
            code,
            description: optional_text(create.description),
            head_id: create.head_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(with_head(&mut conn, department).await?)))
}

#[utoipa::path(
    patch,
    path = "/departments/{id}",
    tag = "departments",
    summary = "Edit department",
    params(("id" = i64, Path, description = "Department ID")),
    request_body = DepartmentUpdate,
    responses(
        (status = 200, description = "Updated department", body = DepartmentResponse),
        (status = 400, description = "Head is not a teacher"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Department not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_department(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(id): Path<DepartmentId>,
    Json(update): Json<DepartmentUpdate>,
) -> Result<Json<DepartmentResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if let Some(Some(head_id)) = update.head_id {
        ensure_teachers(&mut conn, &[head_id]).await?;
    }
    if Departments::new(&mut conn).get_by_id(id).await?.is_none() {
        return Err(not_found("Department", id));
    }
    let department = Departments::new(&mut conn)
        .update(
            id,
            &DepartmentUpdateDBRequest {
                name: optional_text(update.name),
                code: optional_text(update.code),
                description: update.description.map(optional_text),
                head_id: update.head_id,
            },
        )
        .await?;
    Ok(Json(with_head(&mut conn, department).await?))
}

#[utoipa::path(
    delete,
    path = "/departments/{id}",
    tag = "departments",
    summary = "Delete department",
    params(("id" = i64, Path, description = "Department ID")),
    responses(
        (status = 204, description = "Department deleted"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Department not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_department(State(state): State<AppState>, _: RequireAdmin, Path(id): Path<DepartmentId>) -> Result<StatusCode, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Departments::new(&mut conn).delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Department", id))
    }
}

// Subjects

#[utoipa::path(
    get,
    path = "/subjects",
    tag = "subjects",
    summary = "List subjects",
    params(ListSubjectsQuery),
    responses((status = 200, description = "Subjects by name", body = [SubjectResponse])),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_subjects(
    State(state): State<AppState>,
    _: CurrentUser,
    Query(query): Query<ListSubjectsQuery>,
) -> Result<Json<Vec<SubjectResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let rows = Subjects::new(&mut conn)
        .list(&SubjectFilter {
            department_id: query.department_id,
            teacher_id: query.teacher_id,
            skip,
            limit,
        })
        .await?;
    Ok(Json(with_teacher_ids(&mut conn, rows).await?))
}

#[utoipa::path(
    post,
    path = "/subjects",
    tag = "subjects",
    summary = "Add subject",
    request_body = SubjectCreate,
    responses(
        (status = 201, description = "Subject created", body = SubjectResponse),
        (status = 400, description = "Missing name/code, unknown department, or a non-teacher in teacher_ids"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 409, description = "A subject with this code already exists"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_subject(
    State(state): State<AppState>,
    _: RequireAdmin,
    Json(create): Json<SubjectCreate>,
) -> Result<(StatusCode, Json<SubjectResponse>), Error> {
    let name = required(&create.name, "Name")?;
    let code = required(&create.code, "Code")?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    ensure_teachers(&mut tx, &create.teacher_ids).await?;
    let subject = Subjects::new(&mut tx)
        .create(&SubjectCreateDBRequest {
            name,
            code,
            department_id: create.department_id,
            description: optional_text(create.description),
            teacher_ids: create.teacher_ids,
        })
        .await?;
    let mut created = with_teacher_ids(&mut tx, vec![subject]).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    created.pop().map(|s| (StatusCode::CREATED, Json(s))).ok_or(Error::Internal {
        operation: "load new subject".to_string(),
    })
}

#[utoipa::path(
    patch,
    path = "/subjects/{id}",
    tag = "subjects",
    summary = "Edit subject",
    description = "`teacher_ids`, when present, replaces the subject's whole teacher set.",
    params(("id" = i64, Path, description = "Subject ID")),
    request_body = SubjectUpdate,
    responses(
        (status = 200, description = "Updated subject", body = SubjectResponse),
        (status = 400, description = "A non-teacher in teacher_ids"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Subject not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_subject(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(id): Path<SubjectId>,
    Json(update): Json<SubjectUpdate>,
) -> Result<Json<SubjectResponse>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    if let Some(teacher_ids) = &update.teacher_ids {
        ensure_teachers(&mut tx, teacher_ids).await?;
    }
    if Subjects::new(&mut tx).get_by_id(id).await?.is_none() {
        return Err(not_found("Subject", id));
    }
    let subject = Subjects::new(&mut tx)
        .update(
            id,
            &SubjectUpdateDBRequest {
                name: optional_text(update.name),
                code: optional_text(update.code),
                department_id: update.department_id,
                description: update.description.map(optional_text),
                teacher_ids: update.teacher_ids,
            },
        )
        .await?;
    let mut updated = with_teacher_ids(&mut tx, vec![subject]).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    updated.pop().map(Json).ok_or(Error::Internal {
        operation: "load updated subject".to_string(),
    })
}

#[utoipa::path(
    delete,
    path = "/subjects/{id}",
    tag = "subjects",
    summary = "Delete subject",
    params(("id" = i64, Path, description = "Subject ID")),
    responses(
        (status = 204, description = "Subject deleted"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Subject not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_subject(State(state): State<AppState>, _: RequireAdmin, Path(id): Path<SubjectId>) -> Result<StatusCode, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Subjects::new(&mut conn).delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Subject", id))
    }
}

// Holidays

#[utoipa::path(
    get,
    path = "/holidays",
    tag = "holidays",
    summary = "List holidays",
    params(ListHolidaysQuery),
    responses((status = 200, description = "Holidays by date", body = [HolidayResponse])),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_holidays(
    State(state): State<AppState>,
    _: CurrentUser,
    Query(query): Query<ListHolidaysQuery>,
) -> Result<Json<Vec<HolidayResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let from_date = query.upcoming.unwrap_or(false).then(|| Utc::now().date_naive());
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let rows = Holidays::new(&mut conn).list(&HolidayFilter { from_date, skip, limit }).await?;
    Ok(Json(rows.into_iter().map(HolidayResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/holidays",
    tag = "holidays",
    summary = "Add holiday",
    request_body = HolidayCreate,
    responses(
        (status = 201, description = "Holiday created", body = HolidayResponse),
        (status = 400, description = "Missing name"),
        (status = 403, description = "Forbidden - admin access required"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_holiday(
    State(state): State<AppState>,
    _: RequireAdmin,
    Json(create): Json<HolidayCreate>,
) -> Result<(StatusCode, Json<HolidayResponse>), Error> {
    let name = required(&create.name, "Name")?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let holiday = Holidays::new(&mut conn)
        .create(&HolidayCreateDBRequest {
            name,
            date: create.date,
            description: optional_text(create.description),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(HolidayResponse::from(holiday))))
}

#[utoipa::path(
    patch,
    path = "/holidays/{id}",
    tag = "holidays",
    summary = "Edit holiday",
    params(("id" = i64, Path, description = "Holiday ID")),
    request_body = HolidayUpdate,
    responses(
        (status = 200, description = "Updated holiday", body = HolidayResponse),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Holiday not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_holiday(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(id): Path<HolidayId>,
    Json(update): Json<HolidayUpdate>,
) -> Result<Json<HolidayResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Holidays::new(&mut conn).get_by_id(id).await?.is_none() {
        return Err(not_found("Holiday", id));
    }
    let holiday = Holidays::new(&mut conn)
        .update(
            id,
            &HolidayUpdateDBRequest {
                name: optional_text(update.name),
                date: update.date,
                description: update.description.map(optional_text),
            },
        )
        .await?;
    Ok(Json(HolidayResponse::from(holiday)))
}

#[utoipa::path(
    delete,
    path = "/holidays/{id}",
    tag = "holidays",
    summary = "Delete holiday",
    params(("id" = i64, Path, description = "Holiday ID")),
    responses(
        (status = 204, description = "Holiday deleted"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Holiday not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_holiday(State(state): State<AppState>, _: RequireAdmin, Path(id): Path<HolidayId>) -> Result<StatusCode, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Holidays::new(&mut conn).delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Holiday", id))
    }
}
