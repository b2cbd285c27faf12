use crate::{
    AppState,
    api::{
        handlers::check_class_and_section,
        models::{
            pagination::PaginatedResponse,
            students::{ListStudentsQuery, StudentCreate, StudentResponse, StudentUpdate},
            users::CurrentUser,
        },
    },
    auth::permissions::{RequireAdmin, RequireStaff},
    db::{
        handlers::{Notifications, Parents, Repository, Students},
        models::{
            notifications::NotificationContent,
            students::{ParentCreateDBRequest, ParentUpdateDBRequest, StudentCreateDBRequest, StudentDBResponse, StudentFilter, StudentUpdateDBRequest},
        },
    },
    errors::Error,
    types::{DEFAULT_CLASS, DEFAULT_SECTION, Operation, Resource},
    uploads::UploadKind,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;
use tracing::info;

async fn student_by_slug(conn: &mut PgConnection, slug: &str) -> Result<StudentDBResponse, Error> {
    Students::new(conn).get_by_slug(slug).await?.ok_or_else(|| Error::NotFound {
        resource: "Student".to_string(),
        id: slug.to_string(),
    })
}

async fn with_parent(conn: &mut PgConnection, student: StudentDBResponse) -> Result<StudentResponse, Error> {
    let parent = Parents::new(conn).get_by_id(student.parent_id).await?;
    let response = StudentResponse::from(student);
    Ok(match parent {
        Some(parent) => response.with_parent(parent),
        None => response,
    })
}

/// List students
#[utoipa::path(
    get,
    path = "/students",
    tag = "students",
    params(ListStudentsQuery),
    responses(
        (status = 200, description = "Paginated students", body = PaginatedResponse<StudentResponse>),
        (status = 403, description = "Forbidden - teacher or admin access required"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_students(
    State(state): State<AppState>,
    _: RequireStaff,
    Query(query): Query<ListStudentsQuery>,
) -> Result<Json<PaginatedResponse<StudentResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let filter = StudentFilter {
        student_class: query.student_class.filter(|c| !c.is_empty()),
        section: query.section.filter(|s| !s.is_empty()),
        search: query.search.filter(|s| !s.trim().is_empty()),
        skip,
        limit,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut students = Students::new(&mut conn);
    let rows = students.list(&filter).await?;
    let total = students.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        rows.into_iter().map(StudentResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

/// Add a student
///
/// Creates the parent record, then the student with a unique slug, then tells the acting admin.
/// All three happen in one transaction.
#[utoipa::path(
    post,
    path = "/students",
    tag = "students",
    request_body = StudentCreate,
    responses(
        (status = 201, description = "Student created", body = StudentResponse),
        (status = 400, description = "Missing fields or invalid class/section"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 409, description = "Student ID or admission number already in use"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_student(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(create): Json<StudentCreate>,
) -> Result<(StatusCode, Json<StudentResponse>), Error> {
    let required = |v: &str| !v.trim().is_empty();
    if !(required(&create.first_name) && required(&create.last_name) && required(&create.student_id) && required(&create.admission_number)) {
        return Err(Error::BadRequest {
            message: "Please fill in all required fields".to_string(),
        });
    }
    check_class_and_section(
        create.student_class.as_deref().unwrap_or(DEFAULT_CLASS),
        create.section.as_deref().unwrap_or(DEFAULT_SECTION),
    )?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let parent = Parents::new(&mut tx).create(&ParentCreateDBRequest::from(create.parent)).await?;
    let student = Students::new(&mut tx)
        .create(&StudentCreateDBRequest {
            user_id: create.user_id,
            parent_id: parent.id,
            first_name: create.first_name.trim().to_string(),
            last_name: create.last_name.trim().to_string(),
            student_id: create.student_id.trim().to_string(),
            gender: create.gender,
            date_of_birth: create.date_of_birth,
            student_class: create.student_class,
            section: create.section,
            joining_date: create.joining_date,
            mobile_number: create.mobile_number,
            admission_number: create.admission_number.trim().to_string(),
            student_image: None,
        })
        .await?;
    Notifications::new(&mut tx)
        .create(
            admin.id,
            &NotificationContent::student_added(&student.first_name, &student.last_name, &student.slug),
        )
        .await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(slug = %student.slug, "Student added");

    Ok((StatusCode::CREATED, Json(StudentResponse::from(student).with_parent(parent))))
}

/// View a student
///
/// Staff can view any student; a student can view their own record.
#[utoipa::path(
    get,
    path = "/students/{slug}",
    tag = "students",
    params(("slug" = String, Path, description = "Student slug")),
    responses(
        (status = 200, description = "Student with parent details", body = StudentResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Student not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_student(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(slug): Path<String>,
) -> Result<Json<StudentResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let student = student_by_slug(&mut conn, &slug).await?;

    let own_record = student.user_id == Some(current_user.id);
    if !current_user.is_staff() && !own_record {
        return Err(Error::InsufficientPermissions {
            action: Operation::Read,
            resource: Resource::Students,
        });
    }
    Ok(Json(with_parent(&mut conn, student).await?))
}

/// Edit a student
///
/// The slug is kept as it was, even when the name or student ID changes.
#[utoipa::path(
    patch,
    path = "/students/{slug}",
    tag = "students",
    params(("slug" = String, Path, description = "Student slug")),
    request_body = StudentUpdate,
    responses(
        (status = 200, description = "Updated student", body = StudentResponse),
        (status = 400, description = "Invalid class/section"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Student not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_student(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(slug): Path<String>,
    Json(update): Json<StudentUpdate>,
) -> Result<Json<StudentResponse>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let existing = student_by_slug(&mut tx, &slug).await?;

    check_class_and_section(
        update.student_class.as_deref().unwrap_or(&existing.student_class),
        update.section.as_deref().unwrap_or(&existing.section),
    )?;

    let student = Students::new(&mut tx).update(existing.id, &update.db_request()).await?;
    let parent = match update.parent {
        Some(fields) => Parents::new(&mut tx).update(student.parent_id, &ParentUpdateDBRequest::from(fields)).await?,
        None => Parents::new(&mut tx).get_by_id(student.parent_id).await?.ok_or(Error::Internal {
            operation: format!("load parent of student {}", student.slug),
        })?,
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(StudentResponse::from(student).with_parent(parent)))
}

/// Delete a student
///
/// Removes the student and their parent record and tells the acting admin.
#[utoipa::path(
    delete,
    path = "/students/{slug}",
    tag = "students",
    params(("slug" = String, Path, description = "Student slug")),
    responses(
        (status = 204, description = "Student deleted"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Student not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_student(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(slug): Path<String>,
) -> Result<StatusCode, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let student = student_by_slug(&mut tx, &slug).await?;

    Students::new(&mut tx).delete(student.id).await?;
    Notifications::new(&mut tx)
        .create(admin.id, &NotificationContent::student_deleted(&student.first_name, &student.last_name))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    if let Some(image) = &student.student_image {
        state.uploads().remove(image).await?;
    }
    info!(slug = %student.slug, "Student deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Upload a student photo
#[utoipa::path(
    post,
    path = "/students/{slug}/image",
    tag = "students",
    params(("slug" = String, Path, description = "Student slug")),
    request_body(content_type = "multipart/form-data", description = "`student_image`: image file"),
    responses(
        (status = 200, description = "Updated student", body = StudentResponse),
        (status = 400, description = "Missing, oversized or non-image file"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Student not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn upload_student_image(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(slug): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<StudentResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let existing = student_by_slug(&mut conn, &slug).await?;
    drop(conn);

    let uploads = state.uploads();
    let stored = uploads
        .store_single(&mut multipart, "student_image", UploadKind::StudentImages)
        .await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let updated = Students::new(&mut conn)
        .update(
            existing.id,
            &StudentUpdateDBRequest {
                student_image: Some(stored.relative_path.clone()),
                ..Default::default()
            },
        )
        .await;
    let student = match updated {
        Ok(student) => student,
        Err(e) => {
            uploads.discard(&stored.relative_path).await;
            return Err(e.into());
        }
    };
    if let Some(previous) = existing.student_image {
        uploads.discard(&previous).await;
    }

    Ok(Json(with_parent(&mut conn, student).await?))
}
