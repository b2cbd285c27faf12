//! Handlers for the caller's own profile and for teacher accounts.

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        relationships::AssignedTeacher,
        users::{CurrentUser, ListUsersQuery, ProfileUpdate, TeacherCreate, TeacherUpdate, UserResponse, UserSummary},
    },
    auth::{password, permissions::RequireAdmin},
    db::{
        handlers::{Relationships, Repository, Users},
        models::{
            relationships::RelationshipFilter,
            users::{RoleFlag, UserCreateDBRequest, UserFilter, UserUpdateDBRequest},
        },
    },
    errors::Error,
    types::UserId,
    uploads::UploadKind,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::info;

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// GET /users/current - The caller's profile
#[utoipa::path(
    get,
    path = "/users/current",
    tag = "users",
    summary = "Get own profile",
    responses(
        (status = 200, description = "Profile of the caller", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_current_user(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).get_by_id(current_user.id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: current_user.id.to_string(),
    })?;
    Ok(Json(UserResponse::from(user)))
}

// PATCH /users/current - Edit own profile
#[utoipa::path(
    patch,
    path = "/users/current",
    tag = "users",
    summary = "Edit own profile",
    description = "Everyone can edit their name and bio. Teachers can also edit phone, department, qualification and specialization; \
                   those fields are ignored for other roles.",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Updated profile", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_current_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserResponse>, Error> {
    let mut request = UserUpdateDBRequest {
        first_name: trimmed(update.first_name),
        last_name: trimmed(update.last_name),
        bio: update.bio,
        ..Default::default()
    };
    if current_user.is_teacher {
        request.phone = trimmed(update.phone);
        request.department = trimmed(update.department);
        request.qualification = trimmed(update.qualification);
        request.specialization = trimmed(update.specialization);
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).update(current_user.id, &request).await?;
    Ok(Json(UserResponse::from(user)))
}

// POST /users/current/profile-picture - Upload a profile picture
#[utoipa::path(
    post,
    path = "/users/current/profile-picture",
    tag = "users",
    summary = "Upload profile picture",
    description = "Multipart upload with a single image in the `profile_picture` field. Replaces any previous picture.",
    request_body(content_type = "multipart/form-data", description = "`profile_picture`: image file"),
    responses(
        (status = 200, description = "Updated profile", body = UserResponse),
        (status = 400, description = "Missing, empty, oversized or non-image file"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    current_user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<UserResponse>, Error> {
    let uploads = state.uploads();
    let stored = uploads
        .store_single(&mut multipart, "profile_picture", UploadKind::ProfilePictures)
        .await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut conn);
    let previous = users.get_by_id(current_user.id).await?.and_then(|u| u.profile_picture);
    let updated = users
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                profile_picture: Some(stored.relative_path.clone()),
                ..Default::default()
            },
        )
        .await;
    let user = match updated {
        Ok(user) => user,
        Err(e) => {
            uploads.discard(&stored.relative_path).await;
            return Err(e.into());
        }
    };

    if let Some(previous) = previous {
        uploads.discard(&previous).await;
    }
    Ok(Json(UserResponse::from(user)))
}

// GET /users/current/teachers - The caller's assigned teachers
#[utoipa::path(
    get,
    path = "/users/current/teachers",
    tag = "users",
    summary = "List my teachers",
    description = "Teachers assigned to the calling student, one entry per subject.",
    responses(
        (status = 200, description = "Assigned teachers", body = [AssignedTeacher]),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_my_teachers(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Vec<AssignedTeacher>>, Error> {
    Ok(Json(assigned_teachers(&state, current_user.id).await?))
}

/// Teachers assigned to a student. Shared with the student teachers page.
pub(crate) async fn assigned_teachers(state: &AppState, student_id: UserId) -> Result<Vec<AssignedTeacher>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let relationships = Relationships::new(&mut conn)
        .list(&RelationshipFilter {
            student_id: Some(student_id),
            skip: 0,
            limit: i64::from(i32::MAX),
            ..Default::default()
        })
        .await?;
    let teacher_ids = relationships.iter().map(|r| r.teacher_id).collect();
    let teachers = Users::new(&mut conn).get_bulk(teacher_ids).await?;

    Ok(relationships
        .into_iter()
        .filter_map(|r| {
            let teacher = teachers.get(&r.teacher_id)?;
            Some(AssignedTeacher {
                teacher: UserSummary::from(teacher),
                subject: r.subject,
                department: teacher.department.clone(),
                phone: teacher.phone.clone(),
            })
        })
        .collect())
}

/// Everyone with `role` (everyone at all when `None`), for the pick lists on the HTML forms.
pub(crate) async fn user_choices(state: &AppState, role: Option<RoleFlag>) -> Result<Vec<UserSummary>, Error> {
    let mut filter = UserFilter::new(0, i64::from(i32::MAX));
    if let Some(role) = role {
        filter = filter.with_role(role);
    }
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let users = Users::new(&mut conn).list(&filter).await?;
    Ok(users.iter().map(UserSummary::from).collect())
}

// GET /teachers - List teachers
#[utoipa::path(
    get,
    path = "/teachers",
    tag = "teachers",
    summary = "List teachers",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Paginated teachers", body = PaginatedResponse<UserResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_teachers(
    State(state): State<AppState>,
    _: CurrentUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<PaginatedResponse<UserResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let filter = UserFilter::new(skip, limit).with_role(RoleFlag::Teacher).with_search(query.search);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut conn);
    let teachers = users.list(&filter).await?;
    let total = users.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        teachers.into_iter().map(UserResponse::from).collect(),
        total,
        skip,
        limit,
    )))
}

// POST /teachers - Add a teacher (admin only)
#[utoipa::path(
    post,
    path = "/teachers",
    tag = "teachers",
    summary = "Add teacher",
    description = "First name, last name, email and password are required. The email doubles as the username.",
    request_body = TeacherCreate,
    responses(
        (status = 201, description = "Teacher created", body = UserResponse),
        (status = 400, description = "Missing required fields or invalid password"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 409, description = "Email already exists"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_teacher(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(create): Json<TeacherCreate>,
) -> Result<(StatusCode, Json<UserResponse>), Error> {
    let (Some(first_name), Some(last_name), Some(email), Some(password)) = (
        trimmed(create.first_name),
        trimmed(create.last_name),
        trimmed(create.email),
        create.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(Error::BadRequest {
            message: "Please fill in all required fields".to_string(),
        });
    };
    password::validate_password(&password, &state.config.auth.password)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    if Users::new(&mut tx).get_user_by_email(&email).await?.is_some() {
        return Err(Error::Conflict {
            message: "Email already exists".to_string(),
        });
    }

    let password_hash = password::hash_string_blocking(password).await?;
    let teacher = Users::new(&mut tx)
        .create(&UserCreateDBRequest {
            username: email.clone(),
            email,
            password_hash: Some(password_hash),
            first_name: Some(first_name),
            last_name: Some(last_name),
            is_teacher: true,
            phone: trimmed(create.phone),
            department: trimmed(create.department),
            qualification: trimmed(create.qualification),
            specialization: trimmed(create.specialization),
            joining_date: create.joining_date,
            auth_source: "native".to_string(),
            ..Default::default()
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!(teacher_id = %teacher.id, admin_id = %admin.id, "Teacher added");
    Ok((StatusCode::CREATED, Json(UserResponse::from(teacher))))
}

// GET /teachers/{id} - View a teacher
#[utoipa::path(
    get,
    path = "/teachers/{id}",
    tag = "teachers",
    summary = "Get teacher",
    params(("id" = uuid::Uuid, Path, description = "Teacher user ID")),
    responses(
        (status = 200, description = "Teacher profile", body = UserResponse),
        (status = 404, description = "No teacher with this ID"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_teacher(State(state): State<AppState>, _: CurrentUser, Path(id): Path<UserId>) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let teacher = Users::new(&mut conn)
        .get_by_id(id)
        .await?
        .filter(|u| u.is_teacher)
        .ok_or_else(|| Error::NotFound {
            resource: "Teacher".to_string(),
            id: id.to_string(),
        })?;
    Ok(Json(UserResponse::from(teacher)))
}

// PATCH /teachers/{id} - Edit a teacher (admin only)
#[utoipa::path(
    patch,
    path = "/teachers/{id}",
    tag = "teachers",
    summary = "Edit teacher",
    params(("id" = uuid::Uuid, Path, description = "Teacher user ID")),
    request_body = TeacherUpdate,
    responses(
        (status = 200, description = "Updated teacher", body = UserResponse),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "No teacher with this ID"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_teacher(
    State(state): State<AppState>,
    _: RequireAdmin,
    Path(id): Path<UserId>,
    Json(update): Json<TeacherUpdate>,
) -> Result<Json<UserResponse>, Error> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut tx);

    if !users.get_by_id(id).await?.is_some_and(|u| u.is_teacher) {
        return Err(Error::NotFound {
            resource: "Teacher".to_string(),
            id: id.to_string(),
        });
    }
    let teacher = users
        .update(
            id,
            &UserUpdateDBRequest {
                first_name: trimmed(update.first_name),
                last_name: trimmed(update.last_name),
                phone: trimmed(update.phone),
                department: trimmed(update.department),
                qualification: trimmed(update.qualification),
                specialization: trimmed(update.specialization),
                ..Default::default()
            },
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(UserResponse::from(teacher)))
}
