use crate::{
    AppState,
    api::models::{
        relationships::{ListRelationshipsQuery, RelationshipCreate, RelationshipResponse},
        users::UserSummary,
    },
    auth::permissions::{RequireAdmin, RequireStaff},
    db::{
        handlers::{Relationships, Repository, Users},
        models::relationships::{RelationshipCreateDBRequest, RelationshipDBResponse, RelationshipFilter},
    },
    errors::Error,
    types::RelationshipId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;

async fn with_users(conn: &mut PgConnection, rows: Vec<RelationshipDBResponse>) -> Result<Vec<RelationshipResponse>, Error> {
    let ids = rows.iter().flat_map(|r| [r.student_id, r.teacher_id]).collect();
    let users = Users::new(conn).get_bulk(ids).await?;

    Ok(rows
        .into_iter()
        .filter_map(|r| {
            Some(RelationshipResponse {
                id: r.id,
                student: UserSummary::from(users.get(&r.student_id)?),
                teacher: UserSummary::from(users.get(&r.teacher_id)?),
                subject: r.subject,
                created_at: r.created_at,
            })
        })
        .collect())
}

#[utoipa::path(
    get,
    path = "/relationships",
    tag = "relationships",
    summary = "List assignments",
    params(ListRelationshipsQuery),
    responses(
        (status = 200, description = "Student-teacher assignments", body = [RelationshipResponse]),
        (status = 403, description = "Forbidden - teacher or admin access required"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_relationships(
    State(state): State<AppState>,
    _: RequireStaff,
    Query(query): Query<ListRelationshipsQuery>,
) -> Result<Json<Vec<RelationshipResponse>>, Error> {
    let (skip, limit) = query.pagination.params();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let rows = Relationships::new(&mut conn)
        .list(&RelationshipFilter {
            student_id: query.student_id,
            teacher_id: query.teacher_id,
            skip,
            limit,
        })
        .await?;
    Ok(Json(with_users(&mut conn, rows).await?))
}

#[utoipa::path(
    post,
    path = "/relationships",
    tag = "relationships",
    summary = "Assign teacher",
    description = "Assign a teacher to a student for a subject. Both ids are user ids.",
    request_body = RelationshipCreate,
    responses(
        (status = 201, description = "Assignment created", body = RelationshipResponse),
        (status = 400, description = "Not a student/teacher, or empty subject"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 409, description = "Assignment already exists"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_relationship(
    State(state): State<AppState>,
    _: RequireAdmin,
    Json(create): Json<RelationshipCreate>,
) -> Result<(StatusCode, Json<RelationshipResponse>), Error> {
    let subject = create.subject.trim().to_string();
    if subject.is_empty() {
        return Err(Error::BadRequest {
            message: "Subject is required".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let users = Users::new(&mut conn).get_bulk(vec![create.student_id, create.teacher_id]).await?;
    if !users.get(&create.student_id).is_some_and(|u| u.is_student) {
        return Err(Error::BadRequest {
            message: "The selected user is not a student".to_string(),
        });
    }
    if !users.get(&create.teacher_id).is_some_and(|u| u.is_teacher) {
        return Err(Error::BadRequest {
            message: "The selected user is not a teacher".to_string(),
        });
    }

    let row = Relationships::new(&mut conn)
        .create(&RelationshipCreateDBRequest {
            student_id: create.student_id,
            teacher_id: create.teacher_id,
            subject,
        })
        .await?;
    let created = with_users(&mut conn, vec![row]).await?.pop().ok_or(Error::Internal {
        operation: "load users for new assignment".to_string(),
    })?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    delete,
    path = "/relationships/{id}",
    tag = "relationships",
    summary = "Remove assignment",
    params(("id" = i64, Path, description = "Assignment ID")),
    responses(
        (status = 204, description = "Assignment removed"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "Assignment not found"),
    ),
    security(("session_cookie" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_relationship(State(state): State<AppState>, _: RequireAdmin, Path(id): Path<RelationshipId>) -> Result<StatusCode, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Relationships::new(&mut conn).delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound {
            resource: "Relationship".to_string(),
            id: id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::models::users::RoleFlag,
        test_utils::{create_test_app, create_test_user, session_header},
    };
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_assign_list_and_remove(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, RoleFlag::Admin).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let student = create_test_user(&pool, RoleFlag::Student).await;

        let response = app
            .post("/api/v1/relationships")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&json!({ "student_id": student.id, "teacher_id": teacher.id, "subject": "Physics" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: RelationshipResponse = response.json();
        assert_eq!(created.teacher.id, teacher.id);

        app.post("/api/v1/relationships")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&json!({ "student_id": student.id, "teacher_id": teacher.id, "subject": "Physics" }))
            .await
            .assert_status(StatusCode::CONFLICT);

        let response = app
            .get(&format!("/api/v1/relationships?teacher_id={}", teacher.id))
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Vec<RelationshipResponse>>().len(), 1);

        app.delete(&format!("/api/v1/relationships/{}", created.id))
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        app.delete(&format!("/api/v1/relationships/{}", created.id))
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .await
            .assert_status_not_found();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_roles_are_checked(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, RoleFlag::Admin).await;
        let teacher = create_test_user(&pool, RoleFlag::Teacher).await;
        let other_teacher = create_test_user(&pool, RoleFlag::Teacher).await;

        app.post("/api/v1/relationships")
            .add_header(session_header(&admin).0, session_header(&admin).1)
            .json(&json!({ "student_id": other_teacher.id, "teacher_id": teacher.id, "subject": "Art" }))
            .await
            .assert_status_bad_request();

        app.post("/api/v1/relationships")
            .add_header(session_header(&teacher).0, session_header(&teacher).1)
            .json(&json!({ "student_id": other_teacher.id, "teacher_id": teacher.id, "subject": "Art" }))
            .await
            .assert_status_forbidden();
    }
}
