//! Database repository for student-teacher assignments.

use std::collections::HashMap;

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::relationships::{RelationshipCreateDBRequest, RelationshipDBResponse, RelationshipFilter},
    },
    types::{RelationshipId, UserId, abbrev_uuid},
};

const RELATIONSHIP_COLUMNS: &str = "id, student_id, teacher_id, subject, created_at";

pub struct Relationships<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Relationships<'c> {
    type CreateRequest = RelationshipCreateDBRequest;
    /// Assignments are immutable; change one by deleting and recreating it.
    type UpdateRequest = RelationshipCreateDBRequest;
    type Response = RelationshipDBResponse;
    type Id = RelationshipId;
    type Filter = RelationshipFilter;

    #[instrument(skip(self, request), fields(student = %abbrev_uuid(&request.student_id), teacher = %abbrev_uuid(&request.teacher_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let relationship = sqlx::query_as::<_, RelationshipDBResponse>(&format!(
            "INSERT INTO student_teacher_relationships (student_id, teacher_id, subject) VALUES ($1, $2, $3) RETURNING {RELATIONSHIP_COLUMNS}"
        ))
        .bind(request.student_id)
        .bind(request.teacher_id)
        .bind(&request.subject)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(relationship)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let relationship = sqlx::query_as::<_, RelationshipDBResponse>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM student_teacher_relationships WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(relationship)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let rows = sqlx::query_as::<_, RelationshipDBResponse>(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM student_teacher_relationships WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows.into_iter().map(|r| (r.id, r)).collect())
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {RELATIONSHIP_COLUMNS} FROM student_teacher_relationships WHERE TRUE"));
        if let Some(student_id) = filter.student_id {
            query.push(" AND student_id = ").push_bind(student_id);
        }
        if let Some(teacher_id) = filter.teacher_id {
            query.push(" AND teacher_id = ").push_bind(teacher_id);
        }
        query
            .push(" ORDER BY subject, created_at LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.skip);
        Ok(query.build_query_as::<RelationshipDBResponse>().fetch_all(&mut *self.db).await?)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM student_teacher_relationships WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update(&mut self, _id: Self::Id, _request: &Self::UpdateRequest) -> Result<Self::Response> {
        Err(DbError::Other(anyhow::anyhow!("student-teacher relationships cannot be updated")))
    }
}

impl<'c> Relationships<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Number of distinct students assigned to a teacher, across all subjects.
    #[instrument(skip(self), fields(teacher = %abbrev_uuid(&teacher_id)), err)]
    pub async fn count_students_for_teacher(&mut self, teacher_id: UserId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT student_id) FROM student_teacher_relationships WHERE teacher_id = $1",
        )
        .bind(teacher_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use crate::db::models::users::UserCreateDBRequest;
    use sqlx::PgPool;

    async fn user(conn: &mut PgConnection, email: &str, teacher: bool) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                username: email.to_string(),
                email: email.to_string(),
                is_teacher: teacher,
                is_student: !teacher,
                auth_source: "native".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test]
    async fn test_distinct_student_count(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let teacher = user(&mut conn, "t@school.test", true).await;
        let s1 = user(&mut conn, "s1@school.test", false).await;
        let s2 = user(&mut conn, "s2@school.test", false).await;

        let mut repo = Relationships::new(&mut conn);
        for (student, subject) in [(s1, "Maths"), (s1, "Physics"), (s2, "Maths")] {
            repo.create(&RelationshipCreateDBRequest {
                student_id: student,
                teacher_id: teacher,
                subject: subject.to_string(),
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.count_students_for_teacher(teacher).await.unwrap(), 2);

        let mine = repo
            .list(&RelationshipFilter {
                student_id: Some(s1),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);
    }

    #[sqlx::test]
    async fn test_duplicate_assignment_rejected(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let teacher = user(&mut conn, "t@school.test", true).await;
        let student = user(&mut conn, "s@school.test", false).await;

        let request = RelationshipCreateDBRequest {
            student_id: student,
            teacher_id: teacher,
            subject: "Art".to_string(),
        };
        let mut repo = Relationships::new(&mut conn);
        repo.create(&request).await.unwrap();
        assert!(matches!(repo.create(&request).await, Err(DbError::UniqueViolation { .. })));
    }
}
