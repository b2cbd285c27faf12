//! Database repository for users.

use std::collections::HashMap;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::users::{UserCreateDBRequest, UserDBResponse, UserFilter, UserUpdateDBRequest},
};
use crate::types::{UserId, abbrev_uuid};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, is_student, is_teacher, is_admin, \
     phone, department, qualification, specialization, bio, joining_date, profile_picture, auth_source, last_login, \
     created_at, updated_at";

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    query.push(" WHERE TRUE");
    if let Some(role) = filter.role {
        query.push(" AND ").push(role.column());
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search.trim());
        query
            .push(" AND (username ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR COALESCE(first_name, '') || ' ' || COALESCE(last_name, '') ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name, is_student, is_teacher, is_admin,
                               phone, department, qualification, specialization, joining_date, auth_source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.password_hash)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(request.is_student)
        .bind(request.is_teacher)
        .bind(request.is_admin)
        .bind(&request.phone)
        .bind(&request.department)
        .bind(&request.qualification)
        .bind(&request.specialization)
        .bind(request.joining_date)
        .bind(&request.auth_source)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<UserId>) -> Result<HashMap<Self::Id, UserDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.skip);

        let users = query.build_query_as::<UserDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(users)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            r#"
            UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                phone = COALESCE($4, phone),
                department = COALESCE($5, department),
                qualification = COALESCE($6, qualification),
                specialization = COALESCE($7, specialization),
                bio = COALESCE($8, bio),
                profile_picture = COALESCE($9, profile_picture),
                password_hash = COALESCE($10, password_hash),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.phone)
        .bind(&request.department)
        .bind(&request.qualification)
        .bind(&request.specialization)
        .bind(&request.bio)
        .bind(&request.profile_picture)
        .bind(&request.password_hash)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(user)
    }
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, email), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"))
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Total rows matching a filter, ignoring its pagination.
    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &UserFilter) -> Result<i64> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut query, filter);
        let count: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    /// Promote a user with no role flag to student. Returns the (possibly updated) row.
    ///
    /// The `WHERE` clause makes this a no-op for users that already carry a role, so it is safe
    /// to call on every authenticated request.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn promote_roleless_to_student(&mut self, id: UserId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET is_student = TRUE, updated_at = NOW()
             WHERE id = $1 AND NOT is_student AND NOT is_teacher AND NOT is_admin",
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite all three role flags.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn set_role_flags(&mut self, id: UserId, is_student: bool, is_teacher: bool, is_admin: bool) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "UPDATE users SET is_student = $2, is_teacher = $3, is_admin = $4, updated_at = NOW()
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(is_student)
        .bind(is_teacher)
        .bind(is_admin)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn record_login(&mut self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Lock the user's row until the surrounding transaction ends.
    ///
    /// Used to serialize per-teacher scheduling checks.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn lock_for_update(&mut self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::users::RoleFlag;
    use sqlx::PgPool;

    fn create_request(email: &str) -> UserCreateDBRequest {
        UserCreateDBRequest {
            username: email.to_string(),
            email: email.to_string(),
            auth_source: "native".to_string(),
            ..Default::default()
        }
    }

    #[sqlx::test]
    async fn test_create_and_get_user(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let mut request = create_request("ada@school.test");
        request.first_name = Some("Ada".to_string());
        request.is_teacher = true;
        let user = repo.create(&request).await.unwrap();

        assert_eq!(user.email, "ada@school.test");
        assert!(user.is_teacher);
        assert!(!user.is_student);

        let fetched = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.first_name.as_deref(), Some("Ada"));

        let by_email = repo.get_user_by_email("ADA@school.test").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[sqlx::test]
    async fn test_duplicate_email_is_unique_violation(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        repo.create(&create_request("dup@school.test")).await.unwrap();
        let mut second = create_request("dup@school.test");
        second.username = "someone-else".to_string();

        let err = repo.create(&second).await.unwrap_err();
        match err {
            DbError::UniqueViolation { constraint, .. } => assert_eq!(constraint.as_deref(), Some("users_email_unique")),
            other => panic!("expected unique violation, got {other:?}"),
        }
    }

    #[sqlx::test]
    async fn test_promote_roleless_to_student(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let roleless = repo.create(&create_request("nobody@school.test")).await.unwrap();
        assert!(!roleless.has_role());
        assert!(repo.promote_roleless_to_student(roleless.id).await.unwrap());
        assert!(repo.get_by_id(roleless.id).await.unwrap().unwrap().is_student);

        // Already a student now, second call changes nothing
        assert!(!repo.promote_roleless_to_student(roleless.id).await.unwrap());

        let mut teacher_request = create_request("teacher@school.test");
        teacher_request.is_teacher = true;
        let teacher = repo.create(&teacher_request).await.unwrap();
        assert!(!repo.promote_roleless_to_student(teacher.id).await.unwrap());
        let teacher = repo.get_by_id(teacher.id).await.unwrap().unwrap();
        assert!(teacher.is_teacher && !teacher.is_student);
    }

    #[sqlx::test]
    async fn test_list_filters_by_role_and_search(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        for (email, first, teacher) in [
            ("t1@school.test", "Grace", true),
            ("t2@school.test", "Alan", true),
            ("s1@school.test", "Grace", false),
        ] {
            let mut request = create_request(email);
            request.first_name = Some(first.to_string());
            request.is_teacher = teacher;
            request.is_student = !teacher;
            repo.create(&request).await.unwrap();
        }

        let teachers = UserFilter::new(0, 10).with_role(RoleFlag::Teacher);
        assert_eq!(repo.list(&teachers).await.unwrap().len(), 2);
        assert_eq!(repo.count(&teachers).await.unwrap(), 2);

        let graces = UserFilter::new(0, 10).with_search(Some("grace".to_string()));
        assert_eq!(repo.count(&graces).await.unwrap(), 2);

        let grace_teachers = UserFilter::new(0, 10).with_role(RoleFlag::Teacher).with_search(Some("Grace".to_string()));
        let found = repo.list(&grace_teachers).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "t1@school.test");
    }

    #[sqlx::test]
    async fn test_update_keeps_unset_fields(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let mut request = create_request("keep@school.test");
        request.phone = Some("555-0100".to_string());
        let user = repo.create(&request).await.unwrap();

        let updated = repo
            .update(
                user.id,
                &UserUpdateDBRequest {
                    bio: Some("Maths teacher".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.bio.as_deref(), Some("Maths teacher"));
        assert_eq!(updated.phone.as_deref(), Some("555-0100"));

        let missing = repo.update(Uuid::new_v4(), &UserUpdateDBRequest::default()).await;
        assert!(matches!(missing, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    async fn test_get_bulk_and_delete(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);

        let a = repo.create(&create_request("a@school.test")).await.unwrap();
        let b = repo.create(&create_request("b@school.test")).await.unwrap();

        let bulk = repo.get_bulk(vec![a.id, b.id, Uuid::new_v4()]).await.unwrap();
        assert_eq!(bulk.len(), 2);

        assert!(repo.delete(a.id).await.unwrap());
        assert!(!repo.delete(a.id).await.unwrap());
        assert!(repo.get_by_id(a.id).await.unwrap().is_none());
    }
}
