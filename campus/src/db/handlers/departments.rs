//! Database repositories for departments, subjects and holidays.

use std::collections::HashMap;

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::departments::{
            DepartmentCreateDBRequest, DepartmentDBResponse, DepartmentUpdateDBRequest, HolidayCreateDBRequest, HolidayDBResponse,
            HolidayFilter, HolidayUpdateDBRequest, PageFilter, SubjectCreateDBRequest, SubjectDBResponse, SubjectFilter,
            SubjectUpdateDBRequest,
        },
    },
    types::{DepartmentId, HolidayId, SubjectId, UserId},
};

const DEPARTMENT_COLUMNS: &str = "id, name, code, description, head_id, created_at, updated_at";
const SUBJECT_COLUMNS: &str = "id, name, code, department_id, description, created_at, updated_at";
const HOLIDAY_COLUMNS: &str = "id, name, date, description, created_at";

pub struct Departments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Departments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM departments").fetch_one(&mut *self.db).await?)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Departments<'c> {
    type CreateRequest = DepartmentCreateDBRequest;
    type UpdateRequest = DepartmentUpdateDBRequest;
    type Response = DepartmentDBResponse;
    type Id = DepartmentId;
    type Filter = PageFilter;

    #[instrument(skip(self, request), fields(code = %request.code), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let department = sqlx::query_as::<_, DepartmentDBResponse>(&format!(
            "INSERT INTO departments (name, code, description, head_id) VALUES ($1, $2, $3, $4) RETURNING {DEPARTMENT_COLUMNS}"
        ))
        .bind(&request.name)
        .bind(&request.code)
        .bind(&request.description)
        .bind(request.head_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(department)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let department = sqlx::query_as::<_, DepartmentDBResponse>(&format!("SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(department)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let departments =
            sqlx::query_as::<_, DepartmentDBResponse>(&format!("SELECT {DEPARTMENT_COLUMNS} FROM departments WHERE id = ANY($1)"))
                .bind(&ids)
                .fetch_all(&mut *self.db)
                .await?;
        Ok(departments.into_iter().map(|d| (d.id, d)).collect())
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let departments = sqlx::query_as::<_, DepartmentDBResponse>(&format!(
            "SELECT {DEPARTMENT_COLUMNS} FROM departments ORDER BY name LIMIT $1 OFFSET $2"
        ))
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(departments)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM departments WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let department = sqlx::query_as::<_, DepartmentDBResponse>(&format!(
            r#"
            UPDATE departments SET
                name = COALESCE($2, name),
                code = COALESCE($3, code),
                description = CASE WHEN $4 THEN $5 ELSE description END,
                head_id = CASE WHEN $6 THEN $7 ELSE head_id END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {DEPARTMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.name)
        .bind(&request.code)
        .bind(request.description.is_some())
        .bind(request.description.clone().flatten())
        .bind(request.head_id.is_some())
        .bind(request.head_id.flatten())
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(department)
    }
}

pub struct Subjects<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Subjects<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Teacher ids per subject.
    #[instrument(skip(self, subject_ids), fields(count = subject_ids.len()), err)]
    pub async fn teachers_for(&mut self, subject_ids: &[SubjectId]) -> Result<HashMap<SubjectId, Vec<UserId>>> {
        let rows = sqlx::query_as::<_, (SubjectId, UserId)>(
            "SELECT subject_id, teacher_id FROM subject_teachers WHERE subject_id = ANY($1) ORDER BY subject_id, teacher_id",
        )
        .bind(subject_ids)
        .fetch_all(&mut *self.db)
        .await?;

        let mut map: HashMap<SubjectId, Vec<UserId>> = HashMap::new();
        for (subject_id, teacher_id) in rows {
            map.entry(subject_id).or_default().push(teacher_id);
        }
        Ok(map)
    }

    async fn replace_teachers(&mut self, subject_id: SubjectId, teacher_ids: &[UserId]) -> Result<()> {
        sqlx::query("DELETE FROM subject_teachers WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&mut *self.db)
            .await?;
        sqlx::query(
            "INSERT INTO subject_teachers (subject_id, teacher_id)
             SELECT $1, teacher FROM UNNEST($2::UUID[]) AS teacher ON CONFLICT DO NOTHING",
        )
        .bind(subject_id)
        .bind(teacher_ids)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Subjects<'c> {
    type CreateRequest = SubjectCreateDBRequest;
    type UpdateRequest = SubjectUpdateDBRequest;
    type Response = SubjectDBResponse;
    type Id = SubjectId;
    type Filter = SubjectFilter;

    #[instrument(skip(self, request), fields(code = %request.code), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let subject = sqlx::query_as::<_, SubjectDBResponse>(&format!(
            "INSERT INTO subjects (name, code, department_id, description) VALUES ($1, $2, $3, $4) RETURNING {SUBJECT_COLUMNS}"
        ))
        .bind(&request.name)
        .bind(&request.code)
        .bind(request.department_id)
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;
        self.replace_teachers(subject.id, &request.teacher_ids).await?;
        Ok(subject)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let subject = sqlx::query_as::<_, SubjectDBResponse>(&format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(subject)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let subjects = sqlx::query_as::<_, SubjectDBResponse>(&format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(subjects.into_iter().map(|s| (s.id, s)).collect())
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE TRUE"));
        if let Some(department_id) = filter.department_id {
            query.push(" AND department_id = ").push_bind(department_id);
        }
        if let Some(teacher_id) = filter.teacher_id {
            query
                .push(" AND id IN (SELECT subject_id FROM subject_teachers WHERE teacher_id = ")
                .push_bind(teacher_id)
                .push(")");
        }
        query
            .push(" ORDER BY name LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.skip);
        Ok(query.build_query_as::<SubjectDBResponse>().fetch_all(&mut *self.db).await?)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subjects WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let subject = sqlx::query_as::<_, SubjectDBResponse>(&format!(
            r#"
            UPDATE subjects SET
                name = COALESCE($2, name),
                code = COALESCE($3, code),
                department_id = COALESCE($4, department_id),
                description = CASE WHEN $5 THEN $6 ELSE description END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SUBJECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.name)
        .bind(&request.code)
        .bind(request.department_id)
        .bind(request.description.is_some())
        .bind(request.description.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        if let Some(teacher_ids) = &request.teacher_ids {
            self.replace_teachers(id, teacher_ids).await?;
        }
        Ok(subject)
    }
}

pub struct Holidays<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Holidays<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Holidays<'c> {
    type CreateRequest = HolidayCreateDBRequest;
    type UpdateRequest = HolidayUpdateDBRequest;
    type Response = HolidayDBResponse;
    type Id = HolidayId;
    type Filter = HolidayFilter;

    #[instrument(skip(self, request), fields(date = %request.date), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let holiday = sqlx::query_as::<_, HolidayDBResponse>(&format!(
            "INSERT INTO holidays (name, date, description) VALUES ($1, $2, $3) RETURNING {HOLIDAY_COLUMNS}"
        ))
        .bind(&request.name)
        .bind(request.date)
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(holiday)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let holiday = sqlx::query_as::<_, HolidayDBResponse>(&format!("SELECT {HOLIDAY_COLUMNS} FROM holidays WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(holiday)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let holidays = sqlx::query_as::<_, HolidayDBResponse>(&format!("SELECT {HOLIDAY_COLUMNS} FROM holidays WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(holidays.into_iter().map(|h| (h.id, h)).collect())
    }

    /// Holidays in date order.
    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let holidays = sqlx::query_as::<_, HolidayDBResponse>(&format!(
            "SELECT {HOLIDAY_COLUMNS} FROM holidays WHERE ($1::DATE IS NULL OR date >= $1) ORDER BY date, name LIMIT $2 OFFSET $3"
        ))
        .bind(filter.from_date)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(holidays)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM holidays WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let holiday = sqlx::query_as::<_, HolidayDBResponse>(&format!(
            r#"
            UPDATE holidays SET
                name = COALESCE($2, name),
                date = COALESCE($3, date),
                description = CASE WHEN $4 THEN $5 ELSE description END
            WHERE id = $1
            RETURNING {HOLIDAY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.name)
        .bind(request.date)
        .bind(request.description.is_some())
        .bind(request.description.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(holiday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Users;
    use crate::db::models::users::UserCreateDBRequest;
    use chrono::NaiveDate;
    use sqlx::PgPool;

    async fn teacher(conn: &mut PgConnection, email: &str) -> UserId {
        Users::new(conn)
            .create(&UserCreateDBRequest {
                username: email.to_string(),
                email: email.to_string(),
                is_teacher: true,
                auth_source: "native".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[sqlx::test]
    async fn test_department_code_is_unique_and_head_clearable(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let head = teacher(&mut conn, "head@school.test").await;
        let mut repo = Departments::new(&mut conn);

        let science = repo
            .create(&DepartmentCreateDBRequest {
                name: "Science".to_string(),
                code: "SCI".to_string(),
                description: None,
                head_id: Some(head),
            })
            .await
            .unwrap();

        let duplicate = repo
            .create(&DepartmentCreateDBRequest {
                name: "Sciences".to_string(),
                code: "SCI".to_string(),
                description: None,
                head_id: None,
            })
            .await;
        assert!(matches!(duplicate, Err(DbError::UniqueViolation { .. })));

        let updated = repo
            .update(
                science.id,
                &DepartmentUpdateDBRequest {
                    head_id: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.head_id, None);
        assert_eq!(updated.code, "SCI");
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[sqlx::test]
    async fn test_subject_teachers_are_replaced(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let t1 = teacher(&mut conn, "t1@school.test").await;
        let t2 = teacher(&mut conn, "t2@school.test").await;
        let department = Departments::new(&mut conn)
            .create(&DepartmentCreateDBRequest {
                name: "Maths".to_string(),
                code: "MAT".to_string(),
                description: None,
                head_id: None,
            })
            .await
            .unwrap();

        let mut repo = Subjects::new(&mut conn);
        let algebra = repo
            .create(&SubjectCreateDBRequest {
                name: "Algebra".to_string(),
                code: "MAT-ALG".to_string(),
                department_id: department.id,
                description: None,
                teacher_ids: vec![t1],
            })
            .await
            .unwrap();
        assert_eq!(repo.teachers_for(&[algebra.id]).await.unwrap()[&algebra.id], vec![t1]);

        repo.update(
            algebra.id,
            &SubjectUpdateDBRequest {
                teacher_ids: Some(vec![t2]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(repo.teachers_for(&[algebra.id]).await.unwrap()[&algebra.id], vec![t2]);

        let taught_by_t2 = repo
            .list(&SubjectFilter {
                teacher_id: Some(t2),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(taught_by_t2.len(), 1);
    }

    #[sqlx::test]
    async fn test_upcoming_holidays(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Holidays::new(&mut conn);
        for (name, date) in [("Past", (2020, 1, 1)), ("Later", (2031, 6, 1)), ("Sooner", (2031, 1, 1))] {
            repo.create(&HolidayCreateDBRequest {
                name: name.to_string(),
                date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
                description: None,
            })
            .await
            .unwrap();
        }

        let upcoming = repo
            .list(&HolidayFilter {
                from_date: NaiveDate::from_ymd_opt(2030, 1, 1),
                skip: 0,
                limit: 10,
            })
            .await
            .unwrap();
        let names: Vec<&str> = upcoming.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Sooner", "Later"]);
    }
}
