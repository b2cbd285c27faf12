//! Database repositories for students and parents.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::students::{
            ParentCreateDBRequest, ParentDBResponse, ParentUpdateDBRequest, StudentCreateDBRequest, StudentDBResponse,
            StudentFilter, StudentUpdateDBRequest, default_date_of_birth,
        },
    },
    types::{DEFAULT_CLASS, DEFAULT_SECTION, ParentId, StudentId, UserId, abbrev_uuid},
};

const STUDENT_COLUMNS: &str = "id, user_id, parent_id, first_name, last_name, student_id, gender, date_of_birth, student_class, \
     section, joining_date, mobile_number, admission_number, student_image, slug, created_at, updated_at";

const PARENT_COLUMNS: &str = "id, father_name, father_occupation, father_mobile, father_email, mother_name, mother_occupation, \
     mother_mobile, mother_email, present_address, permanent_address";

/// ASCII base of an accented Latin letter, for letters that decompose to one (`é` -> `e`).
/// Letters without a decomposition such as `ß` or `ø` have none and are dropped from slugs.
fn ascii_base(c: char) -> Option<char> {
    let base = match c {
        'À'..='Å' | 'à'..='å' | 'Ā'..='ą' => 'a',
        'Ç' | 'ç' | 'Ć'..='č' => 'c',
        'Ď' | 'ď' => 'd',
        'È'..='Ë' | 'è'..='ë' | 'Ē'..='ě' => 'e',
        'Ĝ'..='ģ' => 'g',
        'Ĥ' | 'ĥ' => 'h',
        'Ì'..='Ï' | 'ì'..='ï' | 'Ĩ'..='İ' => 'i',
        'Ĵ' | 'ĵ' => 'j',
        'Ķ' | 'ķ' => 'k',
        'Ĺ'..='ľ' => 'l',
        'Ñ' | 'ñ' | 'Ń'..='ň' => 'n',
        'Ò'..='Ö' | 'ò'..='ö' | 'Ō'..='ő' => 'o',
        'Ŕ'..='ř' => 'r',
        'Ś'..='š' => 's',
        'Ţ'..='ť' => 't',
        'Ù'..='Ü' | 'ù'..='ü' | 'Ũ'..='ų' => 'u',
        'Ŵ' | 'ŵ' => 'w',
        'Ý' | 'ý' | 'ÿ' | 'Ŷ'..='Ÿ' => 'y',
        'Ź'..='ž' => 'z',
        _ => return None,
    };
    Some(base)
}

/// Lowercase ASCII slug: accented letters fold to their base, other alphanumerics are kept, and
/// every other run of characters becomes one `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars() {
        let c = if c.is_ascii() { Some(c) } else { ascii_base(c) };
        match c {
            Some(c) if c.is_ascii_alphanumeric() => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c.to_ascii_lowercase());
            }
            // Non-decomposable letters vanish without splitting the word
            None => {}
            Some(_) => pending_dash = true,
        }
    }
    slug
}

/// Base slug for a student, `first-last-student_id`.
pub fn student_slug_base(first_name: &str, last_name: &str, student_id: &str) -> String {
    let slug = slugify(&format!("{first_name}-{last_name}-{student_id}"));
    if slug.is_empty() { "student".to_string() } else { slug }
}

/// First of `base`, `base-1`, `base-2`, … not in `taken`.
pub fn unique_slug(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &StudentFilter) {
    query.push(" WHERE TRUE");
    if let Some(class) = &filter.student_class {
        query.push(" AND student_class = ").push_bind(class.clone());
    }
    if let Some(section) = &filter.section {
        query.push(" AND section = ").push_bind(section.clone());
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search.trim());
        query
            .push(" AND (first_name || ' ' || last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR student_id ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub struct Students<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Students<'c> {
    type CreateRequest = StudentCreateDBRequest;
    type UpdateRequest = StudentUpdateDBRequest;
    type Response = StudentDBResponse;
    type Id = StudentId;
    type Filter = StudentFilter;

    #[instrument(skip(self, request), fields(student_id = %request.student_id), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let base = student_slug_base(&request.first_name, &request.last_name, &request.student_id);
        let taken: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT slug FROM students WHERE slug = $1 OR slug LIKE $1 || '-%'")
            .bind(&base)
            .fetch_all(&mut *self.db)
            .await?
            .into_iter()
            .collect();
        let slug = unique_slug(&base, &taken);

        let student = sqlx::query_as::<_, StudentDBResponse>(&format!(
            r#"
            INSERT INTO students (user_id, parent_id, first_name, last_name, student_id, gender, date_of_birth, student_class,
                                  section, joining_date, mobile_number, admission_number, student_image, slug)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {STUDENT_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(request.parent_id)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.student_id)
        .bind(request.gender.unwrap_or_default())
        .bind(request.date_of_birth.unwrap_or_else(default_date_of_birth))
        .bind(request.student_class.as_deref().unwrap_or(DEFAULT_CLASS))
        .bind(request.section.as_deref().unwrap_or(DEFAULT_SECTION))
        .bind(request.joining_date.unwrap_or_else(|| Utc::now().date_naive()))
        .bind(request.mobile_number.as_deref().unwrap_or_default())
        .bind(&request.admission_number)
        .bind(&request.student_image)
        .bind(&slug)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(student)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let student = sqlx::query_as::<_, StudentDBResponse>(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(student)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<StudentId>) -> Result<HashMap<Self::Id, StudentDBResponse>> {
        let students = sqlx::query_as::<_, StudentDBResponse>(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(students.into_iter().map(|s| (s.id, s)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {STUDENT_COLUMNS} FROM students"));
        push_filter(&mut query, filter);
        query
            .push(" ORDER BY student_class, section, last_name, first_name LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.skip);
        Ok(query.build_query_as::<StudentDBResponse>().fetch_all(&mut *self.db).await?)
    }

    /// Deleting a student removes its parent too; the parent row owns the student through
    /// `ON DELETE CASCADE`.
    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM parents WHERE id = (SELECT parent_id FROM students WHERE id = $1)")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let student = sqlx::query_as::<_, StudentDBResponse>(&format!(
            r#"
            UPDATE students SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                student_id = COALESCE($4, student_id),
                gender = COALESCE($5, gender),
                date_of_birth = COALESCE($6, date_of_birth),
                student_class = COALESCE($7, student_class),
                section = COALESCE($8, section),
                joining_date = COALESCE($9, joining_date),
                mobile_number = COALESCE($10, mobile_number),
                admission_number = COALESCE($11, admission_number),
                student_image = COALESCE($12, student_image),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {STUDENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.student_id)
        .bind(request.gender)
        .bind(request.date_of_birth)
        .bind(&request.student_class)
        .bind(&request.section)
        .bind(request.joining_date)
        .bind(&request.mobile_number)
        .bind(&request.admission_number)
        .bind(&request.student_image)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(student)
    }
}

impl<'c> Students<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_slug(&mut self, slug: &str) -> Result<Option<StudentDBResponse>> {
        let student = sqlx::query_as::<_, StudentDBResponse>(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE slug = $1"))
            .bind(slug)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(student)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_by_user_id(&mut self, user_id: UserId) -> Result<Option<StudentDBResponse>> {
        let student = sqlx::query_as::<_, StudentDBResponse>(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE user_id = $1"))
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(student)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &StudentFilter) -> Result<i64> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM students");
        push_filter(&mut query, filter);
        Ok(query.build_query_scalar::<i64>().fetch_one(&mut *self.db).await?)
    }

    /// Give a user a student record with a placeholder parent, unless they already have one.
    ///
    /// Student and admission numbers are derived from the user id so the record stays unique.
    #[instrument(skip(self, first_name, last_name), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn ensure_placeholder_for_user(&mut self, user_id: UserId, first_name: &str, last_name: &str) -> Result<StudentDBResponse> {
        if let Some(existing) = self.get_by_user_id(user_id).await? {
            return Ok(existing);
        }

        let parent = Parents::new(&mut *self.db).create(&ParentCreateDBRequest::placeholder()).await?;
        let short = placeholder_suffix(user_id);
        self.create(&StudentCreateDBRequest {
            user_id: Some(user_id),
            parent_id: parent.id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            student_id: format!("STU-{short}"),
            admission_number: format!("ADM-{short}"),
            ..Default::default()
        })
        .await
    }
}

/// First 16 hex digits of the user id, so `STU-`/`ADM-` numbers fit their 20 character columns.
fn placeholder_suffix(user_id: UserId) -> String {
    user_id.simple().to_string()[..16].to_uppercase()
}

pub struct Parents<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Parents<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), err)]
    pub async fn create(&mut self, request: &ParentCreateDBRequest) -> Result<ParentDBResponse> {
        let parent = sqlx::query_as::<_, ParentDBResponse>(&format!(
            r#"
            INSERT INTO parents (father_name, father_occupation, father_mobile, father_email, mother_name, mother_occupation,
                                 mother_mobile, mother_email, present_address, permanent_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PARENT_COLUMNS}
            "#
        ))
        .bind(&request.father_name)
        .bind(&request.father_occupation)
        .bind(&request.father_mobile)
        .bind(&request.father_email)
        .bind(&request.mother_name)
        .bind(&request.mother_occupation)
        .bind(&request.mother_mobile)
        .bind(&request.mother_email)
        .bind(&request.present_address)
        .bind(&request.permanent_address)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(parent)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: ParentId) -> Result<Option<ParentDBResponse>> {
        let parent = sqlx::query_as::<_, ParentDBResponse>(&format!("SELECT {PARENT_COLUMNS} FROM parents WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(parent)
    }

    #[instrument(skip(self, request), err)]
    pub async fn update(&mut self, id: ParentId, request: &ParentUpdateDBRequest) -> Result<ParentDBResponse> {
        let parent = sqlx::query_as::<_, ParentDBResponse>(&format!(
            r#"
            UPDATE parents SET
                father_name = COALESCE($2, father_name),
                father_occupation = COALESCE($3, father_occupation),
                father_mobile = COALESCE($4, father_mobile),
                father_email = COALESCE($5, father_email),
                mother_name = COALESCE($6, mother_name),
                mother_occupation = COALESCE($7, mother_occupation),
                mother_mobile = COALESCE($8, mother_mobile),
                mother_email = COALESCE($9, mother_email),
                present_address = COALESCE($10, present_address),
                permanent_address = COALESCE($11, permanent_address)
            WHERE id = $1
            RETURNING {PARENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&request.father_name)
        .bind(&request.father_occupation)
        .bind(&request.father_mobile)
        .bind(&request.father_email)
        .bind(&request.mother_name)
        .bind(&request.mother_occupation)
        .bind(&request.mother_mobile)
        .bind(&request.mother_email)
        .bind(&request.present_address)
        .bind(&request.permanent_address)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::students::{Gender, NOT_PROVIDED};
    use sqlx::PgPool;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Jane-Doe-S001"), "jane-doe-s001");
        assert_eq!(slugify("  Mary Ann -- O'Neil / 42 "), "mary-ann-o-neil-42");
        assert_eq!(slugify("***"), "");
        assert_eq!(slugify("José Núñez-Łęcki"), "jose-nunez-ecki");
        assert_eq!(slugify("Zoë Straße"), "zoe-strae");
        assert_eq!(student_slug_base("", "", "!"), "student");
    }

    #[test]
    fn test_unique_slug_suffixes() {
        let mut taken = HashSet::new();
        assert_eq!(unique_slug("jane-doe-1", &taken), "jane-doe-1");
        taken.insert("jane-doe-1".to_string());
        assert_eq!(unique_slug("jane-doe-1", &taken), "jane-doe-1-1");
        taken.insert("jane-doe-1-1".to_string());
        assert_eq!(unique_slug("jane-doe-1", &taken), "jane-doe-1-2");
    }

    async fn create_student(conn: &mut PgConnection, first: &str, last: &str, student_id: &str) -> StudentDBResponse {
        let parent = Parents::new(&mut *conn).create(&ParentCreateDBRequest::placeholder()).await.unwrap();
        Students::new(conn)
            .create(&StudentCreateDBRequest {
                parent_id: parent.id,
                first_name: first.to_string(),
                last_name: last.to_string(),
                student_id: student_id.to_string(),
                admission_number: format!("ADM-{student_id}"),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_create_applies_defaults(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = create_student(&mut conn, "Jane", "Doe", "S001").await;

        assert_eq!(student.slug, "jane-doe-s001");
        assert_eq!(student.gender, Gender::Male);
        assert_eq!(student.student_class, "Class 1");
        assert_eq!(student.section, "A");
        assert_eq!(student.date_of_birth, default_date_of_birth());
        assert_eq!(student.joining_date, Utc::now().date_naive());
    }

    #[sqlx::test]
    async fn test_colliding_slugs_get_suffixes(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        // Different student ids that slugify to the same base
        let a = create_student(&mut conn, "Jane", "Doe", "S 1").await;
        let b = create_student(&mut conn, "Jane", "Doe", "S-1").await;
        let c = create_student(&mut conn, "Jane", "Doe", "S_1").await;

        assert_eq!(a.slug, "jane-doe-s-1");
        assert_eq!(b.slug, "jane-doe-s-1-1");
        assert_eq!(c.slug, "jane-doe-s-1-2");
    }

    #[sqlx::test]
    async fn test_update_keeps_slug(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = create_student(&mut conn, "Jane", "Doe", "S002").await;

        let updated = Students::new(&mut conn)
            .update(
                student.id,
                &StudentUpdateDBRequest {
                    first_name: Some("Janet".to_string()),
                    section: Some("C".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.first_name, "Janet");
        assert_eq!(updated.section, "C");
        assert_eq!(updated.slug, student.slug);
    }

    #[sqlx::test]
    async fn test_delete_removes_parent(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let student = create_student(&mut conn, "Sam", "Lee", "S003").await;

        assert!(Students::new(&mut conn).delete(student.id).await.unwrap());
        assert!(Students::new(&mut conn).get_by_slug(&student.slug).await.unwrap().is_none());
        assert!(Parents::new(&mut conn).get_by_id(student.parent_id).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_list_filters_by_class_and_section(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        for (id, class, section) in [("S10", "Class 5", "A"), ("S11", "Class 5", "B"), ("S12", "Class 6", "A")] {
            let student = create_student(&mut conn, "Kid", id, id).await;
            Students::new(&mut conn)
                .update(
                    student.id,
                    &StudentUpdateDBRequest {
                        student_class: Some(class.to_string()),
                        section: Some(section.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let mut repo = Students::new(&mut conn);
        let class_5 = StudentFilter {
            student_class: Some("Class 5".to_string()),
            limit: 10,
            ..Default::default()
        };
        assert_eq!(repo.count(&class_5).await.unwrap(), 2);

        let class_5_b = StudentFilter {
            section: Some("B".to_string()),
            ..class_5
        };
        let found = repo.list(&class_5_b).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].student_id, "S11");
    }

    #[sqlx::test]
    async fn test_ensure_placeholder_is_idempotent(pool: PgPool) {
        use crate::db::handlers::Users;
        use crate::db::models::users::UserCreateDBRequest;

        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn)
            .create(&UserCreateDBRequest {
                username: "new@school.test".to_string(),
                email: "new@school.test".to_string(),
                is_student: true,
                auth_source: "proxy-header".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let first = Students::new(&mut conn).ensure_placeholder_for_user(user.id, "New", "Kid").await.unwrap();
        let second = Students::new(&mut conn).ensure_placeholder_for_user(user.id, "New", "Kid").await.unwrap();
        assert_eq!(first.id, second.id);

        let parent = Parents::new(&mut conn).get_by_id(first.parent_id).await.unwrap().unwrap();
        assert_eq!(parent.father_name, NOT_PROVIDED);
        assert_eq!(first.student_class, "Class 1");

        let hex = user.id.simple().to_string().to_uppercase();
        assert_eq!(first.student_id, format!("STU-{}", &hex[..16]));
        assert_eq!(first.admission_number, format!("ADM-{}", &hex[..16]));
        assert_eq!(first.student_id.len(), 20);
    }
}
