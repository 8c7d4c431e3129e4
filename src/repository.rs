use async_trait::async_trait;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    Course, Homework, HomeworkInstance, InstanceComment, InstanceMark, Lecture, NewUser, User,
    UserChanges,
};
use crate::policy::Scope;

/// Repository Trait
///
/// Abstract contract for all persistence operations, shared as
/// `Arc<dyn Repository>` so handlers never depend on the concrete backend.
/// Single-entity getters are the ancestor-chase steps of authorization:
/// each is one key lookup, never a scan. Every list method takes the
/// caller's `Scope` and applies it inside the query as a pre-filter.
///
/// Uniqueness is enforced here twice: `*_exists` pre-checks give friendly
/// conflicts, and the database constraints catch the racing writer that
/// slipped past them (mapped to the same Conflict error).
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: NewUser) -> ApiResult<User>;
    async fn get_user(&self, id: Uuid) -> ApiResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> ApiResult<Option<User>>;
    async fn get_users_by_ids(&self, ids: &[Uuid]) -> ApiResult<Vec<User>>;
    async fn list_users(&self) -> ApiResult<Vec<User>>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> ApiResult<Option<User>>;
    /// Deletes the user and everything hanging off them (their submissions
    /// with marks and comments, their authored comments, memberships).
    async fn delete_user(&self, id: Uuid) -> ApiResult<bool>;
    async fn get_password_hash(&self, user_id: Uuid) -> ApiResult<Option<String>>;

    // --- Courses ---
    /// Inserts the course with its full membership sets in one transaction.
    async fn create_course(
        &self,
        id: Uuid,
        title: &str,
        teachers: &[Uuid],
        students: &[Uuid],
    ) -> ApiResult<Course>;
    async fn get_course(&self, id: Uuid) -> ApiResult<Option<Course>>;
    async fn list_courses(&self, scope: Scope) -> ApiResult<Vec<Course>>;
    /// Partial update; membership sets, when given, replace the stored sets.
    async fn update_course(
        &self,
        id: Uuid,
        title: Option<&str>,
        teachers: Option<&[Uuid]>,
        students: Option<&[Uuid]>,
    ) -> ApiResult<Option<Course>>;
    /// Explicit child-first cascade in one transaction.
    async fn delete_course(&self, id: Uuid) -> ApiResult<bool>;
    async fn course_title_exists(&self, title: &str, exclude: Option<Uuid>) -> ApiResult<bool>;

    // --- Lectures ---
    async fn create_lecture(
        &self,
        id: Uuid,
        course_id: Uuid,
        title: &str,
        file_key: &str,
    ) -> ApiResult<Lecture>;
    async fn get_lecture(&self, id: Uuid) -> ApiResult<Option<Lecture>>;
    async fn list_lectures(&self, scope: Scope, course_id: Option<Uuid>) -> ApiResult<Vec<Lecture>>;
    async fn update_lecture(
        &self,
        id: Uuid,
        title: Option<&str>,
        file_key: Option<&str>,
    ) -> ApiResult<Option<Lecture>>;
    async fn delete_lecture(&self, id: Uuid) -> ApiResult<bool>;
    async fn lecture_title_exists(
        &self,
        course_id: Uuid,
        title: &str,
        exclude: Option<Uuid>,
    ) -> ApiResult<bool>;

    // --- Homeworks ---
    async fn create_homework(
        &self,
        id: Uuid,
        lecture_id: Uuid,
        title: &str,
        text: &str,
    ) -> ApiResult<Homework>;
    async fn get_homework(&self, id: Uuid) -> ApiResult<Option<Homework>>;
    async fn list_homeworks(
        &self,
        scope: Scope,
        lecture_id: Option<Uuid>,
    ) -> ApiResult<Vec<Homework>>;
    async fn update_homework(
        &self,
        id: Uuid,
        title: Option<&str>,
        text: Option<&str>,
    ) -> ApiResult<Option<Homework>>;
    async fn delete_homework(&self, id: Uuid) -> ApiResult<bool>;
    async fn homework_title_exists(
        &self,
        lecture_id: Uuid,
        title: &str,
        exclude: Option<Uuid>,
    ) -> ApiResult<bool>;

    // --- Homework instances ---
    async fn create_instance(
        &self,
        id: Uuid,
        homework_id: Uuid,
        student_id: Uuid,
        uploaded_work: Option<&str>,
    ) -> ApiResult<HomeworkInstance>;
    async fn get_instance(&self, id: Uuid) -> ApiResult<Option<HomeworkInstance>>;
    async fn list_instances(
        &self,
        scope: Scope,
        homework_id: Option<Uuid>,
    ) -> ApiResult<Vec<HomeworkInstance>>;
    async fn update_instance(
        &self,
        id: Uuid,
        uploaded_work: Option<&str>,
        is_done: Option<bool>,
    ) -> ApiResult<Option<HomeworkInstance>>;
    async fn delete_instance(&self, id: Uuid) -> ApiResult<bool>;
    async fn instance_exists(&self, homework_id: Uuid, student_id: Uuid) -> ApiResult<bool>;

    // --- Marks ---
    async fn create_mark(&self, instance_id: Uuid, mark: i16) -> ApiResult<InstanceMark>;
    async fn get_mark(&self, instance_id: Uuid) -> ApiResult<Option<InstanceMark>>;
    async fn list_marks(&self, scope: Scope) -> ApiResult<Vec<InstanceMark>>;
    async fn update_mark(&self, instance_id: Uuid, mark: i16) -> ApiResult<Option<InstanceMark>>;
    async fn delete_mark(&self, instance_id: Uuid) -> ApiResult<bool>;

    // --- Comments ---
    async fn create_comment(
        &self,
        id: Uuid,
        instance_id: Uuid,
        author_id: Uuid,
        body: &str,
    ) -> ApiResult<InstanceComment>;
    async fn get_comment(&self, id: Uuid) -> ApiResult<Option<InstanceComment>>;
    /// Ordered by creation time ascending.
    async fn list_comments(&self, instance_id: Uuid) -> ApiResult<Vec<InstanceComment>>;
    /// Only the body is mutable; `created_at` never changes.
    async fn update_comment(&self, id: Uuid, body: &str) -> ApiResult<Option<InstanceComment>>;
    async fn delete_comment(&self, id: Uuid) -> ApiResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// Concrete implementation backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, email, first_name, last_name, role";

// Course rows carry their membership sets as uuid[] aggregates so policy
// checks need no further queries.
const COURSE_SELECT: &str = r#"
    SELECT c.id, c.title,
           coalesce((SELECT array_agg(ct.user_id)
                       FROM course_teachers ct
                      WHERE ct.course_id = c.id), '{}') AS teachers,
           coalesce((SELECT array_agg(cs.user_id)
                       FROM course_students cs
                      WHERE cs.course_id = c.id), '{}') AS students
      FROM courses c
"#;

/// Appends the scope pre-filter for a query whose rows expose the owning
/// course id as `course_col`.
fn push_course_scope(builder: &mut QueryBuilder<'_, Postgres>, scope: Scope, course_col: &str) {
    match scope {
        Scope::All => {}
        Scope::TeacherOf(id) => {
            builder.push(format!(
                " AND EXISTS (SELECT 1 FROM course_teachers ct WHERE ct.course_id = {course_col} AND ct.user_id = "
            ));
            builder.push_bind(id);
            builder.push(")");
        }
        Scope::StudentOf(id) => {
            builder.push(format!(
                " AND EXISTS (SELECT 1 FROM course_students cs WHERE cs.course_id = {course_col} AND cs.user_id = "
            ));
            builder.push_bind(id);
            builder.push(")");
        }
    }
}

/// Appends the scope pre-filter for instance-rooted rows. The teacher axis
/// walks the ancestry back to the course; the student axis narrows to
/// instance ownership.
fn push_instance_scope(
    builder: &mut QueryBuilder<'_, Postgres>,
    scope: Scope,
    homework_col: &str,
    student_col: &str,
) {
    match scope {
        Scope::All => {}
        Scope::TeacherOf(id) => {
            builder.push(format!(
                " AND EXISTS (SELECT 1 FROM homeworks h \
                   JOIN lectures l ON l.id = h.lecture_id \
                   JOIN course_teachers ct ON ct.course_id = l.course_id \
                  WHERE h.id = {homework_col} AND ct.user_id = "
            ));
            builder.push_bind(id);
            builder.push(")");
        }
        Scope::StudentOf(id) => {
            builder.push(format!(" AND {student_col} = "));
            builder.push_bind(id);
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- Users ---

    async fn create_user(&self, user: NewUser) -> ApiResult<User> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, email, first_name, last_name, role, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, email, first_name, last_name, role",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "email is already registered"))
    }

    async fn get_user(&self, id: Uuid) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_users_by_ids(&self, ids: &[Uuid]) -> ApiResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn list_users(&self) -> ApiResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY email"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn update_user(&self, id: Uuid, changes: UserChanges) -> ApiResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "UPDATE users \
                SET email = COALESCE($2, email), \
                    first_name = COALESCE($3, first_name), \
                    last_name = COALESCE($4, last_name), \
                    password_hash = COALESCE($5, password_hash), \
                    role = COALESCE($6, role) \
              WHERE id = $1 \
              RETURNING id, email, first_name, last_name, role",
        )
        .bind(id)
        .bind(changes.email)
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(changes.password_hash)
        .bind(changes.role)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "email is already registered"))
    }

    async fn delete_user(&self, id: Uuid) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Child-first walk over everything reachable from the user.
        sqlx::query("DELETE FROM instance_comments WHERE author_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM instance_comments WHERE instance_id IN \
             (SELECT id FROM homework_instances WHERE student_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM instance_marks WHERE instance_id IN \
             (SELECT id FROM homework_instances WHERE student_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM homework_instances WHERE student_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM course_teachers WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM course_students WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_password_hash(&self, user_id: Uuid) -> ApiResult<Option<String>> {
        let hash: Option<(String,)> =
            sqlx::query_as("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.map(|row| row.0))
    }

    // --- Courses ---

    async fn create_course(
        &self,
        id: Uuid,
        title: &str,
        teachers: &[Uuid],
        students: &[Uuid],
    ) -> ApiResult<Course> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO courses (id, title) VALUES ($1, $2)")
            .bind(id)
            .bind(title)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::conflict_on_unique(e, "a course with this title already exists"))?;

        sqlx::query(
            "INSERT INTO course_teachers (course_id, user_id) SELECT $1, unnest($2::uuid[])",
        )
        .bind(id)
        .bind(teachers)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO course_students (course_id, user_id) SELECT $1, unnest($2::uuid[])",
        )
        .bind(id)
        .bind(students)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_course(id)
            .await?
            .ok_or_else(|| ApiError::Internal("course row missing after insert".to_string()))
    }

    async fn get_course(&self, id: Uuid) -> ApiResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(&format!("{COURSE_SELECT} WHERE c.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(course)
    }

    async fn list_courses(&self, scope: Scope) -> ApiResult<Vec<Course>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("{COURSE_SELECT} WHERE 1=1"));
        push_course_scope(&mut builder, scope, "c.id");
        builder.push(" ORDER BY c.title");

        let courses = builder
            .build_query_as::<Course>()
            .fetch_all(&self.pool)
            .await?;
        Ok(courses)
    }

    async fn update_course(
        &self,
        id: Uuid,
        title: Option<&str>,
        teachers: Option<&[Uuid]>,
        students: Option<&[Uuid]>,
    ) -> ApiResult<Option<Course>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE courses SET title = COALESCE($2, title) WHERE id = $1")
            .bind(id)
            .bind(title)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::conflict_on_unique(e, "a course with this title already exists"))?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        // Membership updates replace the stored set wholesale.
        if let Some(set) = teachers {
            sqlx::query("DELETE FROM course_teachers WHERE course_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO course_teachers (course_id, user_id) SELECT $1, unnest($2::uuid[])",
            )
            .bind(id)
            .bind(set)
            .execute(&mut *tx)
            .await?;
        }
        if let Some(set) = students {
            sqlx::query("DELETE FROM course_students WHERE course_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO course_students (course_id, user_id) SELECT $1, unnest($2::uuid[])",
            )
            .bind(id)
            .bind(set)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.get_course(id).await
    }

    async fn delete_course(&self, id: Uuid) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Explicit cascade, leaf to root: comments and marks, then
        // instances, homeworks, lectures, memberships, the course itself.
        sqlx::query(
            "DELETE FROM instance_comments WHERE instance_id IN \
             (SELECT hi.id FROM homework_instances hi \
                JOIN homeworks h ON h.id = hi.homework_id \
                JOIN lectures l ON l.id = h.lecture_id \
               WHERE l.course_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM instance_marks WHERE instance_id IN \
             (SELECT hi.id FROM homework_instances hi \
                JOIN homeworks h ON h.id = hi.homework_id \
                JOIN lectures l ON l.id = h.lecture_id \
               WHERE l.course_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM homework_instances WHERE homework_id IN \
             (SELECT h.id FROM homeworks h \
                JOIN lectures l ON l.id = h.lecture_id \
               WHERE l.course_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM homeworks WHERE lecture_id IN \
             (SELECT id FROM lectures WHERE course_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM lectures WHERE course_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM course_teachers WHERE course_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM course_students WHERE course_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn course_title_exists(&self, title: &str, exclude: Option<Uuid>) -> ApiResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM courses WHERE title = $1 AND ($2::uuid IS NULL OR id <> $2) LIMIT 1",
        )
        .bind(title)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    // --- Lectures ---

    async fn create_lecture(
        &self,
        id: Uuid,
        course_id: Uuid,
        title: &str,
        file_key: &str,
    ) -> ApiResult<Lecture> {
        sqlx::query_as::<_, Lecture>(
            "INSERT INTO lectures (id, course_id, title, file_key) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, course_id, title, file_key",
        )
        .bind(id)
        .bind(course_id)
        .bind(title)
        .bind(file_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            ApiError::conflict_on_unique(e, "a lecture with this title already exists in the course")
        })
    }

    async fn get_lecture(&self, id: Uuid) -> ApiResult<Option<Lecture>> {
        let lecture = sqlx::query_as::<_, Lecture>(
            "SELECT id, course_id, title, file_key FROM lectures WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lecture)
    }

    async fn list_lectures(&self, scope: Scope, course_id: Option<Uuid>) -> ApiResult<Vec<Lecture>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT l.id, l.course_id, l.title, l.file_key FROM lectures l WHERE 1=1",
        );
        if let Some(course) = course_id {
            builder.push(" AND l.course_id = ");
            builder.push_bind(course);
        }
        push_course_scope(&mut builder, scope, "l.course_id");
        builder.push(" ORDER BY l.title");

        let lectures = builder
            .build_query_as::<Lecture>()
            .fetch_all(&self.pool)
            .await?;
        Ok(lectures)
    }

    async fn update_lecture(
        &self,
        id: Uuid,
        title: Option<&str>,
        file_key: Option<&str>,
    ) -> ApiResult<Option<Lecture>> {
        sqlx::query_as::<_, Lecture>(
            "UPDATE lectures \
                SET title = COALESCE($2, title), \
                    file_key = COALESCE($3, file_key) \
              WHERE id = $1 \
              RETURNING id, course_id, title, file_key",
        )
        .bind(id)
        .bind(title)
        .bind(file_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            ApiError::conflict_on_unique(e, "a lecture with this title already exists in the course")
        })
    }

    async fn delete_lecture(&self, id: Uuid) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM instance_comments WHERE instance_id IN \
             (SELECT hi.id FROM homework_instances hi \
                JOIN homeworks h ON h.id = hi.homework_id \
               WHERE h.lecture_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM instance_marks WHERE instance_id IN \
             (SELECT hi.id FROM homework_instances hi \
                JOIN homeworks h ON h.id = hi.homework_id \
               WHERE h.lecture_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM homework_instances WHERE homework_id IN \
             (SELECT id FROM homeworks WHERE lecture_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM homeworks WHERE lecture_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM lectures WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn lecture_title_exists(
        &self,
        course_id: Uuid,
        title: &str,
        exclude: Option<Uuid>,
    ) -> ApiResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM lectures \
              WHERE course_id = $1 AND title = $2 AND ($3::uuid IS NULL OR id <> $3) LIMIT 1",
        )
        .bind(course_id)
        .bind(title)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    // --- Homeworks ---

    async fn create_homework(
        &self,
        id: Uuid,
        lecture_id: Uuid,
        title: &str,
        text: &str,
    ) -> ApiResult<Homework> {
        sqlx::query_as::<_, Homework>(
            "INSERT INTO homeworks (id, lecture_id, title, text) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, lecture_id, title, text",
        )
        .bind(id)
        .bind(lecture_id)
        .bind(title)
        .bind(text)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            ApiError::conflict_on_unique(e, "a homework with this title already exists in the lecture")
        })
    }

    async fn get_homework(&self, id: Uuid) -> ApiResult<Option<Homework>> {
        let homework = sqlx::query_as::<_, Homework>(
            "SELECT id, lecture_id, title, text FROM homeworks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(homework)
    }

    async fn list_homeworks(
        &self,
        scope: Scope,
        lecture_id: Option<Uuid>,
    ) -> ApiResult<Vec<Homework>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT h.id, h.lecture_id, h.title, h.text \
               FROM homeworks h JOIN lectures l ON l.id = h.lecture_id WHERE 1=1",
        );
        if let Some(lecture) = lecture_id {
            builder.push(" AND h.lecture_id = ");
            builder.push_bind(lecture);
        }
        push_course_scope(&mut builder, scope, "l.course_id");
        builder.push(" ORDER BY h.title");

        let homeworks = builder
            .build_query_as::<Homework>()
            .fetch_all(&self.pool)
            .await?;
        Ok(homeworks)
    }

    async fn update_homework(
        &self,
        id: Uuid,
        title: Option<&str>,
        text: Option<&str>,
    ) -> ApiResult<Option<Homework>> {
        sqlx::query_as::<_, Homework>(
            "UPDATE homeworks \
                SET title = COALESCE($2, title), \
                    text = COALESCE($3, text) \
              WHERE id = $1 \
              RETURNING id, lecture_id, title, text",
        )
        .bind(id)
        .bind(title)
        .bind(text)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            ApiError::conflict_on_unique(e, "a homework with this title already exists in the lecture")
        })
    }

    async fn delete_homework(&self, id: Uuid) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM instance_comments WHERE instance_id IN \
             (SELECT id FROM homework_instances WHERE homework_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM instance_marks WHERE instance_id IN \
             (SELECT id FROM homework_instances WHERE homework_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM homework_instances WHERE homework_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM homeworks WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn homework_title_exists(
        &self,
        lecture_id: Uuid,
        title: &str,
        exclude: Option<Uuid>,
    ) -> ApiResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM homeworks \
              WHERE lecture_id = $1 AND title = $2 AND ($3::uuid IS NULL OR id <> $3) LIMIT 1",
        )
        .bind(lecture_id)
        .bind(title)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    // --- Homework instances ---

    async fn create_instance(
        &self,
        id: Uuid,
        homework_id: Uuid,
        student_id: Uuid,
        uploaded_work: Option<&str>,
    ) -> ApiResult<HomeworkInstance> {
        // The composite unique constraint on (homework_id, student_id)
        // serializes racing duplicate creates; the loser lands here as a
        // Conflict.
        sqlx::query_as::<_, HomeworkInstance>(
            "INSERT INTO homework_instances (id, homework_id, student_id, uploaded_work, is_done) \
             VALUES ($1, $2, $3, $4, false) \
             RETURNING id, homework_id, student_id, uploaded_work, is_done",
        )
        .bind(id)
        .bind(homework_id)
        .bind(student_id)
        .bind(uploaded_work)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            ApiError::conflict_on_unique(e, "a homework instance already exists for this student")
        })
    }

    async fn get_instance(&self, id: Uuid) -> ApiResult<Option<HomeworkInstance>> {
        let instance = sqlx::query_as::<_, HomeworkInstance>(
            "SELECT id, homework_id, student_id, uploaded_work, is_done \
               FROM homework_instances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(instance)
    }

    async fn list_instances(
        &self,
        scope: Scope,
        homework_id: Option<Uuid>,
    ) -> ApiResult<Vec<HomeworkInstance>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT hi.id, hi.homework_id, hi.student_id, hi.uploaded_work, hi.is_done \
               FROM homework_instances hi WHERE 1=1",
        );
        if let Some(homework) = homework_id {
            builder.push(" AND hi.homework_id = ");
            builder.push_bind(homework);
        }
        push_instance_scope(&mut builder, scope, "hi.homework_id", "hi.student_id");
        builder.push(" ORDER BY hi.id");

        let instances = builder
            .build_query_as::<HomeworkInstance>()
            .fetch_all(&self.pool)
            .await?;
        Ok(instances)
    }

    async fn update_instance(
        &self,
        id: Uuid,
        uploaded_work: Option<&str>,
        is_done: Option<bool>,
    ) -> ApiResult<Option<HomeworkInstance>> {
        let instance = sqlx::query_as::<_, HomeworkInstance>(
            "UPDATE homework_instances \
                SET uploaded_work = COALESCE($2, uploaded_work), \
                    is_done = COALESCE($3, is_done) \
              WHERE id = $1 \
              RETURNING id, homework_id, student_id, uploaded_work, is_done",
        )
        .bind(id)
        .bind(uploaded_work)
        .bind(is_done)
        .fetch_optional(&self.pool)
        .await?;
        Ok(instance)
    }

    async fn delete_instance(&self, id: Uuid) -> ApiResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM instance_comments WHERE instance_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM instance_marks WHERE instance_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM homework_instances WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn instance_exists(&self, homework_id: Uuid, student_id: Uuid) -> ApiResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM homework_instances WHERE homework_id = $1 AND student_id = $2 LIMIT 1",
        )
        .bind(homework_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    // --- Marks ---

    async fn create_mark(&self, instance_id: Uuid, mark: i16) -> ApiResult<InstanceMark> {
        sqlx::query_as::<_, InstanceMark>(
            "INSERT INTO instance_marks (instance_id, mark) VALUES ($1, $2) \
             RETURNING instance_id, mark",
        )
        .bind(instance_id)
        .bind(mark)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ApiError::conflict_on_unique(e, "this homework instance is already marked"))
    }

    async fn get_mark(&self, instance_id: Uuid) -> ApiResult<Option<InstanceMark>> {
        let mark = sqlx::query_as::<_, InstanceMark>(
            "SELECT instance_id, mark FROM instance_marks WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(mark)
    }

    async fn list_marks(&self, scope: Scope) -> ApiResult<Vec<InstanceMark>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT m.instance_id, m.mark \
               FROM instance_marks m \
               JOIN homework_instances hi ON hi.id = m.instance_id WHERE 1=1",
        );
        push_instance_scope(&mut builder, scope, "hi.homework_id", "hi.student_id");
        builder.push(" ORDER BY m.instance_id");

        let marks = builder
            .build_query_as::<InstanceMark>()
            .fetch_all(&self.pool)
            .await?;
        Ok(marks)
    }

    async fn update_mark(&self, instance_id: Uuid, mark: i16) -> ApiResult<Option<InstanceMark>> {
        let updated = sqlx::query_as::<_, InstanceMark>(
            "UPDATE instance_marks SET mark = $2 WHERE instance_id = $1 \
             RETURNING instance_id, mark",
        )
        .bind(instance_id)
        .bind(mark)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_mark(&self, instance_id: Uuid) -> ApiResult<bool> {
        let result = sqlx::query("DELETE FROM instance_marks WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Comments ---

    async fn create_comment(
        &self,
        id: Uuid,
        instance_id: Uuid,
        author_id: Uuid,
        body: &str,
    ) -> ApiResult<InstanceComment> {
        // created_at comes from the database clock so ordering within an
        // instance is consistent across application hosts.
        let comment = sqlx::query_as::<_, InstanceComment>(
            "INSERT INTO instance_comments (id, instance_id, author_id, body, created_at) \
             VALUES ($1, $2, $3, $4, now()) \
             RETURNING id, instance_id, author_id, body, created_at",
        )
        .bind(id)
        .bind(instance_id)
        .bind(author_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn get_comment(&self, id: Uuid) -> ApiResult<Option<InstanceComment>> {
        let comment = sqlx::query_as::<_, InstanceComment>(
            "SELECT id, instance_id, author_id, body, created_at \
               FROM instance_comments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn list_comments(&self, instance_id: Uuid) -> ApiResult<Vec<InstanceComment>> {
        let comments = sqlx::query_as::<_, InstanceComment>(
            "SELECT id, instance_id, author_id, body, created_at \
               FROM instance_comments WHERE instance_id = $1 \
              ORDER BY created_at ASC, id ASC",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }

    async fn update_comment(&self, id: Uuid, body: &str) -> ApiResult<Option<InstanceComment>> {
        let updated = sqlx::query_as::<_, InstanceComment>(
            "UPDATE instance_comments SET body = $2 WHERE id = $1 \
             RETURNING id, instance_id, author_id, body, created_at",
        )
        .bind(id)
        .bind(body)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_comment(&self, id: Uuid) -> ApiResult<bool> {
        let result = sqlx::query("DELETE FROM instance_comments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
