use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// --- Core Application Schemas (Mapped to Database) ---

/// Role
///
/// The closed set of roles a principal can hold. Exactly one role is stored
/// per user row; the `user_role` Postgres enum mirrors this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    Superuser,
    Teacher,
    #[default]
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Superuser => "superuser",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

/// User
///
/// Canonical identity record from the `users` table. The password hash is
/// never part of this struct; credential material stays inside the
/// repository and auth layers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    // Unique login identity.
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

/// Course
///
/// Root of the ownership tree. Membership sets are loaded alongside the row
/// (uuid[] aggregates over the `course_teachers` / `course_students` join
/// tables) so authorization can test membership without further queries.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Course {
    pub id: Uuid,
    // Globally unique title.
    pub title: String,
    pub teachers: Vec<Uuid>,
    pub students: Vec<Uuid>,
}

/// Lecture
///
/// Belongs to exactly one course; title unique within that course. The file
/// key is an opaque object-storage reference produced by the presigned
/// upload flow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Lecture {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub file_key: String,
}

/// Homework
///
/// Assignment attached to a lecture; title unique within that lecture.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Homework {
    pub id: Uuid,
    pub lecture_id: Uuid,
    pub title: String,
    pub text: String,
}

/// HomeworkInstance
///
/// A student's submission record for a homework. At most one instance per
/// (homework, student) pair, enforced by a composite unique constraint.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct HomeworkInstance {
    pub id: Uuid,
    pub homework_id: Uuid,
    pub student_id: Uuid,
    // Optional object-storage key for the uploaded work.
    pub uploaded_work: Option<String>,
    pub is_done: bool,
}

/// InstanceMark
///
/// One-to-one grade for a homework instance, keyed by the instance id.
/// Valid marks are integers in [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct InstanceMark {
    pub instance_id: Uuid,
    pub mark: i16,
}

/// InstanceComment
///
/// Discussion entry under a homework instance. `created_at` is assigned by
/// the database at insert time and never updated afterwards; listings are
/// ordered by it ascending.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct InstanceComment {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// RegisterUserRequest
///
/// Input for the public registration endpoint and the admin user-create
/// endpoint. The password is hashed before it reaches storage. The
/// `superuser` role is rejected on both paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub role: Role,
}

/// UpdateUserRequest
///
/// Partial update for a user record (admin path). `None` fields are left
/// unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// NewUser
///
/// Internal insertion record carrying the already-hashed credential. Built
/// by the handlers from a validated `RegisterUserRequest`; never serialized
/// to a client.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub password_hash: String,
}

/// UserChanges
///
/// Internal partial-update record for the repository: the validated
/// `UpdateUserRequest` with the plaintext password already exchanged for a
/// hash.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
}

/// LoginRequest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// LoginResponse
///
/// Bearer token plus the resolved user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// CreateCourseRequest
///
/// Proposed teachers/students are referenced by user id. Every referenced
/// teacher must hold the teacher role and every student the student role;
/// a single bad reference rejects the whole batch. The creator is added to
/// the teacher set regardless of the payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateCourseRequest {
    pub title: String,
    #[serde(default)]
    pub teachers: Vec<Uuid>,
    #[serde(default)]
    pub students: Vec<Uuid>,
}

/// UpdateCourseRequest
///
/// Partial update. Membership sets, when present, replace the stored sets
/// wholesale and are re-validated like a create batch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateCourseRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub teachers: Option<Vec<Uuid>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub students: Option<Vec<Uuid>>,
}

/// CreateLectureRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateLectureRequest {
    pub course_id: Uuid,
    pub title: String,
    // Object key from the presigned upload flow.
    pub file_key: String,
}

/// UpdateLectureRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateLectureRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
}

/// CreateHomeworkRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateHomeworkRequest {
    pub lecture_id: Uuid,
    pub title: String,
    pub text: String,
}

/// UpdateHomeworkRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateHomeworkRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// CreateInstanceRequest
///
/// The acting student is taken from the authenticated session, never from
/// the payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateInstanceRequest {
    pub homework_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_work: Option<String>,
}

/// UpdateInstanceRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateInstanceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_work: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_done: Option<bool>,
}

/// SetMarkRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SetMarkRequest {
    pub mark: i16,
}

/// CreateCommentRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreateCommentRequest {
    pub body: String,
}

/// UpdateCommentRequest
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateCommentRequest {
    pub body: String,
}

/// PresignedUrlRequest
///
/// Input for requesting a short-lived upload URL for lecture files and
/// homework uploads.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PresignedUrlRequest {
    /// Original filename, used only to derive the extension.
    pub filename: String,
    /// MIME type the storage layer constrains the upload to.
    pub file_type: String,
}

/// PresignedUrlResponse
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PresignedUrlResponse {
    pub upload_url: String,
    /// Object key to submit back as `file_key` / `uploaded_work`.
    pub resource_key: String,
}
