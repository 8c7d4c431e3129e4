//! Validation & Invariant Layer.
//!
//! Pure per-entity validators. Field problems are collected into a
//! `ValidationErrors` map rather than failing on the first one, so one
//! round trip reports everything. Uniqueness is deliberately NOT checked
//! here: it can only be decided against live state and is surfaced as a
//! Conflict by the repository.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::{ApiError, ValidationErrors};
use crate::models::{
    CreateCourseRequest, CreateHomeworkRequest, CreateLectureRequest, RegisterUserRequest, Role,
    UpdateCourseRequest, UpdateHomeworkRequest, UpdateLectureRequest, UpdateUserRequest, User,
};

pub const MAX_TITLE_LEN: usize = 128;
pub const MIN_COURSE_TITLE_LEN: usize = 5;
pub const MAX_EMAIL_LEN: usize = 40;
pub const MAX_NAME_LEN: usize = 30;
pub const MARK_MIN: i16 = 0;
pub const MARK_MAX: i16 = 100;

fn check_email(email: &str, errors: &mut ValidationErrors) {
    if email.trim().is_empty() {
        errors.add("email", "email must not be empty");
    } else if email.len() > MAX_EMAIL_LEN {
        errors.add("email", format!("email must be at most {MAX_EMAIL_LEN} characters"));
    } else if !email.contains('@') {
        errors.add("email", "email must contain '@'");
    }
}

fn check_name(field: &str, value: &str, errors: &mut ValidationErrors) {
    // Blank names are allowed; only the length is bounded.
    if value.len() > MAX_NAME_LEN {
        errors.add(field, format!("must be at most {MAX_NAME_LEN} characters"));
    }
}

fn check_role(role: Role, errors: &mut ValidationErrors) {
    if role == Role::Superuser {
        errors.add("role", "superuser cannot be created this way");
    }
}

/// validate_register
///
/// Field checks for both the public registration path and the admin
/// user-create path.
pub fn validate_register(req: &RegisterUserRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    check_email(&req.email, &mut errors);
    check_name("first_name", &req.first_name, &mut errors);
    check_name("last_name", &req.last_name, &mut errors);
    if req.password.is_empty() {
        errors.add("password", "password must not be empty");
    }
    check_role(req.role, &mut errors);
    errors.into_result()
}

/// validate_user_update
///
/// Partial-update variant: only present fields are checked.
pub fn validate_user_update(req: &UpdateUserRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    if let Some(email) = &req.email {
        check_email(email, &mut errors);
    }
    if let Some(first_name) = &req.first_name {
        check_name("first_name", first_name, &mut errors);
    }
    if let Some(last_name) = &req.last_name {
        check_name("last_name", last_name, &mut errors);
    }
    if let Some(password) = &req.password {
        if password.is_empty() {
            errors.add("password", "password must not be empty");
        }
    }
    if let Some(role) = req.role {
        check_role(role, &mut errors);
    }
    errors.into_result()
}

fn check_course_title(title: &str, errors: &mut ValidationErrors) {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        errors.add("title", "title must not be empty");
    } else if trimmed.len() < MIN_COURSE_TITLE_LEN {
        errors.add("title", "title too short, use a clearer title");
    } else if title.len() > MAX_TITLE_LEN {
        errors.add("title", format!("title must be at most {MAX_TITLE_LEN} characters"));
    }
}

fn check_title(title: &str, errors: &mut ValidationErrors) {
    if title.trim().is_empty() {
        errors.add("title", "title must not be empty");
    } else if title.len() > MAX_TITLE_LEN {
        errors.add("title", format!("title must be at most {MAX_TITLE_LEN} characters"));
    }
}

/// check_members
///
/// All-or-nothing batch check: every requested user id must resolve to an
/// existing user holding the expected role. One generic message per field;
/// which id failed is never reported, so the error cannot be used to probe
/// other principals' roles.
fn check_members(
    field: &str,
    requested: &[Uuid],
    resolved: &[User],
    expected: Role,
    errors: &mut ValidationErrors,
) {
    let want: HashSet<Uuid> = requested.iter().copied().collect();
    let have: HashSet<Uuid> = resolved
        .iter()
        .filter(|user| user.role == expected)
        .map(|user| user.id)
        .collect();

    if !want.is_subset(&have) {
        errors.add(
            field,
            format!("every referenced user must be an existing {}", expected.as_str()),
        );
    }
}

/// validate_course_create
///
/// `teachers`/`students` are the user records the orchestrator resolved for
/// the requested ids; missing ids simply stay unresolved and fail the batch.
pub fn validate_course_create(
    req: &CreateCourseRequest,
    teachers: &[User],
    students: &[User],
) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    check_course_title(&req.title, &mut errors);
    check_members("teachers", &req.teachers, teachers, Role::Teacher, &mut errors);
    check_members("students", &req.students, students, Role::Student, &mut errors);
    errors.into_result()
}

/// validate_course_update
pub fn validate_course_update(
    req: &UpdateCourseRequest,
    teachers: Option<&[User]>,
    students: Option<&[User]>,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    if let Some(title) = &req.title {
        check_course_title(title, &mut errors);
    }
    if let (Some(requested), Some(resolved)) = (&req.teachers, teachers) {
        check_members("teachers", requested, resolved, Role::Teacher, &mut errors);
        // The teacher set must stay non-empty; an empty replacement would
        // orphan the course.
        if requested.is_empty() {
            errors.add("teachers", "a course must keep at least one teacher");
        }
    }
    if let (Some(requested), Some(resolved)) = (&req.students, students) {
        check_members("students", requested, resolved, Role::Student, &mut errors);
    }
    errors.into_result()
}

/// validate_lecture_create
pub fn validate_lecture_create(req: &CreateLectureRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    check_title(&req.title, &mut errors);
    if req.file_key.trim().is_empty() {
        errors.add("file_key", "file_key must not be empty");
    }
    errors.into_result()
}

/// validate_lecture_update
pub fn validate_lecture_update(req: &UpdateLectureRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    if let Some(title) = &req.title {
        check_title(title, &mut errors);
    }
    if let Some(file_key) = &req.file_key {
        if file_key.trim().is_empty() {
            errors.add("file_key", "file_key must not be empty");
        }
    }
    errors.into_result()
}

/// validate_homework_create
pub fn validate_homework_create(req: &CreateHomeworkRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    check_title(&req.title, &mut errors);
    if req.text.trim().is_empty() {
        errors.add("text", "text must not be empty");
    }
    errors.into_result()
}

/// validate_homework_update
pub fn validate_homework_update(req: &UpdateHomeworkRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    if let Some(title) = &req.title {
        check_title(title, &mut errors);
    }
    if let Some(text) = &req.text {
        if text.trim().is_empty() {
            errors.add("text", "text must not be empty");
        }
    }
    errors.into_result()
}

/// validate_mark
///
/// Out-of-range marks are rejected, never clamped.
pub fn validate_mark(mark: i16) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    if !(MARK_MIN..=MARK_MAX).contains(&mark) {
        errors.add("mark", format!("mark must be between {MARK_MIN} and {MARK_MAX}"));
    }
    errors.into_result()
}

/// validate_comment_body
pub fn validate_comment_body(body: &str) -> Result<(), ApiError> {
    let mut errors = ValidationErrors::new();
    if body.trim().is_empty() {
        errors.add("body", "body must not be empty");
    }
    errors.into_result()
}
