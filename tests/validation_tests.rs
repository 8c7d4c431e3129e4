use uuid::Uuid;

use elearn_portal::error::ApiError;
use elearn_portal::models::{
    CreateCourseRequest, CreateHomeworkRequest, CreateLectureRequest, RegisterUserRequest, Role,
    UpdateCourseRequest, User,
};
use elearn_portal::validate;

fn fields_of(err: ApiError) -> Vec<String> {
    match err {
        ApiError::Validation(v) => v.fields.keys().cloned().collect(),
        other => panic!("expected a validation error, got {other:?}"),
    }
}

fn user(id: u128, role: Role) -> User {
    User {
        id: Uuid::from_u128(id),
        email: format!("user{id}@example.com"),
        first_name: String::new(),
        last_name: String::new(),
        role,
    }
}

// --- Marks ---

#[test]
fn mark_bounds_are_inclusive() {
    assert!(validate::validate_mark(0).is_ok());
    assert!(validate::validate_mark(100).is_ok());
    assert!(validate::validate_mark(57).is_ok());
}

#[test]
fn out_of_range_marks_are_rejected_not_clamped() {
    assert_eq!(fields_of(validate::validate_mark(101).unwrap_err()), vec!["mark"]);
    assert_eq!(fields_of(validate::validate_mark(-1).unwrap_err()), vec!["mark"]);
}

// --- Course create ---

#[test]
fn short_course_titles_are_rejected() {
    let req = CreateCourseRequest {
        title: "Math".to_string(),
        ..CreateCourseRequest::default()
    };
    assert_eq!(
        fields_of(validate::validate_course_create(&req, &[], &[]).unwrap_err()),
        vec!["title"]
    );
}

#[test]
fn member_batches_are_all_or_nothing() {
    let teacher = user(1, Role::Teacher);
    let student = user(2, Role::Student);

    // One real teacher plus one student smuggled into the teacher set: the
    // whole batch is rejected.
    let req = CreateCourseRequest {
        title: "Intro to Systems".to_string(),
        teachers: vec![teacher.id, student.id],
        students: vec![],
    };
    let resolved = vec![teacher.clone(), student.clone()];
    assert_eq!(
        fields_of(validate::validate_course_create(&req, &resolved, &[]).unwrap_err()),
        vec!["teachers"]
    );

    // An id that resolves to nothing fails the same way.
    let req = CreateCourseRequest {
        title: "Intro to Systems".to_string(),
        teachers: vec![],
        students: vec![Uuid::from_u128(999)],
    };
    assert_eq!(
        fields_of(validate::validate_course_create(&req, &[], &[]).unwrap_err()),
        vec!["students"]
    );
}

#[test]
fn valid_course_batch_passes() {
    let teacher = user(1, Role::Teacher);
    let student = user(2, Role::Student);

    let req = CreateCourseRequest {
        title: "Intro to Systems".to_string(),
        teachers: vec![teacher.id],
        students: vec![student.id],
    };
    assert!(
        validate::validate_course_create(
            &req,
            std::slice::from_ref(&teacher),
            std::slice::from_ref(&student)
        )
        .is_ok()
    );
}

#[test]
fn field_errors_are_collected_not_fail_fast() {
    // Bad title AND a bad teacher batch: both must be reported at once.
    let student = user(2, Role::Student);
    let req = CreateCourseRequest {
        title: "x".to_string(),
        teachers: vec![student.id],
        students: vec![],
    };
    let fields = fields_of(
        validate::validate_course_create(&req, std::slice::from_ref(&student), &[]).unwrap_err(),
    );
    assert_eq!(fields, vec!["teachers", "title"]);
}

// --- Course update ---

#[test]
fn course_update_may_not_empty_the_teacher_set() {
    let req = UpdateCourseRequest {
        teachers: Some(vec![]),
        ..UpdateCourseRequest::default()
    };
    let resolved: Vec<User> = vec![];
    assert_eq!(
        fields_of(validate::validate_course_update(&req, Some(resolved.as_slice()), None).unwrap_err()),
        vec!["teachers"]
    );
}

#[test]
fn course_update_without_membership_changes_skips_batch_checks() {
    let req = UpdateCourseRequest {
        title: Some("Renamed Course".to_string()),
        ..UpdateCourseRequest::default()
    };
    assert!(validate::validate_course_update(&req, None, None).is_ok());
}

// --- Lectures & homework ---

#[test]
fn lecture_requires_title_and_file_key() {
    let req = CreateLectureRequest {
        course_id: Uuid::from_u128(1),
        title: "  ".to_string(),
        file_key: String::new(),
    };
    assert_eq!(
        fields_of(validate::validate_lecture_create(&req).unwrap_err()),
        vec!["file_key", "title"]
    );
}

#[test]
fn homework_requires_text() {
    let req = CreateHomeworkRequest {
        lecture_id: Uuid::from_u128(1),
        title: "Assignment 1".to_string(),
        text: "\n".to_string(),
    };
    assert_eq!(
        fields_of(validate::validate_homework_create(&req).unwrap_err()),
        vec!["text"]
    );
}

// --- Comments ---

#[test]
fn comment_body_must_be_nonempty() {
    assert!(validate::validate_comment_body("looks good").is_ok());
    assert_eq!(
        fields_of(validate::validate_comment_body("   ").unwrap_err()),
        vec!["body"]
    );
}

// --- Registration ---

#[test]
fn registration_rejects_the_superuser_role() {
    let req = RegisterUserRequest {
        email: "root@example.com".to_string(),
        first_name: String::new(),
        last_name: String::new(),
        password: "hunter22".to_string(),
        role: Role::Superuser,
    };
    assert_eq!(fields_of(validate::validate_register(&req).unwrap_err()), vec!["role"]);
}

#[test]
fn registration_collects_every_bad_field() {
    let req = RegisterUserRequest {
        email: "not-an-email".to_string(),
        first_name: "x".repeat(31),
        last_name: String::new(),
        password: String::new(),
        role: Role::Student,
    };
    let fields = fields_of(validate::validate_register(&req).unwrap_err());
    assert_eq!(fields, vec!["email", "first_name", "password"]);
}

#[test]
fn valid_registration_passes() {
    let req = RegisterUserRequest {
        email: "student@example.com".to_string(),
        first_name: "Ada".to_string(),
        last_name: "L".to_string(),
        password: "correct-horse".to_string(),
        role: Role::Student,
    };
    assert!(validate::validate_register(&req).is_ok());
}
