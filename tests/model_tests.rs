use chrono::Utc;
use uuid::Uuid;

use elearn_portal::models::{
    CreateCourseRequest, InstanceComment, Role, UpdateCourseRequest, User,
};

#[test]
fn roles_serialize_lowercase() {
    assert_eq!(serde_json::to_string(&Role::Superuser).unwrap(), r#""superuser""#);
    assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), r#""teacher""#);
    assert_eq!(serde_json::to_string(&Role::Student).unwrap(), r#""student""#);

    let parsed: Role = serde_json::from_str(r#""teacher""#).unwrap();
    assert_eq!(parsed, Role::Teacher);
}

#[test]
fn user_json_never_carries_credentials() {
    let user = User {
        id: Uuid::new_v4(),
        email: "a@b.c".to_string(),
        first_name: "Ada".to_string(),
        last_name: "L".to_string(),
        role: Role::Student,
    };

    let json = serde_json::to_string(&user).unwrap();
    assert!(!json.contains("password"));
    assert!(json.contains(r#""role":"student""#));
}

#[test]
fn partial_updates_omit_absent_fields() {
    let update = UpdateCourseRequest {
        title: Some("New Title Only".to_string()),
        teachers: None,
        students: None,
    };

    let json = serde_json::to_string(&update).unwrap();
    assert!(json.contains(r#""title":"New Title Only""#));
    assert!(!json.contains("teachers"));
    assert!(!json.contains("students"));
}

#[test]
fn course_create_membership_defaults_to_empty() {
    // A payload naming only the title is a valid creation request.
    let parsed: CreateCourseRequest =
        serde_json::from_str(r#"{"title": "Intro to Systems"}"#).unwrap();
    assert!(parsed.teachers.is_empty());
    assert!(parsed.students.is_empty());
}

#[test]
fn comments_round_trip_with_their_timestamp() {
    let comment = InstanceComment {
        id: Uuid::new_v4(),
        instance_id: Uuid::new_v4(),
        author_id: Uuid::new_v4(),
        body: "looks good".to_string(),
        created_at: Utc::now(),
    };

    let json = serde_json::to_string(&comment).unwrap();
    let parsed: InstanceComment = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.created_at, comment.created_at);
    assert_eq!(parsed.body, comment.body);
}
