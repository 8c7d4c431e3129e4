use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// All domain CRUD for principals with a validated session. Every handler
/// receives the resolved `AuthUser` and passes it through the policy engine;
/// this module only guarantees that a session exists.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        // The caller's own profile record.
        .route("/me", get(handlers::get_me))
        // POST /upload/presigned
        // Starts the media pipeline: returns a short-lived signed URL for a
        // direct client-to-storage upload plus the object key to reference
        // in a later lecture or homework-instance mutation.
        .route("/upload/presigned", post(handlers::get_presigned_url))
        // --- Courses ---
        // Creation is restricted to teachers; listings are scope-filtered
        // per caller inside the repository query.
        .route(
            "/courses",
            post(handlers::create_course).get(handlers::list_courses),
        )
        .route(
            "/courses/{id}",
            get(handlers::get_course)
                .put(handlers::update_course)
                .delete(handlers::delete_course),
        )
        // --- Lectures ---
        // GET /lectures?course_id=... narrows to one course.
        .route(
            "/lectures",
            post(handlers::create_lecture).get(handlers::list_lectures),
        )
        .route(
            "/lectures/{id}",
            get(handlers::get_lecture)
                .put(handlers::update_lecture)
                .delete(handlers::delete_lecture),
        )
        // --- Homeworks ---
        // GET /homeworks?lecture_id=... narrows to one lecture.
        .route(
            "/homeworks",
            post(handlers::create_homework).get(handlers::list_homeworks),
        )
        .route(
            "/homeworks/{id}",
            get(handlers::get_homework)
                .put(handlers::update_homework)
                .delete(handlers::delete_homework),
        )
        // --- Homework instances ---
        // Students create their own submission records; deletion is a
        // superuser-only operation.
        .route(
            "/homework-instances",
            post(handlers::create_instance).get(handlers::list_instances),
        )
        .route(
            "/homework-instances/{id}",
            get(handlers::get_instance)
                .put(handlers::update_instance)
                .delete(handlers::delete_instance),
        )
        // --- Marks ---
        // One mark per instance, managed by the owning course's teachers.
        .route(
            "/homework-instances/{id}/mark",
            post(handlers::set_mark)
                .get(handlers::get_mark)
                .put(handlers::update_mark)
                .delete(handlers::delete_mark),
        )
        .route("/marks", get(handlers::list_marks))
        // --- Comments ---
        // Listed oldest-first under their instance; edited by author only.
        .route(
            "/homework-instances/{id}/comments",
            post(handlers::add_comment).get(handlers::list_comments),
        )
        .route(
            "/comments/{id}",
            put(handlers::update_comment).delete(handlers::delete_comment),
        )
}
