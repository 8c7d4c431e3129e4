use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// User administration, exclusively for the superuser role. The router layer
/// above guarantees an authenticated session; the superuser check itself is
/// enforced inside every handler so these endpoints stay safe even if the
/// nesting changes.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/users
        // POST /admin/users
        // Enumerate all principals / create one with any non-superuser role.
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        // GET/PUT/DELETE /admin/users/{id}
        // Inspect, partially update, or remove a principal. Deletion walks
        // everything reachable from the user (submissions, marks, comments,
        // course memberships).
        .route(
            "/users/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
}
