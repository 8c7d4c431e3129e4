use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session: the health probe and the identity
/// gateway (register, login). Everything else requires authentication; no
/// domain data is readable anonymously.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Monitoring / load-balancer probe; returns "ok" immediately.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates a teacher or student account. Superuser creation is
        // rejected on this path.
        .route("/register", post(handlers::register_user))
        // POST /login
        // Exchanges credentials for a signed session token.
        .route("/login", post(handlers::login))
}
