use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// User Router Module
///
/// Self-service endpoints for the signed-in account, nested under `/api/user`.
///
/// Access Control Strategy:
/// The `/api/user` prefix requires one of admin/user/member in the policy table,
/// so every request arriving here passed authentication, the ban check, and the
/// role check. Handlers receive the vetted identity via the `CurrentUser`
/// extractor and only add per-resource ownership checks (e.g. session revokes).
pub fn user_routes() -> Router<AppState> {
    Router::new()
        // GET /api/user/profile
        // Full account record plus active-session count and activity flag.
        // PUT /api/user/profile
        // Display-name update; suspended accounts are rejected.
        .route(
            "/profile",
            get(handlers::get_profile).put(handlers::update_profile),
        )
        // GET /api/user/sessions
        // Lists the caller's active sessions (tokens never exposed).
        // DELETE /api/user/sessions
        // Revokes one session by id, or all of them via revokeAll.
        .route(
            "/sessions",
            get(handlers::list_sessions).delete(handlers::revoke_sessions),
        )
}
