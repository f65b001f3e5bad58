use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Admin Router Module
///
/// User-administration endpoints, nested under `/api/admin`.
///
/// Access Control:
/// The `/api/admin` prefix requires the admin role in the policy table, so the
/// guard rejects everyone else before these handlers run. Each handler still
/// re-checks the role explicitly, keeping the endpoints safe even if a route is
/// ever remounted outside the protected prefix.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /api/admin/users?page=&pageSize=&role=&banned=&search=
        // Paginated listing with combinable filters, for the moderation UI.
        .route("/users", get(handlers::list_users))
        // POST /api/admin/users/ban
        // Bans an account (permanent or time-bounded) and revokes its sessions.
        .route("/users/ban", post(handlers::ban_user))
        // POST /api/admin/users/unban
        // Lifts a ban and clears its reason and expiry.
        .route("/users/unban", post(handlers::unban_user))
        // POST /api/admin/users/role
        // Assigns one of the valid roles.
        .route("/users/role", post(handlers::update_role))
}
