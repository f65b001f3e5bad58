use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session. The auth gateway lives here because
/// `/api/auth` is a public prefix in the policy table: sign-in must be reachable
/// while signed out, and sign-out must stay reachable for banned accounts.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness probe for monitoring and load balancers.
        // Deliberately absent from the policy table: it exercises the
        // default-allow fallthrough for unclassified paths.
        .route("/health", get(|| async { "ok" }))
        // POST /api/auth/register
        // Validates the signup payload, then delegates account creation
        // (hashing, verification email) to the authentication provider.
        .route("/api/auth/register", post(handlers::register))
        // POST /api/auth/sign-in/email
        // Email/password sign-in, delegated to the provider.
        .route("/api/auth/sign-in/email", post(handlers::sign_in))
        // POST /api/auth/signout
        // Revokes the session row behind the presented cookie.
        .route("/api/auth/signout", post(handlers::sign_out))
        // POST /api/auth/forgot-password
        // Triggers the provider's reset flow; the provider sends the email.
        .route("/api/auth/forgot-password", post(handlers::forgot_password))
}
