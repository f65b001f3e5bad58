use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::{HeaderName, StatusCode},
    middleware::{self, Next},
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod config;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod repository;
pub mod session;

// Module for routing segregation (Public, User, Admin).
pub mod routes;
use routes::{admin, public, user};

// --- Public Re-exports ---

// Makes core state types easily accessible to the main application entry point (main.rs)
// and to the integration test suites.
pub use config::AppConfig;
pub use policy::{AccessDecision, Identity, PolicyTable};
pub use repository::{MockRepository, PostgresRepository, RepositoryState};
pub use session::{MockSessionService, PgSessionService, SessionState};

/// ApiDoc
///
/// Auto-generates the OpenAPI documentation (Swagger JSON) for the application.
/// It aggregates all API paths and data schemas decorated with the
/// `#[utoipa::path]` and `#[derive(utoipa::ToSchema)]` macros.
/// The resulting JSON is served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_users, handlers::ban_user, handlers::unban_user, handlers::update_role,
        handlers::get_profile, handlers::update_profile, handlers::list_sessions,
        handlers::revoke_sessions, handlers::register, handlers::sign_in, handlers::sign_out,
        handlers::forgot_password
    ),
    components(
        schemas(
            models::User, models::Session, models::BanUserRequest, models::UnbanUserRequest,
            models::UpdateRoleRequest, models::UpdateProfileRequest, models::RevokeSessionRequest,
            models::RegisterRequest, models::SignInRequest, models::ForgotPasswordRequest,
            models::UserListResponse, models::ProfileResponse, models::SessionInfo,
            models::SessionListResponse, models::ApiMessage,
        )
    ),
    tags(
        (name = "cms-portal", description = "CMS user administration and access control API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Implements the **Unified State Pattern**: the single, thread-safe, immutable
/// container holding all essential application services and configuration,
/// shared across all incoming requests.
#[derive(Clone)]
pub struct AppState {
    /// Repository Layer: Abstracts database access via the PgPool connection.
    pub repo: RepositoryState,
    /// Identity resolution: session-cookie to Identity, fresh on every request.
    pub sessions: SessionState,
    /// The route policy table. Built once at startup, read-only afterwards.
    pub policy: Arc<PolicyTable>,
    /// Configuration: The loaded, immutable environment configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// These implementations allow handlers to selectively pull components from the
// shared AppState, which keeps dependency injection explicit at the signature level.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for Arc<PolicyTable> {
    fn from_ref(app_state: &AppState) -> Arc<PolicyTable> {
        app_state.policy.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// route_guard
///
/// The single authorization entry point for every request, page and API alike.
///
/// *Mechanism*: resolve the caller's identity from the session store (one async
/// lookup, before any decision), classify the path against the policy table,
/// evaluate the access decision, then either answer with the shaped denial
/// (JSON error or redirect) or attach the identity to the request and hand
/// control to the downstream handler. The decision itself is a pure function;
/// once computed for a request it is final — no retry, no second evaluation.
async fn route_guard(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();

    let identity = state.sessions.resolve_identity(request.headers()).await;
    let class = state.policy.classify(&path);
    let decision = policy::decide(&class, identity.as_ref(), Utc::now());

    if let Some(response) = state.policy.deny_response(decision, &path) {
        tracing::info!(path = %path, decision = ?decision, "access denied");
        return response;
    }

    // Allowed: expose the resolved identity (if any) to handlers for the
    // remainder of this request. It is dropped when the request completes.
    if let Some(identity) = identity {
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

/// Terminal 404 for paths without a handler. Reached only after the guard has
/// allowed the request through (unclassified paths are default-allow).
async fn unmatched_route() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// create_router
///
/// Assembles the application's entire routing structure, applies global and scoped
/// middleware, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        // Documentation: Serve the auto-generated Swagger UI.
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public surface: health probe and the auth gateway.
        .merge(public::public_routes())
        // Signed-in self-service, under the protected /api/user prefix.
        .nest("/api/user", user::user_routes())
        // Administration, under the admin-only /api/admin prefix.
        .nest("/api/admin", admin::admin_routes())
        // The fallback must sit inside the guard layer so protected page paths
        // without a handler still produce their redirect, not a bare 404.
        .fallback(unmatched_route)
        .with_state(state.clone());

    // 3. Authorization Guard
    // One middleware layer for every route and the fallback: the policy table
    // decides, this layer enforces.
    let guarded_router =
        base_router.layer(middleware::from_fn_with_state(state, route_guard));

    // 4. Observability and Correlation Layers (Applied outermost/first)
    guarded_router
        .layer(
            ServiceBuilder::new()
                // 4a. Request ID Generation: a unique UUID for every incoming request.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 4b. Request Tracing: wraps the request/response lifecycle in a span
                // carrying the generated request id.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 4c. Request ID Propagation: returns x-request-id to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 5. CORS Layer (outermost)
        .layer(cors)
}

/// trace_span_logger
///
/// Helper used by `TraceLayer` to customize span creation: includes the
/// `x-request-id` header (when present) alongside the HTTP method and URI, so
/// every log line for a single request is correlated by a unique id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
