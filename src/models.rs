use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

/// The closed set of roles an account may hold. Role assignment rejects anything else.
pub const VALID_ROLES: [&str; 4] = ["admin", "user", "member", "guest"];

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// The canonical account record stored in the `users` table, mirrored from the
/// external authentication provider. Carries the moderation state (ban flag,
/// reason, optional expiry) consumed by the authorization layer on every request.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    // Optional handle chosen by the user; the display variant preserves casing.
    pub username: Option<String>,
    pub display_username: Option<String>,
    // The RBAC label: one of VALID_ROLES. Null on provider-created accounts
    // that were never assigned one; authorization then assumes "user".
    pub role: Option<String>,

    // Moderation state. `banned` alone does not mean currently locked out:
    // a `ban_expires` in the past means the ban has lapsed.
    pub banned: bool,
    pub ban_reason: Option<String>,
    #[ts(type = "string | null")]
    pub ban_expires: Option<DateTime<Utc>>,

    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Session
///
/// One row of the provider-owned `sessions` table. Only rows with
/// `expires_at` in the future count as active; expired rows are ignored rather
/// than eagerly deleted.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Opaque provider-issued token, presented back by clients in the session cookie.
    #[serde(skip_serializing)]
    pub token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// UserListQuery
///
/// Accepted query parameters for the admin user listing (GET /api/admin/users).
/// All filters are optional and combinable; pagination is clamped server-side.
#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    /// 1-based page number. Defaults to 1.
    pub page: Option<i64>,
    /// Page size. Defaults to 20, capped at 100.
    pub page_size: Option<i64>,
    /// Exact role filter.
    pub role: Option<String>,
    /// Ban-flag filter.
    pub banned: Option<bool>,
    /// Case-insensitive substring match on name or email.
    pub search: Option<String>,
}

/// BanUserRequest
///
/// Input payload for POST /api/admin/users/ban. Fields are Options so the handler
/// can answer missing-field mistakes with a 400 and a readable message instead of
/// a deserialization rejection. `expires` stays a raw string: the handler owns the
/// parse, so an unparseable date is a 400, and absence means a permanent ban.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BanUserRequest {
    pub user_id: Option<Uuid>,
    pub reason: Option<String>,
    pub expires: Option<String>,
}

/// UnbanUserRequest
///
/// Input payload for POST /api/admin/users/unban.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UnbanUserRequest {
    pub user_id: Option<Uuid>,
}

/// UpdateRoleRequest
///
/// Input payload for POST /api/admin/users/role. The role must be one of VALID_ROLES.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateRoleRequest {
    pub user_id: Option<Uuid>,
    pub role: Option<String>,
}

/// UpdateProfileRequest
///
/// Input payload for PUT /api/user/profile. Only the display name is mutable here;
/// everything else belongs to the provider or the admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
}

/// RevokeSessionRequest
///
/// Input payload for DELETE /api/user/sessions: either a single session by id,
/// or everything at once via `revoke_all`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RevokeSessionRequest {
    pub session_id: Option<Uuid>,
    pub revoke_all: Option<bool>,
}

/// RegisterRequest
///
/// Input payload forwarded to the authentication provider's signup flow.
/// The password transits to the provider and is never persisted or logged here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// SignInRequest
///
/// Input payload forwarded to the provider's email sign-in flow.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SignInRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// ForgotPasswordRequest
///
/// Input payload for the provider's password-reset flow. The reset email itself
/// is sent by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

// --- Response Schemas (Output) ---

/// UserListResponse
///
/// Paginated envelope for the admin user listing.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub total_count: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub page_size: i64,
}

/// ProfileResponse
///
/// Output schema for GET /api/user/profile: the full account record plus the
/// number of currently active sessions and a derived activity flag
/// (`is_active` is false only while a ban is actually in force).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProfileResponse {
    pub user: User,
    pub session_count: i64,
    pub is_active: bool,
}

/// SessionInfo
///
/// One active session as shown to its owner. The token itself is never exposed;
/// `is_current` is left for the client to determine against its own cookie.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionInfo {
    pub id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_current: bool,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            is_current: false,
        }
    }
}

/// SessionListResponse
///
/// Envelope for GET /api/user/sessions.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
    pub total_count: i64,
}

/// ApiMessage
///
/// The generic success envelope used by mutation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ApiMessage {
    pub success: bool,
    pub message: String,
}
