use crate::{
    AppState,
    models::{
        ApiMessage, BanUserRequest, ForgotPasswordRequest, ProfileResponse, RegisterRequest,
        RevokeSessionRequest, SessionInfo, SessionListResponse, SignInRequest, UnbanUserRequest,
        UpdateProfileRequest, UpdateRoleRequest, UserListQuery, UserListResponse, VALID_ROLES,
    },
    session::CurrentUser,
};
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::{Value, json};

// --- Error Envelope ---

/// ApiError
///
/// The structured error every API endpoint answers with: a status code and a
/// human-readable message wrapped as `{"error": "..."}`. Matches the envelope the
/// authorization guard emits, so clients see one error shape end to end.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

fn bad_request(message: &str) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, message.to_string())
}

fn not_found(message: &str) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, message.to_string())
}

fn forbidden(message: &str) -> ApiError {
    ApiError(StatusCode::FORBIDDEN, message.to_string())
}

fn server_error() -> ApiError {
    ApiError(StatusCode::INTERNAL_SERVER_ERROR, "Erreur serveur".to_string())
}

// --- Admin Handlers ---

/// list_users
///
/// [Admin Route] Paginated user listing with combinable filters (role, ban flag,
/// case-insensitive name/email search).
///
/// *RBAC*: The guard already requires the admin role on `/api/admin`; the handler
/// re-checks it so the endpoint stays safe even if remounted elsewhere.
#[utoipa::path(
    get,
    path = "/api/admin/users",
    params(UserListQuery),
    responses(
        (status = 200, description = "Paginated users", body = UserListResponse),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_users(
    CurrentUser { role, .. }: CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    if role != "admin" {
        return Err(forbidden("Permissions insuffisantes"));
    }

    let page = query.page.unwrap_or(1).max(1);
    // Max 100 per page.
    let page_size = query.page_size.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * page_size;

    let total_count = state
        .repo
        .count_users(query.role.clone(), query.banned, query.search.clone())
        .await;
    let users = state
        .repo
        .list_users(query.role, query.banned, query.search, page_size, offset)
        .await;

    Ok(Json(UserListResponse {
        users,
        total_count,
        total_pages: (total_count + page_size - 1) / page_size,
        current_page: page,
        page_size,
    }))
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<NaiveDate>()
        .ok()
        .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

/// ban_user
///
/// [Admin Route] Bans an account, permanently or until an expiry date, and
/// revokes all of its sessions in the same transaction so the lockout is
/// immediate. The target's ban state is checked first: banning twice is a
/// client error, not an idempotent success.
#[utoipa::path(
    post,
    path = "/api/admin/users/ban",
    request_body = BanUserRequest,
    responses(
        (status = 200, description = "Banned", body = ApiMessage),
        (status = 400, description = "Missing fields, bad expiry, or already banned"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn ban_user(
    CurrentUser { role, .. }: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<BanUserRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    if role != "admin" {
        return Err(forbidden("Permissions insuffisantes"));
    }

    let reason = payload.reason.as_deref().map(str::trim).unwrap_or("");
    let (Some(user_id), false) = (payload.user_id, reason.is_empty()) else {
        return Err(bad_request("userId et reason sont requis"));
    };

    // An expiry, when given, must parse and lie strictly in the future.
    let expires = match payload.expires.as_deref() {
        None => None,
        Some(raw) => match parse_expiry(raw) {
            Some(expiry) if expiry > Utc::now() => Some(expiry),
            _ => return Err(bad_request("Date d'expiration invalide")),
        },
    };

    let user = state
        .repo
        .get_user(user_id)
        .await
        .ok_or_else(|| not_found("Utilisateur non trouvé"))?;
    if user.banned {
        return Err(bad_request("Utilisateur déjà banni"));
    }

    if !state.repo.ban_user(user_id, reason, expires).await {
        return Err(server_error());
    }

    Ok(Json(ApiMessage {
        success: true,
        message: "Utilisateur banni avec succès".to_string(),
    }))
}

/// unban_user
///
/// [Admin Route] Lifts a ban, clearing the reason and expiry. Unbanning an
/// account that is not banned is rejected as a client error.
#[utoipa::path(
    post,
    path = "/api/admin/users/unban",
    request_body = UnbanUserRequest,
    responses(
        (status = 200, description = "Unbanned", body = ApiMessage),
        (status = 400, description = "Missing userId or not banned"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn unban_user(
    CurrentUser { role, .. }: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<UnbanUserRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    if role != "admin" {
        return Err(forbidden("Permissions insuffisantes"));
    }

    let user_id = payload.user_id.ok_or_else(|| bad_request("userId est requis"))?;

    let user = state
        .repo
        .get_user(user_id)
        .await
        .ok_or_else(|| not_found("Utilisateur non trouvé"))?;
    if !user.banned {
        return Err(bad_request("Utilisateur n'est pas banni"));
    }

    if !state.repo.unban_user(user_id).await {
        return Err(server_error());
    }

    Ok(Json(ApiMessage {
        success: true,
        message: "Utilisateur débanni avec succès".to_string(),
    }))
}

/// update_role
///
/// [Admin Route] Assigns one of the valid roles to an account. Re-assigning the
/// role the account already holds is rejected, mirroring the front end's
/// expectation that a successful call always changed something.
#[utoipa::path(
    post,
    path = "/api/admin/users/role",
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = ApiMessage),
        (status = 400, description = "Missing fields, invalid role, or unchanged role"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn update_role(
    CurrentUser { role: caller_role, .. }: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    if caller_role != "admin" {
        return Err(forbidden("Permissions insuffisantes"));
    }

    let (Some(user_id), Some(role)) = (payload.user_id, payload.role.as_deref()) else {
        return Err(bad_request("userId et role sont requis"));
    };

    if !VALID_ROLES.contains(&role) {
        return Err(bad_request(&format!(
            "Rôle invalide. Rôles valides: {}",
            VALID_ROLES.join(", ")
        )));
    }

    let user = state
        .repo
        .get_user(user_id)
        .await
        .ok_or_else(|| not_found("Utilisateur non trouvé"))?;
    if user.role.as_deref() == Some(role) {
        return Err(bad_request("L'utilisateur a déjà ce rôle"));
    }

    if !state.repo.set_role(user_id, role).await {
        return Err(server_error());
    }

    Ok(Json(ApiMessage {
        success: true,
        message: format!("Rôle mis à jour vers \"{}\" avec succès", role),
    }))
}

// --- User Handlers ---

/// get_profile
///
/// [User Route] The caller's full account record plus the number of currently
/// active sessions. `is_active` is the derived activity flag: false only while a
/// ban is actually in force (a lapsed expiry counts as active again).
#[utoipa::path(
    get,
    path = "/api/user/profile",
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 404, description = "Account record missing")
    )
)]
pub async fn get_profile(
    CurrentUser { id, .. }: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .repo
        .get_user(id)
        .await
        .ok_or_else(|| not_found("Utilisateur non trouvé"))?;

    let session_count = state.repo.count_active_sessions(id).await;
    let is_active = !user.banned || user.ban_expires.is_some_and(|e| e <= Utc::now());

    Ok(Json(ProfileResponse {
        user,
        session_count,
        is_active,
    }))
}

/// update_profile
///
/// [User Route] Updates the display name. Banned accounts are rejected here even
/// though the guard let the request through (the guard evaluates *current* ban
/// state; this check also blocks accounts whose ban has lapsed-but-not-cleared
/// from slipping writes past a raw `banned` flag).
#[utoipa::path(
    put,
    path = "/api/user/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated", body = ApiMessage),
        (status = 400, description = "Invalid name"),
        (status = 403, description = "Account suspended")
    )
)]
pub async fn update_profile(
    CurrentUser { id, .. }: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    let name = payload.name.as_deref().map(str::trim).unwrap_or("");
    if name.chars().count() < 2 {
        return Err(bad_request("Nom invalide (minimum 2 caractères)"));
    }
    if name.chars().count() > 100 {
        return Err(bad_request("Nom trop long (maximum 100 caractères)"));
    }

    if let Some(user) = state.repo.get_user(id).await {
        if user.banned {
            return Err(forbidden("Compte suspendu"));
        }
    }

    if !state.repo.update_name(id, name).await {
        return Err(server_error());
    }

    Ok(Json(ApiMessage {
        success: true,
        message: "Profil mis à jour avec succès".to_string(),
    }))
}

/// list_sessions
///
/// [User Route] The caller's active sessions, most recently touched first.
/// Tokens are never included; `is_current` is left to the client to determine.
#[utoipa::path(
    get,
    path = "/api/user/sessions",
    responses((status = 200, description = "Active sessions", body = SessionListResponse))
)]
pub async fn list_sessions(
    CurrentUser { id, .. }: CurrentUser,
    State(state): State<AppState>,
) -> Json<SessionListResponse> {
    let sessions: Vec<SessionInfo> = state
        .repo
        .active_sessions(id)
        .await
        .into_iter()
        .map(SessionInfo::from)
        .collect();
    let total_count = sessions.len() as i64;

    Json(SessionListResponse {
        sessions,
        total_count,
    })
}

/// revoke_sessions
///
/// [User Route] Revokes either every session (`revokeAll`) or a single one by id.
/// Single revokes are ownership-checked in the repository: a session id belonging
/// to someone else reads as not found.
#[utoipa::path(
    delete,
    path = "/api/user/sessions",
    request_body = RevokeSessionRequest,
    responses(
        (status = 200, description = "Revoked", body = ApiMessage),
        (status = 400, description = "Neither sessionId nor revokeAll given"),
        (status = 404, description = "Session not found or not owned")
    )
)]
pub async fn revoke_sessions(
    CurrentUser { id, .. }: CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<RevokeSessionRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    if payload.revoke_all.unwrap_or(false) {
        state.repo.revoke_all_sessions(id).await;
        return Ok(Json(ApiMessage {
            success: true,
            message: "Toutes les sessions ont été révoquées".to_string(),
        }));
    }

    let Some(session_id) = payload.session_id else {
        return Err(bad_request("sessionId ou revokeAll requis"));
    };

    if !state.repo.revoke_session(session_id, id).await {
        return Err(not_found("Session non trouvée"));
    }

    Ok(Json(ApiMessage {
        success: true,
        message: "Session révoquée avec succès".to_string(),
    }))
}

// --- Auth Gateway Handlers ---

/// Minimal shape check; real address verification is the provider's concern
/// (it sends the confirmation email).
fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// forward_to_provider
///
/// Shared delegation path for the auth gateway: POSTs a JSON body to the
/// provider and translates the outcome. Provider 2xx yields the response body;
/// provider 4xx becomes a 400 carrying the provider's own message (so the front
/// end can show "email already registered" and friends); anything else — network
/// failure included — collapses to a generic 500.
async fn forward_to_provider(
    state: &AppState,
    path: &str,
    body: Value,
) -> Result<Value, ApiError> {
    let client = reqwest::Client::new();
    let url = format!("{}{}", state.config.auth_url, path);

    let response = client
        .post(url)
        .header("apikey", &state.config.auth_api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            tracing::error!("auth provider unreachable: {:?}", e);
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, "Erreur serveur.".to_string())
        })?;

    let status = response.status();
    let data: Value = response.json().await.unwrap_or_else(|_| json!({}));

    if status.is_success() {
        return Ok(data);
    }

    if status.is_client_error() {
        let message = data
            .get("error")
            .or_else(|| data.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or("Erreur serveur.")
            .to_string();
        return Err(ApiError(StatusCode::BAD_REQUEST, message));
    }

    tracing::error!("auth provider returned {} on {}", status, path);
    Err(ApiError(StatusCode::INTERNAL_SERVER_ERROR, "Erreur serveur.".to_string()))
}

/// register
///
/// [Public Route] Validates the signup payload and forwards it to the provider,
/// which owns password hashing and the verification email. The password only
/// transits; it is never persisted or logged here.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registered"),
        (status = 400, description = "Invalid or incomplete payload")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(name), Some(email), Some(password)) =
        (payload.name, payload.email, payload.password)
    else {
        return Err(bad_request("Tous les champs sont requis."));
    };

    if !looks_like_email(&email) {
        return Err(bad_request("Email invalide."));
    }
    if password.len() < 8 {
        return Err(bad_request("Mot de passe trop faible."));
    }
    if name.len() < 2 {
        return Err(bad_request("Nom invalide."));
    }

    forward_to_provider(
        &state,
        "/auth/v1/signup",
        json!({ "name": name, "email": email, "password": password }),
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}

/// sign_in
///
/// [Public Route] Forwards an email/password sign-in to the provider and echoes
/// the provider's user object on success. The session cookie is set by the
/// provider's response on the client side; this service only validates and relays.
#[utoipa::path(
    post,
    path = "/api/auth/sign-in/email",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in"),
        (status = 400, description = "Missing or rejected credentials")
    )
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<SignInRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Err(bad_request("Email et mot de passe requis."));
    };

    let data = forward_to_provider(
        &state,
        "/auth/v1/token?grant_type=password",
        json!({ "email": email, "password": password }),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "user": data.get("user").cloned().unwrap_or(Value::Null),
    })))
}

/// sign_out
///
/// [Public Route] Deletes the session row behind the presented cookie. The
/// route stays public so a banned or role-stripped account can still end its
/// session. Requests without a session cookie have nothing to sign out of.
#[utoipa::path(
    post,
    path = "/api/auth/signout",
    responses(
        (status = 200, description = "Signed out"),
        (status = 400, description = "No session presented")
    )
)]
pub async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token = crate::session::session_cookie_value(&headers, &state.config.session_cookie)
        .ok_or_else(|| bad_request("Session non trouvée"))?;

    // Idempotent: revoking an already-gone session still signs the client out.
    state.repo.revoke_session_by_token(&token).await;

    Ok(Json(json!({ "success": true })))
}

/// forgot_password
///
/// [Public Route] Triggers the provider's password-reset flow; the reset email
/// is composed and delivered by the provider. Always validates the address shape
/// first so typos fail fast without a provider round trip.
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset email requested"),
        (status = 400, description = "Missing email")
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(email) = payload.email else {
        return Err(bad_request("Email requis."));
    };

    forward_to_provider(&state, "/auth/v1/recover", json!({ "email": email })).await?;

    Ok(Json(json!({ "success": true })))
}
