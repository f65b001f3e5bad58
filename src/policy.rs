use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

// --- Identity ---

/// Identity
///
/// The resolved authenticated principal for a single request. Absence of an identity
/// is modeled as `Option<Identity>` at the decision point, forcing every caller to
/// handle the anonymous case explicitly instead of passing an untyped "maybe user".
///
/// An Identity is resolved fresh on every request from the provider's session store
/// and discarded at the end of the request; this module never caches one.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Stable user identifier, mirrored from the provider's `users` table.
    pub id: Uuid,
    /// RBAC label. `None` or empty resolves to the default role at decision time.
    pub role: Option<String>,
    /// Ban flag as stored. Whether the ban is *currently* active also depends on `ban_expires`.
    pub banned: bool,
    /// Moderation note attached when the ban was issued.
    pub ban_reason: Option<String>,
    /// When set, the ban lapses at this instant; when absent, the ban is permanent.
    pub ban_expires: Option<DateTime<Utc>>,
}

/// Role assumed for an authenticated user whose record carries no role label.
pub const DEFAULT_ROLE: &str = "user";

impl Identity {
    /// The role actually used for authorization checks: the stored label,
    /// or `"user"` when the record has none (or an empty one).
    pub fn effective_role(&self) -> &str {
        self.role
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ROLE)
    }
}

/// is_banned
///
/// Evaluates the ban state of an identity at a given instant:
/// - `banned = false` is never banned, whatever `ban_expires` says.
/// - `banned = true` with no expiry is a permanent ban.
/// - `banned = true` with an expiry is banned only while `now < ban_expires`;
///   an expiry in the past (or exactly now) means the ban has lapsed.
///
/// Evaluated at decision time on every request, never cached, so a lapsed
/// time-bounded ban clears itself without any write to the user record.
pub fn is_banned(identity: &Identity, now: DateTime<Utc>) -> bool {
    if !identity.banned {
        return false;
    }
    match identity.ban_expires {
        None => true,
        Some(expires) => now < expires,
    }
}

// --- Route Classification ---

/// RouteClass
///
/// The outcome of classifying a request path against the policy table.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteClass<'a> {
    /// Path is under a public prefix: always allowed, identity never consulted.
    Public,
    /// Path is under a protected prefix: the caller must hold one of these roles.
    Protected(&'a [String]),
    /// Path matches neither list. The table is deliberately default-allow for
    /// unmatched paths: the request falls through to the router, which answers
    /// 404 for anything without a handler.
    Unclassified,
}

/// AccessDecision
///
/// Terminal authorization outcome for one request. Produced by `decide` as a pure
/// function of (route class, identity, now); never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    DenyUnauthenticated,
    DenyBanned,
    DenyForbidden,
}

/// PolicyTable
///
/// The immutable route policy configuration: which prefixes are public, which are
/// protected and by which roles, and where denied page requests are redirected.
/// Built once at startup and shared read-only across all requests; there is no
/// runtime mutation.
///
/// Matching semantics are exact-or-prefix-with-separator:
/// `path == prefix || path.starts_with(prefix + "/")`. The public list always
/// wins over the protected list, and protected entries are evaluated in
/// registration order with the first match taken — the ordering of `protected`
/// is semantic, not cosmetic.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    /// Prefixes reachable without any check.
    pub public: Vec<String>,
    /// Protected prefix -> roles allowed through, in registration order.
    pub protected: Vec<(String, Vec<String>)>,
    /// Paths under this prefix receive structured JSON errors; all others get redirects.
    pub api_prefix: String,
    /// Redirect target for unauthenticated page requests.
    pub login_location: String,
    /// Redirect target for banned accounts on page requests.
    pub banned_location: String,
    /// Redirect target for authenticated-but-unauthorized page requests.
    pub unauthorized_location: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PolicyTable {
    /// The CMS route policy: admin surfaces require the admin role, member surfaces
    /// accept any signed-in account role, and the auth gateway stays public so that
    /// sign-in itself is reachable.
    fn default() -> Self {
        Self {
            public: strings(&["/", "/api/auth", "/login", "/register"]),
            protected: vec![
                ("/admin".to_string(), strings(&["admin"])),
                ("/api/admin".to_string(), strings(&["admin"])),
                ("/profil".to_string(), strings(&["admin", "user", "member"])),
                ("/api/user".to_string(), strings(&["admin", "user", "member"])),
                (
                    "/api/protected".to_string(),
                    strings(&["admin", "user", "member"]),
                ),
            ],
            api_prefix: "/api".to_string(),
            login_location: "/login".to_string(),
            banned_location: "/banned".to_string(),
            unauthorized_location: "/unauthorized".to_string(),
        }
    }
}

/// Exact-or-prefix-with-separator match. `"/admin"` covers `/admin` and
/// `/admin/users`, but not `/administration`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl PolicyTable {
    /// classify
    ///
    /// Maps a request path to its policy. The public check runs first and
    /// short-circuits: a path under a public prefix is never role-checked, even
    /// when it would also match a protected entry. Protected entries are then
    /// tried in registration order, first match wins.
    pub fn classify(&self, path: &str) -> RouteClass<'_> {
        if self.public.iter().any(|p| matches_prefix(path, p)) {
            return RouteClass::Public;
        }
        for (prefix, required) in &self.protected {
            if matches_prefix(path, prefix) {
                return RouteClass::Protected(required);
            }
        }
        RouteClass::Unclassified
    }

    /// True for paths that must receive structured JSON errors instead of redirects.
    pub fn is_api_path(&self, path: &str) -> bool {
        matches_prefix(path, &self.api_prefix)
    }

    /// deny_response
    ///
    /// Shapes a DENY_* decision into the terminal response. Returns `None` for
    /// `Allow`, in which case the caller passes control to the downstream handler.
    ///
    /// | Decision            | API path            | Page path                  |
    /// |---------------------|---------------------|----------------------------|
    /// | DenyUnauthenticated | 401 structured error| 302 to `login_location`    |
    /// | DenyBanned          | 403 structured error| 302 to `banned_location`   |
    /// | DenyForbidden       | 403 structured error| 302 to `unauthorized_location` |
    pub fn deny_response(&self, decision: AccessDecision, path: &str) -> Option<Response> {
        let (status, message, location) = match decision {
            AccessDecision::Allow => return None,
            AccessDecision::DenyUnauthenticated => (
                StatusCode::UNAUTHORIZED,
                "Authentification requise",
                &self.login_location,
            ),
            AccessDecision::DenyBanned => (
                StatusCode::FORBIDDEN,
                "Compte suspendu",
                &self.banned_location,
            ),
            AccessDecision::DenyForbidden => (
                StatusCode::FORBIDDEN,
                "Permissions insuffisantes",
                &self.unauthorized_location,
            ),
        };

        let response = if self.is_api_path(path) {
            (status, Json(json!({ "error": message }))).into_response()
        } else {
            // 302 Found, matching what browsers receive from the CMS front end.
            (StatusCode::FOUND, [(header::LOCATION, location.clone())]).into_response()
        };
        Some(response)
    }
}

/// decide
///
/// The access decision evaluator. A pure, total, synchronous function over
/// (route class, identity, evaluation instant); it performs no I/O, raises no
/// errors, and is safe to call concurrently without coordination.
///
/// The check order is significant and deliberate:
/// 1. Public routes allow unconditionally — identity is not consulted.
/// 2. A protected route with no identity fails as unauthenticated.
/// 3. An active ban fails before the role check — a banned admin is rejected
///    for the ban, not for a missing role.
/// 4. The effective role must be a member of the route's required set.
/// 5. Unclassified routes fall through as allowed (default-allow, see `RouteClass`).
pub fn decide(
    class: &RouteClass<'_>,
    identity: Option<&Identity>,
    now: DateTime<Utc>,
) -> AccessDecision {
    let required = match class {
        RouteClass::Public | RouteClass::Unclassified => return AccessDecision::Allow,
        RouteClass::Protected(required) => required,
    };

    let Some(identity) = identity else {
        return AccessDecision::DenyUnauthenticated;
    };

    if is_banned(identity, now) {
        return AccessDecision::DenyBanned;
    }

    let role = identity.effective_role();
    if !required.iter().any(|r| r == role) {
        return AccessDecision::DenyForbidden;
    }

    AccessDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn identity(role: Option<&str>) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            role: role.map(|r| r.to_string()),
            banned: false,
            ban_reason: None,
            ban_expires: None,
        }
    }

    fn banned_identity(role: Option<&str>, expires: Option<DateTime<Utc>>) -> Identity {
        Identity {
            banned: true,
            ban_reason: Some("abus".to_string()),
            ban_expires: expires,
            ..identity(role)
        }
    }

    // --- Classification ---

    #[test]
    fn classifies_public_routes() {
        let table = PolicyTable::default();
        assert_eq!(table.classify("/"), RouteClass::Public);
        assert_eq!(table.classify("/login"), RouteClass::Public);
        assert_eq!(table.classify("/register"), RouteClass::Public);
        assert_eq!(table.classify("/api/auth/sign-in/email"), RouteClass::Public);
    }

    #[test]
    fn classifies_protected_routes_with_their_roles() {
        let table = PolicyTable::default();
        match table.classify("/admin/users") {
            RouteClass::Protected(required) => assert_eq!(required.to_vec(), vec!["admin"]),
            other => panic!("expected protected classification, got {:?}", other),
        }
        match table.classify("/api/user/profile") {
            RouteClass::Protected(required) => {
                assert_eq!(required.to_vec(), vec!["admin", "user", "member"]);
            }
            other => panic!("expected protected classification, got {:?}", other),
        }
    }

    #[test]
    fn prefix_match_requires_a_segment_boundary() {
        let table = PolicyTable::default();
        // "/administration" must not inherit "/admin"'s policy.
        assert_eq!(table.classify("/administration"), RouteClass::Unclassified);
        // The root entry matches exactly "/", nothing below it.
        assert_eq!(table.classify("/health"), RouteClass::Unclassified);
    }

    #[test]
    fn public_wins_over_an_overlapping_protected_registration() {
        // "/api/auth" sits inside the protected "/api" subtree here; the public
        // list must still short-circuit the role check.
        let table = PolicyTable {
            public: vec!["/api/auth".to_string()],
            protected: vec![("/api".to_string(), vec!["admin".to_string()])],
            ..PolicyTable::default()
        };
        assert_eq!(table.classify("/api/auth/callback"), RouteClass::Public);
        assert_eq!(table.classify("/api/auth"), RouteClass::Public);
    }

    #[test]
    fn first_registered_protected_entry_wins() {
        let table = PolicyTable {
            public: vec![],
            protected: vec![
                ("/api/admin".to_string(), vec!["admin".to_string()]),
                ("/api".to_string(), vec!["user".to_string()]),
            ],
            ..PolicyTable::default()
        };
        match table.classify("/api/admin/users") {
            RouteClass::Protected(required) => assert_eq!(required.to_vec(), vec!["admin"]),
            other => panic!("expected the first entry to win, got {:?}", other),
        }
    }

    // --- Ban evaluation ---

    #[test]
    fn unbanned_identity_is_never_banned_regardless_of_expiry() {
        let now = Utc::now();
        let mut id = identity(Some("user"));
        id.ban_expires = Some(now + Duration::days(30));
        assert!(!is_banned(&id, now));
    }

    #[test]
    fn ban_without_expiry_is_permanent() {
        let id = banned_identity(Some("user"), None);
        assert!(is_banned(&id, Utc::now()));
    }

    #[test]
    fn ban_with_future_expiry_is_active() {
        let now = Utc::now();
        let id = banned_identity(Some("user"), Some(now + Duration::hours(1)));
        assert!(is_banned(&id, now));
    }

    #[test]
    fn ban_with_past_expiry_has_lapsed() {
        let now = Utc::now();
        let id = banned_identity(Some("user"), Some(now - Duration::hours(1)));
        assert!(!is_banned(&id, now));
    }

    #[test]
    fn ban_expiring_exactly_now_has_lapsed() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let id = banned_identity(Some("user"), Some(now));
        assert!(!is_banned(&id, now));
    }

    // --- Decision ordering ---

    #[test]
    fn public_route_allows_without_consulting_identity() {
        let table = PolicyTable::default();
        let class = table.classify("/");
        let banned = banned_identity(Some("guest"), None);
        assert_eq!(decide(&class, None, Utc::now()), AccessDecision::Allow);
        assert_eq!(
            decide(&class, Some(&banned), Utc::now()),
            AccessDecision::Allow
        );
    }

    #[test]
    fn absent_identity_is_unauthenticated_never_forbidden() {
        let table = PolicyTable::default();
        let class = table.classify("/admin/users");
        assert_eq!(
            decide(&class, None, Utc::now()),
            AccessDecision::DenyUnauthenticated
        );
    }

    #[test]
    fn banned_admin_is_rejected_for_the_ban_not_the_role() {
        let table = PolicyTable::default();
        let class = table.classify("/admin/users");
        let id = banned_identity(Some("admin"), None);
        assert_eq!(
            decide(&class, Some(&id), Utc::now()),
            AccessDecision::DenyBanned
        );
    }

    #[test]
    fn member_is_allowed_on_profile_routes() {
        let table = PolicyTable::default();
        let class = table.classify("/profil");
        let id = identity(Some("member"));
        assert_eq!(decide(&class, Some(&id), Utc::now()), AccessDecision::Allow);
    }

    #[test]
    fn guest_is_forbidden_on_profile_routes() {
        let table = PolicyTable::default();
        let class = table.classify("/profil");
        let id = identity(Some("guest"));
        assert_eq!(
            decide(&class, Some(&id), Utc::now()),
            AccessDecision::DenyForbidden
        );
    }

    #[test]
    fn missing_role_defaults_to_user() {
        let table = PolicyTable::default();
        let class = table.classify("/profil");
        assert_eq!(identity(None).effective_role(), "user");
        assert_eq!(identity(Some("")).effective_role(), "user");
        assert_eq!(
            decide(&class, Some(&identity(None)), Utc::now()),
            AccessDecision::Allow
        );
    }

    #[test]
    fn lapsed_ban_passes_the_role_check_again() {
        let now = Utc::now();
        let table = PolicyTable::default();
        let class = table.classify("/profil");
        let id = banned_identity(
            Some("user"),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        );
        assert_eq!(decide(&class, Some(&id), now), AccessDecision::Allow);
    }

    #[test]
    fn unmatched_paths_fall_through_as_allowed() {
        let table = PolicyTable::default();
        let class = table.classify("/health");
        assert_eq!(class, RouteClass::Unclassified);
        assert_eq!(decide(&class, None, Utc::now()), AccessDecision::Allow);
    }

    // --- Response shaping ---

    #[test]
    fn api_denials_are_structured_errors() {
        let table = PolicyTable::default();
        let resp = table
            .deny_response(AccessDecision::DenyUnauthenticated, "/api/admin/users")
            .expect("deny must produce a response");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = table
            .deny_response(AccessDecision::DenyBanned, "/api/user/profile")
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn page_denials_redirect_to_the_configured_locations() {
        let table = PolicyTable::default();

        let resp = table
            .deny_response(AccessDecision::DenyUnauthenticated, "/admin/users")
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/login");

        let resp = table
            .deny_response(AccessDecision::DenyBanned, "/profil")
            .unwrap();
        assert_eq!(resp.headers()[header::LOCATION], "/banned");

        let resp = table
            .deny_response(AccessDecision::DenyForbidden, "/profil")
            .unwrap();
        assert_eq!(resp.headers()[header::LOCATION], "/unauthorized");
    }

    #[test]
    fn allow_produces_no_response() {
        let table = PolicyTable::default();
        assert!(table.deny_response(AccessDecision::Allow, "/profil").is_none());
    }
}
