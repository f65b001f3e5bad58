use crate::{
    config::{AppConfig, Env},
    policy::Identity,
    repository::RepositoryState,
};
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header, request::Parts},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// SessionService
///
/// The identity-resolution collaborator: turns request headers into the resolved
/// `Identity` of the caller, or `None` for anonymous requests. The authorization
/// guard calls this exactly once per request, before any decision is made; the
/// decision evaluator itself never performs I/O.
///
/// The trait boundary lets the guard run against the real session store in
/// production and a header-driven mock in tests.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn resolve_identity(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// SessionState
///
/// The concrete type used to share the session resolver across the application state.
pub type SessionState = Arc<dyn SessionService>;

/// Pulls the named cookie's value out of the Cookie header(s).
/// Tolerates multiple Cookie headers and surrounding whitespace.
pub fn session_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header_value in headers.get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name && !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// PgSessionService
///
/// The production resolver. Reads the provider-issued session cookie and asks the
/// repository for the unexpired session joined with its user.
///
/// In `Env::Local` a request may instead carry an `x-user-id` header naming a user
/// UUID directly. The bypass is verified against the database (the user must
/// exist), which keeps locally resolved identities honest about role and ban state.
pub struct PgSessionService {
    repo: RepositoryState,
    config: AppConfig,
}

impl PgSessionService {
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        Self { repo, config }
    }
}

#[async_trait]
impl SessionService for PgSessionService {
    async fn resolve_identity(&self, headers: &HeaderMap) -> Option<Identity> {
        // Local Development Bypass Check. Guarded by the Env check so it can
        // never activate in production builds of the configuration.
        if self.config.env == Env::Local {
            if let Some(user_id) = headers
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                if let Some(user) = self.repo.get_user(user_id).await {
                    return Some(Identity {
                        id: user.id,
                        role: user.role,
                        banned: user.banned,
                        ban_reason: user.ban_reason,
                        ban_expires: user.ban_expires,
                    });
                }
            }
        }

        let token = session_cookie_value(headers, &self.config.session_cookie)?;
        self.repo.find_identity_by_session(&token).await
    }
}

/// MockSessionService
///
/// Test resolver: a fixed token → identity map, looked up through the same cookie
/// parsing as production so integration tests exercise the real header path.
#[derive(Default)]
pub struct MockSessionService {
    cookie_name: String,
    identities: Mutex<HashMap<String, Identity>>,
}

impl MockSessionService {
    pub fn new(cookie_name: &str) -> Self {
        Self {
            cookie_name: cookie_name.to_string(),
            identities: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an identity resolvable via `Cookie: <cookie_name>=<token>`.
    pub fn insert(&self, token: &str, identity: Identity) {
        self.identities
            .lock()
            .unwrap()
            .insert(token.to_string(), identity);
    }
}

#[async_trait]
impl SessionService for MockSessionService {
    async fn resolve_identity(&self, headers: &HeaderMap) -> Option<Identity> {
        let token = session_cookie_value(headers, &self.cookie_name)?;
        self.identities.lock().unwrap().get(&token).cloned()
    }
}

/// CurrentUser
///
/// Extractor handing handlers the identity the authorization guard already
/// resolved and vetted for the request. `role` is the effective role (the stored
/// label, or "user" when the record has none).
///
/// Rejection: 401 when no identity was attached to the request — which only
/// happens if a handler requiring a user is mounted on a path the policy table
/// does not protect, so the rejection doubles as a misconfiguration tripwire.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: String,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Identity>()
            .ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(CurrentUser {
            id: identity.id,
            role: identity.effective_role().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_the_named_cookie_among_several() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; cms.session_token=abc123; lang=fr"),
        );
        assert_eq!(
            session_cookie_value(&headers, "cms.session_token").as_deref(),
            Some("abc123")
        );
        assert_eq!(session_cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_value_resolves_to_none() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("cms.session_token="),
        );
        assert_eq!(session_cookie_value(&headers, "cms.session_token"), None);
    }

    #[tokio::test]
    async fn mock_service_resolves_registered_tokens_only() {
        let service = MockSessionService::new("cms.session_token");
        service.insert(
            "tok-1",
            Identity {
                id: Uuid::new_v4(),
                role: Some("member".to_string()),
                banned: false,
                ban_reason: None,
                ban_expires: None,
            },
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("cms.session_token=tok-1"),
        );
        assert!(service.resolve_identity(&headers).await.is_some());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("cms.session_token=unknown"),
        );
        assert!(service.resolve_identity(&headers).await.is_none());
    }
}
