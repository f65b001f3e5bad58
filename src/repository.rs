use crate::models::{Session, User};
use crate::policy::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, query_builder::QueryBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations. This is the core
/// of the Repository Abstraction pattern, allowing the handlers and the session
/// resolver to interact with the data layer without knowing the specific
/// implementation (Postgres, in-memory mock).
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) safely shareable across Axum's asynchronous task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- User administration ---
    /// Filtered, paginated listing. `limit`/`offset` are pre-clamped by the handler.
    async fn list_users(
        &self,
        role: Option<String>,
        banned: Option<bool>,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Vec<User>;
    /// Row count under the same filters, for page math.
    async fn count_users(
        &self,
        role: Option<String>,
        banned: Option<bool>,
        search: Option<String>,
    ) -> i64;
    async fn get_user(&self, id: Uuid) -> Option<User>;
    /// Sets the ban fields and deletes every session of the user in one
    /// transaction, so the lockout takes effect on the next request.
    async fn ban_user(&self, id: Uuid, reason: &str, expires: Option<DateTime<Utc>>) -> bool;
    /// Clears the ban flag together with its reason and expiry.
    async fn unban_user(&self, id: Uuid) -> bool;
    async fn set_role(&self, id: Uuid, role: &str) -> bool;
    async fn update_name(&self, id: Uuid, name: &str) -> bool;

    // --- Session store (provider-owned tables, read/revoked here) ---
    /// Resolves an unexpired session token to the owning user's Identity.
    async fn find_identity_by_session(&self, token: &str) -> Option<Identity>;
    async fn active_sessions(&self, user_id: Uuid) -> Vec<Session>;
    async fn count_active_sessions(&self, user_id: Uuid) -> i64;
    /// Ownership-checked single revoke: affects nothing when the session
    /// does not exist or belongs to someone else.
    async fn revoke_session(&self, session_id: Uuid, user_id: Uuid) -> bool;
    async fn revoke_all_sessions(&self, user_id: Uuid) -> u64;
    /// Sign-out path: deletes the session row holding this token.
    async fn revoke_session_by_token(&self, token: &str) -> bool;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_COLUMNS: &str = "id, name, email, email_verified, username, display_username, \
     role, banned, ban_reason, ban_expires, created_at, updated_at";

/// Appends the optional listing filters to a builder whose query ends in `WHERE TRUE`.
/// Shared between the listing and the count so both always agree.
fn push_user_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    role: Option<String>,
    banned: Option<bool>,
    search: Option<String>,
) {
    if let Some(role) = role {
        builder.push(" AND role = ");
        builder.push_bind(role);
    }
    if let Some(banned) = banned {
        builder.push(" AND banned = ");
        builder.push_bind(banned);
    }
    if let Some(search) = search {
        let pattern = format!("%{}%", search);
        builder.push(" AND (name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR email ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

/// Row shape for the session-to-identity join. Kept private so `Identity`
/// itself stays free of any sqlx coupling.
#[derive(FromRow)]
struct IdentityRow {
    id: Uuid,
    role: Option<String>,
    banned: bool,
    ban_reason: Option<String>,
    ban_expires: Option<DateTime<Utc>>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: row.id,
            role: row.role,
            banned: row.banned,
            ban_reason: row.ban_reason,
            ban_expires: row.ban_expires,
        }
    }
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the PostgreSQL
/// database shared with the authentication provider (`users` and `sessions` tables).
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// list_users
    ///
    /// Implements the combinable role/banned/search filters using QueryBuilder for
    /// safe parameterization. Newest accounts first, then the handler-provided window.
    async fn list_users(
        &self,
        role: Option<String>,
        banned: Option<bool>,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Vec<User> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM users WHERE TRUE", USER_COLUMNS));
        push_user_filters(&mut builder, role, banned, search);
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        match builder.build_query_as::<User>().fetch_all(&self.pool).await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("list_users error: {:?}", e);
                vec![]
            }
        }
    }

    /// count_users
    ///
    /// Total row count under the same filters as `list_users`.
    async fn count_users(
        &self,
        role: Option<String>,
        banned: Option<bool>,
        search: Option<String>,
    ) -> i64 {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM users WHERE TRUE");
        push_user_filters(&mut builder, role, banned, search);

        match builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("count_users error: {:?}", e);
                0
            }
        }
    }

    async fn get_user(&self, id: Uuid) -> Option<User> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_user error: {:?}", e);
            None
        })
    }

    /// ban_user
    ///
    /// The ban write and the session purge commit together or not at all:
    /// a banned user must not keep a usable session.
    async fn ban_user(&self, id: Uuid, reason: &str, expires: Option<DateTime<Utc>>) -> bool {
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!("ban_user begin error: {:?}", e);
                return false;
            }
        };

        let updated = sqlx::query(
            "UPDATE users SET banned = true, ban_reason = $1, ban_expires = $2, \
             updated_at = NOW() WHERE id = $3",
        )
        .bind(reason)
        .bind(expires)
        .bind(id)
        .execute(&mut *tx)
        .await;

        let revoked = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await;

        match (updated, revoked) {
            (Ok(res), Ok(_)) if res.rows_affected() > 0 => match tx.commit().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("ban_user commit error: {:?}", e);
                    false
                }
            },
            (updated, revoked) => {
                if let Err(e) = updated {
                    tracing::error!("ban_user update error: {:?}", e);
                }
                if let Err(e) = revoked {
                    tracing::error!("ban_user revoke error: {:?}", e);
                }
                // Dropping the transaction rolls it back.
                false
            }
        }
    }

    async fn unban_user(&self, id: Uuid) -> bool {
        match sqlx::query(
            "UPDATE users SET banned = false, ban_reason = NULL, ban_expires = NULL, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("unban_user error: {:?}", e);
                false
            }
        }
    }

    async fn set_role(&self, id: Uuid, role: &str) -> bool {
        match sqlx::query("UPDATE users SET role = $1, updated_at = NOW() WHERE id = $2")
            .bind(role)
            .bind(id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("set_role error: {:?}", e);
                false
            }
        }
    }

    async fn update_name(&self, id: Uuid, name: &str) -> bool {
        match sqlx::query("UPDATE users SET name = $1, updated_at = NOW() WHERE id = $2")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("update_name error: {:?}", e);
                false
            }
        }
    }

    /// find_identity_by_session
    ///
    /// The per-request identity lookup: an unexpired session row joined onto its
    /// user, projected down to exactly the fields the decision evaluator needs.
    async fn find_identity_by_session(&self, token: &str) -> Option<Identity> {
        sqlx::query_as::<_, IdentityRow>(
            "SELECT u.id, u.role, u.banned, u.ban_reason, u.ban_expires \
             FROM sessions s JOIN users u ON s.user_id = u.id \
             WHERE s.token = $1 AND s.expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Identity::from))
        .unwrap_or_else(|e| {
            tracing::error!("find_identity_by_session error: {:?}", e);
            None
        })
    }

    async fn active_sessions(&self, user_id: Uuid) -> Vec<Session> {
        sqlx::query_as::<_, Session>(
            "SELECT id, user_id, token, ip_address, user_agent, created_at, updated_at, expires_at \
             FROM sessions WHERE user_id = $1 AND expires_at > NOW() ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("active_sessions error: {:?}", e);
            vec![]
        })
    }

    async fn count_active_sessions(&self, user_id: Uuid) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sessions WHERE user_id = $1 AND expires_at > NOW()",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("count_active_sessions error: {:?}", e);
            0
        })
    }

    async fn revoke_session(&self, session_id: Uuid, user_id: Uuid) -> bool {
        match sqlx::query("DELETE FROM sessions WHERE id = $1 AND user_id = $2")
            .bind(session_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("revoke_session error: {:?}", e);
                false
            }
        }
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> u64 {
        match sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected(),
            Err(e) => {
                tracing::error!("revoke_all_sessions error: {:?}", e);
                0
            }
        }
    }

    async fn revoke_session_by_token(&self, token: &str) -> bool {
        match sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
        {
            Ok(res) => res.rows_affected() > 0,
            Err(e) => {
                tracing::error!("revoke_session_by_token error: {:?}", e);
                false
            }
        }
    }
}

// --- Mock Implementation (For Tests) ---

/// MockRepository
///
/// An in-memory implementation of `Repository` used exclusively for unit and
/// integration testing. This allows handler and middleware tests to run without a
/// network connection to Postgres, isolating the test boundary.
#[derive(Default)]
pub struct MockRepository {
    users: Mutex<HashMap<Uuid, User>>,
    sessions: Mutex<Vec<Session>>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account. Returns the id for convenience in test setup.
    pub fn insert_user(&self, user: User) -> Uuid {
        let id = user.id;
        self.users.lock().unwrap().insert(id, user);
        id
    }

    /// Seeds a session for `user_id` with the given token, expiring in an hour.
    pub fn insert_session(&self, user_id: Uuid, token: &str) -> Uuid {
        self.insert_session_expiring(user_id, token, Utc::now() + chrono::Duration::hours(1))
    }

    pub fn insert_session_expiring(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Uuid {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_string(),
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: Some("test-agent".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at,
        };
        let id = session.id;
        self.sessions.lock().unwrap().push(session);
        id
    }

    fn matches_filters(
        user: &User,
        role: &Option<String>,
        banned: Option<bool>,
        search: &Option<String>,
    ) -> bool {
        if let Some(role) = role {
            if user.role.as_deref() != Some(role.as_str()) {
                return false;
            }
        }
        if let Some(banned) = banned {
            if user.banned != banned {
                return false;
            }
        }
        if let Some(search) = search {
            let needle = search.to_lowercase();
            if !user.name.to_lowercase().contains(&needle)
                && !user.email.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn list_users(
        &self,
        role: Option<String>,
        banned: Option<bool>,
        search: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| Self::matches_filters(u, &role, banned, &search))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect()
    }

    async fn count_users(
        &self,
        role: Option<String>,
        banned: Option<bool>,
        search: Option<String>,
    ) -> i64 {
        self.users
            .lock()
            .unwrap()
            .values()
            .filter(|u| Self::matches_filters(u, &role, banned, &search))
            .count() as i64
    }

    async fn get_user(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    async fn ban_user(&self, id: Uuid, reason: &str, expires: Option<DateTime<Utc>>) -> bool {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(&id) else {
            return false;
        };
        user.banned = true;
        user.ban_reason = Some(reason.to_string());
        user.ban_expires = expires;
        user.updated_at = Utc::now();
        self.sessions.lock().unwrap().retain(|s| s.user_id != id);
        true
    }

    async fn unban_user(&self, id: Uuid) -> bool {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(&id) else {
            return false;
        };
        user.banned = false;
        user.ban_reason = None;
        user.ban_expires = None;
        user.updated_at = Utc::now();
        true
    }

    async fn set_role(&self, id: Uuid, role: &str) -> bool {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(&id) else {
            return false;
        };
        user.role = Some(role.to_string());
        user.updated_at = Utc::now();
        true
    }

    async fn update_name(&self, id: Uuid, name: &str) -> bool {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.get_mut(&id) else {
            return false;
        };
        user.name = name.to_string();
        user.updated_at = Utc::now();
        true
    }

    async fn find_identity_by_session(&self, token: &str) -> Option<Identity> {
        let now = Utc::now();
        let user_id = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.token == token && s.expires_at > now)
            .map(|s| s.user_id)?;
        self.users.lock().unwrap().get(&user_id).map(|u| Identity {
            id: u.id,
            role: u.role.clone(),
            banned: u.banned,
            ban_reason: u.ban_reason.clone(),
            ban_expires: u.ban_expires,
        })
    }

    async fn active_sessions(&self, user_id: Uuid) -> Vec<Session> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id && s.expires_at > now)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    async fn count_active_sessions(&self, user_id: Uuid) -> i64 {
        self.active_sessions(user_id).await.len() as i64
    }

    async fn revoke_session(&self, session_id: Uuid, user_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| !(s.id == session_id && s.user_id == user_id));
        sessions.len() < before
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> u64 {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s.user_id != user_id);
        (before - sessions.len()) as u64
    }

    async fn revoke_session_by_token(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|s| s.token != token);
        sessions.len() < before
    }
}
