use chrono::{DateTime, Duration, Utc};
use cms_portal::{
    AppConfig, AppState, MockRepository, PolicyTable, create_router,
    models::User,
    repository::RepositoryState,
    session::{PgSessionService, SessionState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

// End-to-end coverage of the authorization guard: identity resolution through
// the production session resolver (over the in-memory repository), path
// classification, decision evaluation, and response shaping for both API and
// page paths.

struct TestApp {
    address: String,
    repo: Arc<MockRepository>,
}

async fn spawn_app() -> TestApp {
    let repo = Arc::new(MockRepository::new());
    let config = AppConfig::default();

    let repo_state: RepositoryState = repo.clone();
    let sessions: SessionState =
        Arc::new(PgSessionService::new(repo_state.clone(), config.clone()));

    let state = AppState {
        repo: repo_state,
        sessions,
        policy: Arc::new(PolicyTable::default()),
        config,
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        repo,
    }
}

/// Client that surfaces 302s instead of following them, so redirect targets
/// can be asserted.
fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn seed_user(
    repo: &MockRepository,
    role: Option<&str>,
    banned: bool,
    ban_expires: Option<DateTime<Utc>>,
) -> Uuid {
    let id = Uuid::new_v4();
    repo.insert_user(User {
        id,
        name: "Jeanne Testeur".to_string(),
        email: format!("{}@exemple.fr", id.simple()),
        email_verified: true,
        username: None,
        display_username: None,
        role: role.map(|r| r.to_string()),
        banned,
        ban_reason: banned.then(|| "abus".to_string()),
        ban_expires,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    })
}

fn cookie(token: &str) -> String {
    format!("cms.session_token={}", token)
}

#[tokio::test]
async fn anonymous_api_request_gets_401_json() {
    let app = spawn_app().await;

    let response = client()
        .get(format!("{}/api/admin/users", app.address))
        .send()
        .await
        .expect("req fail");

    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Authentification requise");
}

#[tokio::test]
async fn anonymous_page_request_redirects_to_login() {
    let app = spawn_app().await;

    let response = client()
        .get(format!("{}/admin/users", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 302);
    assert_eq!(response.headers()["location"], "/login");
}

#[tokio::test]
async fn banned_member_gets_403_on_api_and_banned_redirect_on_pages() {
    let app = spawn_app().await;
    let user_id = seed_user(&app.repo, Some("member"), true, None);
    app.repo.insert_session(user_id, "banned-session");

    let response = client()
        .get(format!("{}/api/user/profile", app.address))
        .header("cookie", cookie("banned-session"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Compte suspendu");

    let response = client()
        .get(format!("{}/profil", app.address))
        .header("cookie", cookie("banned-session"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.headers()["location"], "/banned");
}

#[tokio::test]
async fn banned_admin_is_rejected_for_the_ban_not_the_role() {
    let app = spawn_app().await;
    let admin_id = seed_user(&app.repo, Some("admin"), true, Some(Utc::now() + Duration::days(7)));
    app.repo.insert_session(admin_id, "banned-admin");

    let response = client()
        .get(format!("{}/api/admin/users", app.address))
        .header("cookie", cookie("banned-admin"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Compte suspendu");
}

#[tokio::test]
async fn insufficient_role_gets_403_on_api_and_unauthorized_redirect_on_pages() {
    let app = spawn_app().await;
    let guest_id = seed_user(&app.repo, Some("guest"), false, None);
    app.repo.insert_session(guest_id, "guest-session");

    let response = client()
        .get(format!("{}/api/user/profile", app.address))
        .header("cookie", cookie("guest-session"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Permissions insuffisantes");

    let response = client()
        .get(format!("{}/profil", app.address))
        .header("cookie", cookie("guest-session"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.headers()["location"], "/unauthorized");
}

#[tokio::test]
async fn lapsed_ban_no_longer_blocks_access() {
    let app = spawn_app().await;
    let user_id = seed_user(
        &app.repo,
        Some("user"),
        true,
        // Expired years ago: the flag is still set but the ban is over.
        Some(Utc::now() - Duration::days(2000)),
    );
    app.repo.insert_session(user_id, "lapsed-ban");

    let response = client()
        .get(format!("{}/api/user/profile", app.address))
        .header("cookie", cookie("lapsed-ban"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn missing_role_defaults_to_user_and_passes_member_routes() {
    let app = spawn_app().await;
    let user_id = seed_user(&app.repo, None, false, None);
    app.repo.insert_session(user_id, "no-role");

    let response = client()
        .get(format!("{}/api/user/sessions", app.address))
        .header("cookie", cookie("no-role"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn expired_session_resolves_to_anonymous() {
    let app = spawn_app().await;
    let user_id = seed_user(&app.repo, Some("admin"), false, None);
    app.repo
        .insert_session_expiring(user_id, "stale", Utc::now() - Duration::minutes(5));

    let response = client()
        .get(format!("{}/api/admin/users", app.address))
        .header("cookie", cookie("stale"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn public_auth_routes_skip_the_guard_entirely() {
    let app = spawn_app().await;

    // No session at all: a protected route would answer 401, but the auth
    // gateway is public, so the request reaches the handler's own validation.
    let response = client()
        .post(format!("{}/api/auth/register", app.address))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Tous les champs sont requis.");
}

#[tokio::test]
async fn unclassified_paths_fall_through_to_the_router() {
    let app = spawn_app().await;

    // /health has a handler and no policy entry: default-allow serves it.
    let response = client()
        .get(format!("{}/health", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // No handler and no policy entry: plain 404, no redirect.
    let response = client()
        .get(format!("{}/nowhere", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn local_dev_bypass_resolves_identity_from_header() {
    let app = spawn_app().await;
    let admin_id = seed_user(&app.repo, Some("admin"), false, None);

    let response = client()
        .get(format!("{}/api/admin/users", app.address))
        .header("x-user-id", admin_id.to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}
