//! End-to-end session tests against an in-process identity service.
//!
//! The fake service mounts the same paths the dashboard talks to
//! (`/api/v1/auth/{me,login,refresh,register,logout,reset-password,sessions}`)
//! and answers with the
//! envelope shapes the real backend uses.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use campus_core::api::{AuthorizedClient, ClientError, ConfigSource};
use campus_core::auth::{
    CredentialStore, MemoryCredentialStore, RecordingNavigator, Resolution, HOME_ROUTE,
};
use campus_core::{
    ApiEndpointConfig, Credential, GuardAction, Route, ServiceName, SessionCoordinator, SessionState,
    TokenSet,
};

const USERNAME: &str = "minhanh";
const PASSWORD: &str = "correct horse";

#[derive(Default)]
struct IdentityState {
    access_tokens: HashSet<String>,
    refresh_tokens: HashSet<String>,
    issued: u32,
    me_calls: u32,
    refreshes: u32,
    logouts: u32,
    registrations: Vec<Value>,
    password_resets: Vec<Value>,
    revoked_sessions: Vec<i64>,
    /// Overrides the one-hour default when set
    expires_in: u64,
}

#[derive(Clone, Default)]
struct FakeIdentity {
    state: Arc<Mutex<IdentityState>>,
}

impl FakeIdentity {
    fn grant_access(&self, token: &str) {
        self.state.lock().unwrap().access_tokens.insert(token.to_string());
    }

    fn grant_refresh(&self, token: &str) {
        self.state.lock().unwrap().refresh_tokens.insert(token.to_string());
    }

    fn issue(&self) -> Value {
        let mut state = self.state.lock().unwrap();
        state.issued += 1;
        let access = format!("access-{}", state.issued);
        let refresh = format!("refresh-{}", state.issued);
        state.access_tokens.insert(access.clone());
        state.refresh_tokens.insert(refresh.clone());
        let expires_in = if state.expires_in == 0 { 3600 } else { state.expires_in };
        json!({
            "accessToken": access,
            "refreshToken": refresh,
            "tokenType": "Bearer",
            "expiresIn": expires_in
        })
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

async fn me(State(identity): State<FakeIdentity>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let mut state = identity.state.lock().unwrap();
    state.me_calls += 1;
    match bearer(&headers) {
        Some(token) if state.access_tokens.contains(&token) => (
            StatusCode::OK,
            Json(json!({
                "body": {
                    "id": "42",
                    "username": USERNAME,
                    "email": "minhanh.nguyen@student.edu.vn",
                    "avaUrl": null
                }
            })),
        ),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Access token is invalid or expired" })),
        ),
    }
}

async fn login(State(identity): State<FakeIdentity>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["username"] == USERNAME && body["password"] == PASSWORD {
        (StatusCode::OK, Json(json!({ "data": identity.issue() })))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "body": { "message": "Invalid username or password" } })),
        )
    }
}

async fn refresh(State(identity): State<FakeIdentity>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let known = body["refreshToken"].as_str().is_some_and(|t| {
        let mut state = identity.state.lock().unwrap();
        state.refreshes += 1;
        state.refresh_tokens.contains(t)
    });
    if known {
        (StatusCode::OK, Json(identity.issue()))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Refresh token revoked" })))
    }
}

async fn register(State(identity): State<FakeIdentity>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    identity.state.lock().unwrap().registrations.push(body);
    (StatusCode::CREATED, Json(json!({ "body": { "id": "43" } })))
}

async fn logout(State(identity): State<FakeIdentity>) -> Json<Value> {
    identity.state.lock().unwrap().logouts += 1;
    Json(json!({}))
}

async fn reset_password(
    State(identity): State<FakeIdentity>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if body["oldPassword"] != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "statusCode": 401, "message": "Old password is incorrect" })),
        );
    }
    identity.state.lock().unwrap().password_resets.push(body);
    (StatusCode::OK, Json(json!({ "statusCode": 200, "message": "success", "body": null })))
}

async fn list_sessions(State(identity): State<FakeIdentity>, Path(username): Path<String>) -> Json<Value> {
    let state = identity.state.lock().unwrap();
    let sessions: Vec<Value> = if username == USERNAME {
        (1..=i64::from(state.issued))
            .filter(|id| !state.revoked_sessions.contains(id))
            .map(|id| {
                json!({
                    "id": id,
                    "username": USERNAME,
                    "accessToken": format!("access-{}", id),
                    "refreshToken": format!("refresh-{}", id),
                    "accessTokenExpiry": "2026-01-01T01:00:00Z",
                    "refreshTokenExpiry": "2026-01-02T00:00:00Z",
                    "clientId": "campus-web"
                })
            })
            .collect()
    } else {
        Vec::new()
    };
    Json(json!({ "statusCode": 200, "message": "success", "body": sessions }))
}

async fn revoke_session(State(identity): State<FakeIdentity>, Path(id): Path<i64>) -> Json<Value> {
    identity.state.lock().unwrap().revoked_sessions.push(id);
    Json(json!({ "statusCode": 200, "message": "success", "body": null }))
}

struct SessionRig {
    identity: FakeIdentity,
    app: SessionCoordinator,
    store: Arc<MemoryCredentialStore>,
    nav: Arc<RecordingNavigator>,
}

impl SessionRig {
    async fn setup(store: MemoryCredentialStore) -> Self {
        let identity = FakeIdentity::default();
        let router = Router::new()
            .route("/api/v1/auth/me", get(me))
            .route("/api/v1/auth/login", post(login))
            .route("/api/v1/auth/refresh", post(refresh))
            .route("/api/v1/auth/register", post(register))
            .route("/api/v1/auth/logout", post(logout))
            .route("/api/v1/auth/reset-password", post(reset_password))
            .route("/api/v1/auth/sessions/:key", get(list_sessions).delete(revoke_session))
            .with_state(identity.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind TCP listener");
        let addr = listener.local_addr().expect("Failed to get local address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("identity server failed");
        });

        Self::connect(identity, addr, store)
    }

    fn connect(identity: FakeIdentity, addr: SocketAddr, store: MemoryCredentialStore) -> Self {
        let config = ApiEndpointConfig::from_base_url(&format!("http://{}/api/v1", addr), ConfigSource::Default);
        let store = Arc::new(store);
        let nav = Arc::new(RecordingNavigator::new());
        let app = SessionCoordinator::new(config, store.clone(), nav.clone()).expect("coordinator");
        Self {
            identity,
            app,
            store,
            nav,
        }
    }

    fn every_client_holds(&self, expected: Option<&Credential>) -> bool {
        ServiceName::ALL
            .iter()
            .all(|s| self.app.clients().get(*s).auth_token().as_ref() == expected)
    }
}

fn stored_access(store: &MemoryCredentialStore) -> Option<String> {
    store.get().unwrap().map(|c| c.expose().to_string())
}

#[tokio::test]
async fn stored_token_authenticates_on_protected_route() {
    let rig = SessionRig::setup(MemoryCredentialStore::with_tokens(TokenSet::bearer(Credential::new(
        "seeded",
    ))))
    .await;
    rig.identity.grant_access("seeded");

    let resolution = rig.app.mount("/dashboard/courses").await.unwrap();

    let user = resolution.state().and_then(|s| s.user()).expect("authenticated");
    assert_eq!(user.id, "42");
    assert_eq!(user.name, USERNAME);
    assert_eq!(rig.app.guard(), GuardAction::Render);
    assert!(rig.nav.take().is_empty());
    assert!(rig.every_client_holds(Some(&Credential::new("seeded"))));
}

#[tokio::test]
async fn anonymous_visit_to_login_page_stays_put() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;

    let resolution = rig.app.mount("/auth/login").await.unwrap();

    assert_eq!(resolution.state(), Some(&SessionState::Unauthenticated));
    assert_eq!(rig.app.guard(), GuardAction::Render);
    assert!(rig.nav.take().is_empty());
    // The check still ran, without a bearer header
    assert_eq!(rig.identity.state.lock().unwrap().me_calls, 1);
}

#[tokio::test]
async fn sign_in_broadcasts_and_persists_tokens() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;
    rig.app.mount("/auth/login").await.unwrap();

    let resolution = rig.app.sign_in(USERNAME, PASSWORD).await.unwrap();

    assert!(matches!(resolution.state(), Some(SessionState::Authenticated(_))));
    assert_eq!(rig.app.current_route(), Route::new(HOME_ROUTE));
    let tokens = rig.store.load().unwrap().expect("tokens persisted");
    assert_eq!(tokens.access_token, Credential::new("access-1"));
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    assert!(tokens.expires_at.is_some());
    assert!(rig.every_client_holds(Some(&Credential::new("access-1"))));
}

#[tokio::test]
async fn wrong_password_reports_server_message() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;
    rig.app.mount("/auth/login").await.unwrap();

    let err = rig.app.sign_in(USERNAME, "wrong").await.unwrap_err();

    assert!(format!("{:#}", err).contains("Invalid username or password"));
    assert_eq!(rig.app.state(), SessionState::Unauthenticated);
    assert_eq!(stored_access(&rig.store), None);
    assert!(rig.every_client_holds(None));
}

#[tokio::test]
async fn rejected_access_token_is_refreshed_within_one_cycle() {
    let mut stale = TokenSet::bearer(Credential::new("stale"));
    stale.refresh_token = Some("refresh-seeded".to_string());
    let rig = SessionRig::setup(MemoryCredentialStore::with_tokens(stale)).await;
    rig.identity.grant_refresh("refresh-seeded");

    let resolution = rig.app.mount("/dashboard").await.unwrap();

    match resolution {
        Resolution::Settled { cycle, state, redirected, .. } => {
            assert_eq!(cycle, 1);
            assert!(matches!(state, SessionState::Authenticated(_)));
            assert!(!redirected);
        }
        other => panic!("expected settled, got {:?}", other),
    }
    assert_eq!(stored_access(&rig.store).as_deref(), Some("access-1"));
    assert!(rig.every_client_holds(Some(&Credential::new("access-1"))));
    assert_eq!(rig.identity.state.lock().unwrap().me_calls, 2);
}

#[tokio::test]
async fn locally_expired_access_token_is_refreshed() {
    let mut expired = TokenSet::bearer(Credential::new("expired"));
    expired.refresh_token = Some("refresh-seeded".to_string());
    expired.expires_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
    let rig = SessionRig::setup(MemoryCredentialStore::with_tokens(expired)).await;
    rig.identity.grant_refresh("refresh-seeded");

    let resolution = rig.app.mount("/dashboard").await.unwrap();

    assert!(matches!(resolution.state(), Some(SessionState::Authenticated(_))));
    assert!(rig.nav.take().is_empty());
    assert_eq!(rig.identity.state.lock().unwrap().refreshes, 1);
    assert_eq!(stored_access(&rig.store).as_deref(), Some("access-1"));
    assert!(rig.every_client_holds(Some(&Credential::new("access-1"))));
}

#[tokio::test]
async fn huge_expires_in_does_not_break_sign_in() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;
    rig.app.mount("/auth/login").await.unwrap();
    rig.identity.state.lock().unwrap().expires_in = 10_000_000_000_000;

    let resolution = rig.app.sign_in(USERNAME, PASSWORD).await.unwrap();

    assert!(matches!(resolution.state(), Some(SessionState::Authenticated(_))));
    let tokens = rig.store.load().unwrap().expect("tokens persisted");
    assert_eq!(tokens.expires_at, None);
}

#[tokio::test]
async fn refused_token_is_cleared_and_redirects() {
    let rig = SessionRig::setup(MemoryCredentialStore::with_tokens(TokenSet::bearer(Credential::new(
        "revoked",
    ))))
    .await;

    let resolution = rig.app.mount("/dashboard").await.unwrap();

    assert!(resolution.credential_refused());
    assert_eq!(rig.app.guard(), GuardAction::RedirectToLogin);
    assert_eq!(rig.nav.take(), vec![Route::login()]);
    assert_eq!(stored_access(&rig.store), None);
    assert!(rig.every_client_holds(None));
}

#[tokio::test]
async fn sign_up_registers_student_then_signs_in() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;
    rig.app.mount("/auth/signup").await.unwrap();

    let resolution = rig
        .app
        .sign_up(USERNAME, "minhanh.nguyen@student.edu.vn", PASSWORD)
        .await
        .unwrap();

    assert!(matches!(resolution.state(), Some(SessionState::Authenticated(_))));
    let registrations = rig.identity.state.lock().unwrap().registrations.clone();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0]["username"], USERNAME);
    assert_eq!(registrations[0]["roles"], json!(["STUDENT"]));
}

#[tokio::test]
async fn sign_out_clears_everything_and_redirects() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;
    rig.app.mount("/auth/login").await.unwrap();
    rig.app.sign_in(USERNAME, PASSWORD).await.unwrap();

    rig.app.sign_out().await.unwrap();

    assert_eq!(rig.app.state(), SessionState::Unauthenticated);
    assert_eq!(rig.nav.take(), vec![Route::login()]);
    assert_eq!(stored_access(&rig.store), None);
    assert!(rig.every_client_holds(None));
    assert_eq!(rig.identity.state.lock().unwrap().logouts, 1);
}

#[tokio::test]
async fn reset_password_sends_both_passwords() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;

    rig.app
        .identity()
        .reset_password("minhanh.nguyen@student.edu.vn", PASSWORD, "battery staple")
        .await
        .unwrap();

    let resets = rig.identity.state.lock().unwrap().password_resets.clone();
    assert_eq!(
        resets,
        vec![json!({
            "email": "minhanh.nguyen@student.edu.vn",
            "oldPassword": PASSWORD,
            "newPassword": "battery staple"
        })]
    );
}

#[tokio::test]
async fn reset_password_with_wrong_old_password_fails() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;

    let err = rig
        .app
        .identity()
        .reset_password("minhanh.nguyen@student.edu.vn", "wrong", "battery staple")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Status { status: 401, .. }));
    assert!(err.to_string().contains("Old password is incorrect"));
    assert!(rig.identity.state.lock().unwrap().password_resets.is_empty());
}

#[tokio::test]
async fn sessions_are_listed_and_revoked() {
    let rig = SessionRig::setup(MemoryCredentialStore::new()).await;
    rig.app.mount("/auth/login").await.unwrap();
    rig.app.sign_in(USERNAME, PASSWORD).await.unwrap();
    rig.app.sign_in(USERNAME, PASSWORD).await.unwrap();

    let sessions = rig.app.identity().list_sessions(USERNAME).await.unwrap();
    assert_eq!(sessions.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(sessions[0].client_id.as_deref(), Some("campus-web"));

    rig.app.identity().revoke_session(1).await.unwrap();

    let sessions = rig.app.identity().list_sessions(USERNAME).await.unwrap();
    assert_eq!(sessions.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2]);
    assert!(rig.app.identity().list_sessions("someone-else").await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_service_keeps_stored_token() {
    // Reserve a port, then close it so connections are refused
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let rig = SessionRig::connect(
        FakeIdentity::default(),
        addr,
        MemoryCredentialStore::with_tokens(TokenSet::bearer(Credential::new("seeded"))),
    );

    let resolution = rig.app.mount("/dashboard").await.unwrap();

    assert_eq!(resolution.state(), Some(&SessionState::Unauthenticated));
    assert!(!resolution.is_rejection());
    assert_eq!(rig.nav.take(), vec![Route::login()]);
    assert_eq!(stored_access(&rig.store).as_deref(), Some("seeded"));
}
