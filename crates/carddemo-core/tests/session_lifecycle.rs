use std::sync::{Arc, Mutex};

use carddemo_core::auth::storage::{KeyValueStore, MemoryStore, SESSION_KEY, TOKEN_KEY};
use carddemo_core::signals::{ClearReason, Signal, SignalKind};
use carddemo_core::{AuthState, ClientConfig, ClientContext, Credential, ManualClock};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    ctx: ClientContext,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    cleared: Arc<Mutex<Vec<ClearReason>>>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn harness(server: &MockServer) -> Harness {
    let config = ClientConfig {
        api_base_url: server.uri(),
        ..ClientConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let ctx = ClientContext::new(config, store.clone(), clock.clone()).unwrap();

    let cleared = Arc::new(Mutex::new(Vec::new()));
    let sink = cleared.clone();
    ctx.signals.subscribe(SignalKind::SessionCleared, move |signal| {
        if let Signal::SessionCleared { reason } = signal {
            sink.lock().unwrap().push(*reason);
        }
    });

    Harness {
        ctx,
        store,
        clock,
        cleared,
    }
}

fn user_json() -> Value {
    json!({"id": 1, "username": "admin", "email": "admin@carddemo.local", "is_active": true})
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"username": "admin", "password": "admin123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "user": user_json()
        })))
        .mount(server)
        .await;
}

async fn logged_in(server: &MockServer) -> Harness {
    mount_login(server).await;
    let h = harness(server);
    h.ctx
        .session
        .login(&Credential::new("admin", "admin123"))
        .await
        .unwrap();
    h
}

#[tokio::test]
async fn test_login_persists_session() {
    let server = MockServer::start().await;
    let h = logged_in(&server).await;

    let session = h.ctx.session.current_session().unwrap();
    assert_eq!(session.expires_at, t0() + Duration::seconds(3600));
    assert_eq!(h.ctx.session.state(), AuthState::Authenticated);
    assert_eq!(h.store.get(TOKEN_KEY).unwrap().as_deref(), Some("tok-1"));

    let persisted: Value = serde_json::from_str(&h.store.get(SESSION_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(persisted["token"], "tok-1");
    assert_eq!(persisted["user"]["username"], "admin");
    assert!(persisted["expiresAt"].is_string());
}

#[tokio::test]
async fn test_check_outside_buffer_makes_no_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
        .expect(0)
        .mount(&server)
        .await;
    let h = logged_in(&server).await;

    h.clock.advance(Duration::seconds(1000));
    assert!(h.ctx.session.check_auth_status().await);
}

#[tokio::test]
async fn test_check_inside_buffer_revalidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 1, "username": "admin", "email": "new@carddemo.local", "is_active": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    let h = logged_in(&server).await;

    h.clock.advance(Duration::seconds(3500));
    assert!(h.ctx.session.check_auth_status().await);

    let user = h.ctx.session.current_user().unwrap();
    assert_eq!(user.email.as_deref(), Some("new@carddemo.local"));
    // Revalidation refreshes the user, not the expiry
    assert_eq!(
        h.ctx.session.current_session().unwrap().expires_at,
        t0() + Duration::seconds(3600)
    );
}

#[tokio::test]
async fn test_failed_revalidation_invalidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let h = logged_in(&server).await;

    h.clock.advance(Duration::seconds(3500));
    assert!(!h.ctx.session.check_auth_status().await);

    assert_eq!(h.ctx.session.state(), AuthState::Invalidated);
    assert_eq!(h.store.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(h.store.get(SESSION_KEY).unwrap(), None);
    assert_eq!(*h.cleared.lock().unwrap(), vec![ClearReason::RevalidationFailed]);
}

#[tokio::test]
async fn test_rejected_revalidation_clears_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let h = logged_in(&server).await;

    h.clock.advance(Duration::seconds(3500));
    assert!(!h.ctx.session.check_auth_status().await);

    assert_eq!(h.ctx.session.state(), AuthState::Invalidated);
    assert_eq!(*h.cleared.lock().unwrap(), vec![ClearReason::CredentialRejected]);
}

#[tokio::test]
async fn test_expired_session_is_cleared_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
        .expect(0)
        .mount(&server)
        .await;
    let h = logged_in(&server).await;

    h.clock.advance(Duration::seconds(3600));
    assert!(!h.ctx.session.check_auth_status().await);

    assert!(!h.ctx.session.is_authenticated());
    assert_eq!(h.store.get(SESSION_KEY).unwrap(), None);
    assert_eq!(*h.cleared.lock().unwrap(), vec![ClearReason::Expired]);
}

#[tokio::test]
async fn test_logout_clears_even_when_server_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let h = logged_in(&server).await;

    h.ctx.session.logout().await;

    assert_eq!(h.ctx.session.state(), AuthState::Anonymous);
    assert_eq!(h.store.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(h.store.get(SESSION_KEY).unwrap(), None);
    assert!(h.cleared.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_logout_rejected_by_server_does_not_signal_clear() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    let h = logged_in(&server).await;

    let rejected = Arc::new(Mutex::new(0));
    let sink = rejected.clone();
    h.ctx.signals.subscribe(SignalKind::CredentialRejected, move |_| {
        *sink.lock().unwrap() += 1;
    });

    h.ctx.session.logout().await;

    assert_eq!(h.ctx.session.state(), AuthState::Anonymous);
    assert_eq!(h.store.get(TOKEN_KEY).unwrap(), None);
    assert_eq!(h.store.get(SESSION_KEY).unwrap(), None);
    assert_eq!(*rejected.lock().unwrap(), 1);
    assert!(h.cleared.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_login_stays_anonymous() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Incorrect username or password"})))
        .mount(&server)
        .await;
    let h = harness(&server);

    let error = h
        .ctx
        .session
        .login(&Credential::new("admin", "wrong"))
        .await
        .unwrap_err();

    assert!(error.is_unauthorized());
    assert_eq!(h.ctx.session.state(), AuthState::Anonymous);
    assert_eq!(h.store.get(TOKEN_KEY).unwrap(), None);
    assert!(h.cleared.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_adopts_persisted_session() {
    let server = MockServer::start().await;
    let first = logged_in(&server).await;

    // A second client over the same storage, as after a restart
    let config = ClientConfig {
        api_base_url: server.uri(),
        ..ClientConfig::default()
    };
    let ctx = ClientContext::new(config, first.store.clone(), first.clock.clone()).unwrap();

    assert!(ctx.restore_session());
    assert_eq!(ctx.session.state(), AuthState::Authenticated);
    assert_eq!(ctx.session.current_user().unwrap().username, "admin");
}
