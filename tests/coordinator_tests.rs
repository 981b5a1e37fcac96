use bugsight::auth::{
    AuthError, CallbackCoordinator, CallbackOutcome, ExchangeGuard, LoginStart, Phase,
    RequestContext,
};
use bugsight::session::{FileSnapshotStore, SessionStore};
use bugsight::types::UserProfile;
use mockito::Matcher;
use std::sync::Arc;

const EXCHANGE_BODY: &str = r#"{
    "token": "jwt-token",
    "user": {"id": "42", "username": "octocat", "name": "The Octocat"},
    "github_token": "gho_secondary"
}"#;

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<SessionStore>,
    coordinator: CallbackCoordinator,
    guard_probe: ExchangeGuard,
}

fn fixture(base_url: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SessionStore::new(Box::new(FileSnapshotStore::new(
        dir.path(),
    ))));
    store.hydrate();

    let coordinator =
        CallbackCoordinator::new(base_url, store.clone(), ExchangeGuard::new(dir.path()));
    let guard_probe = ExchangeGuard::new(dir.path());

    Fixture {
        _dir: dir,
        store,
        coordinator,
        guard_probe,
    }
}

fn profile() -> UserProfile {
    UserProfile {
        id: "42".to_string(),
        username: "octocat".to_string(),
        name: None,
        email: None,
        avatar_url: None,
        github_url: None,
        bio: None,
        company: None,
        location: None,
    }
}

#[tokio::test]
async fn successful_exchange_logs_in_and_clears_guard() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth/callback")
        .match_query(Matcher::UrlEncoded("code".into(), "abc123".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(EXCHANGE_BODY)
        .create_async()
        .await;

    let f = fixture(&server.url());
    let mut ctx = RequestContext::from_query("?code=abc123");

    let outcome = f.coordinator.process_callback(&mut ctx).await;

    assert!(matches!(outcome, CallbackOutcome::Succeeded));
    assert_eq!(f.coordinator.phase(), Phase::Succeeded);
    assert!(f.store.is_authenticated());
    assert_eq!(
        f.store.state().user.unwrap().username,
        "octocat"
    );
    assert!(!f.guard_probe.is_set());
    mock.assert_async().await;
}

#[tokio::test]
async fn guard_held_means_at_most_one_exchange() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth/callback")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let f = fixture(&server.url());

    // A first invocation is mid-exchange: the guard is held
    assert!(f.guard_probe.acquire().unwrap());

    let mut ctx = RequestContext::from_query("?code=abc123");
    let outcome = f.coordinator.process_callback(&mut ctx).await;

    assert!(matches!(outcome, CallbackOutcome::InFlight));
    // The code stays: it belongs to the invocation that holds the guard
    assert_eq!(ctx.code(), Some("abc123"));
    mock.assert_async().await;
}

#[tokio::test]
async fn rejected_exchange_clears_guard_and_strips_code() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth/callback")
        .match_query(Matcher::UrlEncoded("code".into(), "expired".into()))
        .with_status(401)
        .with_body("bad code")
        .create_async()
        .await;

    let f = fixture(&server.url());
    let mut ctx = RequestContext::from_query("?code=expired");

    let outcome = f.coordinator.process_callback(&mut ctx).await;

    let CallbackOutcome::Failed(AuthError::Rejected { status, .. }) = outcome else {
        panic!("expected a rejected exchange, got {:?}", outcome);
    };
    assert_eq!(status, 401);
    assert_eq!(f.coordinator.phase(), Phase::Failed);

    // Guard released, code unspendable, session untouched
    assert!(!f.guard_probe.is_set());
    assert_eq!(ctx.code(), None);
    assert!(!f.store.is_authenticated());
    mock.assert_async().await;

    // The next pass sees no code and stays idle instead of retrying
    let outcome = f.coordinator.process_callback(&mut ctx).await;
    assert!(matches!(outcome, CallbackOutcome::Idle));
}

#[tokio::test]
async fn network_failure_clears_guard_and_strips_code() {
    // Nothing listens here
    let f = fixture("http://127.0.0.1:9");
    let mut ctx = RequestContext::from_query("?code=abc123");

    let outcome = f.coordinator.process_callback(&mut ctx).await;

    assert!(matches!(
        outcome,
        CallbackOutcome::Failed(AuthError::Network(_))
    ));
    assert!(!f.guard_probe.is_set());
    assert_eq!(ctx.code(), None);
    assert!(!f.store.is_authenticated());
}

#[tokio::test]
async fn authenticated_store_short_circuits_stale_code() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth/callback")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let f = fixture(&server.url());
    f.store
        .login(profile(), "jwt".to_string(), "gho".to_string())
        .unwrap();

    let mut ctx = RequestContext::from_query("?code=stale");
    let outcome = f.coordinator.process_callback(&mut ctx).await;

    assert!(matches!(outcome, CallbackOutcome::AlreadyAuthenticated));
    assert_eq!(f.coordinator.phase(), Phase::Idle);
    mock.assert_async().await;
}

#[tokio::test]
async fn missing_code_stays_idle() {
    let server = mockito::Server::new_async().await;
    let f = fixture(&server.url());

    let mut ctx = RequestContext::from_query("?classic=true");
    let outcome = f.coordinator.process_callback(&mut ctx).await;

    assert!(matches!(outcome, CallbackOutcome::Idle));
    assert!(!f.guard_probe.is_set());
}

#[tokio::test]
async fn begin_login_returns_authorization_url() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth/github")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"authorization_url": "https://github.com/login/oauth/authorize?client_id=x"}"#)
        .create_async()
        .await;

    let f = fixture(&server.url());
    let start = f.coordinator.begin_login().await.unwrap();

    let LoginStart::Redirect(url) = start else {
        panic!("expected a redirect");
    };
    assert!(url.starts_with("https://github.com/login/oauth/authorize"));
}

#[tokio::test]
async fn begin_login_falls_back_on_degraded_deployment() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/auth/github")
        .with_status(503)
        .with_body("Enhanced features not available")
        .create_async()
        .await;

    let f = fixture(&server.url());
    let start = f.coordinator.begin_login().await.unwrap();

    assert!(matches!(start, LoginStart::Degraded));
}
