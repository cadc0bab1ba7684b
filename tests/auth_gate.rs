use realtime_chat_server::error::AuthError;
use realtime_chat_server::websocket::Credentials;
use realtime_chat_server::{AppState, AuthGate, BcryptHasher, Settings};
use std::sync::Arc;

async fn setup() -> (AppState, AuthGate) {
    let settings = Settings::new_for_test().expect("Failed to load test config");
    let state = AppState::new(settings).await.expect("Failed to build app state");
    let gate = AuthGate::new(state.repository(), Arc::new(BcryptHasher::new(4)));
    (state, gate)
}

fn credentials(username: &str, password: &str) -> Credentials {
    Credentials {
        username: username.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_signup_then_login() {
    let (state, gate) = setup().await;

    let created = gate.signup(&credentials("alice", "correct horse")).await.unwrap();
    let stored = state.repository().find_user("alice").await.unwrap().unwrap();
    assert_eq!(stored.id, created.id);
    assert_ne!(stored.password, "correct horse");

    let user = gate.login(&credentials("alice", "correct horse")).await.unwrap();
    assert_eq!(user.id, created.id);
}

#[tokio::test]
async fn test_duplicate_signup() {
    let (_state, gate) = setup().await;

    gate.signup(&credentials("alice", "pw")).await.unwrap();
    let err = gate.signup(&credentials("alice", "other")).await.unwrap_err();
    assert_eq!(err, AuthError::UserExists);
    assert_eq!(err.to_string(), "user already existed");
}

#[tokio::test]
async fn test_bad_logins() {
    let (_state, gate) = setup().await;
    gate.signup(&credentials("alice", "pw")).await.unwrap();

    for attempt in [credentials("alice", "wrong"), credentials("mallory", "pw")] {
        let err = gate.login(&attempt).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid user credentials");
    }
}
