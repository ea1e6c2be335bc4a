mod common;

use common::{app_state, config_for, session_token, setup, NOW_MS};
use fixtures::upstream::{NA_ID, NSA_ID};
use nxapi::{coral::CoralApi, errors::NxapiError, oauth::session::LoginSession};

#[tokio::test]
async fn test_exchange_caches_credential() {
    let app = setup().await;
    let token = session_token();

    let credential = app
        .state
        .sessions
        .authenticator()
        .exchange(&token)
        .await
        .unwrap();

    assert_eq!(credential.user_id, NA_ID);
    assert_eq!(credential.nso_account.nsa_id, NSA_ID);
    assert_eq!(credential.expires_at, NOW_MS + 7200 * 1000);
    assert!(credential.proxy_url.is_none());

    let cached = app.state.cache.get(&token).await.unwrap().unwrap();
    assert_eq!(cached.access_token, credential.access_token);
    assert_eq!(
        app.state.cache.session_token_for_user(NA_ID).await.unwrap(),
        Some(token)
    );

    let upstream = app.upstream.snapshot().await;
    assert_eq!(upstream.token_requests, 1);
    assert_eq!(upstream.f_requests, 1);
    assert_eq!(upstream.login_requests, 1);
}

#[tokio::test]
async fn test_invalid_session_token_is_rejected_before_any_request() {
    let app = setup().await;
    // Parental controls app client id
    let token = fixtures::session_token("54789befb391a838", NA_ID, 2_000_000_000).unwrap();

    let err = app
        .state
        .sessions
        .authenticator()
        .exchange(&token)
        .await
        .unwrap_err();

    assert!(matches!(err, NxapiError::InvalidToken(_)));
    assert_eq!(app.upstream.snapshot().await.token_requests, 0);
}

#[tokio::test]
async fn test_revoked_session_token() {
    let app = setup().await;
    let token = session_token();
    app.upstream
        .update(|upstream| {
            upstream.revoked_session_tokens.insert(token.clone());
        })
        .await;

    let err = app.state.sessions.credential(&token).await.unwrap_err();

    assert!(matches!(err, NxapiError::InvalidToken(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_attestation_failure() {
    let app = setup().await;
    app.upstream
        .update(|upstream| upstream.attestation_fails = true)
        .await;

    let err = app
        .state
        .sessions
        .credential(&session_token())
        .await
        .unwrap_err();

    assert!(matches!(err, NxapiError::AttestationFailed(_)));
    assert!(err.is_retryable());
    // Not retried automatically
    assert_eq!(app.upstream.snapshot().await.f_requests, 1);
    assert_eq!(app.upstream.snapshot().await.login_requests, 0);
}

#[tokio::test]
async fn test_membership_required() {
    let app = setup().await;
    app.upstream
        .update(|upstream| upstream.login_status = 9450)
        .await;

    let err = app
        .state
        .sessions
        .credential(&session_token())
        .await
        .unwrap_err();

    assert!(matches!(err, NxapiError::MembershipRequired));
    assert!(app.state.cache.get(&session_token()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_profile_is_an_upstream_error() {
    let app = setup().await;
    app.upstream
        .update(|upstream| upstream.na_user = serde_json::json!({ "id": 1 }))
        .await;

    let err = app
        .state
        .sessions
        .credential(&session_token())
        .await
        .unwrap_err();

    assert!(matches!(err, NxapiError::Upstream { .. }), "{:?}", err);
    assert_eq!(err.code(), "upstream_error");
}

#[tokio::test]
async fn test_cached_credential_is_reused_until_it_expires() {
    let app = setup().await;
    let token = session_token();

    let first = app.state.sessions.credential(&token).await.unwrap();
    let second = app.state.sessions.credential(&token).await.unwrap();
    assert_eq!(first.access_token, second.access_token);
    assert_eq!(app.upstream.snapshot().await.login_requests, 1);

    app.clock.advance_ms(first.expires_at - NOW_MS);
    let third = app.state.sessions.credential(&token).await.unwrap();
    assert_ne!(first.access_token, third.access_token);
    assert_eq!(app.upstream.snapshot().await.login_requests, 2);
}

#[tokio::test]
async fn test_concurrent_misses_exchange_once() {
    let app = setup().await;
    let token = session_token();

    let requests = (0..5).map(|_| app.state.sessions.credential(&token));
    let credentials = futures::future::join_all(requests).await;

    assert!(credentials.iter().all(|credential| credential.is_ok()));
    let upstream = app.upstream.snapshot().await;
    assert_eq!(upstream.token_requests, 1);
    assert_eq!(upstream.login_requests, 1);
}

#[tokio::test]
async fn test_expired_coral_credential_is_renewed_once() {
    let app = setup().await;
    let token = session_token();

    let coral = app.state.sessions.coral(&token).await.unwrap();
    let credential = coral.credential().await;
    app.upstream
        .update(|upstream| {
            upstream
                .expired_access_tokens
                .insert(credential.access_token.clone());
        })
        .await;

    let friends = coral.friends().await.unwrap();
    assert_eq!(friends.len(), 2);
    assert_ne!(coral.credential().await.access_token, credential.access_token);
    assert_eq!(app.upstream.snapshot().await.login_requests, 2);
}

#[tokio::test]
async fn test_coral_calls() {
    let app = setup().await;
    let coral = app.state.sessions.coral(&session_token()).await.unwrap();

    let user = coral.current_user().await.unwrap();
    assert_eq!(user.user.nsa_id, NSA_ID);

    assert_eq!(coral.announcements().await.unwrap().len(), 1);
    assert!(coral.active_event().await.unwrap().is_none());

    let web_services = coral.web_services().await.unwrap();
    let token = coral.web_service_token(web_services[0].id).await.unwrap();
    assert_eq!(token.access_token, "web-service-4834290508791808");
    // Login and the web service token each need an f
    assert_eq!(app.upstream.snapshot().await.f_requests, 2);
}

#[tokio::test]
async fn test_exchange_through_proxy() {
    let app = setup().await;
    let proxy_addr = fixtures::spawn(nxapi::routes::routes(app.state.clone()))
        .await
        .unwrap();

    let mut config = config_for(&app.upstream_url);
    config.znc_proxy_url = Some(format!("http://{}", proxy_addr));
    let client = app_state(config, app.clock.clone());
    let token = session_token();

    let credential = client
        .sessions
        .authenticator()
        .exchange(&token)
        .await
        .unwrap();

    assert_eq!(credential.user_id, NA_ID);
    assert_eq!(credential.expires_at, NOW_MS + 7200 * 1000);
    assert_eq!(
        credential.proxy_url.as_deref(),
        Some(format!("http://{}", proxy_addr).as_str())
    );

    let coral = client.sessions.coral(&token).await.unwrap();
    let friends = coral.friends().await.unwrap();
    assert_eq!(friends.len(), 2);

    // The proxy did the Coral login, the client never talked to Coral itself
    assert_eq!(app.upstream.snapshot().await.login_requests, 1);
}

#[tokio::test]
async fn test_exchange_code_from_browser_login() {
    let app = setup().await;
    let session = LoginSession::new(NOW_MS / 1000);
    let redirect = format!(
        "npf71b963c1b7b6d119://auth#session_token_code=abc&state={}&session_state=x",
        session.state
    );

    let session_token = app
        .state
        .sessions
        .authenticator()
        .exchange_code(&session, &redirect)
        .await
        .unwrap();

    assert_eq!(session_token, "session-token-for-abc");
}
