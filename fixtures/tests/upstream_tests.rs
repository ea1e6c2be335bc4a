use fixtures::{spawn_upstream, upstream::CORAL_CLIENT_ID};
use serde_json::{json, Value};

#[tokio::test]
async fn test_token_endpoint_rejects_revoked_session_tokens() {
    let (state, url) = spawn_upstream().await.unwrap();
    state
        .update(|upstream| {
            upstream.revoked_session_tokens.insert("revoked".to_string());
        })
        .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{url}/connect/1.0.0/api/token"))
        .json(&json!({
            "client_id": CORAL_CLIENT_ID,
            "session_token": "revoked",
            "grant_type": "urn:ietf:params:oauth:grant-type:jwt-bearer-session-token"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["error"], "invalid_grant");
}

#[tokio::test]
async fn test_coral_login_issues_credentials_the_friend_list_accepts() {
    let (state, url) = spawn_upstream().await.unwrap();
    let client = reqwest::Client::new();

    let login: Value = client
        .post(format!("{url}/v3/Account/Login"))
        .json(&json!({ "parameter": { "f": "f", "naIdToken": "id" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(login["status"], 0);
    let access_token = login["result"]["webApiServerCredential"]["accessToken"]
        .as_str()
        .unwrap()
        .to_string();

    let friends: Value = client
        .post(format!("{url}/v3/Friend/List"))
        .bearer_auth(&access_token)
        .json(&json!({ "parameter": {} }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(friends["status"], 0);
    assert_eq!(friends["result"]["friends"].as_array().unwrap().len(), 2);

    state
        .update(|upstream| {
            upstream.expired_access_tokens.insert(access_token.clone());
        })
        .await;

    let expired: Value = client
        .post(format!("{url}/v3/Friend/List"))
        .bearer_auth(&access_token)
        .json(&json!({ "parameter": {} }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(expired["status"], 9404);
}

#[tokio::test]
async fn test_attestation_failure() {
    let (state, url) = spawn_upstream().await.unwrap();
    state.update(|upstream| upstream.attestation_fails = true).await;

    let response = reqwest::Client::new()
        .post(format!("{url}/f"))
        .json(&json!({ "token": "id", "hash_method": 1, "na_id": "na" }))
        .send()
        .await
        .unwrap();

    assert_eq!(
        response.status(),
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(state.snapshot().await.f_requests, 1);
}
