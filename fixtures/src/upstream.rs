//! Nintendo Account, attestation and Coral endpoints backed by editable state

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

pub const CORAL_CLIENT_ID: &str = "71b963c1b7b6d119";
pub const NA_ID: &str = "a1b2c3d4e5f6a7b8";
pub const NSA_ID: &str = "0123456789abcdef";

/// Everything the fixture answers with. Tests change it between requests.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub na_user: Value,
    pub coral_user: Value,
    pub friends: Vec<Value>,
    pub web_services: Vec<Value>,
    pub announcements: Vec<Value>,
    pub active_event: Value,
    /// `expiresIn` of new Coral credentials
    pub expires_in: u64,
    /// Coral login status, 9450 for an account without a membership
    pub login_status: i64,
    pub attestation_fails: bool,
    /// Session tokens Nintendo Account answers `invalid_grant` for
    pub revoked_session_tokens: HashSet<String>,
    /// Coral access tokens answered with status 9404
    pub expired_access_tokens: HashSet<String>,
    pub issued_access_tokens: Vec<String>,
    /// Time Coral login takes to answer
    pub login_delay_ms: u64,
    pub token_requests: usize,
    pub f_requests: usize,
    pub login_requests: usize,
    pub friend_list_requests: usize,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            na_user: json!({
                "id": NA_ID,
                "nickname": "Fixture",
                "screenName": "fixture@example.com",
                "country": "GB",
                "birthday": "1990-01-01",
                "language": "en-GB"
            }),
            coral_user: json!({
                "id": 1234,
                "nsaId": NSA_ID,
                "imageUri": "https://cdn.example.com/mii.png",
                "name": "Fixture",
                "supportId": "0000-0000-0000",
                "isChildRestricted": false,
                "presence": presence("OFFLINE", None),
                "links": {},
                "permissions": {}
            }),
            friends: vec![
                friend(1, "1111111111111111", "Alice", presence("OFFLINE", None)),
                friend(2, "2222222222222222", "Bob", presence("ONLINE", None)),
            ],
            web_services: vec![json!({
                "id": 4834290508791808u64,
                "name": "Nintendo Switch Online",
                "uri": "https://web.example.com",
                "imageUri": "https://cdn.example.com/ws.png",
                "whiteList": ["web.example.com"],
                "customAttributes": []
            })],
            announcements: vec![json!({
                "announcementId": 1,
                "title": "Welcome",
                "description": "Fixture announcement",
                "priority": 1,
                "distributionDate": 1700000000
            })],
            active_event: json!({}),
            expires_in: 7200,
            login_status: 0,
            attestation_fails: false,
            revoked_session_tokens: HashSet::new(),
            expired_access_tokens: HashSet::new(),
            issued_access_tokens: Vec::new(),
            login_delay_ms: 0,
            token_requests: 0,
            f_requests: 0,
            login_requests: 0,
            friend_list_requests: 0,
        }
    }
}

pub fn presence(state: &str, game: Option<Value>) -> Value {
    json!({
        "state": state,
        "updatedAt": 1700000000,
        "logoutAt": 1700000000,
        "game": game.unwrap_or_else(|| json!({}))
    })
}

pub fn game(title_id: &str, name: &str, status: &str) -> Value {
    json!({
        "name": name,
        "imageUri": "https://cdn.example.com/title.png",
        "shopUri": format!("https://ec.nintendo.com/apps/titles/{}/GB", title_id),
        "totalPlayTime": 600,
        "firstPlayedAt": 1600000000,
        "sysDescription": status
    })
}

pub fn friend(id: i64, nsa_id: &str, name: &str, presence: Value) -> Value {
    json!({
        "id": id,
        "nsaId": nsa_id,
        "imageUri": "https://cdn.example.com/friend.png",
        "name": name,
        "isFavoriteFriend": false,
        "isServerFriend": false,
        "friendCreatedAt": 1600000000,
        "presence": presence
    })
}

#[derive(Clone, Default)]
pub struct UpstreamState {
    inner: Arc<Mutex<Upstream>>,
}

impl UpstreamState {
    pub async fn update(&self, f: impl FnOnce(&mut Upstream)) {
        f(&mut *self.inner.lock().await)
    }

    pub async fn snapshot(&self) -> Upstream {
        self.inner.lock().await.clone()
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    client_id: String,
    session_token: String,
    #[allow(dead_code)]
    grant_type: String,
}

#[derive(Debug, Deserialize)]
struct SessionTokenRequest {
    #[allow(dead_code)]
    client_id: String,
    session_token_code: String,
    #[allow(dead_code)]
    session_token_code_verifier: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FRequest {
    token: String,
    hash_method: u8,
    na_id: String,
    #[serde(default)]
    coral_user_id: Option<String>,
}

fn coral_ok(result: Value) -> Json<Value> {
    Json(json!({ "status": 0, "result": result, "correlationId": uuid::Uuid::new_v4().to_string() }))
}

fn coral_error(status: i64, message: &str) -> Json<Value> {
    Json(json!({ "status": status, "errorMessage": message, "correlationId": uuid::Uuid::new_v4().to_string() }))
}

pub fn router(state: UpstreamState) -> Router {
    Router::new()
        // Nintendo Account
        .route("/connect/1.0.0/api/token", post(na_token))
        .route("/connect/1.0.0/api/session_token", post(na_session_token))
        .route("/2.0.0/users/me", get(na_user))
        // Attestation
        .route("/f", post(generate_f))
        // Coral
        .route("/v3/Account/Login", post(coral_login))
        .route("/v3/Friend/List", post(coral_friends))
        .route("/v3/User/ShowSelf", post(coral_show_self))
        .route("/v1/Game/ListWebServices", post(coral_web_services))
        .route("/v1/Event/GetActiveEvent", post(coral_active_event))
        .route("/v1/Announcement/List", post(coral_announcements))
        .route("/v2/Game/GetWebServiceToken", post(coral_web_service_token))
        .with_state(state)
}

async fn na_token(State(state): State<UpstreamState>, Json(body): Json<TokenRequest>) -> Response {
    let mut upstream = state.inner.lock().await;
    upstream.token_requests += 1;

    if body.client_id != CORAL_CLIENT_ID || upstream.revoked_session_tokens.contains(&body.session_token) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "The provided grant is invalid"
            })),
        )
            .into_response();
    }

    Json(json!({
        "access_token": format!("na-access-{}", upstream.token_requests),
        "id_token": format!("na-id-{}", upstream.token_requests),
        "expires_in": 900,
        "scope": ["openid", "user", "user.birthday", "user.mii", "user.screenName"],
        "token_type": "Bearer"
    }))
    .into_response()
}

async fn na_session_token(Form(body): Form<SessionTokenRequest>) -> Json<Value> {
    Json(json!({
        "code": body.session_token_code,
        "session_token": format!("session-token-for-{}", body.session_token_code)
    }))
}

async fn na_user(State(state): State<UpstreamState>, headers: HeaderMap) -> Response {
    if headers.get(AUTHORIZATION).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    Json(state.inner.lock().await.na_user.clone()).into_response()
}

async fn generate_f(State(state): State<UpstreamState>, Json(body): Json<FRequest>) -> Response {
    let mut upstream = state.inner.lock().await;
    upstream.f_requests += 1;

    if upstream.attestation_fails {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal_server_error", "error_message": "fixture failure" })),
        )
            .into_response();
    }

    info!(hash_method = body.hash_method, na_id = %body.na_id, "Generating f");
    Json(json!({
        "f": format!("f-{}-{}", body.hash_method, body.token),
        "request_id": uuid::Uuid::new_v4().to_string(),
        "timestamp": 1700000000000i64
    }))
    .into_response()
}

async fn coral_login(State(state): State<UpstreamState>, Json(body): Json<Value>) -> Json<Value> {
    let delay = state.inner.lock().await.login_delay_ms;
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }

    let mut upstream = state.inner.lock().await;
    upstream.login_requests += 1;

    if body["parameter"]["f"].as_str().is_none() {
        return coral_error(9400, "Missing f");
    }
    if upstream.login_status != 0 {
        let status = upstream.login_status;
        return coral_error(status, "Membership required");
    }

    let access_token = format!("coral-access-{}", upstream.login_requests);
    upstream.issued_access_tokens.push(access_token.clone());

    let mut user = upstream.coral_user.clone();
    if let Value::Object(map) = &mut user {
        map.remove("presence");
        map.remove("links");
        map.remove("permissions");
    }

    coral_ok(json!({
        "user": user,
        "webApiServerCredential": {
            "accessToken": access_token,
            "expiresIn": upstream.expires_in
        },
        "firebaseCredential": { "accessToken": "", "expiresIn": 3600 }
    }))
}

/// Checks the bearer token, returning the Coral error to answer with
fn check_access_token(upstream: &Upstream, headers: &HeaderMap) -> Option<Json<Value>> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        None => Some(coral_error(9403, "Invalid token")),
        Some(token) if upstream.expired_access_tokens.contains(token) => {
            Some(coral_error(9404, "Token expired"))
        }
        Some(token) if !upstream.issued_access_tokens.iter().any(|t| t == token) => {
            Some(coral_error(9403, "Invalid token"))
        }
        Some(_) => None,
    }
}

async fn coral_friends(State(state): State<UpstreamState>, headers: HeaderMap) -> Json<Value> {
    let mut upstream = state.inner.lock().await;
    upstream.friend_list_requests += 1;

    if let Some(error) = check_access_token(&upstream, &headers) {
        return error;
    }

    coral_ok(json!({ "friends": upstream.friends }))
}

async fn coral_show_self(State(state): State<UpstreamState>, headers: HeaderMap) -> Json<Value> {
    let upstream = state.inner.lock().await;
    if let Some(error) = check_access_token(&upstream, &headers) {
        return error;
    }

    coral_ok(upstream.coral_user.clone())
}

async fn coral_web_services(State(state): State<UpstreamState>, headers: HeaderMap) -> Json<Value> {
    let upstream = state.inner.lock().await;
    if let Some(error) = check_access_token(&upstream, &headers) {
        return error;
    }

    coral_ok(json!(upstream.web_services))
}

async fn coral_active_event(State(state): State<UpstreamState>, headers: HeaderMap) -> Json<Value> {
    let upstream = state.inner.lock().await;
    if let Some(error) = check_access_token(&upstream, &headers) {
        return error;
    }

    coral_ok(upstream.active_event.clone())
}

async fn coral_announcements(State(state): State<UpstreamState>, headers: HeaderMap) -> Json<Value> {
    let upstream = state.inner.lock().await;
    if let Some(error) = check_access_token(&upstream, &headers) {
        return error;
    }

    coral_ok(json!(upstream.announcements))
}

async fn coral_web_service_token(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let upstream = state.inner.lock().await;
    if let Some(error) = check_access_token(&upstream, &headers) {
        return error;
    }
    if body["parameter"]["f"].as_str().is_none() {
        return coral_error(9400, "Missing f");
    }

    coral_ok(json!({
        "accessToken": format!("web-service-{}", body["parameter"]["id"]),
        "expiresIn": 7200
    }))
}
