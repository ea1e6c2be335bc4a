//! `/api/znc` proxy endpoints

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::{
    coral::{
        proxy::{FriendsResponse, ProxyAuthData},
        types::{Friend, WebApiServerCredential},
        CoralApi,
    },
    errors::{NxapiError, NxapiResult, ServerResult},
    oauth::CoralSession,
    policy::{AuthPolicy, PolicyFlags, PolicyStore, ProxyToken},
    state::{is_feature_enabled, AppState},
};

pub mod auth;
mod data;
mod events;

pub use auth::ZncAuth;
use events::PresenceHubs;

/// Friend lists kept for `update_interval`, keyed by session token
#[derive(Default)]
struct FriendsCache {
    entries: Mutex<HashMap<String, (Instant, i64, Vec<Friend>)>>,
}

#[derive(Clone)]
pub struct ProxyState {
    pub app: AppState,
    pub policies: PolicyStore,
    friends: Arc<FriendsCache>,
    hubs: Arc<PresenceHubs>,
}

impl ProxyState {
    pub fn new(app: AppState) -> Self {
        let policies = PolicyStore::new(app.store.clone());

        Self {
            app,
            policies,
            friends: Arc::default(),
            hubs: Arc::default(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.app.clock.now_ms()
    }

    async fn coral(&self, auth: &ZncAuth) -> NxapiResult<CoralSession> {
        self.app.sessions.coral(auth.session_token()).await
    }

    fn cache_ttl(&self) -> Duration {
        self.app.config.update_interval
    }

    /// Friends and when they were fetched, from the cache when recent enough
    async fn friends(&self, auth: &ZncAuth) -> NxapiResult<(Vec<Friend>, i64)> {
        let key = auth.session_token();

        if let Some((fetched, updated, friends)) = self.friends.entries.lock().await.get(key) {
            if fetched.elapsed() < self.cache_ttl() {
                return Ok((friends.clone(), *updated));
            }
        }

        let friends = self.coral(auth).await?.friends().await?;
        let updated = self.now_ms();
        self.friends
            .entries
            .lock()
            .await
            .insert(key.to_string(), (Instant::now(), updated, friends.clone()));

        Ok((friends, updated))
    }
}

pub fn routes() -> Router<ProxyState> {
    let router = Router::new()
        .route("/auth", post(auth_data))
        .route("/token", get(token_policy).delete(revoke_token))
        .route("/tokens", get(list_tokens).post(create_token))
        .route("/announcements", get(data::announcements))
        .route("/friends", get(data::friends))
        .route("/friend/:nsaid", get(data::friend))
        .route("/friend/:nsaid/presence", get(data::friend_presence))
        .route("/webservices", get(data::web_services))
        .route("/webservice/:id/token", post(data::web_service_token))
        .route("/event/active", get(data::active_event))
        .route("/user", get(data::user))
        .route("/user/presence", get(data::user_presence));

    if is_feature_enabled("PRESENCE_EVENTS") {
        router.route("/presence/events", get(events::presence_events))
    } else {
        info!("Presence event stream disabled");
        router
    }
}

/// Run the handshake for another nxapi instance
async fn auth_data(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Json<ProxyAuthData>> {
    let session_token = auth.require_session_token()?;
    let credential = state.app.sessions.credential(session_token).await?;

    let expires_in = ((credential.expires_at - state.now_ms()) / 1000).max(0) as u64;

    Ok(Json(ProxyAuthData {
        user: credential.user,
        nso_account: credential.nso_account,
        credential: WebApiServerCredential {
            access_token: credential.access_token,
            expires_in,
        },
    }))
}

async fn token_policy(auth: ZncAuth) -> ServerResult<Json<AuthPolicy>> {
    match auth.policy() {
        Some(policy) => Ok(Json(policy.clone())),
        None => Err(NxapiError::NotFound("not authenticated with a proxy token".to_string()).into()),
    }
}

async fn revoke_token(State(state): State<ProxyState>, auth: ZncAuth) -> ServerResult<StatusCode> {
    let ZncAuth::ProxyToken { token, .. } = &auth else {
        return Err(NxapiError::NotFound("not authenticated with a proxy token".to_string()).into());
    };

    state.policies.revoke(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tokens(
    State(state): State<ProxyState>,
    auth: ZncAuth,
) -> ServerResult<Json<Vec<ProxyToken>>> {
    let session_token = auth.require_session_token()?;
    let credential = state.app.sessions.credential(session_token).await?;

    Ok(Json(state.policies.list(&credential.user_id).await?))
}

async fn create_token(
    State(state): State<ProxyState>,
    auth: ZncAuth,
    Json(flags): Json<PolicyFlags>,
) -> ServerResult<(StatusCode, Json<ProxyToken>)> {
    let session_token = auth.require_session_token()?;
    let credential = state.app.sessions.credential(session_token).await?;

    let token = state
        .policies
        .create(&credential.user_id, flags, state.now_ms())
        .await?;
    info!(user_id = %credential.user_id, "Issued proxy token");

    Ok((StatusCode::CREATED, Json(token)))
}

pub(crate) type FriendsBody = FriendsResponse<serde_json::Value>;
