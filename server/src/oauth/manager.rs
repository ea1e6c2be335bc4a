use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    coral::{
        types::{ActiveEvent, Announcement, CurrentUser, Friend, WebService, WebServiceToken},
        CoralApi, CoralClient, ZncProxyClient,
    },
    errors::{NxapiError, NxapiResult},
    oauth::{
        attestation::Attestation,
        cache::{CachedCredential, TokenCache},
        exchange::Authenticator,
    },
    state::NxapiConfig,
    traits::{Clock, IsExpired},
};

/// Hands out Coral credentials, exchanging session tokens when the cache misses.
///
/// Exchanges are serialized per session token: callers that miss at the same
/// time wait for the first exchange and then read its result from the cache.
pub struct Sessions {
    config: Arc<NxapiConfig>,
    http: reqwest::Client,
    attestation: Arc<dyn Attestation>,
    authenticator: Authenticator,
    cache: TokenCache,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Sessions {
    pub fn new(
        config: Arc<NxapiConfig>,
        http: reqwest::Client,
        attestation: Arc<dyn Attestation>,
        cache: TokenCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let authenticator = Authenticator::new(
            http.clone(),
            config.clone(),
            attestation.clone(),
            cache.clone(),
            clock.clone(),
        );

        Self {
            config,
            http,
            attestation,
            authenticator,
            cache,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    async fn lock_for(&self, session_token: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(session_token.to_string())
            .or_default()
            .clone()
    }

    /// A usable credential for the session token, from the cache if possible
    pub async fn credential(&self, session_token: &str) -> NxapiResult<CachedCredential> {
        if let Some(credential) = self
            .cache
            .get_fresh(session_token, self.clock.now_ms())
            .await?
        {
            return Ok(credential);
        }

        let lock = self.lock_for(session_token).await;
        let _guard = lock.lock().await;

        if let Some(credential) = self
            .cache
            .get_fresh(session_token, self.clock.now_ms())
            .await?
        {
            debug!("Credential was refreshed while waiting");
            return Ok(credential);
        }

        self.authenticator.exchange(session_token).await
    }

    /// Replace a credential Coral has rejected as expired.
    ///
    /// If another task already replaced `stale`, its credential is used.
    pub async fn renew(
        &self,
        session_token: &str,
        stale: &CachedCredential,
    ) -> NxapiResult<CachedCredential> {
        let lock = self.lock_for(session_token).await;
        let _guard = lock.lock().await;

        if let Some(credential) = self
            .cache
            .get_fresh(session_token, self.clock.now_ms())
            .await?
        {
            if credential.access_token != stale.access_token {
                return Ok(credential);
            }
        }

        self.authenticator.exchange(session_token).await
    }

    /// Client for the credential's Coral access path
    pub fn client_for(&self, session_token: &str, credential: &CachedCredential) -> Arc<dyn CoralApi> {
        match &credential.proxy_url {
            Some(proxy_url) => Arc::new(ZncProxyClient::new(
                self.http.clone(),
                proxy_url,
                session_token,
            )),
            None => Arc::new(CoralClient::new(
                self.http.clone(),
                &self.config,
                self.attestation.clone(),
                credential,
            )),
        }
    }

    pub async fn coral(self: &Arc<Self>, session_token: &str) -> NxapiResult<CoralSession> {
        let credential = self.credential(session_token).await?;
        let api = self.client_for(session_token, &credential);

        Ok(CoralSession {
            sessions: self.clone(),
            session_token: session_token.to_string(),
            state: RwLock::new((credential, api)),
        })
    }
}

/// Coral API for one session token that renews its credential once when
/// Coral reports it expired
pub struct CoralSession {
    sessions: Arc<Sessions>,
    session_token: String,
    state: RwLock<(CachedCredential, Arc<dyn CoralApi>)>,
}

impl CoralSession {
    pub async fn credential(&self) -> CachedCredential {
        self.state.read().await.0.clone()
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    async fn api(&self) -> NxapiResult<Arc<dyn CoralApi>> {
        let expired = self.state.read().await.0.is_expired(self.sessions.clock());
        if expired {
            let credential = self.sessions.credential(&self.session_token).await?;
            return Ok(self.replace(credential).await);
        }

        Ok(self.state.read().await.1.clone())
    }

    async fn replace(&self, credential: CachedCredential) -> Arc<dyn CoralApi> {
        let api = self.sessions.client_for(&self.session_token, &credential);
        *self.state.write().await = (credential, api.clone());
        api
    }

    async fn with_retry<T, F>(&self, call: F) -> NxapiResult<T>
    where
        T: Send,
        F: Fn(Arc<dyn CoralApi>) -> BoxFuture<'static, NxapiResult<T>> + Send + Sync,
    {
        let api = self.api().await?;

        match call(api).await {
            Err(NxapiError::TokenExpired) => {
                warn!("Coral credential expired, renewing");
                let stale = self.credential().await;
                let credential = self.sessions.renew(&self.session_token, &stale).await?;
                let api = self.replace(credential).await;
                call(api).await
            }
            result => result,
        }
    }
}

#[async_trait]
impl CoralApi for CoralSession {
    async fn friends(&self) -> NxapiResult<Vec<Friend>> {
        self.with_retry(|api| async move { api.friends().await }.boxed())
            .await
    }

    async fn current_user(&self) -> NxapiResult<CurrentUser> {
        self.with_retry(|api| async move { api.current_user().await }.boxed())
            .await
    }

    async fn web_services(&self) -> NxapiResult<Vec<WebService>> {
        self.with_retry(|api| async move { api.web_services().await }.boxed())
            .await
    }

    async fn active_event(&self) -> NxapiResult<Option<ActiveEvent>> {
        self.with_retry(|api| async move { api.active_event().await }.boxed())
            .await
    }

    async fn announcements(&self) -> NxapiResult<Vec<Announcement>> {
        self.with_retry(|api| async move { api.announcements().await }.boxed())
            .await
    }

    async fn web_service_token(&self, id: u64) -> NxapiResult<WebServiceToken> {
        self.with_retry(move |api| async move { api.web_service_token(id).await }.boxed())
            .await
    }
}
