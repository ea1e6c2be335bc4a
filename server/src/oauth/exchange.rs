use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    coral::{CoralClient, ZncProxyClient},
    errors::NxapiResult,
    oauth::{
        attestation::Attestation,
        cache::{CachedCredential, TokenCache},
        nintendo_account::NintendoAccount,
        session::LoginSession,
        token::{validate_session_token, SessionTokenClaims},
    },
    state::NxapiConfig,
    traits::Clock,
};

/// Runs the session token to Coral credential handshake
#[derive(Clone)]
pub struct Authenticator {
    http: reqwest::Client,
    config: Arc<NxapiConfig>,
    nintendo_account: NintendoAccount,
    attestation: Arc<dyn Attestation>,
    cache: TokenCache,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(
        http: reqwest::Client,
        config: Arc<NxapiConfig>,
        attestation: Arc<dyn Attestation>,
        cache: TokenCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let nintendo_account = NintendoAccount::new(http.clone(), &config);

        Self {
            http,
            config,
            nintendo_account,
            attestation,
            cache,
            clock,
        }
    }

    pub fn validate(&self, session_token: &str) -> NxapiResult<SessionTokenClaims> {
        validate_session_token(session_token, &self.config.client_id, self.clock.now_secs())
    }

    /// Exchange a session token for a new Coral credential and cache it.
    ///
    /// Nothing is sent upstream if the session token fails validation.
    #[tracing::instrument(skip_all)]
    pub async fn exchange(&self, session_token: &str) -> NxapiResult<CachedCredential> {
        let claims = self.validate(session_token)?;

        let credential = match &self.config.znc_proxy_url {
            Some(proxy_url) => self.exchange_with_proxy(proxy_url, session_token).await?,
            None => self.exchange_direct(session_token).await?,
        };

        if claims.sub.as_deref().is_some_and(|sub| sub != credential.user_id) {
            warn!(
                sub = ?claims.sub,
                user_id = %credential.user_id,
                "Session token subject does not match the Nintendo Account"
            );
        }

        self.cache.put(session_token, &credential).await?;
        info!(
            user_id = %credential.user_id,
            nsa_id = %credential.nso_account.nsa_id,
            "Authenticated to Coral"
        );

        Ok(credential)
    }

    async fn exchange_direct(&self, session_token: &str) -> NxapiResult<CachedCredential> {
        let token = self.nintendo_account.token(session_token).await?;
        let user = self.nintendo_account.user(&token.access_token).await?;

        let login = CoralClient::login(
            &self.http,
            &self.config,
            self.attestation.as_ref(),
            &token,
            &user,
        )
        .await?;

        let now = self.clock.now_ms();
        let expires_in = login.login.web_api_server_credential.expires_in as i64;

        Ok(CachedCredential {
            user_id: user.id.clone(),
            access_token: login.login.web_api_server_credential.access_token.clone(),
            expires_at: now + expires_in * 1000,
            user,
            nso_account: login.login.user,
            raw: login.raw,
            proxy_url: None,
            created_at: now,
        })
    }

    async fn exchange_with_proxy(
        &self,
        proxy_url: &str,
        session_token: &str,
    ) -> NxapiResult<CachedCredential> {
        let data = ZncProxyClient::new(self.http.clone(), proxy_url, session_token)
            .auth()
            .await?;

        let now = self.clock.now_ms();
        let raw = serde_json::to_value(&data)?;

        Ok(CachedCredential {
            user_id: data.user.id.clone(),
            access_token: data.credential.access_token,
            expires_at: now + data.credential.expires_in as i64 * 1000,
            user: data.user,
            nso_account: data.nso_account,
            raw,
            proxy_url: Some(proxy_url.to_string()),
            created_at: now,
        })
    }

    /// Finish a browser login, returning the new session token
    #[tracing::instrument(skip_all)]
    pub async fn exchange_code(
        &self,
        session: &LoginSession,
        redirect_url: &str,
    ) -> NxapiResult<String> {
        let code = session.session_token_code(redirect_url)?;
        let token = self
            .nintendo_account
            .session_token(&code, &session.code_verifier)
            .await?;

        Ok(token.session_token)
    }
}
