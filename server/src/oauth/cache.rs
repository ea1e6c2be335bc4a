use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    coral::types::CoralUser,
    errors::NxapiResult,
    oauth::token::NintendoAccountUser,
    store::{keys, Storage, StorageExt},
    traits::IsExpired,
};

/// Coral credential obtained from one session token exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCredential {
    /// Nintendo Account id
    pub user_id: String,
    /// Coral web API access token
    pub access_token: String,
    /// Milliseconds since the epoch
    pub expires_at: i64,
    pub user: NintendoAccountUser,
    pub nso_account: CoralUser,
    /// Login response as returned upstream
    #[serde(default)]
    pub raw: serde_json::Value,
    /// Set when the credential was obtained through a znc proxy
    #[serde(default)]
    pub proxy_url: Option<String>,
    pub created_at: i64,
}

impl IsExpired for CachedCredential {
    fn expires_at_ms(&self) -> i64 {
        self.expires_at
    }
}

/// Credentials keyed by session token, kept in the store
#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn Storage>,
}

impl TokenCache {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// The stored credential, even if it has expired
    pub async fn get(&self, session_token: &str) -> NxapiResult<Option<CachedCredential>> {
        self.store.get(&keys::nso_token(session_token)).await
    }

    /// The stored credential if it is still usable at `now_ms`
    pub async fn get_fresh(
        &self,
        session_token: &str,
        now_ms: i64,
    ) -> NxapiResult<Option<CachedCredential>> {
        Ok(self
            .get(session_token)
            .await?
            .filter(|credential| !credential.is_expired_at(now_ms)))
    }

    pub async fn put(&self, session_token: &str, credential: &CachedCredential) -> NxapiResult<()> {
        self.store
            .set(&keys::nso_token(session_token), credential)
            .await?;
        self.store
            .set(
                &keys::nintendo_account_token(&credential.user_id),
                &session_token,
            )
            .await?;

        debug!(user_id = %credential.user_id, expires_at = credential.expires_at, "Cached credential");
        Ok(())
    }

    pub async fn invalidate(&self, session_token: &str) -> NxapiResult<()> {
        self.store.remove_item(&keys::nso_token(session_token)).await
    }

    /// Forget everything stored for a user
    pub async fn logout(&self, user_id: &str) -> NxapiResult<()> {
        if let Some(session_token) = self.session_token_for_user(user_id).await? {
            self.invalidate(&session_token).await?;
        }
        self.store
            .remove_item(&keys::nintendo_account_token(user_id))
            .await?;

        if self.selected_user().await?.as_deref() == Some(user_id) {
            self.store.remove_item(keys::SELECTED_USER).await?;
        }

        Ok(())
    }

    pub async fn session_token_for_user(&self, user_id: &str) -> NxapiResult<Option<String>> {
        self.store.get(&keys::nintendo_account_token(user_id)).await
    }

    pub async fn selected_user(&self) -> NxapiResult<Option<String>> {
        self.store.get(keys::SELECTED_USER).await
    }

    pub async fn set_selected_user(&self, user_id: &str) -> NxapiResult<()> {
        self.store.set(keys::SELECTED_USER, &user_id).await
    }
}
