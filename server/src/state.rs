use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{eyre, WrapErr};

use crate::{
    oauth::{
        attestation::{Attestation, ZncaApi},
        cache::TokenCache,
        manager::Sessions,
    },
    store::{FileStore, Storage},
    traits::{Clock, SystemClock},
};

/// Client id of the Nintendo Switch Online app
pub const CORAL_CLIENT_ID: &str = "71b963c1b7b6d119";

pub const DEFAULT_NINTENDO_ACCOUNT_URL: &str = "https://accounts.nintendo.com";
pub const DEFAULT_NINTENDO_ACCOUNT_API_URL: &str = "https://api.accounts.nintendo.com";
pub const DEFAULT_CORAL_URL: &str = "https://api-lp1.znc.srv.nintendo.net";
pub const DEFAULT_ZNCA_API_URL: &str = "https://api.imink.app/f";
pub const DEFAULT_CORAL_VERSION: &str = "2.10.1";

/// Update interval floor, the Coral API starts throttling below this
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Runtime configuration, read once from the environment
#[derive(Debug, Clone)]
pub struct NxapiConfig {
    /// Directory holding the key-value store
    pub data_path: PathBuf,
    pub client_id: String,
    pub nintendo_account_url: String,
    pub nintendo_account_api_url: String,
    pub coral_url: String,
    pub coral_version: String,
    pub znca_api_url: String,
    /// When set, the handshake and all Coral calls go through this nxapi proxy
    pub znc_proxy_url: Option<String>,
    pub update_interval: Duration,
    pub min_update_interval: Duration,
    pub proxy_listen: String,
    /// Nintendo Account id to use instead of the selected user
    pub user: Option<String>,
    pub request_timeout: Duration,
}

impl Default for NxapiConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data"),
            client_id: CORAL_CLIENT_ID.to_string(),
            nintendo_account_url: DEFAULT_NINTENDO_ACCOUNT_URL.to_string(),
            nintendo_account_api_url: DEFAULT_NINTENDO_ACCOUNT_API_URL.to_string(),
            coral_url: DEFAULT_CORAL_URL.to_string(),
            coral_version: DEFAULT_CORAL_VERSION.to_string(),
            znca_api_url: DEFAULT_ZNCA_API_URL.to_string(),
            znc_proxy_url: None,
            update_interval: Duration::from_secs(30),
            min_update_interval: MIN_UPDATE_INTERVAL,
            proxy_listen: "127.0.0.1:12345".to_string(),
            user: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl NxapiConfig {
    pub fn from_env() -> color_eyre::Result<Self> {
        let defaults = Self::default();

        let update_interval = match env::var("NXAPI_UPDATE_INTERVAL") {
            Ok(secs) => Duration::from_secs(
                secs.parse()
                    .wrap_err("NXAPI_UPDATE_INTERVAL must be a number of seconds")?,
            ),
            Err(_) => defaults.update_interval,
        };

        let config = Self {
            data_path: env::var("NXAPI_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            client_id: defaults.client_id,
            nintendo_account_url: env_or("NXAPI_NINTENDO_ACCOUNT_URL", DEFAULT_NINTENDO_ACCOUNT_URL),
            nintendo_account_api_url: env_or(
                "NXAPI_NINTENDO_ACCOUNT_API_URL",
                DEFAULT_NINTENDO_ACCOUNT_API_URL,
            ),
            coral_url: env_or("NXAPI_CORAL_URL", DEFAULT_CORAL_URL),
            coral_version: env_or("NXAPI_CORAL_VERSION", DEFAULT_CORAL_VERSION),
            znca_api_url: env_or("NXAPI_ZNCA_API_URL", DEFAULT_ZNCA_API_URL),
            znc_proxy_url: env::var("ZNC_PROXY_URL").ok().filter(|url| !url.is_empty()),
            update_interval,
            min_update_interval: defaults.min_update_interval,
            proxy_listen: env_or("NXAPI_PROXY_LISTEN", &defaults.proxy_listen),
            user: env::var("NXAPI_USER").ok(),
            request_timeout: defaults.request_timeout,
        };

        if config.update_interval < config.min_update_interval {
            tracing::warn!(
                "Update interval {:?} is below the minimum, using {:?}",
                config.update_interval,
                config.min_update_interval
            );
        }

        Ok(config)
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Check if a feature is enabled based on environment variables
pub fn is_feature_enabled(feature: &str) -> bool {
    env::var(format!("{}_DISABLED", feature)).unwrap_or_else(|_| "false".to_string()) != "true"
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NxapiConfig>,
    pub store: Arc<dyn Storage>,
    pub cache: TokenCache,
    pub sessions: Arc<Sessions>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn from_env() -> color_eyre::Result<Self> {
        let config = NxapiConfig::from_env()?;

        let store = FileStore::open(&config.data_path)
            .await
            .wrap_err_with(|| format!("Failed to open data path {}", config.data_path.display()))?;

        let http = build_http_client(&config)?;
        let attestation = Arc::new(ZncaApi::new(
            http.clone(),
            &config.znca_api_url,
            &config.coral_version,
        ));

        Ok(Self::new(
            config,
            Arc::new(store),
            http,
            attestation,
            Arc::new(SystemClock),
        ))
    }

    pub fn new(
        config: NxapiConfig,
        store: Arc<dyn Storage>,
        http: reqwest::Client,
        attestation: Arc<dyn Attestation>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let cache = TokenCache::new(store.clone());
        let sessions = Arc::new(Sessions::new(
            config.clone(),
            http,
            attestation,
            cache.clone(),
            clock.clone(),
        ));

        Self {
            config,
            store,
            cache,
            sessions,
            clock,
        }
    }

    /// Session token of the configured or selected user
    pub async fn session_token(&self, user: Option<&str>) -> color_eyre::Result<String> {
        let user = match user.or(self.config.user.as_deref()) {
            Some(user) => user.to_string(),
            None => self
                .cache
                .selected_user()
                .await?
                .ok_or_else(|| eyre!("No user selected. Run `nxapi auth login` first."))?,
        };

        self.cache
            .session_token_for_user(&user)
            .await?
            .ok_or_else(|| eyre!("No session token stored for user {}", user))
    }
}

pub fn build_http_client(config: &NxapiConfig) -> color_eyre::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .timeout(config.request_timeout)
        .use_rustls_tls()
        .build()
        .wrap_err("Failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_feature_enabled_when_env_var_not_set() {
        env::remove_var("TEST_FEATURE_DISABLED");

        assert!(is_feature_enabled("TEST_FEATURE"));
    }

    #[test]
    fn test_is_feature_disabled_when_env_var_is_true() {
        env::set_var("OTHER_FEATURE_DISABLED", "true");

        assert!(!is_feature_enabled("OTHER_FEATURE"));

        env::remove_var("OTHER_FEATURE_DISABLED");
    }

    #[test]
    fn test_default_config_points_at_nintendo() {
        let config = NxapiConfig::default();

        assert_eq!(config.client_id, CORAL_CLIENT_ID);
        assert_eq!(config.coral_url, DEFAULT_CORAL_URL);
        assert!(config.znc_proxy_url.is_none());
        assert!(config.update_interval >= config.min_update_interval);
    }
}
