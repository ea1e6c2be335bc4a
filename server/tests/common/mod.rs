#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fixtures::{upstream::CORAL_CLIENT_ID, Upstream, UpstreamState};
use nxapi::{
    oauth::attestation::ZncaApi,
    state::{build_http_client, AppState, NxapiConfig},
    store::MemoryStore,
    traits::ManualClock,
};

pub const NOW_MS: i64 = 1_700_000_000_000;

pub struct TestApp {
    pub upstream: UpstreamState,
    pub upstream_url: String,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
}

pub fn config_for(upstream_url: &str) -> NxapiConfig {
    NxapiConfig {
        nintendo_account_url: upstream_url.to_string(),
        nintendo_account_api_url: upstream_url.to_string(),
        coral_url: upstream_url.to_string(),
        znca_api_url: format!("{}/f", upstream_url),
        ..Default::default()
    }
}

pub fn app_state(config: NxapiConfig, clock: Arc<ManualClock>) -> AppState {
    let http = build_http_client(&config).unwrap();
    let attestation = Arc::new(ZncaApi::new(
        http.clone(),
        &config.znca_api_url,
        &config.coral_version,
    ));

    AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        http,
        attestation,
        clock,
    )
}

pub async fn setup() -> TestApp {
    setup_with(|_| {}).await
}

pub async fn setup_with(configure: impl FnOnce(&mut NxapiConfig)) -> TestApp {
    let (upstream, upstream_url) = fixtures::spawn_upstream().await.unwrap();
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let mut config = config_for(&upstream_url);
    configure(&mut config);
    let state = app_state(config, clock.clone());

    TestApp {
        upstream,
        upstream_url,
        state,
        clock,
    }
}

/// Poll the fixture until `done` holds
pub async fn wait_for(upstream: &UpstreamState, done: impl Fn(&Upstream) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&upstream.snapshot().await) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("fixture never reached the expected state");
}

/// A session token for the fixture's Nintendo Account, valid for years
pub fn session_token() -> String {
    fixtures::session_token(CORAL_CLIENT_ID, fixtures::upstream::NA_ID, 2_000_000_000).unwrap()
}
