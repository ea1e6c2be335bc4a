use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    coral::{
        types::{
            AccountLogin, ActiveEvent, Announcement, CoralResponse, CurrentUser, Friend,
            FriendList, WebService, WebServiceToken,
        },
        CoralApi,
    },
    errors::NxapiResult,
    oauth::{
        attestation::{Attestation, AttestationRequest, HashMethod},
        cache::CachedCredential,
        token::{NintendoAccountToken, NintendoAccountUser},
    },
    state::NxapiConfig,
};

/// Direct client for the Coral API, authenticated with a cached credential
#[derive(Clone)]
pub struct CoralClient {
    http: reqwest::Client,
    base_url: String,
    version: String,
    access_token: String,
    na_id: String,
    coral_user_id: String,
    attestation: Arc<dyn Attestation>,
}

impl std::fmt::Debug for CoralClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoralClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .field("na_id", &self.na_id)
            .finish_non_exhaustive()
    }
}

/// Result of a Coral login, with the response as returned upstream
#[derive(Debug, Clone)]
pub struct CoralLogin {
    pub login: AccountLogin,
    pub raw: Value,
}

fn user_agent(version: &str) -> String {
    format!("com.nintendo.znca/{} (Android/8.0.0)", version)
}

async fn parse_envelope<T: DeserializeOwned>(response: reqwest::Response) -> NxapiResult<(T, Value)> {
    let raw: Value = response.error_for_status()?.json().await?;
    let envelope: CoralResponse<Value> = serde_json::from_value(raw.clone())?;
    let result = envelope.into_result()?;

    Ok((serde_json::from_value(result)?, raw))
}

impl CoralClient {
    pub fn new(
        http: reqwest::Client,
        config: &NxapiConfig,
        attestation: Arc<dyn Attestation>,
        credential: &CachedCredential,
    ) -> Self {
        Self {
            http,
            base_url: config.coral_url.clone(),
            version: config.coral_version.clone(),
            access_token: credential.access_token.clone(),
            na_id: credential.user_id.clone(),
            coral_user_id: credential.nso_account.id.to_string(),
            attestation,
        }
    }

    /// Log in to Coral with a Nintendo Account id token
    #[tracing::instrument(skip_all, fields(na_id = %user.id))]
    pub async fn login(
        http: &reqwest::Client,
        config: &NxapiConfig,
        attestation: &dyn Attestation,
        token: &NintendoAccountToken,
        user: &NintendoAccountUser,
    ) -> NxapiResult<CoralLogin> {
        let f = attestation
            .generate(AttestationRequest {
                token: token.id_token.clone(),
                hash_method: HashMethod::Coral,
                na_id: user.id.clone(),
                coral_user_id: None,
            })
            .await?;

        let body = json!({
            "parameter": {
                "naIdToken": token.id_token,
                "naBirthday": user.birthday,
                "naCountry": user.country,
                "language": user.language,
                "timestamp": f.timestamp,
                "requestId": f.request_id,
                "f": f.f,
            }
        });

        let response = http
            .post(format!("{}/v3/Account/Login", config.coral_url))
            .header("X-Platform", "Android")
            .header("X-ProductVersion", &config.coral_version)
            .header(reqwest::header::USER_AGENT, user_agent(&config.coral_version))
            .json(&body)
            .send()
            .await?;

        let (login, raw): (AccountLogin, Value) = parse_envelope(response).await?;
        debug!(
            coral_user_id = login.user.id,
            expires_in = login.web_api_server_credential.expires_in,
            "Logged in to Coral"
        );

        Ok(CoralLogin { login, raw })
    }

    async fn call<T: DeserializeOwned>(&self, path: &str, parameter: Value) -> NxapiResult<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("X-Platform", "Android")
            .header("X-ProductVersion", &self.version)
            .header(reqwest::header::USER_AGENT, user_agent(&self.version))
            .bearer_auth(&self.access_token)
            .json(&json!({ "parameter": parameter }))
            .send()
            .await?;

        let (result, _) = parse_envelope(response).await?;
        Ok(result)
    }
}

#[async_trait]
impl CoralApi for CoralClient {
    #[tracing::instrument(skip(self))]
    async fn friends(&self) -> NxapiResult<Vec<Friend>> {
        let list: FriendList = self.call("/v3/Friend/List", json!({})).await?;
        Ok(list.friends)
    }

    #[tracing::instrument(skip(self))]
    async fn current_user(&self) -> NxapiResult<CurrentUser> {
        self.call("/v3/User/ShowSelf", json!({})).await
    }

    #[tracing::instrument(skip(self))]
    async fn web_services(&self) -> NxapiResult<Vec<WebService>> {
        self.call("/v1/Game/ListWebServices", json!({})).await
    }

    #[tracing::instrument(skip(self))]
    async fn active_event(&self) -> NxapiResult<Option<ActiveEvent>> {
        let event: Value = self.call("/v1/Event/GetActiveEvent", json!({})).await?;
        match event {
            Value::Object(ref map) if map.is_empty() => Ok(None),
            Value::Null => Ok(None),
            event => Ok(Some(serde_json::from_value(event)?)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn announcements(&self) -> NxapiResult<Vec<Announcement>> {
        self.call("/v1/Announcement/List", json!({})).await
    }

    #[tracing::instrument(skip(self))]
    async fn web_service_token(&self, id: u64) -> NxapiResult<WebServiceToken> {
        let f = self
            .attestation
            .generate(AttestationRequest {
                token: self.access_token.clone(),
                hash_method: HashMethod::WebService,
                na_id: self.na_id.clone(),
                coral_user_id: Some(self.coral_user_id.clone()),
            })
            .await?;

        self.call(
            "/v2/Game/GetWebServiceToken",
            json!({
                "id": id,
                "registrationToken": "",
                "f": f.f,
                "requestId": f.request_id,
                "timestamp": f.timestamp,
            }),
        )
        .await
    }
}
