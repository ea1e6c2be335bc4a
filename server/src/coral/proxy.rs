use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::error;

use crate::{
    coral::{
        types::{
            ActiveEvent, Announcement, CoralUser, CurrentUser, Friend, WebApiServerCredential,
            WebService, WebServiceToken,
        },
        CoralApi,
    },
    errors::{ErrorBody, NxapiError, NxapiResult},
    oauth::token::NintendoAccountUser,
};

/// Body of `POST /api/znc/auth`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuthData {
    pub user: NintendoAccountUser,
    pub nso_account: CoralUser,
    pub credential: WebApiServerCredential,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FriendsResponse<F = Friend> {
    pub friends: Vec<F>,
    pub updated: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: CurrentUser,
    pub updated: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebServicesResponse {
    pub webservices: Vec<WebService>,
    pub updated: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnnouncementsResponse {
    pub announcements: Vec<Announcement>,
    pub updated: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveEventResponse {
    pub activeevent: Option<ActiveEvent>,
    pub updated: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebServiceTokenResponse {
    pub token: WebServiceToken,
    pub updated: i64,
}

/// Coral access through another nxapi instance's `/api/znc` endpoints.
///
/// The session token is sent to the proxy, which holds the Coral credential.
#[derive(Clone)]
pub struct ZncProxyClient {
    http: reqwest::Client,
    base_url: String,
    session_token: String,
}

impl std::fmt::Debug for ZncProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZncProxyClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn na_authorization(session_token: &str) -> String {
    format!("na {}", session_token)
}

async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> NxapiResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    error!("znc proxy request failed: {} - {}", status, body);

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(body) => Err(NxapiError::from_error_body(body)),
        Err(_) => Err(NxapiError::Upstream {
            service: "znc proxy",
            status: status.as_u16() as i64,
            message: body,
        }),
    }
}

impl ZncProxyClient {
    pub fn new(http: reqwest::Client, base_url: &str, session_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token: session_token.to_string(),
        }
    }

    /// Have the proxy run the Nintendo Account and Coral handshake
    #[tracing::instrument(skip_all, fields(proxy = %self.base_url))]
    pub async fn auth(&self) -> NxapiResult<ProxyAuthData> {
        let response = self
            .http
            .post(format!("{}/api/znc/auth", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                na_authorization(&self.session_token),
            )
            .send()
            .await?;

        handle_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> NxapiResult<T> {
        let response = self
            .http
            .get(format!("{}/api/znc{}", self.base_url, path))
            .header(
                reqwest::header::AUTHORIZATION,
                na_authorization(&self.session_token),
            )
            .send()
            .await?;

        handle_response(response).await
    }
}

#[async_trait]
impl CoralApi for ZncProxyClient {
    async fn friends(&self) -> NxapiResult<Vec<Friend>> {
        let response: FriendsResponse = self.get("/friends").await?;
        Ok(response.friends)
    }

    async fn current_user(&self) -> NxapiResult<CurrentUser> {
        let response: UserResponse = self.get("/user").await?;
        Ok(response.user)
    }

    async fn web_services(&self) -> NxapiResult<Vec<WebService>> {
        let response: WebServicesResponse = self.get("/webservices").await?;
        Ok(response.webservices)
    }

    async fn active_event(&self) -> NxapiResult<Option<ActiveEvent>> {
        let response: ActiveEventResponse = self.get("/event/active").await?;
        Ok(response.activeevent)
    }

    async fn announcements(&self) -> NxapiResult<Vec<Announcement>> {
        let response: AnnouncementsResponse = self.get("/announcements").await?;
        Ok(response.announcements)
    }

    async fn web_service_token(&self, id: u64) -> NxapiResult<WebServiceToken> {
        let response = self
            .http
            .post(format!("{}/api/znc/webservice/{}/token", self.base_url, id))
            .header(
                reqwest::header::AUTHORIZATION,
                na_authorization(&self.session_token),
            )
            .send()
            .await?;

        let response: WebServiceTokenResponse = handle_response(response).await?;
        Ok(response.token)
    }
}
