use serde::Serialize;
use tracing::{debug, error};

use crate::{
    errors::{NxapiError, NxapiResult},
    oauth::token::{
        NintendoAccountError, NintendoAccountSessionToken, NintendoAccountToken,
        NintendoAccountUser,
    },
    state::NxapiConfig,
};

const SESSION_TOKEN_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer-session-token";

/// Client for the Nintendo Account token and profile endpoints
#[derive(Debug, Clone)]
pub struct NintendoAccount {
    http: reqwest::Client,
    accounts_url: String,
    api_url: String,
    client_id: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    session_token: &'a str,
    grant_type: &'a str,
}

impl NintendoAccount {
    pub fn new(http: reqwest::Client, config: &NxapiConfig) -> Self {
        Self {
            http,
            accounts_url: config.nintendo_account_url.clone(),
            api_url: config.nintendo_account_api_url.clone(),
            client_id: config.client_id.clone(),
        }
    }

    /// Exchange a session token for a Nintendo Account access token and id token
    #[tracing::instrument(skip_all)]
    pub async fn token(&self, session_token: &str) -> NxapiResult<NintendoAccountToken> {
        let url = format!("{}/connect/1.0.0/api/token", self.accounts_url);

        let response = self
            .http
            .post(&url)
            .json(&TokenRequest {
                client_id: &self.client_id,
                session_token,
                grant_type: SESSION_TOKEN_GRANT_TYPE,
            })
            .send()
            .await?;

        let token = handle_response::<NintendoAccountToken>(response).await?;
        debug!(expires_in = token.expires_in, "Got Nintendo Account token");
        Ok(token)
    }

    /// Fetch the profile of the user the access token belongs to
    #[tracing::instrument(skip_all)]
    pub async fn user(&self, access_token: &str) -> NxapiResult<NintendoAccountUser> {
        let url = format!("{}/2.0.0/users/me", self.api_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        handle_response(response).await
    }

    /// Finish a browser login by exchanging the session token code for a session token
    #[tracing::instrument(skip_all)]
    pub async fn session_token(
        &self,
        session_token_code: &str,
        code_verifier: &str,
    ) -> NxapiResult<NintendoAccountSessionToken> {
        let url = format!("{}/connect/1.0.0/api/session_token", self.accounts_url);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("session_token_code", session_token_code),
                ("session_token_code_verifier", code_verifier),
            ])
            .send()
            .await?;

        handle_response(response).await
    }
}

async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> NxapiResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    error!("Nintendo Account request failed: {} - {}", status, body);

    match serde_json::from_str::<NintendoAccountError>(&body) {
        // Revoked, expired or otherwise unusable session token
        Ok(err) if err.error == "invalid_grant" || err.error == "invalid_request" => {
            Err(NxapiError::InvalidToken(
                err.error_description.unwrap_or(err.error),
            ))
        }
        Ok(err) => Err(NxapiError::Upstream {
            service: "nintendo account",
            status: status.as_u16() as i64,
            message: err.error_description.unwrap_or(err.error),
        }),
        Err(_) => Err(NxapiError::Upstream {
            service: "nintendo account",
            status: status.as_u16() as i64,
            message: body,
        }),
    }
}
