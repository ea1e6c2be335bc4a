use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::{NxapiError, NxapiResult};

/// Which token the `f` value is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    /// Nintendo Account id token, used for Coral login
    Coral,
    /// Coral id token, used for web service tokens
    WebService,
}

impl HashMethod {
    pub fn as_u8(self) -> u8 {
        match self {
            HashMethod::Coral => 1,
            HashMethod::WebService => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttestationRequest {
    pub token: String,
    pub hash_method: HashMethod,
    pub na_id: String,
    pub coral_user_id: Option<String>,
}

/// Attestation artifact passed to Coral
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FResult {
    pub f: String,
    pub request_id: String,
    pub timestamp: i64,
}

/// External service generating the `f` value Coral requires.
///
/// Failures are reported as [`NxapiError::AttestationFailed`] and never retried here.
#[async_trait]
pub trait Attestation: Send + Sync {
    async fn generate(&self, request: AttestationRequest) -> NxapiResult<FResult>;
}

/// imink compatible `f` generation API
#[derive(Debug, Clone)]
pub struct ZncaApi {
    http: reqwest::Client,
    url: String,
    version: String,
}

#[derive(Serialize)]
struct ZncaApiRequest<'a> {
    token: &'a str,
    hash_method: u8,
    na_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    coral_user_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ZncaApiError {
    error: String,
    #[serde(default)]
    error_message: Option<String>,
}

impl ZncaApi {
    pub fn new(http: reqwest::Client, url: &str, version: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
            version: version.to_string(),
        }
    }
}

#[async_trait]
impl Attestation for ZncaApi {
    #[tracing::instrument(skip_all, fields(hash_method = request.hash_method.as_u8()))]
    async fn generate(&self, request: AttestationRequest) -> NxapiResult<FResult> {
        let body = ZncaApiRequest {
            token: &request.token,
            hash_method: request.hash_method.as_u8(),
            na_id: &request.na_id,
            coral_user_id: request.coral_user_id.as_deref(),
        };

        let response = self
            .http
            .post(&self.url)
            .header("X-znca-Platform", "Android")
            .header("X-znca-Version", &self.version)
            .json(&body)
            .send()
            .await
            .map_err(|e| NxapiError::AttestationFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NxapiError::AttestationFailed(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ZncaApiError>(&text) {
                Ok(err) => err.error_message.unwrap_or(err.error),
                Err(_) => text,
            };
            error!("Attestation service returned {}: {}", status, message);
            return Err(NxapiError::AttestationFailed(format!(
                "{}: {}",
                status, message
            )));
        }

        let result: FResult = serde_json::from_str(&text)
            .map_err(|e| NxapiError::AttestationFailed(format!("unexpected response: {}", e)))?;
        debug!(request_id = %result.request_id, "Got f from attestation service");

        Ok(result)
    }
}
