use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::debug;

use crate::{
    errors::{NxapiError, NxapiResult, ServerError},
    policy::{AuthPolicy, Capability},
};

use super::ProxyState;

/// Credentials presented to the znc proxy
#[derive(Debug, Clone)]
pub enum ZncAuth {
    /// `Authorization: na <session token>`, full access
    SessionToken { session_token: String },
    /// `Authorization: Bearer <proxy token>`, limited by the token's policy
    ProxyToken {
        token: String,
        policy: AuthPolicy,
        session_token: String,
    },
}

impl ZncAuth {
    pub fn session_token(&self) -> &str {
        match self {
            ZncAuth::SessionToken { session_token } => session_token,
            ZncAuth::ProxyToken { session_token, .. } => session_token,
        }
    }

    pub fn policy(&self) -> Option<&AuthPolicy> {
        match self {
            ZncAuth::SessionToken { .. } => None,
            ZncAuth::ProxyToken { policy, .. } => Some(policy),
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.policy().map_or(true, |policy| policy.allows(capability))
    }

    pub fn require(&self, capability: Capability) -> NxapiResult<()> {
        match self.policy() {
            Some(policy) => policy.require(capability),
            None => Ok(()),
        }
    }

    pub fn allows_friend(&self, nsa_id: &str) -> bool {
        self.policy().map_or(true, |policy| policy.allows_friend(nsa_id))
    }

    /// The session token, for endpoints proxy tokens can't use
    pub fn require_session_token(&self) -> NxapiResult<&str> {
        match self {
            ZncAuth::SessionToken { session_token } => Ok(session_token),
            ZncAuth::ProxyToken { .. } => Err(NxapiError::PolicyDenied(
                "this endpoint requires a session token".to_string(),
            )),
        }
    }
}

#[async_trait]
impl FromRequestParts<ProxyState> for ZncAuth {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ProxyState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| NxapiError::InvalidToken("missing authorization header".to_string()))?;

        let (scheme, token) = header
            .split_once(' ')
            .ok_or_else(|| NxapiError::InvalidToken("malformed authorization header".to_string()))?;

        match scheme {
            "na" => {
                state.app.sessions.authenticator().validate(token)?;
                Ok(ZncAuth::SessionToken {
                    session_token: token.to_string(),
                })
            }
            "Bearer" => {
                let policy = state
                    .policies
                    .get(token)
                    .await?
                    .ok_or_else(|| NxapiError::InvalidToken("unknown proxy token".to_string()))?;

                let session_token = state
                    .app
                    .cache
                    .session_token_for_user(&policy.user_id)
                    .await?
                    .ok_or_else(|| {
                        NxapiError::InvalidToken(format!(
                            "no session token for user {}",
                            policy.user_id
                        ))
                    })?;

                debug!(user_id = %policy.user_id, "Authenticated with proxy token");
                Ok(ZncAuth::ProxyToken {
                    token: token.to_string(),
                    policy,
                    session_token,
                })
            }
            _ => Err(NxapiError::InvalidToken(format!(
                "unsupported authorization scheme {}",
                scheme
            ))
            .into()),
        }
    }
}
