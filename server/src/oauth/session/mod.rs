use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::errors::{NxapiError, NxapiResult};

/// Scopes requested by the Nintendo Switch Online app
pub const CORAL_SCOPES: &str = "openid user user.birthday user.mii user.screenName";

/// Represents the data kept while a user completes the Nintendo Account login
/// in their browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSession {
    /// State parameter passed to the authorize endpoint
    pub state: String,
    /// PKCE code verifier - the original random string
    pub code_verifier: String,
    /// PKCE code challenge - the hashed and encoded verifier
    pub code_challenge: String,
    /// The timestamp when this session was created
    pub created_at: i64,
}

impl LoginSession {
    /// Create a new login session with PKCE
    pub fn new(now_secs: i64) -> Self {
        let state = random_url_safe(36);
        let (code_verifier, code_challenge) = Self::generate_pkce_codes();

        Self {
            state,
            code_verifier,
            code_challenge,
            created_at: now_secs,
        }
    }

    /// Generate PKCE code verifier and challenge
    fn generate_pkce_codes() -> (String, String) {
        use sha2::{Digest, Sha256};

        let code_verifier = random_url_safe(32);

        // Create code challenge using the S256 method
        let mut hasher = Sha256::new();
        hasher.update(code_verifier.as_bytes());
        let code_challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        (code_verifier, code_challenge)
    }

    /// Build the URL the user opens to log in
    pub fn authorize_url(&self, accounts_url: &str, client_id: &str) -> String {
        let redirect_uri = format!("npf{}://auth", client_id);
        let params = [
            ("state", self.state.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", client_id),
            ("scope", CORAL_SCOPES),
            ("response_type", "session_token_code"),
            ("session_token_code_challenge", self.code_challenge.as_str()),
            ("session_token_code_challenge_method", "S256"),
            ("theme", "login_form"),
        ];

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}/connect/1.0.0/authorize?{}", accounts_url, query)
    }

    /// Pull the session token code out of the `npf...://auth#...` redirect
    /// the user copies back
    pub fn session_token_code(&self, redirect_url: &str) -> NxapiResult<String> {
        let fragment = redirect_url
            .split_once('#')
            .map(|(_, fragment)| fragment)
            .ok_or_else(|| NxapiError::InvalidToken("redirect URL has no fragment".to_string()))?;

        let mut state = None;
        let mut code = None;
        for pair in fragment.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = urlencoding::decode(value)
                .map_err(|e| NxapiError::InvalidToken(format!("bad redirect URL: {}", e)))?
                .into_owned();
            match key {
                "state" => state = Some(value),
                "session_token_code" => code = Some(value),
                _ => {}
            }
        }

        if state.as_deref() != Some(self.state.as_str()) {
            return Err(NxapiError::InvalidToken(
                "state in redirect URL does not match this login".to_string(),
            ));
        }

        code.ok_or_else(|| {
            NxapiError::InvalidToken("redirect URL has no session_token_code".to_string())
        })
    }
}

fn random_url_safe(len: usize) -> String {
    use rand::{thread_rng, RngCore};

    let mut bytes = vec![0u8; len];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_is_sha256_of_verifier() {
        use sha2::{Digest, Sha256};

        let session = LoginSession::new(0);
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(session.code_verifier.as_bytes()));
        assert_eq!(session.code_challenge, expected);
    }

    #[test]
    fn test_authorize_url() {
        let session = LoginSession::new(0);
        let url = session.authorize_url("https://accounts.nintendo.com", "71b963c1b7b6d119");

        assert!(url.starts_with("https://accounts.nintendo.com/connect/1.0.0/authorize?"));
        assert!(url.contains("response_type=session_token_code"));
        assert!(url.contains("redirect_uri=npf71b963c1b7b6d119%3A%2F%2Fauth"));
        assert!(url.contains(&format!("state={}", session.state)));
    }

    #[test]
    fn test_session_token_code_from_redirect() {
        let session = LoginSession::new(0);
        let redirect = format!(
            "npf71b963c1b7b6d119://auth#session_token_code=abc.def&state={}&session_state=x",
            session.state
        );

        assert_eq!(session.session_token_code(&redirect).unwrap(), "abc.def");
    }

    #[test]
    fn test_session_token_code_rejects_other_state() {
        let session = LoginSession::new(0);
        let redirect = "npf71b963c1b7b6d119://auth#session_token_code=abc&state=other";

        assert!(session.session_token_code(redirect).is_err());
    }
}
