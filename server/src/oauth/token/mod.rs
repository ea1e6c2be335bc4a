use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::{NxapiError, NxapiResult};

pub const SESSION_TOKEN_ISSUER: &str = "https://accounts.nintendo.com";
pub const SESSION_TOKEN_TYPE: &str = "session_token";

/// Claims carried by a Nintendo Account session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenClaims {
    pub iss: String,
    pub aud: String,
    pub typ: String,
    pub exp: i64,
    /// Nintendo Account id
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    /// Scopes granted to the session token
    #[serde(default)]
    pub st_scp: Option<Vec<i64>>,
}

/// Decode a session token without checking its signature.
///
/// Nintendo signs session tokens with a key the client doesn't have, so only
/// the structure and the claims can be checked.
pub fn decode_session_token(token: &str) -> NxapiResult<SessionTokenClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<SessionTokenClaims>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|e| NxapiError::InvalidToken(format!("failed to decode session token: {}", e)))?;

    Ok(data.claims)
}

/// Check a session token is usable for the given client before any request is made
pub fn validate_session_token(
    token: &str,
    client_id: &str,
    now_secs: i64,
) -> NxapiResult<SessionTokenClaims> {
    let claims = decode_session_token(token)?;

    if claims.iss != SESSION_TOKEN_ISSUER {
        return Err(NxapiError::InvalidToken(format!(
            "unexpected issuer {}",
            claims.iss
        )));
    }

    if claims.typ != SESSION_TOKEN_TYPE {
        return Err(NxapiError::InvalidToken(format!(
            "unexpected token type {}",
            claims.typ
        )));
    }

    if claims.aud != client_id {
        return Err(NxapiError::InvalidToken(format!(
            "token was issued for client {}",
            claims.aud
        )));
    }

    if claims.exp <= now_secs {
        return Err(NxapiError::InvalidToken("session token expired".to_string()));
    }

    Ok(claims)
}

/// Response from the Nintendo Account token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NintendoAccountToken {
    pub access_token: String,
    pub id_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Vec<String>,
    pub token_type: String,
}

/// Response from the Nintendo Account session token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NintendoAccountSessionToken {
    pub code: String,
    pub session_token: String,
}

/// Nintendo Account profile (`/users/me`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NintendoAccountUser {
    pub id: String,
    pub nickname: String,
    #[serde(default)]
    pub screen_name: Option<String>,
    pub country: String,
    pub birthday: String,
    pub language: String,
}

/// OAuth style error body returned by Nintendo Account
#[derive(Debug, Clone, Deserialize)]
pub struct NintendoAccountError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};

    pub(crate) const CLIENT_ID: &str = "71b963c1b7b6d119";

    pub(crate) fn session_token(aud: &str, typ: &str, exp: i64) -> String {
        let claims = SessionTokenClaims {
            iss: SESSION_TOKEN_ISSUER.to_string(),
            aud: aud.to_string(),
            typ: typ.to_string(),
            exp,
            sub: Some("a1b2c3d4e5f6a7b8".to_string()),
            iat: Some(exp - 3600),
            jti: Some("1234".to_string()),
            st_scp: Some(vec![0, 8, 9, 17, 23]),
        };

        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"not nintendo's key"),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_session_token() {
        let token = session_token(CLIENT_ID, "session_token", 2_000_000_000);

        let claims = validate_session_token(&token, CLIENT_ID, 1_700_000_000).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("a1b2c3d4e5f6a7b8"));
    }

    #[test]
    fn test_rejects_wrong_audience() {
        let token = session_token("54789befb391a838", "session_token", 2_000_000_000);

        let err = validate_session_token(&token, CLIENT_ID, 1_700_000_000).unwrap_err();
        assert!(matches!(err, NxapiError::InvalidToken(_)));
    }

    #[test]
    fn test_rejects_wrong_type() {
        let token = session_token(CLIENT_ID, "id_token", 2_000_000_000);

        let err = validate_session_token(&token, CLIENT_ID, 1_700_000_000).unwrap_err();
        assert!(matches!(err, NxapiError::InvalidToken(_)));
    }

    #[test]
    fn test_rejects_expired_token() {
        let token = session_token(CLIENT_ID, "session_token", 1_700_000_000);

        let err = validate_session_token(&token, CLIENT_ID, 1_700_000_000).unwrap_err();
        assert!(matches!(err, NxapiError::InvalidToken(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = validate_session_token("not-a-jwt", CLIENT_ID, 0).unwrap_err();
        assert!(matches!(err, NxapiError::InvalidToken(_)));
    }
}
