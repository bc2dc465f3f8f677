use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

/// Cookie the web app stores its access token under.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Claims read from the session token. The signature is not verified here;
/// the backend does that. The client only needs `exp` to avoid connecting
/// with a token that is already dead.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<u64>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    token: String,
}

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().trim().to_string(),
        }
    }

    /// Extracts the access token from a `Cookie` header value.
    pub fn from_cookie_header(header: &str) -> Option<Self> {
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
            .map(|(_, value)| value.trim_matches('"'))
            .filter(|value| !value.is_empty())
            .map(Self::new)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `None` for opaque (non-JWT) tokens.
    pub fn claims(&self) -> Option<SessionClaims> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        decode::<SessionClaims>(&self.token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .ok()
    }

    /// Only JWTs carrying an `exp` in the past count as expired.
    pub fn is_expired(&self) -> bool {
        let Some(exp) = self.claims().and_then(|c| c.exp) else {
            return false;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        exp <= now
    }

    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty() && !self.is_expired()
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret-key-for-jwt-signing-needs-to-be-long-enough";

    fn make_token(claims: serde_json::Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn valid_jwt_is_authenticated() {
        let credential = SessionCredential::new(make_token(json!({
            "sub": "user-1",
            "exp": 9999999999u64
        })));
        assert!(credential.is_authenticated());
        let claims = credential.claims().unwrap();
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
    }

    #[test]
    fn expired_jwt_is_not_authenticated() {
        let credential = SessionCredential::new(make_token(json!({ "sub": "user-1", "exp": 1000 })));
        assert!(credential.is_expired());
        assert!(!credential.is_authenticated());
    }

    #[test]
    fn jwt_without_exp_never_expires() {
        let credential = SessionCredential::new(make_token(json!({ "sub": "user-1" })));
        assert!(credential.claims().is_some());
        assert!(!credential.is_expired());
    }

    #[test]
    fn opaque_token_is_trusted_until_server_says_otherwise() {
        let credential = SessionCredential::new("opaque-session-token");
        assert!(credential.claims().is_none());
        assert!(credential.is_authenticated());
    }

    #[test]
    fn empty_token_is_not_authenticated() {
        assert!(!SessionCredential::new("   ").is_authenticated());
    }

    #[test]
    fn token_from_cookie_header() {
        let credential =
            SessionCredential::from_cookie_header("locale=ko; accessToken=abc.def.ghi; theme=dark")
                .unwrap();
        assert_eq!(credential.token(), "abc.def.ghi");
        assert!(SessionCredential::from_cookie_header("locale=ko").is_none());
        assert!(SessionCredential::from_cookie_header("accessToken=").is_none());
    }

    #[test]
    fn debug_output_redacts_token() {
        let credential = SessionCredential::new("super-secret");
        assert!(!format!("{credential:?}").contains("super-secret"));
    }
}
