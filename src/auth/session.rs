use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

use super::{decode_claims, Claims};

/// Token endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Refresh token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl TokenSet {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_in: None,
            refresh_expires_in: None,
            token_type: Some("Bearer".to_string()),
        }
    }
}

/// An authenticated session: bearer token plus its parsed claims
#[derive(Debug, Clone)]
pub struct Session {
    access_token: String,
    refresh_token: Option<String>,
    claims: Claims,
    expires_at: DateTime<Utc>,
    refresh_expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Build a session from a token endpoint response.
    ///
    /// The access token's `exp` claim is authoritative for expiry.
    pub fn from_token_set(tokens: TokenSet) -> Result<Self, AuthError> {
        let claims = decode_claims(&tokens.access_token)?;
        let expires_at = claims.expires_at();
        let refresh_expires_at = tokens
            .refresh_expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + Duration::seconds(secs));

        Ok(Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            claims,
            expires_at,
            refresh_expires_at,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.subject()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn remaining_validity(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// True when the access token expires in less than `min_validity_secs`
    pub fn expires_within(&self, min_validity_secs: u64) -> bool {
        self.remaining_validity() < Duration::seconds(min_validity_secs as i64)
    }

    /// True when a refresh token is held and not known to be expired
    pub fn can_refresh(&self) -> bool {
        match (&self.refresh_token, self.refresh_expires_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(expires_at)) => expires_at > Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_expiring_in(secs: i64) -> String {
        let claims = Claims {
            sub: Some("user-1".to_string()),
            exp: Utc::now().timestamp() + secs,
            iat: Some(Utc::now().timestamp()),
            preferred_username: None,
            email: None,
            realm_access: None,
            extra: Default::default(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"k")).unwrap()
    }

    #[test]
    fn test_expires_within_threshold() {
        let session = Session::from_token_set(TokenSet::new(token_expiring_in(10), None)).unwrap();
        assert!(session.expires_within(30));

        let session = Session::from_token_set(TokenSet::new(token_expiring_in(60), None)).unwrap();
        assert!(!session.expires_within(30));
        assert_eq!(session.subject(), Some("user-1"));
    }

    #[test]
    fn test_can_refresh() {
        let session = Session::from_token_set(TokenSet::new(token_expiring_in(60), None)).unwrap();
        assert!(!session.can_refresh());

        let mut tokens = TokenSet::new(token_expiring_in(60), Some("refresh".to_string()));
        tokens.refresh_expires_in = Some(1800);
        let session = Session::from_token_set(tokens).unwrap();
        assert!(session.can_refresh());
        assert_eq!(session.refresh_token(), Some("refresh"));
    }

    #[test]
    fn test_parse_token_endpoint_response() {
        let json = r#"{
            "access_token": "abc",
            "expires_in": 300,
            "refresh_expires_in": 1800,
            "refresh_token": "def",
            "token_type": "Bearer",
            "not-before-policy": 0,
            "scope": "openid profile"
        }"#;
        let tokens: TokenSet = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.access_token, "abc");
        assert_eq!(tokens.refresh_token.as_deref(), Some("def"));
        assert_eq!(tokens.expires_in, Some(300));
    }
}
