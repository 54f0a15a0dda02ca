use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::error::AuthError;

use super::Claims;

/// Decode access-token claims without verifying the signature.
///
/// The backend and broker verify tokens; the client only reads the subject
/// and expiry, so no signing key is configured here.
pub fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn create_test_token(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"any-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_decode_claims_ignores_signature() {
        let claims = Claims {
            sub: Some("user-123".to_string()),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: Some(chrono::Utc::now().timestamp()),
            preferred_username: Some("alice".to_string()),
            email: None,
            realm_access: None,
            extra: Default::default(),
        };

        let token = create_test_token(&claims);
        let decoded = decode_claims(&token).unwrap();

        assert_eq!(decoded.subject(), Some("user-123"));
        assert_eq!(decoded.username(), Some("alice"));
    }

    #[test]
    fn test_decode_expired_token_still_succeeds() {
        let claims = Claims {
            sub: Some("user-123".to_string()),
            exp: 1,
            iat: None,
            preferred_username: None,
            email: None,
            realm_access: None,
            extra: Default::default(),
        };

        let decoded = decode_claims(&create_test_token(&claims)).unwrap();
        assert!(decoded.is_expired());
    }

    #[test]
    fn test_invalid_token() {
        let result = decode_claims("invalid-token");
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }
}
