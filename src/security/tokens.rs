//! Access token signing and refresh token material
//!
//! Access tokens are short-lived JWTs carrying the user and session ids.
//! Refresh tokens are opaque random strings; only their SHA-256 digest is
//! ever stored.

use crate::config::AuthSettings;
use crate::error::Result;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const ACCESS_ALGORITHM: Algorithm = Algorithm::HS256;
const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    /// Session id the token was minted under
    pub sid: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: &[u8], issuer: &str, access_ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            access_ttl_secs,
        }
    }

    pub fn from_settings(auth: &AuthSettings) -> Self {
        Self::new(
            auth.access_secret.as_bytes(),
            &auth.issuer,
            auth.access_token_ttl_secs,
        )
    }

    pub fn sign_access(&self, user_id: Uuid, session_id: Uuid) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user_id,
            sid: session_id,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.access_ttl_secs,
        };
        let token = encode(&Header::new(ACCESS_ALGORITHM), &claims, &self.encoding_key)?;
        Ok(token)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        let mut validation = Validation::new(ACCESS_ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

/// Generate an opaque refresh token (32 random bytes, hex-encoded)
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest of a token, the only form that touches storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_round_trip() {
        let signer = TokenSigner::new(b"access-secret", "auth-core", 900);
        let user_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let token = signer.sign_access(user_id, session_id).unwrap();
        let claims = signer.verify_access(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, session_id);
    }

    #[test]
    fn test_foreign_access_token_rejected() {
        let signer = TokenSigner::new(b"access-secret", "auth-core", 900);
        let other = TokenSigner::new(b"other-secret", "auth-core", 900);
        let token = other.sign_access(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert!(signer.verify_access(&token).is_err());
    }

    #[test]
    fn test_refresh_tokens_are_unique_and_hashed() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(hash_token(&a).len(), 64);
        assert_ne!(hash_token(&a), a);
    }
}
