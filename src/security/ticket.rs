//! Pending-auth ticket
//!
//! A short-lived signed token that carries a half-authenticated login (the
//! password was right, a second factor is still owed) across the challenge
//! round trips. The ticket is bound to the client address and device
//! fingerprint observed at mint time and grants nothing but the right to
//! continue verification.

use crate::config::AuthSettings;
use crate::error::Result;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

// Pinned; tickets never negotiate their algorithm
const TICKET_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    /// Account has MFA enabled; a configured factor must be presented
    MfaPending,
    /// Credentials were right but the device is unrecognized
    NewDevicePending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketClaims {
    pub sub: Uuid,
    pub kind: TicketKind,
    /// Client address the ticket was minted for
    pub ip: String,
    /// Device fingerprint the ticket was minted for
    pub fp: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketError {
    #[error("ticket expired")]
    Expired,
    #[error("ticket signature invalid")]
    BadSignature,
    #[error("ticket issuer mismatch")]
    WrongIssuer,
    #[error("ticket malformed")]
    Malformed,
}

pub struct TicketIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl_secs: i64,
}

impl TicketIssuer {
    pub fn new(secret: &[u8], issuer: &str, ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            ttl_secs,
        }
    }

    pub fn from_settings(auth: &AuthSettings) -> Self {
        Self::new(
            auth.ticket_secret.as_bytes(),
            &auth.issuer,
            auth.ticket_ttl_secs,
        )
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn mint(&self, user_id: Uuid, kind: TicketKind, ip: &str, fingerprint: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TicketClaims {
            sub: user_id,
            kind,
            ip: ip.to_string(),
            fp: fingerprint.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        let token = encode(&Header::new(TICKET_ALGORITHM), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Decode and validate signature, expiry and issuer
    pub fn verify(&self, token: &str) -> std::result::Result<TicketClaims, TicketError> {
        let mut validation = Validation::new(TICKET_ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        // Expiry is a hard boundary for tickets, no leeway
        validation.leeway = 0;

        match decode::<TicketClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                Err(match err.kind() {
                    ErrorKind::ExpiredSignature => TicketError::Expired,
                    ErrorKind::InvalidSignature => TicketError::BadSignature,
                    ErrorKind::InvalidIssuer => TicketError::WrongIssuer,
                    _ => TicketError::Malformed,
                })
            }
        }
    }
}

/// Whether the presenting client matches the one the ticket was minted for.
/// Both fields are always compared so the failing one cannot be inferred
/// from timing.
pub fn binding_matches(claims: &TicketClaims, ip: &str, fingerprint: &str) -> bool {
    let ip_ok = claims.ip.as_bytes().ct_eq(ip.as_bytes());
    let fp_ok = claims.fp.as_bytes().ct_eq(fingerprint.as_bytes());
    bool::from(ip_ok & fp_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TicketIssuer {
        TicketIssuer::new(b"test-ticket-secret", "auth-core", 600)
    }

    #[test]
    fn test_mint_and_verify_round_trip() {
        let tickets = issuer();
        let user_id = Uuid::new_v4();
        let token = tickets
            .mint(user_id, TicketKind::MfaPending, "203.0.113.7", "fp-abc")
            .unwrap();
        let claims = tickets.verify(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.kind, TicketKind::MfaPending);
        assert!(claims.exp - claims.iat == 600);
    }

    #[test]
    fn test_expired_ticket_rejected() {
        let tickets = TicketIssuer::new(b"test-ticket-secret", "auth-core", -120);
        let token = tickets
            .mint(Uuid::new_v4(), TicketKind::MfaPending, "203.0.113.7", "fp")
            .unwrap();
        assert_eq!(tickets.verify(&token), Err(TicketError::Expired));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let token = issuer()
            .mint(Uuid::new_v4(), TicketKind::MfaPending, "203.0.113.7", "fp")
            .unwrap();
        let other = TicketIssuer::new(b"different-secret", "auth-core", 600);
        assert_eq!(other.verify(&token), Err(TicketError::BadSignature));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let foreign = TicketIssuer::new(b"test-ticket-secret", "someone-else", 600);
        let token = foreign
            .mint(Uuid::new_v4(), TicketKind::MfaPending, "203.0.113.7", "fp")
            .unwrap();
        assert_eq!(issuer().verify(&token), Err(TicketError::WrongIssuer));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert_eq!(issuer().verify("not.a.jwt"), Err(TicketError::Malformed));
    }

    #[test]
    fn test_binding_requires_both_fields() {
        let tickets = issuer();
        let token = tickets
            .mint(Uuid::new_v4(), TicketKind::NewDevicePending, "203.0.113.7", "fp-abc")
            .unwrap();
        let claims = tickets.verify(&token).unwrap();
        assert!(binding_matches(&claims, "203.0.113.7", "fp-abc"));
        assert!(!binding_matches(&claims, "198.51.100.1", "fp-abc"));
        assert!(!binding_matches(&claims, "203.0.113.7", "fp-other"));
    }
}
