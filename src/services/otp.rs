//! One-time code challenges
//!
//! Issues 6-digit codes for email and in-app notification delivery, stores
//! only their SHA-256 digest with a short TTL, and polices the per-ticket
//! send cap plus the verification attempt counter shared by every factor
//! (OTP, TOTP, backup code) presented against the same pending ticket.

use crate::config::AuthSettings;
use crate::error::{AuthError, Result};
use crate::models::CredentialRecord;
use crate::security::ticket::TicketKind;
use crate::security::tokens::hash_token;
use crate::services::outbox::Effect;
use crate::store::EphemeralStore;
use crate::validators::mask_email;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpMethod {
    Email,
    Notification,
}

impl OtpMethod {
    fn as_str(&self) -> &'static str {
        match self {
            OtpMethod::Email => "email",
            OtpMethod::Notification => "notification",
        }
    }
}

fn code_key(method: OtpMethod, user_id: Uuid) -> String {
    format!("auth:otp:code:{}:{}", method.as_str(), user_id)
}

fn sends_key(ticket_hash: &str) -> String {
    format!("auth:otp:sends:{}", ticket_hash)
}

fn attempts_key(ticket_hash: &str) -> String {
    format!("auth:mfa:attempts:{}", ticket_hash)
}

pub struct OtpChallengeManager {
    store: Arc<dyn EphemeralStore>,
    otp_ttl_secs: i64,
    send_cap: i64,
    attempt_limit: i64,
    attempt_window_secs: i64,
    ticket_ttl_secs: i64,
}

impl OtpChallengeManager {
    pub fn new(store: Arc<dyn EphemeralStore>, auth: &AuthSettings) -> Self {
        Self {
            store,
            otp_ttl_secs: auth.otp_ttl_secs,
            send_cap: auth.otp_send_cap,
            attempt_limit: auth.attempt_limit,
            attempt_window_secs: auth.attempt_window_secs,
            ticket_ttl_secs: auth.ticket_ttl_secs,
        }
    }

    /// Issue a code for the given method under a pending ticket.
    ///
    /// Enforces, in order: the hardware-key escalation block, the
    /// method-enablement check (waived for plain new-device confirmation),
    /// and the per-ticket send cap. Returns the code's lifetime and the
    /// delivery effect to enqueue; the plaintext code lives only inside
    /// that effect.
    pub async fn issue(
        &self,
        record: &CredentialRecord,
        kind: TicketKind,
        method: OtpMethod,
        ticket_hash: &str,
    ) -> Result<(i64, Effect)> {
        if kind == TicketKind::NewDevicePending && record.has_security_keys() {
            return Err(AuthError::SecurityKeyRequired);
        }

        let enablement_waived = kind == TicketKind::NewDevicePending;
        if !enablement_waived {
            let enabled = match method {
                OtpMethod::Email => record.email_mfa_enabled,
                OtpMethod::Notification => record.notification_mfa_enabled,
            };
            if !enabled {
                return Err(AuthError::MfaMethodNotEnabled);
            }
        }

        let sends = self
            .store
            .incr_ex(&sends_key(ticket_hash), self.ticket_ttl_secs)
            .await?;
        if sends > self.send_cap {
            return Err(AuthError::TooManyOtpRequests);
        }

        // Uniform over the 6-digit range, no modulo bias
        let code = OsRng.gen_range(100_000..=999_999).to_string();
        self.store
            .set_ex(
                &code_key(method, record.user_id),
                &hash_token(&code),
                self.otp_ttl_secs,
            )
            .await?;

        info!(
            user_id = %record.user_id,
            method = method.as_str(),
            email = %mask_email(&record.email),
            "issued one-time code"
        );

        let effect = match method {
            OtpMethod::Email => Effect::SendOtpEmail {
                email: record.email.clone(),
                first_name: record.first_name.clone(),
                code,
                expiry_minutes: self.otp_ttl_secs / 60,
            },
            OtpMethod::Notification => Effect::SendNotification {
                user_id: record.user_id,
                title: "Your verification code".to_string(),
                message: format!("Your verification code is {}", code),
                metadata: serde_json::json!({
                    "category": "auth_otp",
                    "expires_in_secs": self.otp_ttl_secs,
                }),
            },
        };

        Ok((self.otp_ttl_secs, effect))
    }

    /// Verify a supplied code. A match consumes the stored digest
    /// atomically and clears the shared attempt counter; a mismatch burns
    /// one attempt.
    pub async fn verify(
        &self,
        user_id: Uuid,
        method: OtpMethod,
        code: &str,
        ticket_hash: &str,
    ) -> Result<()> {
        let key = code_key(method, user_id);
        let stored = match self.store.get(&key).await? {
            Some(stored) => stored,
            None => return Err(AuthError::OtpExpiredOrMissing),
        };

        let supplied = hash_token(code.trim());
        if !bool::from(supplied.as_bytes().ct_eq(stored.as_bytes())) {
            let remaining = self.record_failed_attempt(ticket_hash).await?;
            return Err(AuthError::InvalidOtp {
                attempts_remaining: remaining,
            });
        }

        // Single use: only the caller that deletes the digest wins
        if !self.store.del_if_eq(&key, &stored).await? {
            return Err(AuthError::OtpExpiredOrMissing);
        }

        self.clear_attempts(ticket_hash).await?;
        Ok(())
    }

    /// Seconds until the attempt counter unblocks, when it is exhausted
    pub async fn attempts_exhausted(&self, ticket_hash: &str) -> Result<Option<i64>> {
        let key = attempts_key(ticket_hash);
        let count: i64 = match self.store.get(&key).await? {
            Some(raw) => raw.parse().unwrap_or(0),
            None => return Ok(None),
        };
        if count < self.attempt_limit {
            return Ok(None);
        }
        let retry_after = self
            .store
            .ttl(&key)
            .await?
            .unwrap_or(self.attempt_window_secs)
            .max(1);
        Ok(Some(retry_after))
    }

    /// Burn one failed attempt, returning how many remain
    pub async fn record_failed_attempt(&self, ticket_hash: &str) -> Result<i64> {
        let count = self
            .store
            .incr_ex(&attempts_key(ticket_hash), self.attempt_window_secs)
            .await?;
        Ok((self.attempt_limit - count).max(0))
    }

    pub async fn clear_attempts(&self, ticket_hash: &str) -> Result<()> {
        self.store.del(&attempts_key(ticket_hash)).await
    }
}
