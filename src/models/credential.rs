use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account credential record as read from the credential store.
///
/// `password_hash` is `None` for accounts provisioned through an external
/// identity provider; those accounts cannot use password login.
/// `mfa_backup_codes` holds SHA-256 hex digests, never plaintext codes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialRecord {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<String>,
    pub mfa_backup_codes: Vec<String>,
    pub email_mfa_enabled: bool,
    pub notification_mfa_enabled: bool,
    pub security_key_count: i64,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
}

impl CredentialRecord {
    /// Whether any second factor is configured for this account
    pub fn has_mfa(&self) -> bool {
        self.mfa_enabled
    }

    pub fn has_security_keys(&self) -> bool {
        self.security_key_count > 0
    }
}
