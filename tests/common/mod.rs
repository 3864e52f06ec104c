use async_trait::async_trait;
use auth_core::config::AuthSettings;
use auth_core::db::CredentialStore;
use auth_core::error::Result;
use auth_core::models::CredentialRecord;
use auth_core::security::password::hash_password;
use auth_core::security::totp::hash_backup_code;
use auth_core::services::orchestrator::{AuthOrchestrator, ClientContext};
use auth_core::store::MemoryStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

static TRACING: Once = Once::new();

// RUST_LOG=debug makes the flows narrate themselves during test failures
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// In-memory credential store with atomic backup-code consumption
#[derive(Default)]
pub struct MemoryCredentials {
    records: Mutex<HashMap<Uuid, CredentialRecord>>,
}

impl MemoryCredentials {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, record: CredentialRecord) {
        self.records.lock().unwrap().insert(record.user_id, record);
    }

    pub fn get(&self, user_id: Uuid) -> Option<CredentialRecord> {
        self.records.lock().unwrap().get(&user_id).cloned()
    }

    pub fn set_banned(&self, user_id: Uuid, banned: bool) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&user_id) {
            record.is_banned = banned;
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<CredentialRecord>> {
        Ok(self.records.lock().unwrap().get(&user_id).cloned())
    }

    async fn record_login(&self, user_id: Uuid, ip: &str) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(&user_id) {
            record.last_login_at = Some(chrono::Utc::now());
            record.last_login_ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: Uuid,
        index: usize,
        code_hash: &str,
    ) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&user_id) else {
            return Ok(false);
        };
        // Same guard as the Postgres splice: the slot must still hold the
        // matched hash
        if record.mfa_backup_codes.get(index).map(String::as_str) != Some(code_hash) {
            return Ok(false);
        }
        record.mfa_backup_codes.remove(index);
        Ok(true)
    }

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        if let Some(record) = self.records.lock().unwrap().get_mut(&user_id) {
            record.password_hash = Some(password_hash.to_string());
        }
        Ok(())
    }
}

pub const PASSWORD: &str = "Correct-Horse-9-Battery";

// Argon2 is deliberately slow; hash the shared test password once
static PASSWORD_HASH: once_cell::sync::Lazy<String> =
    once_cell::sync::Lazy::new(|| hash_password(PASSWORD).unwrap());

pub struct UserBuilder {
    record: CredentialRecord,
}

impl UserBuilder {
    pub fn new(email: &str) -> Self {
        Self {
            record: CredentialRecord {
                user_id: Uuid::new_v4(),
                email: email.to_string(),
                first_name: Some("Ada".to_string()),
                password_hash: Some(PASSWORD_HASH.clone()),
                email_verified: true,
                is_banned: false,
                ban_reason: None,
                mfa_enabled: false,
                mfa_secret: None,
                mfa_backup_codes: vec![],
                email_mfa_enabled: false,
                notification_mfa_enabled: false,
                security_key_count: 0,
                last_login_at: None,
                last_login_ip: None,
            },
        }
    }

    pub fn mfa_secret(mut self, secret: &str) -> Self {
        self.record.mfa_enabled = true;
        self.record.mfa_secret = Some(secret.to_string());
        self
    }

    pub fn email_mfa(mut self) -> Self {
        self.record.mfa_enabled = true;
        self.record.email_mfa_enabled = true;
        self
    }

    pub fn backup_codes(mut self, codes: &[&str]) -> Self {
        self.record.mfa_enabled = true;
        self.record.mfa_backup_codes = codes.iter().map(|c| hash_backup_code(c)).collect();
        self
    }

    pub fn security_keys(mut self, count: i64) -> Self {
        self.record.security_key_count = count;
        self
    }

    pub fn unverified(mut self) -> Self {
        self.record.email_verified = false;
        self
    }

    pub fn banned(mut self) -> Self {
        self.record.is_banned = true;
        self
    }

    pub fn build(self) -> CredentialRecord {
        self.record
    }
}

pub struct Harness {
    pub orchestrator: AuthOrchestrator,
    pub store: Arc<MemoryStore>,
    pub credentials: Arc<MemoryCredentials>,
}

pub fn harness() -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let credentials = MemoryCredentials::new();
    let auth = AuthSettings::with_secrets("test-ticket-secret", "test-access-secret");
    let orchestrator = AuthOrchestrator::new(store.clone(), credentials.clone(), &auth);
    Harness {
        orchestrator,
        store,
        credentials,
    }
}

pub fn client(ip: &str, user_agent: &str) -> ClientContext {
    ClientContext {
        ip: ip.to_string(),
        user_agent: Some(user_agent.to_string()),
        device_name: Some("laptop".to_string()),
        device_type: Some("web".to_string()),
    }
}

pub fn default_client() -> ClientContext {
    client("203.0.113.7", "Mozilla/5.0 (X11; Linux x86_64)")
}
