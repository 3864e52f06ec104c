//! Device trust tracker
//!
//! Remembers which coarse device fingerprints a user has confirmed, so a
//! returning browser skips the new-device challenge for a while. The
//! fingerprint is a UX signal only and never gates session issuance by
//! itself.

use crate::config::AuthSettings;
use crate::error::Result;
use crate::store::EphemeralStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

const USER_AGENT_PREFIX_LEN: usize = 64;

fn trust_key(user_id: Uuid, fingerprint: &str) -> String {
    format!("auth:device:{}:{}", user_id, fingerprint)
}

/// Derive a coarse device fingerprint from the device class and a bounded
/// user-agent prefix. Deliberately low-entropy.
pub fn fingerprint(device_type: Option<&str>, user_agent: Option<&str>) -> String {
    let device_type = device_type.unwrap_or("unknown");
    let ua = user_agent.unwrap_or("");
    let ua_prefix: String = ua.chars().take(USER_AGENT_PREFIX_LEN).collect();

    let mut hasher = Sha256::new();
    hasher.update(device_type.as_bytes());
    hasher.update(b":");
    hasher.update(ua_prefix.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct DeviceTrustTracker {
    store: Arc<dyn EphemeralStore>,
    ttl_secs: i64,
}

impl DeviceTrustTracker {
    pub fn new(store: Arc<dyn EphemeralStore>, auth: &AuthSettings) -> Self {
        Self {
            store,
            ttl_secs: auth.device_trust_ttl_secs,
        }
    }

    pub async fn is_known(&self, user_id: Uuid, fingerprint: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&trust_key(user_id, fingerprint))
            .await?
            .is_some())
    }

    /// Mark (or re-mark, refreshing the TTL) a fingerprint as confirmed
    pub async fn mark_known(&self, user_id: Uuid, fingerprint: &str) -> Result<()> {
        self.store
            .set_ex(&trust_key(user_id, fingerprint), "1", self.ttl_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthSettings;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn tracker_with_store() -> (DeviceTrustTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthSettings::with_secrets("t", "a");
        (DeviceTrustTracker::new(store.clone(), &auth), store)
    }

    #[test]
    fn fingerprint_is_stable_and_coarse() {
        let a = fingerprint(Some("ios"), Some("Mozilla/5.0 (iPhone)"));
        let b = fingerprint(Some("ios"), Some("Mozilla/5.0 (iPhone)"));
        assert_eq!(a, b);
        assert_ne!(a, fingerprint(Some("android"), Some("Mozilla/5.0 (iPhone)")));
    }

    #[test]
    fn fingerprint_ignores_user_agent_tail() {
        let long_a = format!("{}{}", "A".repeat(64), "tail-one");
        let long_b = format!("{}{}", "A".repeat(64), "tail-two");
        assert_eq!(
            fingerprint(Some("web"), Some(&long_a)),
            fingerprint(Some("web"), Some(&long_b))
        );
    }

    #[tokio::test]
    async fn unknown_until_marked() {
        let (tracker, _) = tracker_with_store();
        let user_id = Uuid::new_v4();
        let fp = fingerprint(Some("web"), Some("ua"));
        assert!(!tracker.is_known(user_id, &fp).await.unwrap());
        tracker.mark_known(user_id, &fp).await.unwrap();
        assert!(tracker.is_known(user_id, &fp).await.unwrap());
    }

    #[tokio::test]
    async fn trust_expires() {
        let (tracker, store) = tracker_with_store();
        let user_id = Uuid::new_v4();
        let fp = fingerprint(Some("web"), Some("ua"));
        tracker.mark_known(user_id, &fp).await.unwrap();
        store.advance(Duration::from_secs(7 * 24 * 3600 + 1));
        assert!(!tracker.is_known(user_id, &fp).await.unwrap());
    }
}
