//! Failed-login lockout guard
//!
//! Counts consecutive failed password checks per login identifier in the
//! ephemeral store. Reaching the threshold pins the counter at the
//! threshold for a full lockout window, so continued guessing during the
//! lockout does not extend it past one window from the last failure.

use crate::config::AuthSettings;
use crate::error::Result;
use crate::store::EphemeralStore;
use crate::validators::mask_email;
use std::sync::Arc;
use tracing::warn;

fn failures_key(email: &str) -> String {
    format!("auth:lockout:{}", email)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub locked: bool,
    /// Seconds until the lock clears; 0 when not locked
    pub remaining_secs: i64,
}

impl LockStatus {
    fn open() -> Self {
        Self {
            locked: false,
            remaining_secs: 0,
        }
    }
}

pub struct LockoutGuard {
    store: Arc<dyn EphemeralStore>,
    threshold: i64,
    window_secs: i64,
}

impl LockoutGuard {
    pub fn new(store: Arc<dyn EphemeralStore>, auth: &AuthSettings) -> Self {
        Self {
            store,
            threshold: auth.lockout_threshold,
            window_secs: auth.lockout_window_secs,
        }
    }

    /// Current lock state for a normalized login identifier
    pub async fn check(&self, email: &str) -> Result<LockStatus> {
        let key = failures_key(email);
        let count: i64 = match self.store.get(&key).await? {
            Some(raw) => raw.parse().unwrap_or(0),
            None => return Ok(LockStatus::open()),
        };

        if count < self.threshold {
            return Ok(LockStatus::open());
        }

        let remaining = self.store.ttl(&key).await?.unwrap_or(0).max(0);
        Ok(LockStatus {
            locked: true,
            remaining_secs: remaining,
        })
    }

    /// Record one failed password check. Returns the resulting lock state
    /// so the caller can report a lock the moment it trips.
    pub async fn record_failure(&self, email: &str) -> Result<LockStatus> {
        let key = failures_key(email);
        let count = self.store.incr_ex(&key, self.window_secs).await?;

        if count < self.threshold {
            return Ok(LockStatus::open());
        }

        if count == self.threshold {
            warn!(email = %mask_email(email), "account locked after repeated failures");
        }

        // Pin at the threshold with a fresh window; extra failures during
        // the lock neither grow the counter nor the ban
        self.store
            .set_ex(&key, &self.threshold.to_string(), self.window_secs)
            .await?;

        Ok(LockStatus {
            locked: true,
            remaining_secs: self.window_secs,
        })
    }

    /// Clear the counter after a fully completed login
    pub async fn clear(&self, email: &str) -> Result<()> {
        self.store.del(&failures_key(email)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthSettings;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn guard_with_store() -> (LockoutGuard, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthSettings::with_secrets("t", "a");
        (LockoutGuard::new(store.clone(), &auth), store)
    }

    #[tokio::test]
    async fn locks_on_fifth_failure() {
        let (guard, _) = guard_with_store();
        for _ in 0..4 {
            let status = guard.record_failure("user@example.com").await.unwrap();
            assert!(!status.locked);
        }
        let status = guard.record_failure("user@example.com").await.unwrap();
        assert!(status.locked);
        assert_eq!(status.remaining_secs, 900);

        let status = guard.check("user@example.com").await.unwrap();
        assert!(status.locked);
        assert!(status.remaining_secs > 0);
    }

    #[tokio::test]
    async fn failures_below_threshold_do_not_lock() {
        let (guard, _) = guard_with_store();
        for _ in 0..4 {
            guard.record_failure("user@example.com").await.unwrap();
        }
        let status = guard.check("user@example.com").await.unwrap();
        assert!(!status.locked);
    }

    #[tokio::test]
    async fn clear_resets_the_counter() {
        let (guard, _) = guard_with_store();
        for _ in 0..5 {
            guard.record_failure("user@example.com").await.unwrap();
        }
        guard.clear("user@example.com").await.unwrap();
        let status = guard.check("user@example.com").await.unwrap();
        assert!(!status.locked);
    }

    #[tokio::test]
    async fn lock_expires_with_the_window() {
        let (guard, store) = guard_with_store();
        for _ in 0..5 {
            guard.record_failure("user@example.com").await.unwrap();
        }
        store.advance(Duration::from_secs(901));
        let status = guard.check("user@example.com").await.unwrap();
        assert!(!status.locked);
    }

    #[tokio::test]
    async fn identifiers_are_isolated() {
        let (guard, _) = guard_with_store();
        for _ in 0..5 {
            guard.record_failure("a@example.com").await.unwrap();
        }
        let status = guard.check("b@example.com").await.unwrap();
        assert!(!status.locked);
    }
}
