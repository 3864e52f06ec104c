use crate::error::{AuthError, Result};
use crate::store::EphemeralStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// In-memory [`EphemeralStore`] for tests and local development.
///
/// Expired entries are purged lazily on access. [`MemoryStore::advance`]
/// shifts every deadline backwards so tests can cross TTL boundaries
/// without sleeping.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `elapsed` has passed by moving all deadlines closer
    pub fn advance(&self, elapsed: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        for entry in entries.values_mut() {
            if let Some(deadline) = entry.expires_at {
                entry.expires_at = Some(deadline.checked_sub(elapsed).unwrap_or(now));
            }
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, entry| !entry.expired(now));
        f(&mut entries)
    }

    fn deadline(ttl_secs: i64) -> Option<Instant> {
        if ttl_secs < 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl_secs as u64))
        }
    }
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(AuthError::Internal(format!(
                "wrong value type at key {}",
                key
            ))),
            None => Ok(None),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Self::deadline(ttl_secs),
                },
            );
        });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        self.with_entries(|entries| {
            let matches = matches!(
                entries.get(key),
                Some(Entry { value: Value::Str(s), .. }) if s == expected
            );
            if matches {
                entries.remove(key);
            }
            Ok(matches)
        })
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_secs: i64,
    ) -> Result<bool> {
        self.with_entries(|entries| {
            match entries.get_mut(key) {
                Some(entry) => {
                    let matches = matches!(&entry.value, Value::Str(s) if s == expected);
                    if matches {
                        entry.value = Value::Str(new.to_string());
                        entry.expires_at = Self::deadline(ttl_secs);
                    }
                    Ok(matches)
                }
                None => Ok(false),
            }
        })
    }

    async fn incr_ex(&self, key: &str, ttl_secs: i64) -> Result<i64> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => {
                let count = s
                    .parse::<i64>()
                    .map_err(|_| AuthError::Internal(format!("non-integer counter at {}", key)))?
                    + 1;
                *s = count.to_string();
                Ok(count)
            }
            Some(_) => Err(AuthError::Internal(format!(
                "wrong value type at key {}",
                key
            ))),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Str("1".to_string()),
                        expires_at: Self::deadline(ttl_secs),
                    },
                );
                Ok(1)
            }
        })
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Self::deadline(ttl_secs);
            }
        });
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                // Round up so a live key never reports 0
                Ok(Some(remaining.as_millis().div_ceil(1000) as i64))
            }
            Some(_) => Ok(Some(-1)),
            None => Ok(None),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(set) => {
                    set.insert(member.to_string());
                    Ok(())
                }
                _ => Err(AuthError::Internal(format!(
                    "wrong value type at key {}",
                    key
                ))),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries| {
            if let Some(Entry {
                value: Value::Set(set),
                ..
            }) = entries.get_mut(key)
            {
                set.remove(member);
            }
        });
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(AuthError::Internal(format!(
                "wrong value type at key {}",
                key
            ))),
            None => Ok(Vec::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn counter_sets_ttl_only_on_create() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_ex("c", 60).await.unwrap(), 1);
        assert_eq!(store.incr_ex("c", 60).await.unwrap(), 2);
        let ttl = store.ttl("c").await.unwrap().unwrap();
        assert!(ttl > 0 && ttl <= 60);
    }

    #[tokio::test]
    async fn advance_expires_entries() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 30).await.unwrap();
        store.advance(Duration::from_secs(31));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn compare_and_swap_requires_current_value() {
        let store = MemoryStore::new();
        store.set_ex("k", "old", 60).await.unwrap();
        assert!(!store.compare_and_swap("k", "wrong", "new", 60).await.unwrap());
        assert!(store.compare_and_swap("k", "old", "new", 60).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("new".to_string()));
        assert!(!store.compare_and_swap("missing", "x", "y", 60).await.unwrap());
    }

    #[tokio::test]
    async fn del_if_eq_is_single_shot() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 60).await.unwrap();
        assert!(!store.del_if_eq("k", "other").await.unwrap());
        assert!(store.del_if_eq("k", "v").await.unwrap());
        assert!(!store.del_if_eq("k", "v").await.unwrap());
    }

    #[tokio::test]
    async fn sets_support_add_remove_list() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        store.sadd("s", "b").await.unwrap();
        store.sadd("s", "a").await.unwrap();
        let mut members = store.smembers("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
        store.srem("s", "a").await.unwrap();
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b"]);
    }
}
