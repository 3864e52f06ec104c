use crate::error::Result;
use crate::store::EphemeralStore;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared Redis connection manager handle
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

// Compare-and-delete: unlink the key only while it still holds the expected
// value, so a concurrent writer cannot be clobbered.
static DEL_IF_EQ: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        "#,
    )
});

// Compare-and-swap with expiry refresh. Fails when the key is missing so a
// deleted record cannot be resurrected by a late writer.
static CAS_EX: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
            return 1
        end
        return 0
        "#,
    )
});

// INCR that applies the TTL in the same round trip when the counter is new.
static INCR_EX: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local v = redis.call('INCR', KEYS[1])
        if v == 1 then
            redis.call('EXPIRE', KEYS[1], ARGV[1])
        end
        return v
        "#,
    )
});

/// Redis-backed [`EphemeralStore`]
#[derive(Clone)]
pub struct RedisStore {
    conn: SharedConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Arc::new(Mutex::new(manager)),
        })
    }

    pub fn from_manager(conn: SharedConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("DEL").arg(key).query_async::<_, ()>(&mut *conn).await?;
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let deleted: i64 = DEL_IF_EQ
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new: &str,
        ttl_secs: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let swapped: i64 = CAS_EX
            .key(key)
            .arg(expected)
            .arg(new)
            .arg(ttl_secs)
            .invoke_async(&mut *conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn incr_ex(&self, key: &str, ttl_secs: i64) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        let count: i64 = INCR_EX
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut *conn)
            .await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.lock().await;
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut *conn).await?;
        // -2 means the key does not exist
        if ttl == -2 {
            Ok(None)
        } else {
            Ok(Some(ttl))
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(members)
    }
}
