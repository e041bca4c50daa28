use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`, then writes
/// `KEYS[2] = ARGV[2]` with a `ARGV[3]` millisecond TTL. Returns 1 on swap.
const REPLACE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
    redis.call('SET', KEYS[2], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
"#;

/// Expiring string store backing the OTP workflow.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Writes only when `key` is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, AppError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Atomically deletes `current_key` if it still equals `expected` and
    /// stores `next_key = next_value` with `ttl`. Returns false when
    /// `current_key` changed or vanished, in which case nothing is written.
    async fn replace_if_equals(
        &self,
        current_key: &str,
        expected: &str,
        next_key: &str,
        next_value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
    replace_script: Script,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, AppError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            AppError::RedisError(e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            replace_script: Script::new(REPLACE_IF_EQUALS),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisService {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn replace_if_equals(
        &self,
        current_key: &str,
        expected: &str,
        next_key: &str,
        next_value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let swapped: i64 = self
            .replace_script
            .key(current_key)
            .key(next_key)
            .arg(expected)
            .arg(next_value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-memory store with real expiry, for tests.
#[derive(Default)]
pub struct MockKeyValueStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
}

impl MockKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Overwrite a key unconditionally.
    pub fn put(&self, key: &str, value: &str, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .get(key)
                    .is_some_and(|(_, expires)| *expires > Instant::now())
            })
            .unwrap_or(false)
    }

    fn live_entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Mock key-value store unavailable"
            )));
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock key-value store mutex poisoned: {}", e))?;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        Ok(entries)
    }
}

#[async_trait]
impl KeyValueStore for MockKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.live_entries()?.get(key).map(|(value, _)| value.clone()))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut entries = self.live_entries()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.live_entries()?.remove(key).is_some())
    }

    async fn replace_if_equals(
        &self,
        current_key: &str,
        expected: &str,
        next_key: &str,
        next_value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut entries = self.live_entries()?;
        match entries.get(current_key) {
            Some((value, _)) if value == expected => {
                entries.remove(current_key);
                entries.insert(
                    next_key.to_string(),
                    (next_value.to_string(), Instant::now() + ttl),
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.live_entries().map(|_| ())
    }
}
