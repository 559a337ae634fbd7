//! Redis shared tier.

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::tier::SharedTier;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Keys requested per `SCAN` step.
const SCAN_COUNT: usize = 200;

/// Redis-backed [`SharedTier`].
///
/// Connects lazily on first use; the connection manager reconnects on its own
/// after the server drops it.
pub struct RedisTier {
    client: Client,
    connection: Mutex<Option<ConnectionManager>>,
    connection_timeout: Duration,
    command_timeout: Duration,
}

impl RedisTier {
    /// Create a tier for `url`. No connection is made yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use tenantscale_cache::{CacheConfig, RedisTier};
    ///
    /// let tier = RedisTier::new(&CacheConfig::redis("redis://localhost:6379")).unwrap();
    /// ```
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| CacheError::Config("Redis URL not set".into()))?;
        let client = Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            connection_timeout: config.connection_timeout,
            command_timeout: config.command_timeout,
        })
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(
            self.connection_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| CacheError::Timeout)?
        .map_err(|e| CacheError::Connection(e.to_string()))?;

        info!("Redis connected successfully");

        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> CacheResult<T> {
        let mut conn = self.connection().await?;
        tokio::time::timeout(self.command_timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(CacheError::from)
    }
}

#[async_trait]
impl SharedTier for RedisTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let ttl_ms = ttl.as_millis().max(1) as u64;
        self.query(redis::cmd("SET").arg(key).arg(value).arg("PX").arg(ttl_ms))
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed: u64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;

            if !keys.is_empty() {
                let removed: u64 = self.query(redis::cmd("DEL").arg(&keys)).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }

    async fn ping(&self) -> CacheResult<()> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn memory_usage(&self) -> CacheResult<Option<String>> {
        let info: String = self.query(redis::cmd("INFO").arg("memory")).await?;
        Ok(parse_used_memory(&info))
    }

    async fn key_count(&self) -> CacheResult<u64> {
        self.query(&redis::cmd("DBSIZE")).await
    }

    async fn close(&self) {
        if self.connection.lock().await.take().is_some() {
            info!("Redis connection closed");
        }
    }
}

/// Extract `used_memory_human` from an `INFO memory` reply.
fn parse_used_memory(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory_human:"))
        .map(|value| value.trim().to_string())
}
