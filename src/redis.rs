use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::error::{CoordinationError, Result};
use crate::script::ScriptSet;

/// Redis client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Some(Duration::from_secs(5)),
            command_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// Client for the coordination keyspace.
///
/// Wraps a multiplexed connection manager plus the per-instance script
/// registry. Cloning is cheap and clones share both; the client is safe for
/// concurrent use from many tasks because all cross-call atomicity lives in
/// the server-side scripts.
#[derive(Clone)]
pub struct RedisClient {
    pub(crate) connection: ConnectionManager,
    pub(crate) scripts: Arc<ScriptSet>,
    config: RedisConfig,
}

impl RedisClient {
    /// Create a new Redis client and verify the connection
    pub async fn new(config: RedisConfig) -> Result<Self> {
        use tracing::{info, warn};

        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            CoordinationError::Redis(e)
        })?;

        let connection_result = tokio::time::timeout(
            config.connection_timeout.unwrap_or(Duration::from_secs(10)),
            client.get_connection_manager(),
        )
        .await;

        let connection = match connection_result {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("Failed to create connection manager: {}", e);
                return Err(CoordinationError::Redis(e));
            }
            Err(_) => {
                warn!(
                    "Timeout while creating connection manager ({}s)",
                    config
                        .connection_timeout
                        .unwrap_or(Duration::from_secs(10))
                        .as_secs()
                );
                return Err(CoordinationError::Service(
                    "Timeout while creating Redis connection manager".to_string(),
                ));
            }
        };

        let mut conn = connection.clone();
        let ping_result = tokio::time::timeout(
            config.command_timeout.unwrap_or(Duration::from_secs(5)),
            redis::cmd("PING").query_async::<_, ()>(&mut conn),
        )
        .await;

        match ping_result {
            Ok(Ok(_)) => {
                info!("Redis client initialized successfully");
            }
            Ok(Err(e)) => {
                warn!("Redis PING failed: {}", e);
                return Err(CoordinationError::Redis(e));
            }
            Err(_) => {
                warn!(
                    "Redis PING timeout ({}s)",
                    config
                        .command_timeout
                        .unwrap_or(Duration::from_secs(5))
                        .as_secs()
                );
                return Err(CoordinationError::Service(
                    "Timeout while testing Redis connection".to_string(),
                ));
            }
        }

        Ok(Self {
            connection,
            scripts: Arc::new(ScriptSet::new()),
            config,
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get the current string value of a key
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    /// Delete the given keys unconditionally
    pub async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(keys).await?;
        Ok(())
    }

    /// Remaining TTL of a key in seconds (-1 without expiry, -2 if missing)
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        let ttl: i64 = conn.ttl(key).await?;
        Ok(ttl)
    }

    /// Atomically increment a counter, attaching `expiration` only when this
    /// call created it. Returns the post-increment value. The TTL is set
    /// exactly once per key lifetime, so later increments never extend the
    /// window.
    pub async fn incr_with_expire(&self, key: &str, expiration: Duration) -> Result<i64> {
        let mut conn = self.connection.clone();
        let count: i64 = self
            .scripts
            .incr_with_expire
            .get()
            .key(key)
            .arg(expiration.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    /// Check if the connection is healthy
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(CoordinationError::Redis)?;
        Ok(())
    }
}
