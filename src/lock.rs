use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoordinationError, Result};
use crate::redis::RedisClient;

const DEFAULT_KEY_PREFIX: &str = "lock";
const DEFAULT_TRIES: u32 = 5;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Acquisition options shared by the lock operations.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Namespace prepended to every lock key
    pub key_prefix: String,
    /// Number of acquisition attempts before reporting contention
    pub tries: u32,
    /// Fixed delay between acquisition attempts
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            tries: DEFAULT_TRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub(crate) fn qualified_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

impl RedisClient {
    /// Acquire a distributed lock on `key`, returning the holder identifier
    /// that must be presented to [`unlock`](Self::unlock) and
    /// [`renew_lock`](Self::renew_lock).
    ///
    /// The lock is a `SET NX PX` record holding a fresh UUIDv4; acquisition
    /// retries up to `options.tries` times with `options.retry_delay` between
    /// attempts. Failing to acquire within the budget is an expected outcome
    /// under contention and surfaces as
    /// [`CoordinationError::LockUnavailable`].
    pub async fn lock(
        &self,
        key: &str,
        expiration: Duration,
        options: &LockOptions,
    ) -> Result<String> {
        self.lock_with_cancel(key, expiration, &CancellationToken::new(), options)
            .await
    }

    /// [`lock`](Self::lock) with an external cancellation signal. The signal
    /// is checked before every attempt and while waiting between attempts;
    /// triggering it aborts promptly with [`CoordinationError::Cancelled`].
    pub async fn lock_with_cancel(
        &self,
        key: &str,
        expiration: Duration,
        cancel: &CancellationToken,
        options: &LockOptions,
    ) -> Result<String> {
        if options.tries == 0 {
            return Err(CoordinationError::Config(
                "lock tries must be at least 1".to_string(),
            ));
        }
        let identifier = Uuid::new_v4().to_string();
        let full_key = qualified_key(&options.key_prefix, key);
        for attempt in 0..options.tries {
            if cancel.is_cancelled() {
                return Err(CoordinationError::Cancelled);
            }
            if self
                .try_set_lock(&full_key, &identifier, expiration)
                .await?
            {
                return Ok(identifier);
            }
            debug!(key = %full_key, attempt, "lock contended, retrying");
            tokio::select! {
                _ = cancel.cancelled() => return Err(CoordinationError::Cancelled),
                _ = tokio::time::sleep(options.retry_delay) => {}
            }
        }
        Err(CoordinationError::LockUnavailable {
            key: full_key,
            tries: options.tries,
        })
    }

    async fn try_set_lock(
        &self,
        full_key: &str,
        identifier: &str,
        expiration: Duration,
    ) -> Result<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(full_key)
            .arg(identifier)
            .arg("NX")
            .arg("PX")
            .arg(expiration.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Release a lock previously acquired with [`lock`](Self::lock).
    ///
    /// Runs a single atomic compare-and-delete script; if the key no longer
    /// holds `identifier` (expired, or taken by another holder) the key is
    /// left untouched and [`CoordinationError::NotOwner`] is returned.
    pub async fn unlock(&self, key: &str, identifier: &str, options: &LockOptions) -> Result<()> {
        let full_key = qualified_key(&options.key_prefix, key);
        let mut conn = self.connection.clone();
        let released: i64 = self
            .scripts
            .unlock
            .get()
            .key(&full_key)
            .arg(identifier)
            .invoke_async(&mut conn)
            .await?;
        if released == 1 {
            Ok(())
        } else {
            Err(CoordinationError::NotOwner { key: full_key })
        }
    }

    /// Extend the TTL of a held lock without altering its value.
    ///
    /// Same ownership check and atomicity as [`unlock`](Self::unlock); the new
    /// expiration is applied with millisecond precision.
    pub async fn renew_lock(
        &self,
        key: &str,
        identifier: &str,
        expiration: Duration,
        options: &LockOptions,
    ) -> Result<()> {
        let full_key = qualified_key(&options.key_prefix, key);
        let mut conn = self.connection.clone();
        let renewed: i64 = self
            .scripts
            .renew_lock
            .get()
            .key(&full_key)
            .arg(identifier)
            .arg(expiration.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;
        if renewed == 1 {
            Ok(())
        } else {
            Err(CoordinationError::NotOwner { key: full_key })
        }
    }
}
