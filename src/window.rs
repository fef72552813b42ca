use chrono::{DateTime, Local};
use rand::Rng;
use std::time::Duration;

use crate::error::{CoordinationError, Result};
use crate::redis::RedisClient;

/// Upper bound on the random offset added to daily-window expiries so that
/// keys created on the same day do not all expire at the same instant.
const DAILY_EXPIRY_JITTER_MS: i64 = 120_000;

/// Milliseconds from `now` until 23:59:59 on the same calendar day.
fn end_of_day_millis(now: &DateTime<Local>) -> i64 {
    let end = now
        .date_naive()
        .and_hms_opt(23, 59, 59)
        .expect("valid wall-clock time");
    (end - now.naive_local()).num_milliseconds()
}

fn daily_key(prefix: &str, date: &str, target: &str) -> String {
    format!("{}:{}:{}", prefix, date, target)
}

impl RedisClient {
    /// Fixed-window admission check.
    ///
    /// Atomically increments the counter at `key`, attaching `window` as its
    /// TTL if this call created it, and admits while the post-increment value
    /// stays within `max_count`. The window advances only when the key
    /// expires; callers wanting a rolling window derive a fresh `key` per
    /// window instance. `max_count = 0` denies every call.
    pub async fn allow_fixed_limit(
        &self,
        key: &str,
        window: Duration,
        max_count: u32,
    ) -> Result<bool> {
        if window.is_zero() {
            return Err(CoordinationError::Config(
                "fixed limit window must be positive".to_string(),
            ));
        }
        self.run_fixed_window(key, window.as_millis() as i64, max_count)
            .await
    }

    /// Per-calendar-day admission check.
    ///
    /// The counter key embeds the current local date, so a new window starts
    /// at midnight; the key's TTL is the time remaining in the day plus a
    /// bounded random offset spreading the midnight expiry burst.
    pub async fn allow_daily_limit(
        &self,
        prefix: &str,
        target: &str,
        max_count: u32,
    ) -> Result<bool> {
        let now = Local::now();
        let key = daily_key(prefix, &now.format("%Y%m%d").to_string(), target);
        let jitter = rand::thread_rng().gen_range(0..=DAILY_EXPIRY_JITTER_MS);
        let ttl_ms = end_of_day_millis(&now).max(1_000) + jitter;
        self.run_fixed_window(&key, ttl_ms, max_count).await
    }

    async fn run_fixed_window(&self, key: &str, ttl_ms: i64, max_count: u32) -> Result<bool> {
        let mut conn = self.connection.clone();
        let allowed: i64 = self
            .scripts
            .fixed_window
            .get()
            .key(key)
            .arg(ttl_ms)
            .arg(max_count)
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_daily_key_format() {
        assert_eq!(
            daily_key("sms:limit", "20260807", "user42"),
            "sms:limit:20260807:user42"
        );
    }

    #[test]
    fn test_end_of_day_millis_bounds() {
        let now = Local::now();
        let remaining = end_of_day_millis(&now);
        assert!(remaining <= 86_400_000);
        // 23:59:59 is the anchor, so the tail second of the day may go
        // slightly negative; callers clamp before use.
        assert!(remaining > -1_000);
    }

    #[test]
    fn test_end_of_day_millis_at_morning() {
        let morning = Local.with_ymd_and_hms(2026, 8, 7, 9, 0, 0).unwrap();
        let remaining = end_of_day_millis(&morning);
        // 09:00:00 -> 23:59:59 is 14h59m59s
        assert_eq!(remaining, (14 * 3600 + 59 * 60 + 59) * 1000);
    }

    #[test]
    fn test_jitter_bound_is_two_minutes() {
        assert_eq!(DAILY_EXPIRY_JITTER_MS, 120_000);
        let jitter = rand::thread_rng().gen_range(0..=DAILY_EXPIRY_JITTER_MS);
        assert!((0..=DAILY_EXPIRY_JITTER_MS).contains(&jitter));
    }
}
