use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{CoordinationError, Result};
use crate::redis::RedisClient;

/// One rate rule: at most `limit` events over the trailing `duration`.
///
/// `tag` is an opaque label reported back when the rule trips, for
/// user-facing messaging; it has no effect on enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub duration: Duration,
    pub limit: u32,
    pub tag: String,
}

impl Rule {
    pub fn new(duration: Duration, limit: u32, tag: impl Into<String>) -> Self {
        Self {
            duration,
            limit,
            tag: tag.into(),
        }
    }
}

/// Backing realization for the rule tracking. A construction-time detail:
/// both evaluate the same ordered rule list in one atomic script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// One INCR counter per rule, anchored to the first event in its window.
    /// Cheapest; coarse near window boundaries.
    CounterPerRule,
    /// A single sorted set of event timestamps pruned to the longest window.
    /// Exact under bursty arrival.
    EventLog,
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    /// First rule violated in caller order, when denied
    pub violated: Option<Rule>,
    /// Seconds until the violated rule clears, observed atomically at
    /// rejection time; 0 when allowed
    pub retry_after_secs: i64,
}

/// Evaluate and atomically record one event against an ordered rule list.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check `key` against every rule in order. The first violated rule wins
    /// and the event is not recorded; otherwise the event counts toward all
    /// windows.
    async fn allow(&self, key: &str) -> Result<Decision>;

    /// Forget everything tracked for `key`, across all rules.
    async fn reset(&self, key: &str) -> Result<()>;
}

/// Multi-window limiter over a shared Redis keyspace.
///
/// Keys are derived as `<prefix>:{<key>}` (hash-tagged so all per-rule keys
/// land on one cluster slot); each call executes a single atomic script, so
/// concurrent callers interleave only between whole evaluations.
pub struct SlidingWindowLimiter {
    client: RedisClient,
    prefix: String,
    rules: Vec<Rule>,
    strategy: Strategy,
    max_window_secs: i64,
}

fn validate_rules(rules: &[Rule]) -> Result<()> {
    if rules.is_empty() {
        return Err(CoordinationError::Config(
            "at least one rate rule is required".to_string(),
        ));
    }
    for rule in rules {
        if rule.duration < Duration::from_secs(1) {
            return Err(CoordinationError::Config(format!(
                "rule {:?} has sub-second duration; windows are second-granular",
                rule.tag
            )));
        }
    }
    Ok(())
}

fn rule_key(prefix: &str, key: &str, rule: &Rule) -> String {
    format!("{}:{{{}}}:{}s", prefix, key, rule.duration.as_secs())
}

fn log_key(prefix: &str, key: &str) -> String {
    format!("{}:{{{}}}", prefix, key)
}

/// Map the `{code, retry_after}` script reply onto a [`Decision`].
fn map_reply(rules: &[Rule], code: i64, retry_after: i64) -> Result<Decision> {
    if code == 1 {
        return Ok(Decision {
            allowed: true,
            violated: None,
            retry_after_secs: 0,
        });
    }
    if code >= 100 {
        if let Some(rule) = rules.get((code - 100) as usize) {
            return Ok(Decision {
                allowed: false,
                violated: Some(rule.clone()),
                retry_after_secs: retry_after,
            });
        }
    }
    Err(CoordinationError::ScriptReply(format!(
        "sliding window script returned {}",
        code
    )))
}

impl SlidingWindowLimiter {
    /// Create a limiter for `rules`, evaluated in the given order on every
    /// call. Rejects empty rule lists and sub-second durations.
    pub fn new(
        client: RedisClient,
        prefix: impl Into<String>,
        rules: Vec<Rule>,
        strategy: Strategy,
    ) -> Result<Self> {
        validate_rules(&rules)?;
        let max_window_secs = rules
            .iter()
            .map(|r| r.duration.as_secs() as i64)
            .max()
            .unwrap_or(1);
        Ok(Self {
            client,
            prefix: prefix.into(),
            rules,
            strategy,
            max_window_secs,
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    async fn allow_counters(&self, key: &str) -> Result<(i64, i64)> {
        let mut conn = self.client.connection.clone();
        let script = self.client.scripts.sliding_counters.get();
        let mut invocation = script.prepare_invoke();
        for rule in &self.rules {
            invocation.key(rule_key(&self.prefix, key, rule));
        }
        for rule in &self.rules {
            invocation.arg(rule.duration.as_secs()).arg(rule.limit);
        }
        let reply: (i64, i64) = invocation.invoke_async(&mut conn).await?;
        Ok(reply)
    }

    async fn allow_event_log(&self, key: &str) -> Result<(i64, i64)> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_secs() as i64;
        // Member must be unique per event; two events in the same second are
        // disambiguated by the random suffix.
        let member = format!("{}-{}", now, rand::thread_rng().gen_range(0..100_000));
        let mut conn = self.client.connection.clone();
        let script = self.client.scripts.sliding_log.get();
        let mut invocation = script.prepare_invoke();
        invocation
            .key(log_key(&self.prefix, key))
            .arg(now)
            .arg(member)
            .arg(self.max_window_secs);
        for rule in &self.rules {
            invocation.arg(rule.duration.as_secs()).arg(rule.limit);
        }
        let reply: (i64, i64) = invocation.invoke_async(&mut conn).await?;
        Ok(reply)
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn allow(&self, key: &str) -> Result<Decision> {
        let (code, retry_after) = match self.strategy {
            Strategy::CounterPerRule => self.allow_counters(key).await?,
            Strategy::EventLog => self.allow_event_log(key).await?,
        };
        map_reply(&self.rules, code, retry_after)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let keys: Vec<String> = match self.strategy {
            Strategy::CounterPerRule => self
                .rules
                .iter()
                .map(|rule| rule_key(&self.prefix, key, rule))
                .collect(),
            Strategy::EventLog => vec![log_key(&self.prefix, key)],
        };
        self.client.del(&keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<Rule> {
        vec![
            Rule::new(Duration::from_secs(2), 2, "burst"),
            Rule::new(Duration::from_secs(10), 3, "sustained"),
        ]
    }

    #[test]
    fn test_validate_rejects_empty_rules() {
        let err = validate_rules(&[]).unwrap_err();
        assert!(matches!(err, CoordinationError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_subsecond_duration() {
        let short = vec![Rule::new(Duration::from_millis(500), 1, "fast")];
        let err = validate_rules(&short).unwrap_err();
        assert!(matches!(err, CoordinationError::Config(_)));
    }

    #[test]
    fn test_validate_accepts_ordered_rules() {
        assert!(validate_rules(&rules()).is_ok());
    }

    #[test]
    fn test_key_derivation() {
        let rule = Rule::new(Duration::from_secs(60), 5, "minute");
        assert_eq!(
            rule_key("sms:limit", "user42", &rule),
            "sms:limit:{user42}:60s"
        );
        assert_eq!(log_key("sms:limit", "user42"), "sms:limit:{user42}");
    }

    #[test]
    fn test_map_reply_allowed() {
        let decision = map_reply(&rules(), 1, 0).unwrap();
        assert!(decision.allowed);
        assert!(decision.violated.is_none());
        assert_eq!(decision.retry_after_secs, 0);
    }

    #[test]
    fn test_map_reply_first_rule_violated() {
        let decision = map_reply(&rules(), 100, 2).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.violated.unwrap().tag, "burst");
        assert_eq!(decision.retry_after_secs, 2);
    }

    #[test]
    fn test_map_reply_second_rule_violated() {
        let decision = map_reply(&rules(), 101, 8).unwrap();
        assert_eq!(decision.violated.unwrap().tag, "sustained");
        assert_eq!(decision.retry_after_secs, 8);
    }

    #[test]
    fn test_map_reply_out_of_range_code() {
        let err = map_reply(&rules(), 107, 0).unwrap_err();
        assert!(matches!(err, CoordinationError::ScriptReply(_)));
        let err = map_reply(&rules(), -1, 0).unwrap_err();
        assert!(matches!(err, CoordinationError::ScriptReply(_)));
    }
}
