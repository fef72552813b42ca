use redis::Script;
use std::sync::OnceLock;

/// Ownership-checked release: delete the key only if it still holds the
/// caller's identifier. Returns 1 on delete, 0 otherwise.
pub const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Ownership-checked renewal: extend the key's TTL (milliseconds) only if it
/// still holds the caller's identifier. Returns 1 on success, 0 otherwise.
pub const RENEW_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Increment a counter, attaching the window TTL (milliseconds) only on the
/// first increment. Returns the post-increment value.
pub const INCR_WITH_EXPIRE_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

/// Fixed-window admission: increment, set the window TTL (milliseconds) on
/// first increment, and compare against the ceiling. Returns 1 when the
/// post-increment value is within the ceiling, 0 otherwise.
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
if current <= tonumber(ARGV[2]) then
    return 1
else
    return 0
end
"#;

/// Multi-window admission over one counter per rule.
///
/// KEYS[i] is the counter for rule i; ARGV holds (duration seconds, limit)
/// pairs in the same order. Rules are checked in caller order and the first
/// violation short-circuits, returning `{100 + rule_index, ttl}` with the
/// violated counter's remaining TTL. `{1, 0}` when every rule admits.
pub const SLIDING_COUNTERS_SCRIPT: &str = r#"
for i = 1, #KEYS do
    local duration = tonumber(ARGV[(i - 1) * 2 + 1])
    local limit = tonumber(ARGV[(i - 1) * 2 + 2])
    local count = redis.call("INCR", KEYS[i])
    if count == 1 then
        redis.call("EXPIRE", KEYS[i], duration)
    end
    if count > limit then
        local ttl = redis.call("TTL", KEYS[i])
        if ttl < 0 then
            ttl = duration
        end
        return {100 + (i - 1), ttl}
    end
end
return {1, 0}
"#;

/// Multi-window admission over a single sorted set of event timestamps.
///
/// KEYS[1] is the event log. ARGV[1] = now (seconds), ARGV[2] = unique member,
/// ARGV[3] = longest window (seconds), ARGV[4..] = (window seconds, limit)
/// pairs in caller order. Events older than the longest window are pruned
/// first; a rule counts events with scores in `(now - window, now]`, so an
/// event stops counting once `window` whole seconds have passed and a caller
/// that waits out `retry_after` is admitted. The first violated rule
/// short-circuits with `{100 + rule_index, seconds until its oldest event
/// ages out}` and the event is not recorded. `{1, 0}` when admitted, after
/// recording the event and refreshing the log TTL.
pub const SLIDING_LOG_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local member = ARGV[2]
local ttl = tonumber(ARGV[3])
redis.call("ZREMRANGEBYSCORE", KEYS[1], "-inf", now - ttl)
for i = 4, #ARGV, 2 do
    local window = tonumber(ARGV[i])
    local limit = tonumber(ARGV[i + 1])
    local count = redis.call("ZCOUNT", KEYS[1], "(" .. (now - window), now)
    if count >= limit then
        local retry = window
        local oldest = redis.call("ZRANGEBYSCORE", KEYS[1], "(" .. (now - window), now, "WITHSCORES", "LIMIT", 0, 1)
        if oldest[2] then
            retry = math.ceil(tonumber(oldest[2]) + window - now)
        end
        if retry < 1 then
            retry = 1
        end
        return {100 + (i - 4) / 2, retry}
    end
end
redis.call("ZADD", KEYS[1], now, member)
redis.call("EXPIRE", KEYS[1], ttl + 5)
return {1, 0}
"#;

/// A script source paired with a one-shot registration cell.
///
/// `get` compiles and registers the script exactly once per cell, no matter
/// how many tasks race on it; every caller observes the same handle
/// afterwards. `redis::Script` carries the body and its SHA1, upgrading
/// EVALSHA to EVAL transparently on first execution against a server.
pub struct LazyScript {
    source: &'static str,
    cell: OnceLock<Script>,
}

impl LazyScript {
    pub const fn new(source: &'static str) -> Self {
        Self {
            source,
            cell: OnceLock::new(),
        }
    }

    /// Registered handle, initializing on first call.
    pub fn get(&self) -> &Script {
        self.cell.get_or_init(|| Script::new(self.source))
    }

    pub fn source(&self) -> &'static str {
        self.source
    }
}

/// The full set of coordination scripts, owned by a client instance.
///
/// Kept per client (behind `Arc`) rather than as process globals so that
/// independently configured clients never share registration state.
pub(crate) struct ScriptSet {
    pub(crate) unlock: LazyScript,
    pub(crate) renew_lock: LazyScript,
    pub(crate) incr_with_expire: LazyScript,
    pub(crate) fixed_window: LazyScript,
    pub(crate) sliding_counters: LazyScript,
    pub(crate) sliding_log: LazyScript,
}

impl ScriptSet {
    pub(crate) fn new() -> Self {
        Self {
            unlock: LazyScript::new(UNLOCK_SCRIPT),
            renew_lock: LazyScript::new(RENEW_LOCK_SCRIPT),
            incr_with_expire: LazyScript::new(INCR_WITH_EXPIRE_SCRIPT),
            fixed_window: LazyScript::new(FIXED_WINDOW_SCRIPT),
            sliding_counters: LazyScript::new(SLIDING_COUNTERS_SCRIPT),
            sliding_log: LazyScript::new(SLIDING_LOG_SCRIPT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_idempotent() {
        let script = LazyScript::new(UNLOCK_SCRIPT);
        let first = script.get() as *const Script;
        let second = script.get() as *const Script;
        assert_eq!(first, second);
    }

    #[test]
    fn test_concurrent_registration_yields_one_handle() {
        let script = LazyScript::new(SLIDING_LOG_SCRIPT);
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| script.get() as *const Script as usize))
                .collect();
            let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert!(addrs.windows(2).all(|w| w[0] == w[1]));
        });
    }

    #[test]
    fn test_script_sources_are_well_formed() {
        assert!(UNLOCK_SCRIPT.contains("GET") && UNLOCK_SCRIPT.contains("DEL"));
        assert!(RENEW_LOCK_SCRIPT.contains("PEXPIRE"));
        assert!(INCR_WITH_EXPIRE_SCRIPT.contains("INCR"));
        assert!(FIXED_WINDOW_SCRIPT.contains("PEXPIRE"));
        assert!(SLIDING_COUNTERS_SCRIPT.contains("TTL"));
        assert!(SLIDING_LOG_SCRIPT.contains("ZREMRANGEBYSCORE"));
        assert!(SLIDING_LOG_SCRIPT.contains("ZCOUNT"));
    }

    #[test]
    fn test_script_set_registers_distinct_scripts() {
        let scripts = ScriptSet::new();
        let unlock = scripts.unlock.get();
        let renew = scripts.renew_lock.get();
        assert_ne!(unlock.get_hash(), renew.get_hash());
        assert_eq!(scripts.unlock.source(), UNLOCK_SCRIPT);
    }
}
