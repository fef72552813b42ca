//! Redis-backed coordination primitives
//!
//! Distributed mutual-exclusion locks and request-rate limiters sharing one
//! Redis client, with every cross-client decision made by an atomic
//! server-side script. The client holds no authoritative state: TTLs self-heal
//! abandoned locks and expired windows, so a process may crash or restart at
//! any point without corrupting the keyspace.

pub mod error;
pub mod lock;
pub mod redis;
pub mod script;
pub mod sliding;
pub mod window;

// Re-export main types
pub use error::{CoordinationError, Result};
pub use lock::LockOptions;
pub use redis::{RedisClient, RedisConfig};
pub use sliding::{Decision, RateLimiter, Rule, SlidingWindowLimiter, Strategy};
