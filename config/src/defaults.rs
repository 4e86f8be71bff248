pub const DEFAULT_REDIS_DSN: &str = "redis://localhost:6379/0";
pub const DEFAULT_PREFIX: &str = "oxmq";
pub const DEFAULT_QUEUE_NAME: &str = "default";

pub const DEFAULT_MAX_LEN_EVENTS: i64 = 10_000;
pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_STACK_TRACE_LIMIT: u32 = 10;
pub const DEFAULT_LOCK_DURATION_MS: u64 = 30_000;
pub const DEFAULT_LIMITER_DURATION_MS: u64 = 1_000;
