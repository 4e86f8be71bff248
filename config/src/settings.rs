use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_ATTEMPTS, DEFAULT_LIMITER_DURATION_MS, DEFAULT_LOCK_DURATION_MS,
    DEFAULT_MAX_LEN_EVENTS, DEFAULT_PREFIX, DEFAULT_QUEUE_NAME, DEFAULT_REDIS_DSN,
    DEFAULT_STACK_TRACE_LIMIT,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct QueueSettings {
    pub redis_dsn: String,
    /// Namespace root; every key of a queue lives under `<prefix>:<queue_name>:`.
    pub prefix: String,
    pub queue_name: String,
    /// Approximate cap applied when the event stream is trimmed server side.
    pub max_len_events: i64,
    /// Optional concurrency cap written into the queue meta hash on init.
    pub concurrency: Option<i64>,
    pub default_attempts: u32,
    pub default_stack_trace_limit: u32,
    pub default_lock_duration_ms: u64,
    /// Window applied to the rate limiter key when a budget is consumed.
    pub default_limiter_duration_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            redis_dsn: DEFAULT_REDIS_DSN.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            max_len_events: DEFAULT_MAX_LEN_EVENTS,
            concurrency: None,
            default_attempts: DEFAULT_ATTEMPTS,
            default_stack_trace_limit: DEFAULT_STACK_TRACE_LIMIT,
            default_lock_duration_ms: DEFAULT_LOCK_DURATION_MS,
            default_limiter_duration_ms: DEFAULT_LIMITER_DURATION_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let settings = QueueSettings::default();
        assert_eq!(settings.prefix, "oxmq");
        assert_eq!(settings.queue_name, "default");
        assert_eq!(settings.max_len_events, 10_000);
        assert_eq!(settings.concurrency, None);
        assert_eq!(settings.default_attempts, 3);
    }

    #[test]
    fn partial_toml_uses_defaults_for_the_rest() {
        let settings: QueueSettings =
            toml::from_str("queue_name = \"emails\"\nconcurrency = 4\n").unwrap();
        assert_eq!(settings.queue_name, "emails");
        assert_eq!(settings.concurrency, Some(4));
        assert_eq!(settings.redis_dsn, DEFAULT_REDIS_DSN);
        assert_eq!(settings.default_lock_duration_ms, 30_000);
    }
}
