//! Deterministic mapping from (prefix, queue name, suffix) to Redis keys.
//!
//! Every key of a queue lives under `<prefix>:<queue_name>:`; the empty
//! suffix yields the job hash prefix to which a job id is appended. The
//! suffix set is closed: no other key shape exists.

#[derive(Debug, Clone)]
pub struct QueueKeys {
    queue_name: String,
    base: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, queue_name: &str) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            base: format!("{prefix}:{queue_name}:"),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// The job hash prefix: `<prefix>:<queue_name>:`.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn suffix(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.base)
    }

    pub fn job(&self, job_id: &str) -> String {
        self.suffix(job_id)
    }

    pub fn wait(&self) -> String {
        self.suffix("wait")
    }

    pub fn paused(&self) -> String {
        self.suffix("paused")
    }

    pub fn active(&self) -> String {
        self.suffix("active")
    }

    pub fn prioritized(&self) -> String {
        self.suffix("prioritized")
    }

    pub fn delayed(&self) -> String {
        self.suffix("delayed")
    }

    pub fn completed(&self) -> String {
        self.suffix("completed")
    }

    pub fn failed(&self) -> String {
        self.suffix("failed")
    }

    pub fn stalled(&self) -> String {
        self.suffix("stalled")
    }

    pub fn marker(&self) -> String {
        self.suffix("marker")
    }

    pub fn meta(&self) -> String {
        self.suffix("meta")
    }

    pub fn id(&self) -> String {
        self.suffix("id")
    }

    pub fn priority_counter(&self) -> String {
        self.suffix("pc")
    }

    pub fn limiter(&self) -> String {
        self.suffix("limiter")
    }

    pub fn events(&self) -> String {
        self.suffix("events")
    }

    pub fn metrics(&self, target: &str) -> String {
        self.suffix(&format!("metrics:{target}"))
    }

    pub fn deduplication(&self, deduplication_id: &str) -> String {
        self.suffix(&format!("de:{deduplication_id}"))
    }
}
