//! oxmq: the atomic core of a Redis-backed job queue.
//!
//! All authoritative state lives in Redis under one queue namespace; every
//! lifecycle transition executes as a single server-side script, so the
//! queue's invariants hold across concurrent producers and workers without
//! client coordination. This crate ships the assembled scripts, the key
//! model, the script registry, and the facade that drives them.

pub mod client;
mod codec;
pub mod error;
pub mod job;
pub mod keys;
pub mod registry;
pub mod scripts;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use client::{FinishOptions, LeaseOptions, QueueClient, RetryOptions};
pub use error::{QueueError, Result, ScriptCode, ScriptFailure};
pub use job::{
    ActiveJob, AddOutcome, DeduplicationOptions, Dispatch, DispatchOrder, JobOptions, JobRecord,
    JobState, MAX_PRIORITY, RateLimiterOptions, RetentionPolicy,
};
pub use keys::QueueKeys;
pub use oxmq_config::QueueSettings;
pub use registry::ScriptRegistry;
