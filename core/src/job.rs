use std::collections::HashMap;

use serde_json::Value;

use crate::codec;
use crate::error::{QueueError, Result};

/// Highest priority a job may carry; keeps the prioritized score inside the
/// integer range a sorted set stores exactly.
pub const MAX_PRIORITY: u32 = 2_097_151;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Wait,
    Paused,
    Active,
    Prioritized,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Wait => "wait",
            JobState::Paused => "paused",
            JobState::Active => "active",
            JobState::Prioritized => "prioritized",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "wait" => Some(JobState::Wait),
            "paused" => Some(JobState::Paused),
            "active" => Some(JobState::Active),
            "prioritized" => Some(JobState::Prioritized),
            "delayed" => Some(JobState::Delayed),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// List-backed states are measured with LLEN, the rest with ZCARD.
    pub fn is_list_backed(&self) -> bool {
        matches!(self, JobState::Wait | JobState::Paused | JobState::Active)
    }

    pub const ALL: [JobState; 7] = [
        JobState::Wait,
        JobState::Paused,
        JobState::Active,
        JobState::Prioritized,
        JobState::Delayed,
        JobState::Completed,
        JobState::Failed,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchOrder {
    #[default]
    Fifo,
    Lifo,
}

/// What to keep of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    /// Keep the full history.
    #[default]
    KeepAll,
    /// Delete the body and auxiliary keys on finish.
    RemoveAll,
    /// Keep at most `count` entries and/or entries younger than
    /// `age_seconds`.
    Keep {
        count: Option<u32>,
        age_seconds: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeduplicationOptions {
    pub id: String,
    pub ttl_ms: Option<u64>,
    pub replace: bool,
    pub extend: bool,
}

impl DeduplicationOptions {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ttl_ms: None,
            replace: false,
            extend: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterOptions {
    /// Budget of leases per window.
    pub max: u32,
    /// Window length; the limiter key expires after this many milliseconds.
    pub duration_ms: u64,
}

impl RateLimiterOptions {
    pub fn new(max: u32) -> Self {
        Self {
            max,
            duration_ms: oxmq_config::DEFAULT_LIMITER_DURATION_MS,
        }
    }
}

/// The closed option set recognized when adding a job. Unknown keys do not
/// exist at this boundary; everything is typed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    /// Custom job id. Re-adding the same id is reported, not an error.
    pub job_id: Option<String>,
    pub delay_ms: u64,
    /// Higher is earlier; 0 is the lowest class.
    pub priority: u32,
    pub order: DispatchOrder,
    pub remove_on_complete: RetentionPolicy,
    pub remove_on_fail: RetentionPolicy,
    pub attempts: u32,
    pub stack_trace_limit: u32,
    pub deduplication: Option<DeduplicationOptions>,
    pub repeat_job_key: Option<String>,
    pub limiter: Option<RateLimiterOptions>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            delay_ms: 0,
            priority: 0,
            order: DispatchOrder::Fifo,
            remove_on_complete: RetentionPolicy::KeepAll,
            remove_on_fail: RetentionPolicy::KeepAll,
            attempts: oxmq_config::DEFAULT_ATTEMPTS,
            stack_trace_limit: oxmq_config::DEFAULT_STACK_TRACE_LIMIT,
            deduplication: None,
            repeat_job_key: None,
            limiter: None,
        }
    }
}

/// A job body hash read back from the server.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub name: String,
    pub data: Value,
    pub opts: JobOptions,
    pub timestamp: i64,
    pub delay_ms: u64,
    pub priority: u32,
    pub attempts_made: u32,
    pub deduplication_id: Option<String>,
    pub repeat_job_key: Option<String>,
    pub return_value: Option<Value>,
    pub failed_reason: Option<String>,
    pub finished_on: Option<i64>,
}

impl JobRecord {
    pub fn from_field_map(mut fields: HashMap<String, Vec<u8>>) -> Result<Self> {
        let name = take_string(&mut fields, "name")?;
        let data_raw = fields
            .remove("data")
            .ok_or_else(|| missing_field("data"))?;
        let data = serde_json::from_slice(&data_raw).map_err(|err| QueueError::Decode {
            field: "data",
            detail: err.to_string(),
        })?;
        let opts_raw = fields
            .remove("opts")
            .ok_or_else(|| missing_field("opts"))?;
        let opts = codec::unpack_job_options(&opts_raw)?;

        Ok(Self {
            name,
            data,
            opts,
            timestamp: take_number(&mut fields, "timestamp")?,
            delay_ms: take_number::<u64>(&mut fields, "delay")?,
            priority: take_number::<u32>(&mut fields, "priority")?,
            attempts_made: take_number::<u32>(&mut fields, "atm")?,
            deduplication_id: take_optional_string(&mut fields, "deid"),
            repeat_job_key: take_optional_string(&mut fields, "rjk"),
            return_value: fields
                .remove("returnvalue")
                .map(|raw| {
                    serde_json::from_slice(&raw).map_err(|err| QueueError::Decode {
                        field: "returnvalue",
                        detail: err.to_string(),
                    })
                })
                .transpose()?,
            failed_reason: take_optional_string(&mut fields, "failedReason"),
            finished_on: match fields.remove("finishedOn") {
                Some(raw) => Some(parse_number("finishedOn", &raw)?),
                None => None,
            },
        })
    }
}

/// Result of an add operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The job is stored under this id. When a deduplication id was already
    /// owned, this is the id of the surviving owner instead.
    Queued(String),
    /// A custom job id was already taken. The server reports this through
    /// the `duplicated` event; it is not an error.
    Duplicate,
}

impl AddOutcome {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            AddOutcome::Queued(id) => Some(id),
            AddOutcome::Duplicate => None,
        }
    }
}

/// An active job handed to a worker together with its lease.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: String,
    pub record: JobRecord,
}

/// Result of a lease attempt: the four-slot tuple of the dispatch scripts,
/// decoded.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Job(Box<ActiveJob>),
    /// The rate limit budget is exhausted for this many more milliseconds.
    RateLimited { expires_in_ms: u64 },
    /// Nothing dispatchable; `next_delayed_until` is the schedule of the
    /// nearest delayed job when one exists.
    Empty { next_delayed_until: Option<i64> },
}

impl Dispatch {
    pub fn job(self) -> Option<ActiveJob> {
        match self {
            Dispatch::Job(job) => Some(*job),
            _ => None,
        }
    }
}

fn missing_field(field: &'static str) -> QueueError {
    QueueError::Decode {
        field,
        detail: "field absent from job hash".to_string(),
    }
}

fn take_string(fields: &mut HashMap<String, Vec<u8>>, field: &'static str) -> Result<String> {
    let raw = fields.remove(field).ok_or_else(|| missing_field(field))?;
    String::from_utf8(raw).map_err(|err| QueueError::Decode {
        field,
        detail: err.to_string(),
    })
}

fn take_optional_string(fields: &mut HashMap<String, Vec<u8>>, field: &str) -> Option<String> {
    fields
        .remove(field)
        .and_then(|raw| String::from_utf8(raw).ok())
}

fn take_number<T: std::str::FromStr>(
    fields: &mut HashMap<String, Vec<u8>>,
    field: &'static str,
) -> Result<T> {
    let raw = fields.remove(field).ok_or_else(|| missing_field(field))?;
    parse_number(field, &raw)
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &[u8]) -> Result<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(QueueError::Decode {
            field,
            detail: format!("not a number: {:?}", String::from_utf8_lossy(raw)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trip() {
        for state in JobState::ALL {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("nope"), None);
    }

    #[test]
    fn list_backed_states() {
        assert!(JobState::Wait.is_list_backed());
        assert!(JobState::Paused.is_list_backed());
        assert!(JobState::Active.is_list_backed());
        assert!(!JobState::Delayed.is_list_backed());
        assert!(!JobState::Prioritized.is_list_backed());
        assert!(!JobState::Completed.is_list_backed());
    }

    #[test]
    fn record_from_field_map_reads_the_stored_shape() {
        let opts = JobOptions {
            priority: 5,
            ..Default::default()
        };
        let packed = codec::pack_job_options(&opts).unwrap();
        let mut fields: HashMap<String, Vec<u8>> = HashMap::new();
        fields.insert("name".into(), b"T".to_vec());
        fields.insert("data".into(), b"{\"n\":1}".to_vec());
        fields.insert("opts".into(), packed);
        fields.insert("timestamp".into(), b"1700000000000".to_vec());
        fields.insert("delay".into(), b"0".to_vec());
        fields.insert("priority".into(), b"5".to_vec());
        fields.insert("atm".into(), b"0".to_vec());

        let record = JobRecord::from_field_map(fields).unwrap();
        assert_eq!(record.name, "T");
        assert_eq!(record.data["n"], 1);
        assert_eq!(record.priority, 5);
        assert_eq!(record.opts.priority, 5);
        assert_eq!(record.finished_on, None);
        assert_eq!(record.failed_reason, None);
    }

    #[test]
    fn record_requires_the_mandatory_fields() {
        let err = JobRecord::from_field_map(HashMap::new()).unwrap_err();
        assert!(matches!(err, QueueError::Decode { field: "name", .. }));
    }
}
