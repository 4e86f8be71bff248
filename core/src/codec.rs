//! Binary packing of compound script arguments and decoding of script
//! replies.
//!
//! Compound arguments travel as msgpack maps with named fields so the Lua
//! side reads them with `cmsgpack.unpack`. The packing is deterministic:
//! fields are written in declaration order and absent fields are omitted,
//! so equal options always produce equal bytes.

use std::collections::HashMap;

use redis::Value;
use serde::{Deserialize, Serialize};

use crate::error::{QueueError, Result};
use crate::job::{
    ActiveJob, DeduplicationOptions, Dispatch, DispatchOrder, JobOptions, JobRecord, MAX_PRIORITY,
    RateLimiterOptions, RetentionPolicy,
};

#[derive(Debug, Serialize, Deserialize)]
struct PackedDedup {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replace: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extend: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackedKeepJobs {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackedLimiter {
    max: u32,
    duration: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackedJobOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lifo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    de: Option<PackedDedup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rjk: Option<String>,
    attempts: u32,
    stl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    remove_on_complete: Option<PackedKeepJobs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remove_on_fail: Option<PackedKeepJobs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limiter: Option<PackedLimiter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackedLeaseOpts<'a> {
    token: &'a str,
    lock_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    limiter: Option<PackedLimiter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackedFinishOpts<'a> {
    token: &'a str,
    lock_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_jobs: Option<PackedKeepJobs>,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_metrics_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limiter: Option<PackedLimiter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_updates: Option<&'a HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackedRetryOpts<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    field_updates: Option<&'a HashMap<String, String>>,
}

fn keep_jobs_wire(policy: &RetentionPolicy) -> Option<PackedKeepJobs> {
    match policy {
        RetentionPolicy::KeepAll => None,
        RetentionPolicy::RemoveAll => Some(PackedKeepJobs {
            count: Some(0),
            age: None,
        }),
        RetentionPolicy::Keep { count, age_seconds } => Some(PackedKeepJobs {
            count: count.map(i64::from),
            age: *age_seconds,
        }),
    }
}

fn keep_jobs_policy(wire: Option<PackedKeepJobs>) -> RetentionPolicy {
    match wire {
        None => RetentionPolicy::KeepAll,
        Some(PackedKeepJobs {
            count: Some(0),
            age: None,
        }) => RetentionPolicy::RemoveAll,
        Some(PackedKeepJobs { count, age }) => RetentionPolicy::Keep {
            count: count.and_then(|value| u32::try_from(value).ok()),
            age_seconds: age,
        },
    }
}

fn limiter_wire(limiter: Option<&RateLimiterOptions>) -> Option<PackedLimiter> {
    limiter.map(|limiter| PackedLimiter {
        max: limiter.max,
        duration: limiter.duration_ms,
    })
}

pub(crate) fn pack_job_options(opts: &JobOptions) -> Result<Vec<u8>> {
    let wire = PackedJobOpts {
        delay: (opts.delay_ms > 0).then_some(opts.delay_ms),
        priority: (opts.priority > 0).then_some(opts.priority.min(MAX_PRIORITY)),
        lifo: (opts.order == DispatchOrder::Lifo).then_some(true),
        de: opts.deduplication.as_ref().map(|de| PackedDedup {
            id: de.id.clone(),
            ttl: de.ttl_ms,
            replace: de.replace.then_some(true),
            extend: de.extend.then_some(true),
        }),
        rjk: opts.repeat_job_key.clone(),
        attempts: opts.attempts,
        stl: opts.stack_trace_limit,
        remove_on_complete: keep_jobs_wire(&opts.remove_on_complete),
        remove_on_fail: keep_jobs_wire(&opts.remove_on_fail),
        limiter: limiter_wire(opts.limiter.as_ref()),
    };
    Ok(rmp_serde::to_vec_named(&wire)?)
}

pub(crate) fn unpack_job_options(raw: &[u8]) -> Result<JobOptions> {
    let wire: PackedJobOpts = rmp_serde::from_slice(raw)?;
    Ok(JobOptions {
        job_id: None,
        delay_ms: wire.delay.unwrap_or(0),
        priority: wire.priority.unwrap_or(0),
        order: if wire.lifo.unwrap_or(false) {
            DispatchOrder::Lifo
        } else {
            DispatchOrder::Fifo
        },
        remove_on_complete: keep_jobs_policy(wire.remove_on_complete),
        remove_on_fail: keep_jobs_policy(wire.remove_on_fail),
        attempts: wire.attempts,
        stack_trace_limit: wire.stl,
        deduplication: wire.de.map(|de| DeduplicationOptions {
            id: de.id,
            ttl_ms: de.ttl,
            replace: de.replace.unwrap_or(false),
            extend: de.extend.unwrap_or(false),
        }),
        repeat_job_key: wire.rjk,
        limiter: wire.limiter.map(|limiter| RateLimiterOptions {
            max: limiter.max,
            duration_ms: limiter.duration,
        }),
    })
}

pub(crate) fn pack_lease_options(
    token: &str,
    lock_duration_ms: u64,
    limiter: Option<&RateLimiterOptions>,
) -> Result<Vec<u8>> {
    let wire = PackedLeaseOpts {
        token,
        lock_duration: lock_duration_ms,
        limiter: limiter_wire(limiter),
    };
    Ok(rmp_serde::to_vec_named(&wire)?)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn pack_finish_options(
    token: &str,
    lock_duration_ms: u64,
    keep_jobs: &RetentionPolicy,
    attempts: u32,
    max_metrics_size: Option<u32>,
    limiter: Option<&RateLimiterOptions>,
    field_updates: Option<&HashMap<String, String>>,
) -> Result<Vec<u8>> {
    let wire = PackedFinishOpts {
        token,
        lock_duration: lock_duration_ms,
        keep_jobs: keep_jobs_wire(keep_jobs),
        attempts,
        max_metrics_size,
        limiter: limiter_wire(limiter),
        field_updates,
    };
    Ok(rmp_serde::to_vec_named(&wire)?)
}

pub(crate) fn pack_retry_options(
    field_updates: Option<&HashMap<String, String>>,
) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(&PackedRetryOpts { field_updates })?)
}

fn bytes_of(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(text) => Some(text.clone().into_bytes()),
        Value::Int(number) => Some(number.to_string().into_bytes()),
        _ => None,
    }
}

fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::Int(number) => Some(*number),
        Value::BulkString(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        _ => None,
    }
}

fn unexpected(script: &'static str, detail: impl Into<String>) -> QueueError {
    QueueError::UnexpectedReply {
        script,
        detail: detail.into(),
    }
}

pub(crate) fn decode_field_pairs(
    script: &'static str,
    values: &[Value],
) -> Result<HashMap<String, Vec<u8>>> {
    if values.len() % 2 != 0 {
        return Err(unexpected(script, "odd number of hash reply entries"));
    }
    let mut fields = HashMap::with_capacity(values.len() / 2);
    for pair in values.chunks(2) {
        let field = bytes_of(&pair[0])
            .and_then(|raw| String::from_utf8(raw).ok())
            .ok_or_else(|| unexpected(script, "non-string hash field"))?;
        let value = bytes_of(&pair[1]).ok_or_else(|| unexpected(script, "non-bulk hash value"))?;
        fields.insert(field, value);
    }
    Ok(fields)
}

/// Decodes the fixed four-slot tuple
/// `{jobId, body, rateLimitTtl, nextDelayedTimestamp}` of the dispatch
/// scripts.
pub(crate) fn decode_dispatch(script: &'static str, value: Value) -> Result<Dispatch> {
    let Value::Array(slots) = value else {
        return Err(unexpected(script, format!("not a tuple: {value:?}")));
    };
    if slots.len() != 4 {
        return Err(unexpected(script, format!("{} slots", slots.len())));
    }

    if let Value::BulkString(raw_id) = &slots[0] {
        let id = String::from_utf8(raw_id.clone())
            .map_err(|_| unexpected(script, "non-utf8 job id"))?;
        let Value::Array(raw_fields) = &slots[1] else {
            return Err(unexpected(script, "job id without a body"));
        };
        let fields = decode_field_pairs(script, raw_fields)?;
        let record = JobRecord::from_field_map(fields)?;
        return Ok(Dispatch::Job(Box::new(ActiveJob { id, record })));
    }

    let rate_limit_ttl = int_of(&slots[2]).ok_or_else(|| unexpected(script, "bad ttl slot"))?;
    if rate_limit_ttl > 0 {
        return Ok(Dispatch::RateLimited {
            expires_in_ms: rate_limit_ttl as u64,
        });
    }
    let next_delayed = int_of(&slots[3]).ok_or_else(|| unexpected(script, "bad delay slot"))?;
    Ok(Dispatch::Empty {
        next_delayed_until: (next_delayed > 0).then_some(next_delayed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_pack_to_a_two_field_map() {
        let packed = pack_job_options(&JobOptions::default()).unwrap();
        // msgpack fixmap with attempts and stl only
        assert_eq!(packed[0], 0x82);
    }

    #[test]
    fn packing_is_deterministic() {
        let opts = JobOptions {
            priority: 3,
            deduplication: Some(DeduplicationOptions::new("X")),
            ..Default::default()
        };
        assert_eq!(
            pack_job_options(&opts).unwrap(),
            pack_job_options(&opts).unwrap()
        );
    }

    #[test]
    fn options_survive_the_stored_blob() {
        let opts = JobOptions {
            delay_ms: 250,
            priority: 7,
            order: DispatchOrder::Lifo,
            remove_on_complete: RetentionPolicy::Keep {
                count: Some(5),
                age_seconds: Some(3600),
            },
            remove_on_fail: RetentionPolicy::RemoveAll,
            attempts: 2,
            stack_trace_limit: 4,
            deduplication: Some(DeduplicationOptions {
                id: "X".to_string(),
                ttl_ms: Some(60_000),
                replace: true,
                extend: false,
            }),
            repeat_job_key: Some("cron:1".to_string()),
            limiter: Some(RateLimiterOptions {
                max: 2,
                duration_ms: 500,
            }),
            ..Default::default()
        };
        let unpacked = unpack_job_options(&pack_job_options(&opts).unwrap()).unwrap();
        assert_eq!(unpacked, JobOptions { job_id: None, ..opts });
    }

    #[test]
    fn priority_is_clamped_at_the_maximum() {
        let opts = JobOptions {
            priority: MAX_PRIORITY + 10,
            ..Default::default()
        };
        let unpacked = unpack_job_options(&pack_job_options(&opts).unwrap()).unwrap();
        assert_eq!(unpacked.priority, MAX_PRIORITY);
    }

    #[test]
    fn remove_all_maps_to_count_zero() {
        let wire = keep_jobs_wire(&RetentionPolicy::RemoveAll).unwrap();
        assert_eq!(wire.count, Some(0));
        assert_eq!(
            keep_jobs_policy(Some(wire)),
            RetentionPolicy::RemoveAll
        );
        assert_eq!(keep_jobs_policy(None), RetentionPolicy::KeepAll);
    }

    #[test]
    fn dispatch_decodes_the_rate_limited_tuple() {
        let value = Value::Array(vec![
            Value::Int(0),
            Value::Int(0),
            Value::Int(750),
            Value::Int(0),
        ]);
        match decode_dispatch("moveToActive", value).unwrap() {
            Dispatch::RateLimited { expires_in_ms } => assert_eq!(expires_in_ms, 750),
            other => panic!("expected rate limited, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_decodes_the_empty_tuple_with_next_delay() {
        let value = Value::Array(vec![
            Value::Int(0),
            Value::Int(0),
            Value::Int(0),
            Value::Int(1_700_000_000_123),
        ]);
        match decode_dispatch("moveToActive", value).unwrap() {
            Dispatch::Empty { next_delayed_until } => {
                assert_eq!(next_delayed_until, Some(1_700_000_000_123));
            }
            other => panic!("expected empty, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_decodes_a_leased_job() {
        let packed = pack_job_options(&JobOptions::default()).unwrap();
        let fields = vec![
            Value::BulkString(b"name".to_vec()),
            Value::BulkString(b"T".to_vec()),
            Value::BulkString(b"data".to_vec()),
            Value::BulkString(b"{\"n\":1}".to_vec()),
            Value::BulkString(b"opts".to_vec()),
            Value::BulkString(packed),
            Value::BulkString(b"timestamp".to_vec()),
            Value::BulkString(b"1700000000000".to_vec()),
            Value::BulkString(b"delay".to_vec()),
            Value::BulkString(b"0".to_vec()),
            Value::BulkString(b"priority".to_vec()),
            Value::BulkString(b"0".to_vec()),
            Value::BulkString(b"atm".to_vec()),
            Value::BulkString(b"0".to_vec()),
        ];
        let value = Value::Array(vec![
            Value::BulkString(b"42".to_vec()),
            Value::Array(fields),
            Value::Int(0),
            Value::Int(0),
        ]);
        let job = decode_dispatch("moveToActive", value).unwrap().job().unwrap();
        assert_eq!(job.id, "42");
        assert_eq!(job.record.name, "T");
        assert_eq!(job.record.data["n"], 1);
    }

    #[test]
    fn dispatch_rejects_malformed_tuples() {
        let err = decode_dispatch("moveToActive", Value::Int(3)).unwrap_err();
        assert!(matches!(err, QueueError::UnexpectedReply { .. }));

        let err =
            decode_dispatch("moveToActive", Value::Array(vec![Value::Int(0)])).unwrap_err();
        assert!(matches!(err, QueueError::UnexpectedReply { .. }));
    }
}
