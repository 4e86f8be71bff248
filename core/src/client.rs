//! The client-side facade over the atomic scripts.
//!
//! Every operation resolves to exactly one script invocation: the facade
//! serializes the payload, packs the compound options, assembles the key
//! array in the order the script expects, and translates negative return
//! codes into typed errors. No client-side locks are held; all cross-key
//! consistency comes from the scripts executing atomically on the server.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use oxmq_config::QueueSettings;
use redis::AsyncCommands;
use redis::Value;
use redis::aio::MultiplexedConnection;
use serde_json::Value as JsonValue;

use crate::codec;
use crate::error::{QueueError, Result, ScriptCode, ScriptFailure};
use crate::job::{AddOutcome, Dispatch, DispatchOrder, JobOptions, JobRecord, JobState};
use crate::keys::QueueKeys;
use crate::registry::ScriptRegistry;
use crate::scripts::{
    ADD_DELAYED_JOB, ADD_STANDARD_JOB, GET_COUNTS, MOVE_TO_ACTIVE, MOVE_TO_FINISHED, PAUSE_QUEUE,
    RETRY_JOB, ScriptDef,
};

/// Options for a lease attempt.
#[derive(Debug, Clone)]
pub struct LeaseOptions {
    /// Token that will own the lock; must be presented again to finish or
    /// retry the job.
    pub token: String,
    /// Lock duration; the queue default applies when absent.
    pub lock_duration_ms: Option<u64>,
    pub limiter: Option<crate::job::RateLimiterOptions>,
}

impl LeaseOptions {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            lock_duration_ms: None,
            limiter: None,
        }
    }
}

/// Options for completing or failing a job.
#[derive(Debug, Clone, Default)]
pub struct FinishOptions {
    pub keep_jobs: crate::job::RetentionPolicy,
    /// Configured attempt budget; drives the retries-exhausted event on
    /// failures. The queue default applies when absent.
    pub attempts: Option<u32>,
    pub max_metrics_size: Option<u32>,
    /// Lease the next job inside the same script invocation.
    pub fetch_next: bool,
    pub lock_duration_ms: Option<u64>,
    pub limiter: Option<crate::job::RateLimiterOptions>,
    pub field_updates: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    pub order: DispatchOrder,
    pub field_updates: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy)]
enum FinishTarget {
    Completed,
    Failed,
}

impl FinishTarget {
    fn state(&self) -> &'static str {
        match self {
            FinishTarget::Completed => "completed",
            FinishTarget::Failed => "failed",
        }
    }

    fn property(&self) -> &'static str {
        match self {
            FinishTarget::Completed => "returnvalue",
            FinishTarget::Failed => "failedReason",
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            FinishTarget::Completed => "moveToCompleted",
            FinishTarget::Failed => "moveToFailed",
        }
    }
}

#[derive(Clone)]
pub struct QueueClient {
    settings: QueueSettings,
    keys: QueueKeys,
    conn: MultiplexedConnection,
    registry: Arc<ScriptRegistry>,
}

impl QueueClient {
    pub async fn connect(settings: QueueSettings) -> Result<Self> {
        let client = redis::Client::open(settings.redis_dsn.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        let mut queue = Self::with_connection(settings, conn);
        queue.install_meta().await?;
        Ok(queue)
    }

    pub fn with_connection(settings: QueueSettings, conn: MultiplexedConnection) -> Self {
        let keys = QueueKeys::new(&settings.prefix, &settings.queue_name);
        Self {
            settings,
            keys,
            conn,
            registry: Arc::new(ScriptRegistry::new()),
        }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Writes the queue-level attributes the scripts read from the meta
    /// hash.
    pub async fn install_meta(&mut self) -> Result<()> {
        let meta = self.keys.meta();
        let _: () = self
            .conn
            .hset(&meta, "opts.maxLenEvents", self.settings.max_len_events)
            .await?;
        if let Some(concurrency) = self.settings.concurrency {
            let _: () = self.conn.hset(&meta, "concurrency", concurrency).await?;
        }
        Ok(())
    }

    /// Adds a job in the waiting or prioritized state.
    pub async fn add_standard(
        &mut self,
        name: &str,
        data: &JsonValue,
        opts: &JobOptions,
    ) -> Result<AddOutcome> {
        if opts.delay_ms > 0 {
            return Err(QueueError::InvalidOptions(
                "a delayed job must be added with add_delayed".to_string(),
            ));
        }
        let keys = vec![
            self.keys.wait(),
            self.keys.paused(),
            self.keys.meta(),
            self.keys.id(),
            self.keys.prioritized(),
            self.keys.delayed(),
            self.keys.active(),
            self.keys.priority_counter(),
            self.keys.events(),
            self.keys.marker(),
        ];
        self.add_job(&ADD_STANDARD_JOB, keys, name, data, opts).await
    }

    /// Adds a job scheduled `opts.delay_ms` after now.
    pub async fn add_delayed(
        &mut self,
        name: &str,
        data: &JsonValue,
        opts: &JobOptions,
    ) -> Result<AddOutcome> {
        if opts.delay_ms == 0 {
            return Err(QueueError::InvalidOptions(
                "add_delayed requires a positive delay".to_string(),
            ));
        }
        let keys = vec![
            self.keys.delayed(),
            self.keys.id(),
            self.keys.events(),
            self.keys.marker(),
        ];
        self.add_job(&ADD_DELAYED_JOB, keys, name, data, opts).await
    }

    /// Adds the job through whichever script its delay selects.
    pub async fn add(
        &mut self,
        name: &str,
        data: &JsonValue,
        opts: &JobOptions,
    ) -> Result<AddOutcome> {
        if opts.delay_ms > 0 {
            self.add_delayed(name, data, opts).await
        } else {
            self.add_standard(name, data, opts).await
        }
    }

    async fn add_job(
        &mut self,
        script: &ScriptDef,
        keys: Vec<String>,
        name: &str,
        data: &JsonValue,
        opts: &JobOptions,
    ) -> Result<AddOutcome> {
        let span = tracing::info_span!(
            "oxmq.add",
            queue = %self.keys.queue_name(),
            job_name = %name,
            script = script.name
        );
        let _enter = span.enter();

        let timestamp = Utc::now().timestamp_millis();
        let packed = codec::pack_job_options(opts)?;
        let payload = serde_json::to_vec(data)?;
        let args = vec![
            self.keys.base().as_bytes().to_vec(),
            opts.job_id.clone().unwrap_or_default().into_bytes(),
            name.as_bytes().to_vec(),
            timestamp.to_string().into_bytes(),
            payload,
            packed,
        ];
        let reply = self.invoke(script, &keys, &args).await?;
        match reply {
            Value::Int(-1) => {
                tracing::debug!("custom job id already exists");
                Ok(AddOutcome::Duplicate)
            }
            Value::BulkString(raw) => {
                let job_id = String::from_utf8(raw).map_err(|_| QueueError::UnexpectedReply {
                    script: script.name,
                    detail: "non-utf8 job id".to_string(),
                })?;
                tracing::info!(job_id = %job_id, "job added");
                Ok(AddOutcome::Queued(job_id))
            }
            other => Err(QueueError::UnexpectedReply {
                script: script.name,
                detail: format!("{other:?}"),
            }),
        }
    }

    /// Leases the next ready job for the calling worker.
    pub async fn move_to_active(&mut self, opts: &LeaseOptions) -> Result<Dispatch> {
        let span = tracing::info_span!(
            "oxmq.move_to_active",
            queue = %self.keys.queue_name(),
            token = %opts.token
        );
        let _enter = span.enter();

        let keys = vec![
            self.keys.wait(),
            self.keys.active(),
            self.keys.prioritized(),
            self.keys.events(),
            self.keys.limiter(),
            self.keys.delayed(),
            self.keys.paused(),
            self.keys.meta(),
            self.keys.priority_counter(),
            self.keys.marker(),
        ];
        let packed = codec::pack_lease_options(
            &opts.token,
            opts.lock_duration_ms
                .unwrap_or(self.settings.default_lock_duration_ms),
            opts.limiter.as_ref(),
        )?;
        let args = vec![
            self.keys.base().as_bytes().to_vec(),
            Utc::now().timestamp_millis().to_string().into_bytes(),
            packed,
        ];
        let reply = self.invoke(&MOVE_TO_ACTIVE, &keys, &args).await?;
        let dispatch = codec::decode_dispatch(MOVE_TO_ACTIVE.name, reply)?;
        if let Dispatch::Job(job) = &dispatch {
            tracing::info!(job_id = %job.id, "job leased");
        }
        Ok(dispatch)
    }

    /// Moves a leased job into the completed history.
    pub async fn move_to_completed(
        &mut self,
        job_id: &str,
        return_value: &JsonValue,
        token: &str,
        opts: &FinishOptions,
    ) -> Result<Option<Dispatch>> {
        let payload = serde_json::to_vec(return_value)?;
        self.move_to_finished(job_id, FinishTarget::Completed, payload, token, opts)
            .await
    }

    /// Moves a leased job into the failed history.
    pub async fn move_to_failed(
        &mut self,
        job_id: &str,
        failed_reason: &str,
        token: &str,
        opts: &FinishOptions,
    ) -> Result<Option<Dispatch>> {
        self.move_to_finished(
            job_id,
            FinishTarget::Failed,
            failed_reason.as_bytes().to_vec(),
            token,
            opts,
        )
        .await
    }

    async fn move_to_finished(
        &mut self,
        job_id: &str,
        target: FinishTarget,
        payload: Vec<u8>,
        token: &str,
        opts: &FinishOptions,
    ) -> Result<Option<Dispatch>> {
        let span = tracing::info_span!(
            "oxmq.move_to_finished",
            queue = %self.keys.queue_name(),
            job_id = %job_id,
            target = target.state()
        );
        let _enter = span.enter();

        let keys = vec![
            self.keys.wait(),
            self.keys.active(),
            self.keys.prioritized(),
            self.keys.events(),
            self.keys.stalled(),
            self.keys.limiter(),
            self.keys.delayed(),
            self.keys.paused(),
            self.keys.meta(),
            self.keys.priority_counter(),
            self.keys.marker(),
            self.keys.suffix(target.state()),
            self.keys.job(job_id),
            self.keys.metrics(target.state()),
        ];
        let packed = codec::pack_finish_options(
            token,
            opts.lock_duration_ms
                .unwrap_or(self.settings.default_lock_duration_ms),
            &opts.keep_jobs,
            opts.attempts.unwrap_or(self.settings.default_attempts),
            opts.max_metrics_size,
            opts.limiter.as_ref(),
            opts.field_updates.as_ref(),
        )?;
        let args = vec![
            job_id.as_bytes().to_vec(),
            Utc::now().timestamp_millis().to_string().into_bytes(),
            target.property().as_bytes().to_vec(),
            payload,
            target.state().as_bytes().to_vec(),
            if opts.fetch_next { b"1".to_vec() } else { b"0".to_vec() },
            self.keys.base().as_bytes().to_vec(),
            packed,
        ];
        let reply = self.invoke(&MOVE_TO_FINISHED, &keys, &args).await?;
        match reply {
            Value::Int(0) => {
                tracing::info!("job finished");
                Ok(None)
            }
            Value::Int(code) => Err(self.script_failure(code, job_id, target.operation())),
            tuple @ Value::Array(_) => {
                tracing::info!("job finished");
                Ok(Some(codec::decode_dispatch(MOVE_TO_FINISHED.name, tuple)?))
            }
            other => Err(QueueError::UnexpectedReply {
                script: MOVE_TO_FINISHED.name,
                detail: format!("{other:?}"),
            }),
        }
    }

    /// Returns a failed job to the queue for another attempt.
    pub async fn retry_job(
        &mut self,
        job_id: &str,
        token: &str,
        opts: &RetryOptions,
    ) -> Result<()> {
        let span = tracing::info_span!(
            "oxmq.retry_job",
            queue = %self.keys.queue_name(),
            job_id = %job_id
        );
        let _enter = span.enter();

        let keys = vec![
            self.keys.active(),
            self.keys.wait(),
            self.keys.paused(),
            self.keys.job(job_id),
            self.keys.meta(),
            self.keys.events(),
            self.keys.delayed(),
            self.keys.prioritized(),
            self.keys.priority_counter(),
            self.keys.marker(),
            self.keys.stalled(),
        ];
        let push_cmd = match opts.order {
            DispatchOrder::Fifo => "LPUSH",
            DispatchOrder::Lifo => "RPUSH",
        };
        let packed = codec::pack_retry_options(opts.field_updates.as_ref())?;
        let args = vec![
            self.keys.base().as_bytes().to_vec(),
            Utc::now().timestamp_millis().to_string().into_bytes(),
            push_cmd.as_bytes().to_vec(),
            job_id.as_bytes().to_vec(),
            token.as_bytes().to_vec(),
            packed,
        ];
        let reply = self.invoke(&RETRY_JOB, &keys, &args).await?;
        match reply {
            Value::Int(0) => {
                tracing::info!("job requeued");
                Ok(())
            }
            Value::Int(code) => Err(self.script_failure(code, job_id, "retryJob")),
            other => Err(QueueError::UnexpectedReply {
                script: RETRY_JOB.name,
                detail: format!("{other:?}"),
            }),
        }
    }

    /// Counts jobs per requested state, in request order.
    pub async fn get_counts(&mut self, states: &[JobState]) -> Result<Vec<u64>> {
        let keys = vec![self.keys.base().to_string()];
        let args: Vec<Vec<u8>> = states
            .iter()
            .map(|state| state.as_str().as_bytes().to_vec())
            .collect();
        let reply = self.invoke(&GET_COUNTS, &keys, &args).await?;
        let counts: Vec<u64> =
            redis::from_redis_value(&reply).map_err(|err| QueueError::UnexpectedReply {
                script: GET_COUNTS.name,
                detail: err.to_string(),
            })?;
        Ok(counts)
    }

    /// Reads a job body hash back, when it still exists.
    pub async fn get_job(&mut self, job_id: &str) -> Result<Option<JobRecord>> {
        let fields: HashMap<String, Vec<u8>> = self.conn.hgetall(self.keys.job(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(JobRecord::from_field_map(fields)?))
    }

    /// Pauses dispatch; the wait backlog moves to the paused list.
    pub async fn pause(&mut self) -> Result<()> {
        self.pause_queue(true).await
    }

    /// Resumes dispatch; the paused backlog moves back to the wait list.
    pub async fn resume(&mut self) -> Result<()> {
        self.pause_queue(false).await
    }

    async fn pause_queue(&mut self, pause: bool) -> Result<()> {
        let (source, destination) = if pause {
            (self.keys.wait(), self.keys.paused())
        } else {
            (self.keys.paused(), self.keys.wait())
        };
        let keys = vec![source, destination, self.keys.meta(), self.keys.marker()];
        let args = vec![if pause { b"1".to_vec() } else { b"0".to_vec() }];
        let _ = self.invoke(&PAUSE_QUEUE, &keys, &args).await?;
        tracing::info!(
            queue = %self.keys.queue_name(),
            paused = pause,
            "queue pause state changed"
        );
        Ok(())
    }

    /// Writes or clears the concurrency cap checked at lease time.
    pub async fn set_concurrency(&mut self, concurrency: Option<i64>) -> Result<()> {
        let meta = self.keys.meta();
        match concurrency {
            Some(value) => {
                let _: () = self.conn.hset(&meta, "concurrency", value).await?;
            }
            None => {
                let _: () = self.conn.hdel(&meta, "concurrency").await?;
            }
        }
        Ok(())
    }

    async fn invoke(
        &mut self,
        script: &ScriptDef,
        keys: &[String],
        args: &[Vec<u8>],
    ) -> Result<Value> {
        debug_assert!(
            script.num_keys.is_none() || script.num_keys == Some(keys.len() as u8),
            "{} expects {:?} keys, got {}",
            script.name,
            script.num_keys,
            keys.len()
        );
        self.registry
            .invoke(&mut self.conn, script, keys, args)
            .await
    }

    fn script_failure(&self, code: i64, job_id: &str, operation: &'static str) -> QueueError {
        match ScriptCode::from_code(code) {
            Some(code) => ScriptFailure::new(code, job_id, operation).into(),
            None => QueueError::UnexpectedReply {
                script: operation,
                detail: format!("unknown return code {code}"),
            },
        }
    }
}
