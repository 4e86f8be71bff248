use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Closed set of negative return codes the scripts use to report a refused
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptCode {
    /// The job body hash does not exist.
    MissingKey,
    /// No lock is recorded for the job.
    MissingLock,
    /// The job is not in the active list.
    NotInActive,
    /// The lock is held by another token.
    LockMismatch,
}

impl ScriptCode {
    pub fn code(&self) -> i64 {
        match self {
            ScriptCode::MissingKey => -1,
            ScriptCode::MissingLock => -2,
            ScriptCode::NotInActive => -3,
            ScriptCode::LockMismatch => -6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(ScriptCode::MissingKey),
            -2 => Some(ScriptCode::MissingLock),
            -3 => Some(ScriptCode::NotInActive),
            -6 => Some(ScriptCode::LockMismatch),
            _ => None,
        }
    }

    /// The state the job was expected to be in for the transition to apply.
    pub fn expected_state(&self) -> &'static str {
        match self {
            ScriptCode::MissingKey => "stored",
            ScriptCode::MissingLock | ScriptCode::NotInActive | ScriptCode::LockMismatch => {
                "active"
            }
        }
    }
}

/// A refused server-side transition, translated from a script return code.
#[derive(Debug, Clone, Error)]
#[error(
    "{operation} refused for job {job_id}: code {} (expected state: {state})",
    code.code()
)]
pub struct ScriptFailure {
    pub code: ScriptCode,
    pub job_id: String,
    pub operation: &'static str,
    pub state: &'static str,
}

impl ScriptFailure {
    pub fn new(code: ScriptCode, job_id: impl Into<String>, operation: &'static str) -> Self {
        Self {
            code,
            job_id: job_id.into(),
            operation,
            state: code.expected_state(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Script(#[from] ScriptFailure),

    #[error("script {name} still not loaded after one reload")]
    ScriptLoad { name: &'static str },

    #[error("unexpected reply from script {script}: {detail}")]
    UnexpectedReply {
        script: &'static str,
        detail: String,
    },

    #[error("failed to decode job field {field}: {detail}")]
    Decode { field: &'static str, detail: String },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("failed to serialize job data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to pack script arguments: {0}")]
    Pack(#[from] rmp_serde::encode::Error),

    #[error("failed to unpack stored options: {0}")]
    Unpack(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}
