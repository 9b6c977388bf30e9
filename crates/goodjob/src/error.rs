//! Error kinds from spec §7. No language-specific type names leak through —
//! callers match on these variants, not on `sqlx`/`serde_json` internals.

use thiserror::Error;

/// The outcome-level error kinds a handler execution, fetch attempt, or
/// limiter check can produce. `Transient`, `LockFailed`, and
/// `ConcurrencyBlocked` are recoverable and handled inside the
/// scheduler/fetch loop; the rest become the persisted job `error`.
#[derive(Debug, Error)]
pub enum GoodJobError {
    #[error("transient error: {reason}")]
    Transient { reason: String },

    #[error("job failure: {reason}")]
    JobFailure { reason: String },

    #[error("timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("discarded: {reason}")]
    Discard { reason: String },

    #[error("cancelled: {reason}")]
    Cancel { reason: String },

    #[error("interrupted: worker shutting down mid-run")]
    Interrupt,

    #[error("concurrency blocked: {reason}")]
    ConcurrencyBlocked { reason: String },

    #[error("deserialization failure: {reason}")]
    DeserializationFailure { reason: String },

    #[error("lock failed for key {key}")]
    LockFailed { key: i64 },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl GoodJobError {
    /// Whether this kind is recoverable at the scheduler level and must
    /// never be persisted as the job's terminal `error` column.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GoodJobError::Transient { .. }
                | GoodJobError::LockFailed { .. }
                | GoodJobError::ConcurrencyBlocked { .. }
        )
    }

    /// Whether a handler returning this error should never consume a retry
    /// attempt (spec §4.5 "Interrupt").
    pub fn is_interrupt(&self) -> bool {
        matches!(self, GoodJobError::Interrupt)
    }

    pub fn reason(&self) -> String {
        match self {
            GoodJobError::Transient { reason } => reason.clone(),
            GoodJobError::JobFailure { reason } => reason.clone(),
            GoodJobError::Timeout { millis } => format!("timeout after {millis}ms"),
            GoodJobError::Discard { reason } => reason.clone(),
            GoodJobError::Cancel { reason } => reason.clone(),
            GoodJobError::Interrupt => "interrupted".to_string(),
            GoodJobError::ConcurrencyBlocked { reason } => reason.clone(),
            GoodJobError::DeserializationFailure { reason } => reason.clone(),
            GoodJobError::LockFailed { key } => format!("lock failed for key {key}"),
            GoodJobError::Database(e) => e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GoodJobError>;
