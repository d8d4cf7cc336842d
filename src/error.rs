use thiserror::Error;

/// Errors surfaced synchronously by the monitoring engine.
///
/// Failures of a single sampling cycle never show up here: they are folded
/// into a `ClassificationFailure` outcome and only count toward the failure
/// streak.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a monitoring session is already active")]
    AlreadyActive,

    #[error("no monitoring session is active")]
    NotActive,

    /// The in-memory counters are still valid; the record stays queued on the
    /// controller so the persist step can be retried.
    #[error("failed to persist session record: {0:#}")]
    Persist(anyhow::Error),

    #[error("sampling scheduler failed: {0}")]
    Scheduler(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
