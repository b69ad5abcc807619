use thiserror::Error;

/// Failures raised by a [`Sequence`](crate::sequence::Sequence) while
/// scheduling or running its units.
///
/// The type is `Clone` because a settled sequence hands the same error to
/// every completion listener.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequenceError {
    #[error("MAX_COMPLEXITY exceeded by sequence {sequence} with complexity count: {cost}")]
    ComplexityExceeded { sequence: String, cost: f64 },

    #[error("sequence {0} was cancelled")]
    Cancelled(String),

    #[error("sequence {0} ran out of work without resolving")]
    Unresolved(String),

    #[error("step failed: {0}")]
    Step(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Only ever logged: the pipeline skips the level and keeps going.
    #[error("clustering failed at {level}: {source}")]
    ClusteringLevelFailed { level: String, source: ClusterError },

    #[error("Clustering failed to generate centroids")]
    NoCentroidsProduced,

    #[error("palette extraction was cancelled")]
    Cancelled,
}
