//! Error taxonomy for the multiple-shooting SQP engine.
//!
//! Only conditions that leave the solver unable to produce a usable
//! [`crate::PrimalSolution`] are represented here. Failing to converge within
//! the configured iteration budget is *not* an error: the driver returns the
//! last accepted iterate together with an [`crate::PerformanceIndex`] log the
//! caller can inspect.

use thiserror::Error;

/// Fatal conditions raised while solving an optimal control problem.
#[derive(Error, Debug)]
pub enum ShootError {
    /// The QP back-end reported that the structured subproblem has no
    /// solution (e.g. the condensed system is singular, or the underlying
    /// solver hit its own iteration limit without a certificate).
    #[error("QP back-end failed to solve node {node} subproblem: {reason}")]
    QpSolveFailure { node: usize, reason: String },

    /// A caller asked the performance log for an iteration that was never
    /// recorded, or queried an empty log.
    #[error("performance log has no entry for iteration {requested} (log has {available})")]
    EmptyLogQuery { requested: usize, available: usize },

    /// Two collaborator-supplied quantities that must agree on dimension did
    /// not. This indicates a bug in a `SystemDynamics`/`CostFunction`/
    /// `Constraint` implementation, not a numerical failure.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A constraint projection (state-input equality null-space reduction)
    /// hit a rank-deficient `dfdu` block and cannot proceed. Per design, the
    /// engine fails fast here rather than attempting a least-squares
    /// fallback the caller did not ask for.
    #[error("constraint projection at node {node} is rank deficient (rank {rank} of {expected})")]
    RankDeficientProjection {
        node: usize,
        rank: usize,
        expected: usize,
    },

    /// The time grid could not be constructed from the supplied horizon and
    /// event list (e.g. an event time outside `[t0, tf]`, or `dt <= 0`).
    #[error("invalid time grid: {0}")]
    InvalidTimeGrid(String),

    /// A solution or iteration log could not be serialized to/from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the engine.
pub type ShootResult<T> = Result<T, ShootError>;
