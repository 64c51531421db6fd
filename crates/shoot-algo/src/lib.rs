//! Multiple-shooting SQP engine for finite-horizon optimal control.
//!
//! Ties together a time grid (`grid`), a worker pool (`pool`), per-node
//! linearization and constraint handling (`transcribe`, `project`,
//! `barrier`), subproblem assembly across the pool (`assembler`), a
//! structured Riccati QP back-end (`qp`), a filter line search
//! (`linesearch`), trajectory (re-)initialization (`initializer`), and the
//! derivative-free merit evaluator the line search re-evaluates against
//! (`performance`). `driver` is the top-level entry point: it owns the
//! per-worker collaborator clones and runs the outer SQP loop.
//!
//! The data model and collaborator traits this crate is written against
//! live in `shoot-core`.

pub mod assembler;
pub mod barrier;
pub mod config;
pub mod driver;
pub mod grid;
pub mod initializer;
pub mod integrator;
pub mod linalg;
pub mod linesearch;
pub mod performance;
pub mod pool;
pub mod project;
pub mod qp;
pub mod transcribe;

pub use assembler::{assemble, Assembly};
pub use config::{IntegratorType, SqpSettings};
pub use driver::{PerformanceReport, PhaseTimings, SqpSolver};
pub use grid::{build_time_grid, TimeGrid};
pub use initializer::{initialize, PreviousTrajectory};
pub use linesearch::{Decision, SearchOutcome};
pub use pool::WorkerPool;
pub use project::Projection;
pub use qp::{QpSolution, RiccatiQp, StageFeedback};
