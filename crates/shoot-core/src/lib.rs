//! Foundational types and collaborator traits for multiple-shooting SQP
//! solves of finite-horizon optimal control problems.
//!
//! This crate has no solver logic of its own: it defines the data model
//! (`OcpSize`, `DynamicsBlock`, `CostBlock`, `ConstraintBlock`,
//! `PerformanceIndex`, `PrimalSolution`, `Controller`), the error taxonomy,
//! and the Strategy-pattern traits (`SystemDynamics`, `CostFunction`,
//! `Constraint`, `OperatingTrajectories`, `DesiredTrajectories`,
//! `ModeSchedule`) that a concrete optimal control problem is described
//! against. The SQP engine itself lives in `shoot-algo`.

pub mod collaborators;
pub mod error;
pub mod types;

pub use collaborators::{
    Constraint, CostFunction, DesiredTrajectories, ModeSchedule, OperatingTrajectories,
    SystemDynamics,
};
pub use error::{ShootError, ShootResult};
pub use types::{
    identity, zeros, Controller, CostBlock, ConstraintBlock, DynamicsBlock, Matrix, OcpSize,
    PerformanceIndex, PrimalSolution, Vector,
};
