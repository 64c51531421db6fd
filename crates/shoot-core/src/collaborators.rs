//! Strategy-pattern traits the solver is built against. A caller supplies
//! one implementation of each to describe a concrete optimal control
//! problem; the engine itself never hard-codes a dynamics model or cost
//! shape.
//!
//! Each trait is `Send + Sync`: `Send` because one instance per worker
//! thread is cloned out of the caller-supplied prototype at solver
//! construction (see the worker pool) and then owned exclusively by that
//! thread for the life of the solve; `Sync` because the per-worker clones
//! are indexed out of one shared slice inside the worker pool's dispatch
//! closure, which is itself required to be `Sync` even though each worker
//! only ever reads its own slot. `clone_boxed` is the standard object-safe
//! substitute for `Clone` on a trait object.

use crate::types::{Matrix, Vector};

/// Splits the horizon into dynamics modes. Event times mark mode switches;
/// the grid builder duplicates each event time with a small epsilon offset
/// so the node immediately before and after a switch both exist on the
/// grid.
#[derive(Debug, Clone, Default)]
pub struct ModeSchedule {
    event_times: Vec<f64>,
}

impl ModeSchedule {
    pub fn new(mut event_times: Vec<f64>) -> Self {
        event_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Self { event_times }
    }

    pub fn event_times(&self) -> &[f64] {
        &self.event_times
    }

    /// Index of the active mode at time `t` (mode 0 before the first event).
    pub fn mode_at(&self, t: f64) -> usize {
        self.event_times.partition_point(|&e| e <= t)
    }
}

/// Reference signals the cost function is penalizing deviation from.
pub trait DesiredTrajectories: Send + Sync {
    fn desired_state(&self, t: f64) -> Vector;
    fn desired_input(&self, t: f64) -> Vector;

    fn clone_boxed(&self) -> Box<dyn DesiredTrajectories>;
}

/// Continuous-time system dynamics `dx/dt = f(t, x, u)` plus its
/// linearization, evaluated per mode.
pub trait SystemDynamics: Send + Sync {
    /// `f(t, x, u)`.
    fn flow_map(&self, t: f64, x: &Vector, u: &Vector, mode: usize) -> Vector;

    /// `(df/dx, df/du)` at `(t, x, u)`.
    fn jacobians(&self, t: f64, x: &Vector, u: &Vector, mode: usize) -> (Matrix, Matrix);

    fn clone_boxed(&self) -> Box<dyn SystemDynamics>;
}

/// Running and terminal cost, plus quadratic approximations around a
/// linearization point.
pub trait CostFunction: Send + Sync {
    fn stage_cost(&self, t: f64, x: &Vector, u: &Vector, desired: &dyn DesiredTrajectories) -> f64;

    fn stage_quadratic_approx(
        &self,
        t: f64,
        x: &Vector,
        u: &Vector,
        desired: &dyn DesiredTrajectories,
    ) -> crate::types::CostBlock;

    fn terminal_cost(&self, t: f64, x: &Vector, desired: &dyn DesiredTrajectories) -> f64;

    fn terminal_quadratic_approx(
        &self,
        t: f64,
        x: &Vector,
        desired: &dyn DesiredTrajectories,
    ) -> crate::types::CostBlock;

    fn clone_boxed(&self) -> Box<dyn CostFunction>;
}

/// Optional state-input constraints. Any method may return `None` at a
/// given node to signal "no constraint active here".
pub trait Constraint: Send + Sync {
    /// Linearized state-input equality `f + dfdx*dx + dfdu*du = 0`.
    fn state_input_equality(
        &self,
        t: f64,
        x: &Vector,
        u: &Vector,
    ) -> Option<crate::types::ConstraintBlock>;

    /// Linearized inequality `g + dgdx*dx + dgdu*du >= 0`, handled via a
    /// relaxed log-barrier penalty rather than an active-set method.
    fn inequality(&self, t: f64, x: &Vector, u: &Vector) -> Option<crate::types::ConstraintBlock>;

    fn terminal_equality(&self, t: f64, x: &Vector) -> Option<crate::types::ConstraintBlock>;

    fn terminal_inequality(&self, t: f64, x: &Vector) -> Option<crate::types::ConstraintBlock>;

    fn clone_boxed(&self) -> Box<dyn Constraint>;
}

/// Supplies an operating (nominal) trajectory used to cold-start nodes that
/// a warm start does not cover.
pub trait OperatingTrajectories: Send + Sync {
    /// Returns a guessed `(x, u)` pair valid for the interval `[t, next_t)`.
    fn sample(&self, t: f64, next_t: f64) -> (Vector, Vector);

    fn clone_boxed(&self) -> Box<dyn OperatingTrajectories>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_schedule_sorts_event_times() {
        let schedule = ModeSchedule::new(vec![0.5, 0.1, 0.3]);
        assert_eq!(schedule.event_times(), &[0.1, 0.3, 0.5]);
    }

    #[test]
    fn mode_at_counts_events_strictly_before_t() {
        let schedule = ModeSchedule::new(vec![0.25, 0.5]);
        assert_eq!(schedule.mode_at(0.0), 0);
        assert_eq!(schedule.mode_at(0.25), 1);
        assert_eq!(schedule.mode_at(0.4), 1);
        assert_eq!(schedule.mode_at(0.5), 2);
        assert_eq!(schedule.mode_at(0.9), 2);
    }
}
