//! Black-box end-to-end scenarios driving only the public `SqpSolver` API
//! (§8 of the design: linear-quadratic convergence, projected equality,
//! event-split grids, warm-start reuse, barrier activation, and a bounded
//! non-convergent solve).

use faer::Mat;
use shoot_algo::{IntegratorType, SqpSettings, SqpSolver};
use shoot_core::{
    identity, zeros, Constraint, ConstraintBlock, CostBlock, CostFunction, DesiredTrajectories,
    Matrix, ModeSchedule, SystemDynamics, Vector,
};

/// Stable linear dynamics `dx/dt = -x + u` (A=-I, B=I), paired with the
/// quadratic tracking cost `Q=I, R=I` in scenarios 1, 2 and 4.
#[derive(Clone)]
struct StableLinear;

impl SystemDynamics for StableLinear {
    fn flow_map(&self, _t: f64, x: &Vector, u: &Vector, _mode: usize) -> Vector {
        x.iter().zip(u).map(|(xi, ui)| -xi + ui).collect()
    }
    fn jacobians(&self, _t: f64, x: &Vector, u: &Vector, _mode: usize) -> (Matrix, Matrix) {
        let dfdx = Mat::from_fn(x.len(), x.len(), |i, j| if i == j { -1.0 } else { 0.0 });
        (dfdx, identity(u.len()))
    }
    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
struct TrackingCost {
    n_state: usize,
    n_input: usize,
}

impl CostFunction for TrackingCost {
    fn stage_cost(&self, _t: f64, x: &Vector, u: &Vector, d: &dyn DesiredTrajectories) -> f64 {
        let xd = d.desired_state(_t);
        let dev: f64 = x.iter().zip(&xd).map(|(xi, xdi)| (xi - xdi) * (xi - xdi)).sum();
        0.5 * (dev + u.iter().map(|v| v * v).sum::<f64>())
    }
    fn stage_quadratic_approx(
        &self,
        t: f64,
        x: &Vector,
        u: &Vector,
        d: &dyn DesiredTrajectories,
    ) -> CostBlock {
        let xd = d.desired_state(t);
        let n = self.n_state + self.n_input;
        let g: Vector = x
            .iter()
            .zip(&xd)
            .map(|(xi, xdi)| xi - xdi)
            .chain(u.iter().copied())
            .collect();
        CostBlock { h: identity(n), g, c: 0.0 }
    }
    fn terminal_cost(&self, _t: f64, x: &Vector, d: &dyn DesiredTrajectories) -> f64 {
        let xd = d.desired_state(_t);
        0.5 * x.iter().zip(&xd).map(|(xi, xdi)| (xi - xdi) * (xi - xdi)).sum::<f64>()
    }
    fn terminal_quadratic_approx(&self, t: f64, x: &Vector, d: &dyn DesiredTrajectories) -> CostBlock {
        let xd = d.desired_state(t);
        let g: Vector = x.iter().zip(&xd).map(|(xi, xdi)| xi - xdi).collect();
        CostBlock { h: identity(self.n_state), g, c: 0.0 }
    }
    fn clone_boxed(&self) -> Box<dyn CostFunction> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
struct ZeroReference {
    n_state: usize,
    n_input: usize,
}
impl DesiredTrajectories for ZeroReference {
    fn desired_state(&self, _t: f64) -> Vector {
        vec![0.0; self.n_state]
    }
    fn desired_input(&self, _t: f64) -> Vector {
        vec![0.0; self.n_input]
    }
    fn clone_boxed(&self) -> Box<dyn DesiredTrajectories> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
struct FixedReference {
    state: Vector,
}
impl DesiredTrajectories for FixedReference {
    fn desired_state(&self, _t: f64) -> Vector {
        self.state.clone()
    }
    fn desired_input(&self, _t: f64) -> Vector {
        vec![0.0]
    }
    fn clone_boxed(&self) -> Box<dyn DesiredTrajectories> {
        Box::new(self.clone())
    }
}

/// Pins the first input component to zero: `C_u = [1, 0]`, `C_x = 0`.
struct PinFirstInput;
impl Constraint for PinFirstInput {
    fn state_input_equality(&self, _t: f64, _x: &Vector, u: &Vector) -> Option<ConstraintBlock> {
        let mut dfdu = zeros(1, u.len());
        dfdu.write(0, 0, 1.0);
        Some(ConstraintBlock {
            f: vec![u[0]],
            dfdx: zeros(1, 2),
            dfdu,
        })
    }
    fn inequality(&self, _t: f64, _x: &Vector, _u: &Vector) -> Option<ConstraintBlock> {
        None
    }
    fn terminal_equality(&self, _t: f64, _x: &Vector) -> Option<ConstraintBlock> {
        None
    }
    fn terminal_inequality(&self, _t: f64, _x: &Vector) -> Option<ConstraintBlock> {
        None
    }
    fn clone_boxed(&self) -> Box<dyn Constraint> {
        Box::new(Self)
    }
}

/// `g(x) = 0.1 - x[0] >= 0`, i.e. `x[0] <= 0.1`, active at every node.
struct UpperBoundOnFirstState {
    limit: f64,
}
impl Constraint for UpperBoundOnFirstState {
    fn state_input_equality(&self, _t: f64, _x: &Vector, _u: &Vector) -> Option<ConstraintBlock> {
        None
    }
    fn inequality(&self, _t: f64, x: &Vector, _u: &Vector) -> Option<ConstraintBlock> {
        let mut dfdx = zeros(1, x.len());
        dfdx.write(0, 0, -1.0);
        Some(ConstraintBlock {
            f: vec![self.limit - x[0]],
            dfdx,
            dfdu: zeros(1, 1),
        })
    }
    fn terminal_equality(&self, _t: f64, _x: &Vector) -> Option<ConstraintBlock> {
        None
    }
    fn terminal_inequality(&self, _t: f64, x: &Vector) -> Option<ConstraintBlock> {
        let mut dfdx = zeros(1, x.len());
        dfdx.write(0, 0, -1.0);
        Some(ConstraintBlock {
            f: vec![self.limit - x[0]],
            dfdx,
            dfdu: zeros(1, 0),
        })
    }
    fn clone_boxed(&self) -> Box<dyn Constraint> {
        Box::new(Self { limit: self.limit })
    }
}

/// Nonlinear pendulum `theta'' = -sin(theta) + u`, state `[theta, omega]`.
struct Pendulum;
impl SystemDynamics for Pendulum {
    fn flow_map(&self, _t: f64, x: &Vector, u: &Vector, _mode: usize) -> Vector {
        vec![x[1], -x[0].sin() + u[0]]
    }
    fn jacobians(&self, _t: f64, x: &Vector, _u: &Vector, _mode: usize) -> (Matrix, Matrix) {
        let mut dfdx = zeros(2, 2);
        dfdx.write(0, 1, 1.0);
        dfdx.write(1, 0, -x[0].cos());
        let mut dfdu = zeros(2, 1);
        dfdu.write(1, 0, 1.0);
        (dfdx, dfdu)
    }
    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(Self)
    }
}

fn no_events() -> ModeSchedule {
    ModeSchedule::new(vec![])
}

/// Scenario 1: a stable linear-quadratic regulation problem should settle
/// within a couple of outer iterations, landing on a trajectory that drives
/// the state norm down monotonically rather than oscillating or diverging.
#[test]
fn linear_quadratic_unconstrained_converges_quickly() {
    let settings = SqpSettings::new(2, 2)
        .with_dt(0.1)
        .with_sqp_iterations(5)
        .with_n_threads(2)
        .with_integrator(IntegratorType::Rk4);
    let mut solver = SqpSolver::new(
        settings,
        Box::new(StableLinear),
        Box::new(TrackingCost { n_state: 2, n_input: 2 }),
        None,
        None,
        Box::new(ZeroReference { n_state: 2, n_input: 2 }),
        no_events(),
    );

    let (solution, _report) = solver.solve(0.0, &vec![1.0, 0.0], 1.0).unwrap();

    assert!(solution.iterations_used <= 2, "expected convergence within 2 iterations, got {}", solution.iterations_used);
    assert!(solution.converged);
    assert_eq!(solution.time.len(), solution.state.len());
    assert_eq!(solution.time.len(), solution.input.len());

    let initial_norm: f64 = solution.state[0].iter().map(|v| v * v).sum::<f64>().sqrt();
    let final_norm: f64 = solution.state.last().unwrap().iter().map(|v| v * v).sum::<f64>().sqrt();
    assert!(final_norm < initial_norm, "regulator should drive the state toward the origin");
}

/// Scenario 2: with the first input pinned to zero and projection enabled,
/// the QP never sees that degree of freedom, and the reconstructed real
/// input is exactly zero everywhere on its first component.
#[test]
fn projected_equality_constraint_eliminates_pinned_input() {
    let settings = SqpSettings::new(2, 2)
        .with_dt(0.1)
        .with_sqp_iterations(5)
        .with_n_threads(1)
        .with_projection(true);
    let mut solver = SqpSolver::new(
        settings,
        Box::new(StableLinear),
        Box::new(TrackingCost { n_state: 2, n_input: 2 }),
        Some(Box::new(PinFirstInput)),
        None,
        Box::new(ZeroReference { n_state: 2, n_input: 2 }),
        no_events(),
    );

    let (solution, _report) = solver.solve(0.0, &vec![1.0, 0.5], 0.5).unwrap();

    let max_u0 = solution
        .input
        .iter()
        .map(|u| u[0].abs())
        .fold(0.0_f64, f64::max);
    assert!(max_u0 < 1e-9, "pinned input component should be exactly zero, got {max_u0}");
}

/// Scenario 3 (event-split grid) is exercised directly against
/// `build_time_grid` in `grid.rs`'s own unit tests; here we only check that
/// a solver built over an event schedule still produces a consistent
/// trajectory of the expected length.
#[test]
fn event_schedule_produces_consistent_trajectory_length() {
    let schedule = ModeSchedule::new(vec![0.25, 0.5]);
    let settings = SqpSettings::new(2, 2).with_dt(0.1).with_sqp_iterations(3).with_n_threads(1);
    let mut solver = SqpSolver::new(
        settings,
        Box::new(StableLinear),
        Box::new(TrackingCost { n_state: 2, n_input: 2 }),
        None,
        None,
        Box::new(ZeroReference { n_state: 2, n_input: 2 }),
        schedule,
    );

    let (solution, _report) = solver.solve(0.0, &vec![1.0, 0.0], 1.0).unwrap();
    assert_eq!(solution.time.len(), solution.state.len());
    assert_eq!(solution.time.len(), solution.input.len());
    // Both event boundaries and their epsilon-separated reopening sample
    // must be present on the emitted grid.
    assert!(solution.time.iter().any(|&t| (t - 0.25).abs() < 1e-9));
    assert!(solution.time.iter().any(|&t| (t - 0.5).abs() < 1e-9));
}

/// Scenario 4: re-solving a shorter, later horizon warm-started from the
/// first solve's own trajectory should start much closer to feasibility
/// than a cold start would, since the initializer can interpolate almost
/// all of its samples directly from the previous solution.
#[test]
fn warm_start_reduces_first_iteration_violation() {
    let settings = SqpSettings::new(2, 2).with_dt(0.1).with_sqp_iterations(3).with_n_threads(1);
    let mut solver = SqpSolver::new(
        settings,
        Box::new(StableLinear),
        Box::new(TrackingCost { n_state: 2, n_input: 2 }),
        None,
        None,
        Box::new(ZeroReference { n_state: 2, n_input: 2 }),
        no_events(),
    );

    let (first, _) = solver.solve(0.0, &vec![1.0, 0.0], 0.5).unwrap();
    let warm_init_state = first.state[1].clone(); // state at t=0.1

    let (_second, _) = solver.solve(0.1, &warm_init_state, 0.5).unwrap();
    let warm_start_violation = solver.iteration_log_entry(0).unwrap().dynamics_violation;

    assert!(
        warm_start_violation < 1e-3,
        "warm-started first iteration should already nearly satisfy dynamics, got {warm_start_violation}"
    );
}

/// Scenario 5: the relaxed barrier keeps the trajectory inside the
/// constraint's delta-neighborhood and reports a strictly positive penalty
/// once the unconstrained optimum would otherwise violate it.
#[test]
fn barrier_keeps_state_within_bound() {
    let limit = 0.1;
    let delta = 1e-2;
    let settings = SqpSettings::new(1, 1)
        .with_dt(0.05)
        .with_sqp_iterations(15)
        .with_n_threads(1)
        .with_inequality_barrier(1.0, delta);
    let mut solver = SqpSolver::new(
        settings,
        Box::new(StableLinear),
        Box::new(TrackingCost { n_state: 1, n_input: 1 }),
        Some(Box::new(UpperBoundOnFirstState { limit })),
        None,
        Box::new(FixedReference { state: vec![0.5] }),
        no_events(),
    );

    let (solution, _report) = solver.solve(0.0, &vec![0.0], 0.5).unwrap();

    assert!(solution.performance.inequality_constraint_penalty > 0.0);
    let max_x0 = solution.state.iter().map(|x| x[0]).fold(f64::MIN, f64::max);
    // Well clear of the unconstrained optimum (0.5) but not pinned exactly
    // to the boundary — the relaxed barrier trades a small overshoot for a
    // finite, well-posed Hessian contribution near the limit.
    assert!(max_x0 < limit + 3.0 * delta, "state strayed far past the barrier: {max_x0}");
}

/// Scenario 6: capping the outer loop at one iteration on a nonlinear
/// problem must still return a usable (if unconverged) solution rather
/// than an error, with an iteration log of exactly that length.
#[test]
fn single_iteration_cap_returns_without_error() {
    let settings = SqpSettings::new(2, 1).with_dt(0.05).with_sqp_iterations(1).with_n_threads(1);
    let mut solver = SqpSolver::new(
        settings,
        Box::new(Pendulum),
        Box::new(TrackingCost { n_state: 2, n_input: 1 }),
        None,
        None,
        Box::new(FixedReference { state: vec![std::f64::consts::PI, 0.0] }),
        no_events(),
    );

    let (solution, report) = solver.solve(0.0, &vec![0.0, 0.0], 1.0).unwrap();
    assert_eq!(solver.iteration_log().len(), 1);
    assert_eq!(solution.iterations_used, 1);
    assert_eq!(report.iterations, 1);
}
