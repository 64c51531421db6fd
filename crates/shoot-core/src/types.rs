//! Core numeric and data-model types shared by every stage of the SQP
//! pipeline.
//!
//! Vectors are plain `Vec<f64>`; dense matrices are [`faer::Mat<f64>`]. This
//! mirrors how the rest of the workspace treats small dense linear algebra:
//! a `Vec<f64>` right-hand side paired with a `faer` matrix for the factored
//! system (see the dense solver backends elsewhere in the workspace).

use faer::Mat;
use serde::{Deserialize, Serialize};

/// A dense real vector.
pub type Vector = Vec<f64>;

/// A dense real matrix, row/column indexed as `(rows, cols)`.
pub type Matrix = Mat<f64>;

/// Builds a zero matrix of the given shape.
pub fn zeros(rows: usize, cols: usize) -> Matrix {
    Mat::zeros(rows, cols)
}

/// Builds an identity matrix.
pub fn identity(n: usize) -> Matrix {
    Mat::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 })
}

/// Dimensions of a single shooting node's local quadratic subproblem, after
/// any constraint projection has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcpSize {
    /// State dimension `n_x`.
    pub n_state: usize,
    /// Input dimension `n_u` *before* projection.
    pub n_input: usize,
    /// Number of shooting nodes (intervals), excluding the terminal node.
    pub n_nodes: usize,
}

impl OcpSize {
    pub fn new(n_state: usize, n_input: usize, n_nodes: usize) -> Self {
        Self {
            n_state,
            n_input,
            n_nodes,
        }
    }
}

/// Linearized, discretized dynamics for one shooting interval:
/// `delta_x[i+1] = a * delta_x[i] + b * delta_u[i] + bias`.
#[derive(Debug, Clone)]
pub struct DynamicsBlock {
    pub a: Matrix,
    pub b: Matrix,
    pub bias: Vector,
}

/// Quadratic (second-order) approximation of the cost contributed by one
/// node: `delta_cost = 1/2 [dx;du]' h [dx;du] + g' [dx;du] + c`.
///
/// Terminal nodes carry a state-only block (`h`/`g` sized for `n_x` alone);
/// the absence of an input partition is represented simply by `h`/`g`'s
/// dimensions, not by a separate type.
#[derive(Debug, Clone)]
pub struct CostBlock {
    pub h: Matrix,
    pub g: Vector,
    pub c: f64,
}

/// A single linearized state-input constraint row-block evaluated at a
/// node, before any projection.
#[derive(Debug, Clone)]
pub struct ConstraintBlock {
    /// Residual `f` at the linearization point.
    pub f: Vector,
    /// Jacobian with respect to state.
    pub dfdx: Matrix,
    /// Jacobian with respect to input. Empty (zero columns) for
    /// terminal-only constraints.
    pub dfdu: Matrix,
}

/// Scalar cost accounting produced by one SQP iteration. Fields are summed
/// across shooting nodes in worker-id order (not node order) to keep the
/// floating point reduction reproducible run-to-run; see the performance
/// evaluator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceIndex {
    pub merit: f64,
    pub cost: f64,
    pub dynamics_violation: f64,
    pub equality_constraint_violation: f64,
    pub inequality_violation: f64,
    pub inequality_constraint_penalty: f64,
}

impl std::ops::Add for PerformanceIndex {
    type Output = PerformanceIndex;

    fn add(self, rhs: PerformanceIndex) -> PerformanceIndex {
        PerformanceIndex {
            merit: self.merit + rhs.merit,
            cost: self.cost + rhs.cost,
            dynamics_violation: self.dynamics_violation + rhs.dynamics_violation,
            equality_constraint_violation: self.equality_constraint_violation
                + rhs.equality_constraint_violation,
            inequality_violation: self.inequality_violation + rhs.inequality_violation,
            inequality_constraint_penalty: self.inequality_constraint_penalty
                + rhs.inequality_constraint_penalty,
        }
    }
}

impl PerformanceIndex {
    /// Total constraint violation norm-squared `v^2`, i.e. the sum of the
    /// three ISE terms (dynamics defect, state-input equality, inequality)
    /// the filter line-search takes the square root of.
    pub fn total_violation_sq(&self) -> f64 {
        self.dynamics_violation + self.equality_constraint_violation + self.inequality_violation
    }

    /// `v = sqrt(stateEqISE + stateInputEqISE + inequalityISE)` from §4.6.
    pub fn violation_norm(&self) -> f64 {
        self.total_violation_sq().max(0.0).sqrt()
    }
}

/// Feedforward-plus-feedback control law produced alongside the optimal
/// state/input trajectories.
#[derive(Debug, Clone)]
pub enum Controller {
    /// Piecewise-linear interpolation of the nominal input trajectory; no
    /// state feedback.
    Feedforward {
        time: Vec<f64>,
        input: Vec<Vector>,
    },
    /// Affine feedback around the nominal trajectory:
    /// `u(t) = u_nominal(t) + k_gain(t) * (x - x_nominal(t))`.
    Feedback {
        time: Vec<f64>,
        input: Vec<Vector>,
        state: Vec<Vector>,
        gain: Vec<Matrix>,
    },
}

impl Controller {
    /// Evaluates the control law at time `t` given the current state `x`.
    /// `t` is clamped to the stored horizon and the nearest interval below
    /// `t` is used (zero-order hold on the gain, linear hold on the
    /// feedforward term).
    pub fn sample(&self, t: f64, x: &Vector) -> Vector {
        match self {
            Controller::Feedforward { time, input } => interpolate_series(time, input, t),
            Controller::Feedback {
                time,
                input,
                state,
                gain,
            } => {
                let idx = locate_interval(time, t);
                let u_nominal = interpolate_series(time, input, t);
                // Interpolated the same way as the input, so that sampling
                // exactly at the final time yields the true terminal state
                // and the feedback term vanishes there rather than
                // comparing against the last interval's stale sample.
                let x_nominal = interpolate_series(time, state, t);
                let k = &gain[idx];
                let mut u = u_nominal;
                for row in 0..k.nrows() {
                    let mut acc = 0.0;
                    for col in 0..k.ncols() {
                        acc += k.read(row, col) * (x[col] - x_nominal[col]);
                    }
                    u[row] += acc;
                }
                u
            }
        }
    }
}

fn locate_interval(time: &[f64], t: f64) -> usize {
    match time.binary_search_by(|probe| probe.partial_cmp(&t).unwrap()) {
        Ok(idx) => idx.min(time.len().saturating_sub(2)),
        Err(0) => 0,
        Err(idx) => (idx - 1).min(time.len().saturating_sub(2)),
    }
}

/// Piecewise-linear interpolation shared by the feedforward input and the
/// feedback nominal state: both arrays are indexed the same way (one entry
/// per grid sample, with the last sample duplicated to cover the final hold
/// interval), so at `t == time.last()` this returns `series.last()` exactly.
fn interpolate_series(time: &[f64], series: &[Vector], t: f64) -> Vector {
    if time.len() == 1 {
        return series[0].clone();
    }
    let idx = locate_interval(time, t);
    let (t0, t1) = (time[idx], time[idx + 1]);
    let alpha = if (t1 - t0).abs() < 1e-12 {
        0.0
    } else {
        ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
    };
    series[idx]
        .iter()
        .zip(series[idx + 1].iter())
        .map(|(a, b)| a + alpha * (b - a))
        .collect()
}

/// Output of a completed (converged or not) SQP solve.
#[derive(Debug, Clone, Serialize)]
pub struct PrimalSolution {
    pub time: Vec<f64>,
    pub state: Vec<Vector>,
    pub input: Vec<Vector>,
    /// Not serialized: embeds `faer::Mat<f64>` gain blocks, which have no
    /// `Serialize` impl. The trajectory and performance fields above are
    /// what callers persist; the controller is rebuilt from them if needed.
    #[serde(skip)]
    pub controller: Controller,
    pub performance: PerformanceIndex,
    pub iterations_used: usize,
    pub converged: bool,
}
