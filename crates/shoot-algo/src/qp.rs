//! Structured OCP-QP back-end: backward Riccati recursion over the banded
//! dynamics/cost blocks produced by the node transcriber (§4.4).
//!
//! This is the one concrete QP back-end this crate ships (the
//! specification treats the back-end as a pluggable external collaborator
//! with a fixed contract; a reference implementation is still needed for
//! the crate to be usable standalone). It is not an attempt to match a
//! commercial structured QP solver's performance envelope.
//!
//! A node that still carries a raw (unprojected) equality `ConstraintBlock`
//! is reduced here via the same null-space elimination the transcriber uses
//! when projection is enabled (see [`crate::project`]), so the recursion
//! itself only ever deals with an unconstrained-in-the-reduced-input stage
//! QP, whichever path produced it.

use faer::Mat;
use shoot_core::{ConstraintBlock, CostBlock, DynamicsBlock, Matrix, ShootError, ShootResult, Vector};

use crate::linalg::{mat_add, mat_mul, mat_vec, solve_square, transpose, vec_add};
use crate::project::{project_cost, project_dynamics, project_equality, Projection};

/// One resolved stage: dynamics/cost already expressed in the space the
/// Riccati recursion actually solves in (post-projection, if any), plus the
/// projection used to map a solved step back to the real input.
struct ResolvedStage {
    dynamics: DynamicsBlock,
    cost: CostBlock,
    projection: Option<Projection>,
    n_reduced: usize,
}

/// Per-node affine feedback law `du = k_ff + K*dx` in the space the
/// recursion solved (reduced, if a projection was active at that node).
pub struct StageFeedback {
    pub k_ff: Vector,
    pub k: Matrix,
}

pub struct QpSolution {
    pub delta_x: Vec<Vector>,
    pub delta_u: Vec<Vector>,
    pub feedback: Vec<StageFeedback>,
    pub effective_n_input: Vec<usize>,
    /// The per-node projection actually used to solve in reduced-input
    /// space, if any — `None` when the node carried neither a projected nor
    /// a raw equality constraint. The driver uses this to compute the
    /// real-input feedback gain `K_eff = dfdx + dfdu*K_reduced` (§4.8).
    pub projections: Vec<Option<Projection>>,
}

/// Backward-Riccati OCP-QP back-end. Stateless beyond its `n_state` for
/// shape validation; `resize` exists to match the §4.4 contract and is a
/// no-op beyond bookkeeping since every block already carries its own
/// dimensions.
#[derive(Debug, Default)]
pub struct RiccatiQp {
    n_state: usize,
}

impl RiccatiQp {
    pub fn new(n_state: usize) -> Self {
        Self { n_state }
    }

    pub fn resize(&mut self, n_state: usize) {
        self.n_state = n_state;
    }

    /// Solves the banded LQ subproblem:
    /// `min sum_i 1/2[dx;du]'H_i[dx;du] + g_i'[dx;du]` subject to
    /// `dx_0 = delta_x0`, `dx_{i+1} = A_i dx_i + B_i du_i + bias_i`, with
    /// terminal cost `cost[N]` (state-only).
    pub fn solve(
        &self,
        delta_x0: &Vector,
        dynamics: &[DynamicsBlock],
        cost: &[CostBlock],
        constraints: &[Option<ConstraintBlock>],
    ) -> ShootResult<QpSolution> {
        let n_nodes = dynamics.len();
        debug_assert_eq!(cost.len(), n_nodes + 1);
        debug_assert_eq!(constraints.len(), n_nodes);

        let stages = (0..n_nodes)
            .map(|i| resolve_stage(i, &dynamics[i], &cost[i], constraints[i].as_ref(), self.n_state))
            .collect::<ShootResult<Vec<_>>>()?;

        // Backward pass.
        let mut p = cost[n_nodes].h.clone();
        let mut p_vec = cost[n_nodes].g.clone();
        let mut feedback: Vec<StageFeedback> = Vec::with_capacity(n_nodes);

        for stage in stages.iter().rev() {
            let a = &stage.dynamics.a;
            let b = &stage.dynamics.b;
            let bias = &stage.dynamics.bias;
            let n_x = self.n_state;
            let n_u = stage.n_reduced;

            let qxx = sub_block(&stage.cost.h, 0, 0, n_x, n_x);
            let qxu = sub_block(&stage.cost.h, 0, n_x, n_x, n_u);
            let qux = sub_block(&stage.cost.h, n_x, 0, n_u, n_x);
            let quu = sub_block(&stage.cost.h, n_x, n_x, n_u, n_u);
            let qx: Vector = stage.cost.g[0..n_x].to_vec();
            let qu: Vector = stage.cost.g[n_x..n_x + n_u].to_vec();

            let at = transpose(a);
            let bt = transpose(b);
            let p_b_plus = vec_add(&p_vec, &mat_vec(&p, bias));

            let hxx = mat_add(&qxx, &mat_mul(&mat_mul(&at, &p), a));
            let hux = mat_add(&qux, &mat_mul(&mat_mul(&bt, &p), a));
            let huu = mat_add(&quu, &mat_mul(&mat_mul(&bt, &p), b));
            let hx = vec_add(&qx, &mat_vec(&at, &p_b_plus));
            let hu = vec_add(&qu, &mat_vec(&bt, &p_b_plus));

            let (k, k_ff) = solve_gain(&huu, &hux, &hu)
                .ok_or_else(|| ShootError::QpSolveFailure {
                    node: feedback.len(),
                    reason: "Quu block is singular in backward Riccati recursion".to_string(),
                })?;

            // P_k = Hxx + Hux' K ; p_k = hx + Hux' k_ff
            let hux_t = transpose(&hux);
            p = mat_add(&hxx, &mat_mul(&hux_t, &k));
            p_vec = vec_add(&hx, &mat_vec(&hux_t, &k_ff));

            feedback.push(StageFeedback { k_ff, k });
        }
        feedback.reverse();

        // Forward pass.
        let mut delta_x = Vec::with_capacity(n_nodes + 1);
        let mut delta_u = Vec::with_capacity(n_nodes);
        let mut effective_n_input = Vec::with_capacity(n_nodes);
        let mut dx = delta_x0.clone();
        delta_x.push(dx.clone());

        for (i, stage) in stages.iter().enumerate() {
            let fb = &feedback[i];
            let du = vec_add(&fb.k_ff, &mat_vec(&fb.k, &dx));
            let dx_next = vec_add(
                &vec_add(&mat_vec(&stage.dynamics.a, &dx), &mat_vec(&stage.dynamics.b, &du)),
                &stage.dynamics.bias,
            );
            delta_u.push(du);
            effective_n_input.push(stage.n_reduced);
            delta_x.push(dx_next.clone());
            dx = dx_next;
        }

        let projections = stages.iter().map(|s| s.projection.clone()).collect();

        Ok(QpSolution {
            delta_x,
            delta_u,
            feedback,
            effective_n_input,
            projections,
        })
    }

    /// Extracts the state-feedback gain sequence implied by the last solve
    /// (the backward Riccati recursion already produces it; this re-derives
    /// it from the same blocks for callers that only want the gains).
    pub fn riccati_feedback(
        &self,
        dynamics: &[DynamicsBlock],
        cost: &[CostBlock],
        constraints: &[Option<ConstraintBlock>],
    ) -> ShootResult<Vec<StageFeedback>> {
        let zero = vec![0.0; self.n_state];
        Ok(self.solve(&zero, dynamics, cost, constraints)?.feedback)
    }
}

fn resolve_stage(
    node: usize,
    dynamics: &DynamicsBlock,
    cost: &CostBlock,
    constraint: Option<&ConstraintBlock>,
    n_x: usize,
) -> ShootResult<ResolvedStage> {
    match constraint {
        None => {
            let n_u = dynamics.b.ncols();
            Ok(ResolvedStage {
                dynamics: dynamics.clone(),
                cost: cost.clone(),
                projection: None,
                n_reduced: n_u,
            })
        }
        Some(c) => {
            let proj = project_equality(node, c, n_x)?;
            let dyn_reduced = project_dynamics(dynamics, &proj);
            let cost_reduced = project_cost(cost, &proj, n_x);
            let n_reduced = proj.n_reduced;
            Ok(ResolvedStage {
                dynamics: dyn_reduced,
                cost: cost_reduced,
                projection: Some(proj),
                n_reduced,
            })
        }
    }
}

fn sub_block(m: &Matrix, row0: usize, col0: usize, rows: usize, cols: usize) -> Matrix {
    Mat::from_fn(rows, cols, |i, j| m.read(row0 + i, col0 + j))
}

/// Solves `K = -Huu^-1*Hux`, `k_ff = -Huu^-1*hu` via Gaussian elimination,
/// one right-hand side column (and the `hu` vector) at a time.
fn solve_gain(huu: &Matrix, hux: &Matrix, hu: &Vector) -> Option<(Matrix, Vector)> {
    let n_u = huu.nrows();
    if n_u == 0 {
        return Some((shoot_core::zeros(0, hux.ncols()), Vec::new()));
    }
    let a: Vec<Vec<f64>> = (0..n_u)
        .map(|i| (0..n_u).map(|j| huu.read(i, j)).collect())
        .collect();

    let n_x = hux.ncols();
    let mut k = shoot_core::zeros(n_u, n_x);
    for col in 0..n_x {
        let rhs: Vec<f64> = (0..n_u).map(|r| -hux.read(r, col)).collect();
        let sol = solve_square(&a, &rhs)?;
        for r in 0..n_u {
            k.write(r, col, sol[r]);
        }
    }

    let rhs_ff: Vec<f64> = hu.iter().map(|v| -v).collect();
    let k_ff = solve_square(&a, &rhs_ff)?;

    Some((k, k_ff))
}
