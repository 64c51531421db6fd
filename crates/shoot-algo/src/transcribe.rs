//! Per-node linearization, discretization, quadratic cost, constraint
//! projection and barrier penalty (§4.3).
//!
//! Each call here is independent of every other node: the worker pool
//! dispatches one of these per grid index with no shared mutable state
//! beyond the output slot the calling worker owns exclusively.

use shoot_core::{
    Constraint, ConstraintBlock, CostBlock, CostFunction, DesiredTrajectories, DynamicsBlock,
    PerformanceIndex, ShootResult, SystemDynamics, Vector,
};

use crate::barrier::relaxed_barrier;
use crate::config::{IntegratorType, SqpSettings};
use crate::integrator::integrate_with_sensitivity;
use crate::linalg::{mat_scale, vec_norm2, vec_sub};
use crate::project::{project_cost, project_dynamics, project_equality, Projection};

/// Everything transcription produces for one intermediate node.
pub struct IntermediateNode {
    pub dynamics: DynamicsBlock,
    pub cost: CostBlock,
    /// Raw equality constraint, present only when projection is *not*
    /// applied at transcription time — the QP back-end is expected to
    /// project this itself before solving (§4.4).
    pub constraint: Option<ConstraintBlock>,
    /// The projection already applied to `dynamics`/`cost` at this node,
    /// present only when projection *was* applied here. The QP back-end
    /// must not see this node as constrained (it is already unconstrained
    /// in the reduced input); the driver uses it to reconstruct the
    /// real-space step (§4.8 step 3c).
    pub projection: Option<Projection>,
    pub effective_n_input: usize,
    pub performance: PerformanceIndex,
}

/// What transcription produces for the terminal node (no dynamics/input).
pub struct TerminalNode {
    pub cost: CostBlock,
    pub constraint: Option<ConstraintBlock>,
    pub performance: PerformanceIndex,
}

#[allow(clippy::too_many_arguments)]
pub fn transcribe_intermediate(
    node: usize,
    t_i: f64,
    dt_i: f64,
    x_i: &Vector,
    x_ip1: &Vector,
    u_i: &Vector,
    mode: usize,
    dynamics: &dyn SystemDynamics,
    cost: &dyn CostFunction,
    desired: &dyn DesiredTrajectories,
    constraint: Option<&dyn Constraint>,
    settings: &SqpSettings,
) -> ShootResult<IntermediateNode> {
    let n_x = x_i.len();
    let n_u = u_i.len();

    let (x_next, a, b) =
        integrate_with_sensitivity(settings.integrator, dynamics, t_i, dt_i, x_i, u_i, mode);
    let residual = vec_sub(&x_next, x_ip1);
    let dynamics_violation = vec_norm2(&residual);

    let mut dyn_block = DynamicsBlock {
        a,
        b,
        bias: residual,
    };

    let stage_cost_block = cost.stage_quadratic_approx(t_i, x_i, u_i, desired);
    let stage_cost_value = cost.stage_cost(t_i, x_i, u_i, desired);
    let next_stage_cost_value = cost.stage_cost(t_i + dt_i, &x_next, u_i, desired);
    let total_cost = 0.5 * dt_i * (stage_cost_value + next_stage_cost_value);

    let mut cost_block = CostBlock {
        h: mat_scale(&stage_cost_block.h, dt_i),
        g: stage_cost_block.g.iter().map(|v| v * dt_i).collect(),
        c: stage_cost_block.c * dt_i,
    };

    let mut perf = PerformanceIndex {
        cost: total_cost,
        dynamics_violation,
        ..Default::default()
    };

    let mut effective_n_input = n_u;
    let mut constraint_block = None;
    let mut projection = None;

    if let Some(constraint) = constraint {
        if let Some(eq) = constraint.state_input_equality(t_i, x_i, u_i) {
            perf.equality_constraint_violation += vec_norm2(&eq.f);

            if settings.project_state_input_equality_constraints {
                let proj = project_equality(node, &eq, n_x)?;
                dyn_block = project_dynamics(&dyn_block, &proj);
                cost_block = project_cost(&cost_block, &proj, n_x);
                effective_n_input = proj.n_reduced;
                projection = Some(proj);
            } else {
                constraint_block = Some(eq);
            }
        }

        if let Some(ineq) = constraint.inequality(t_i, x_i, u_i) {
            apply_inequality(&ineq, &mut cost_block, &mut perf, settings);
        }
    }

    Ok(IntermediateNode {
        dynamics: dyn_block,
        cost: cost_block,
        constraint: constraint_block,
        projection,
        effective_n_input,
        performance: perf,
    })
}

pub fn transcribe_terminal(
    t_n: f64,
    x_n: &Vector,
    cost: &dyn CostFunction,
    desired: &dyn DesiredTrajectories,
    constraint: Option<&dyn Constraint>,
    settings: &SqpSettings,
) -> ShootResult<TerminalNode> {
    let terminal_block = cost.terminal_quadratic_approx(t_n, x_n, desired);
    let terminal_cost_value = cost.terminal_cost(t_n, x_n, desired);

    let mut cost_block = terminal_block;
    let mut perf = PerformanceIndex {
        cost: terminal_cost_value,
        ..Default::default()
    };

    let mut constraint_block = None;
    if let Some(constraint) = constraint {
        if let Some(eq) = constraint.terminal_equality(t_n, x_n) {
            perf.equality_constraint_violation += vec_norm2(&eq.f);
            constraint_block = Some(eq);
        }
        if let Some(ineq) = constraint.terminal_inequality(t_n, x_n) {
            apply_inequality(&ineq, &mut cost_block, &mut perf, settings);
        }
    }

    Ok(TerminalNode {
        cost: cost_block,
        constraint: constraint_block,
        performance: perf,
    })
}

fn apply_inequality(
    ineq: &ConstraintBlock,
    cost_block: &mut CostBlock,
    perf: &mut PerformanceIndex,
    settings: &SqpSettings,
) {
    let m = ineq.f.len();
    for row in 0..m {
        let h = ineq.f[row];
        perf.inequality_violation += (-h).max(0.0).powi(2);

        if settings.barrier_active() {
            let (value, d, dd) = relaxed_barrier(
                h,
                settings.inequality_constraint_mu,
                settings.inequality_constraint_delta,
            );
            perf.inequality_constraint_penalty += value;

            // gradient row of h w.r.t. the stacked [dx;du] (or [dx] at the
            // terminal node, where dfdu has zero columns).
            let grad: Vector = (0..ineq.dfdx.ncols())
                .map(|c| ineq.dfdx.read(row, c))
                .chain((0..ineq.dfdu.ncols()).map(|c| ineq.dfdu.read(row, c)))
                .collect();

            for (gi, grad_i) in cost_block.g.iter_mut().zip(grad.iter()) {
                *gi += d * grad_i;
            }
            for i in 0..grad.len() {
                for j in 0..grad.len() {
                    let updated = cost_block.h.read(i, j) + dd * grad[i] * grad[j];
                    cost_block.h.write(i, j, updated);
                }
            }
        }
    }
}
