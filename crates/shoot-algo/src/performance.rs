//! Performance evaluator (§4.9): re-evaluates the merit/violation of a
//! candidate trajectory without building any Jacobian, for use by the line
//! search. Fans out across the worker pool the same way the assembler does,
//! but calls the derivative-free [`integrate`] instead of
//! [`integrate_with_sensitivity`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use shoot_core::{
    Constraint, CostFunction, DesiredTrajectories, ModeSchedule, PerformanceIndex, SystemDynamics,
    Vector,
};

use crate::config::SqpSettings;
use crate::grid::TimeGrid;
use crate::integrator::integrate;
use crate::linalg::vec_norm2;
use crate::pool::WorkerPool;

/// Owned, `'static` copy of everything one dispatch's task closure touches;
/// see `assembler::AssembleContext` for why this is built fresh per call
/// rather than captured by reference.
struct EvaluateContext {
    n: usize,
    grid_times: Vec<f64>,
    x: Vec<Vector>,
    u: Vec<Vector>,
    mode_schedule: ModeSchedule,
    dynamics_per_worker: Vec<Box<dyn SystemDynamics>>,
    cost_per_worker: Vec<Box<dyn CostFunction>>,
    constraint_per_worker: Option<Vec<Box<dyn Constraint>>>,
    desired: Box<dyn DesiredTrajectories>,
    settings: SqpSettings,
    perf_slots: Vec<Mutex<PerformanceIndex>>,
    counter: AtomicUsize,
}

/// Evaluates the performance index of `(x, u)` around `init_state`, with no
/// linearization and no projection (inequality violation is still measured
/// against the raw constraint, but the barrier penalty uses the same
/// relaxed-barrier formula as transcription so merit values are comparable
/// across a line-search step).
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    pool: Arc<WorkerPool>,
    grid: &TimeGrid,
    init_state: &Vector,
    x: &[Vector],
    u: &[Vector],
    mode_schedule: &ModeSchedule,
    dynamics_per_worker: &[Box<dyn SystemDynamics>],
    cost_per_worker: &[Box<dyn CostFunction>],
    constraint_per_worker: &Option<Vec<Box<dyn Constraint>>>,
    desired: &dyn DesiredTrajectories,
    settings: &SqpSettings,
) -> PerformanceIndex {
    let n = grid.n_nodes();
    debug_assert_eq!(x.len(), n + 1);
    debug_assert_eq!(u.len(), n);

    let ctx = Arc::new(EvaluateContext {
        n,
        grid_times: grid.times.clone(),
        x: x.to_vec(),
        u: u.to_vec(),
        mode_schedule: mode_schedule.clone(),
        dynamics_per_worker: dynamics_per_worker.iter().map(|d| d.clone_boxed()).collect(),
        cost_per_worker: cost_per_worker.iter().map(|c| c.clone_boxed()).collect(),
        constraint_per_worker: constraint_per_worker
            .as_ref()
            .map(|workers| workers.iter().map(|c| c.clone_boxed()).collect()),
        desired: desired.clone_boxed(),
        settings: settings.clone(),
        perf_slots: (0..pool.n_threads()).map(|_| Mutex::new(PerformanceIndex::default())).collect(),
        counter: AtomicUsize::new(0),
    });

    let worker_pool = Arc::clone(&pool);
    let dispatch_ctx = Arc::clone(&ctx);
    pool.dispatch(move || {
        let worker_id = worker_pool.claim_worker_id();
        let ctx = &dispatch_ctx;
        let dynamics = &ctx.dynamics_per_worker[worker_id];
        let cost = &ctx.cost_per_worker[worker_id];
        let constraint = ctx
            .constraint_per_worker
            .as_ref()
            .map(|workers| workers[worker_id].as_ref());

        loop {
            let i = ctx.counter.fetch_add(1, Ordering::Relaxed);
            if i > ctx.n {
                break;
            }

            let mut p = PerformanceIndex::default();
            if i == ctx.n {
                let t_n = ctx.grid_times[ctx.n];
                p.cost += cost.terminal_cost(t_n, &ctx.x[ctx.n], ctx.desired.as_ref());
                if let Some(constraint) = constraint {
                    if let Some(eq) = constraint.terminal_equality(t_n, &ctx.x[ctx.n]) {
                        p.equality_constraint_violation += vec_norm2(&eq.f);
                    }
                    if let Some(ineq) = constraint.terminal_inequality(t_n, &ctx.x[ctx.n]) {
                        accumulate_inequality(&ineq.f, &mut p, &ctx.settings);
                    }
                }
            } else {
                let t_i = ctx.grid_times[i];
                let dt_i = ctx.grid_times[i + 1] - ctx.grid_times[i];
                let mode = ctx.mode_schedule.mode_at(t_i);

                let x_next = integrate(ctx.settings.integrator, dynamics.as_ref(), t_i, dt_i, &ctx.x[i], &ctx.u[i], mode);
                let residual: Vector = x_next.iter().zip(&ctx.x[i + 1]).map(|(a, b)| a - b).collect();
                p.dynamics_violation += vec_norm2(&residual);

                let stage_value = cost.stage_cost(t_i, &ctx.x[i], &ctx.u[i], ctx.desired.as_ref());
                let next_value = cost.stage_cost(t_i + dt_i, &x_next, &ctx.u[i], ctx.desired.as_ref());
                p.cost += 0.5 * dt_i * (stage_value + next_value);

                if let Some(constraint) = constraint {
                    if let Some(eq) = constraint.state_input_equality(t_i, &ctx.x[i], &ctx.u[i]) {
                        p.equality_constraint_violation += vec_norm2(&eq.f);
                    }
                    if let Some(ineq) = constraint.inequality(t_i, &ctx.x[i], &ctx.u[i]) {
                        accumulate_inequality(&ineq.f, &mut p, &ctx.settings);
                    }
                }
            }

            let mut slot = ctx.perf_slots[worker_id].lock().unwrap();
            *slot = *slot + p;
        }
    });

    let mut aggregate = PerformanceIndex::default();
    for slot in &ctx.perf_slots {
        aggregate = aggregate + *slot.lock().unwrap();
    }

    let initial_residual: f64 = init_state.iter().zip(&x[0]).map(|(a, b)| (a - b) * (a - b)).sum();
    aggregate.dynamics_violation += initial_residual;
    aggregate.merit = aggregate.cost + aggregate.inequality_constraint_penalty;
    aggregate
}

fn accumulate_inequality(h_values: &[f64], perf: &mut PerformanceIndex, settings: &SqpSettings) {
    for &h in h_values {
        perf.inequality_violation += (-h).max(0.0).powi(2);
        if settings.barrier_active() {
            let (value, _, _) = crate::barrier::relaxed_barrier(
                h,
                settings.inequality_constraint_mu,
                settings.inequality_constraint_delta,
            );
            perf.inequality_constraint_penalty += value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoot_core::{identity, zeros, Matrix};

    struct ZeroDynamics;
    impl SystemDynamics for ZeroDynamics {
        fn flow_map(&self, _t: f64, x: &Vector, _u: &Vector, _mode: usize) -> Vector {
            vec![0.0; x.len()]
        }
        fn jacobians(&self, _t: f64, x: &Vector, u: &Vector, _mode: usize) -> (Matrix, Matrix) {
            (zeros(x.len(), x.len()), zeros(x.len(), u.len()))
        }
        fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
            Box::new(ZeroDynamics)
        }
    }

    struct Quadratic;
    impl CostFunction for Quadratic {
        fn stage_cost(&self, _t: f64, x: &Vector, u: &Vector, _d: &dyn DesiredTrajectories) -> f64 {
            0.5 * (vec_norm2(x) + vec_norm2(u))
        }
        fn stage_quadratic_approx(&self, _t: f64, x: &Vector, u: &Vector, _d: &dyn DesiredTrajectories) -> shoot_core::CostBlock {
            let n = x.len() + u.len();
            shoot_core::CostBlock { h: identity(n), g: vec![0.0; n], c: 0.0 }
        }
        fn terminal_cost(&self, _t: f64, x: &Vector, _d: &dyn DesiredTrajectories) -> f64 {
            0.5 * vec_norm2(x)
        }
        fn terminal_quadratic_approx(&self, _t: f64, x: &Vector, _d: &dyn DesiredTrajectories) -> shoot_core::CostBlock {
            shoot_core::CostBlock { h: identity(x.len()), g: vec![0.0; x.len()], c: 0.0 }
        }
        fn clone_boxed(&self) -> Box<dyn CostFunction> {
            Box::new(Quadratic)
        }
    }

    struct NoDesired;
    impl DesiredTrajectories for NoDesired {
        fn desired_state(&self, _t: f64) -> Vector { vec![] }
        fn desired_input(&self, _t: f64) -> Vector { vec![] }
        fn clone_boxed(&self) -> Box<dyn DesiredTrajectories> { Box::new(NoDesired) }
    }

    #[test]
    fn zero_dynamics_reports_exact_step_residual() {
        let pool = Arc::new(WorkerPool::new(1));
        let schedule = ModeSchedule::new(vec![]);
        let grid = crate::grid::build_time_grid(0.0, 0.2, 0.1, &schedule, 1e-6).unwrap();
        let n = grid.n_nodes();
        let x: Vec<Vector> = (0..=n).map(|i| vec![1.0 - 0.1 * i as f64]).collect();
        let u: Vec<Vector> = (0..n).map(|_| vec![0.0]).collect();
        let settings = SqpSettings::new(1, 1).with_n_threads(1);

        let dynamics_per_worker: Vec<Box<dyn SystemDynamics>> = vec![Box::new(ZeroDynamics)];
        let cost_per_worker: Vec<Box<dyn CostFunction>> = vec![Box::new(Quadratic)];

        let perf = evaluate(
            Arc::clone(&pool),
            &grid,
            &x[0].clone(),
            &x,
            &u,
            &schedule,
            &dynamics_per_worker,
            &cost_per_worker,
            &None,
            &NoDesired,
            &settings,
        );
        // x_next=x[i] (zero dynamics) but x[i+1]!=x[i], so residual is nonzero.
        assert!(perf.dynamics_violation > 0.0);
        assert!(perf.cost > 0.0);
    }
}
