//! Subproblem assembler (§4.5): dispatches node transcription across the
//! worker pool, aggregates per-worker performance indices, and sizes the
//! QP for the back-end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use shoot_core::{
    Constraint, ConstraintBlock, CostBlock, CostFunction, DesiredTrajectories, DynamicsBlock,
    ModeSchedule, OcpSize, PerformanceIndex, ShootError, ShootResult, SystemDynamics, Vector,
};

use crate::config::SqpSettings;
use crate::grid::TimeGrid;
use crate::pool::WorkerPool;
use crate::project::Projection;
use crate::transcribe::{transcribe_intermediate, transcribe_terminal};

/// Output of one assembly pass: the banded blocks the QP back-end consumes,
/// the aggregated performance index, and the realized OCP size (after
/// per-node projection may have shrunk some inputs).
pub struct Assembly {
    pub dynamics: Vec<DynamicsBlock>,
    pub cost: Vec<CostBlock>,
    /// Raw equality constraint to hand to the QP back-end, `None` at nodes
    /// with no constraint *or* where projection already happened here (see
    /// `projections`).
    pub constraints: Vec<Option<ConstraintBlock>>,
    /// Projection already applied to `dynamics`/`cost` at this node, `None`
    /// at the terminal node (which has no input to project) and at any
    /// intermediate node transcribed without the projection setting.
    pub projections: Vec<Option<Projection>>,
    pub effective_n_input: Vec<usize>,
    pub performance: PerformanceIndex,
    pub size: OcpSize,
}

/// Owned, `'static` copy of everything one dispatch's task closure touches.
/// Built fresh inside [`assemble`] from the caller's borrowed inputs, so the
/// worker pool never has to erase a borrow's lifetime to run a closure on
/// its persistent threads (see `pool::WorkerPool::dispatch`).
struct AssembleContext {
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
    dynamics_slots: Vec<Mutex<Option<DynamicsBlock>>>,
    cost_slots: Vec<Mutex<Option<CostBlock>>>,
    constraint_slots: Vec<Mutex<Option<ConstraintBlock>>>,
    projection_slots: Vec<Mutex<Option<Projection>>>,
    n_input_slots: Vec<Mutex<usize>>,
    perf_slots: Vec<Mutex<PerformanceIndex>>,
    error_slot: Mutex<Option<ShootError>>,
    counter: AtomicUsize,
}

/// Assembles the SQP subproblem for the current iterate `(x, u)` around
/// initial-condition perturbation `init_state - x[0]`.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
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
) -> ShootResult<Assembly> {
    let n = grid.n_nodes();
    debug_assert_eq!(x.len(), n + 1);
    debug_assert_eq!(u.len(), n);

    let ctx = Arc::new(AssembleContext {
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
        dynamics_slots: (0..n).map(|_| Mutex::new(None)).collect(),
        cost_slots: (0..=n).map(|_| Mutex::new(None)).collect(),
        constraint_slots: (0..=n).map(|_| Mutex::new(None)).collect(),
        projection_slots: (0..n).map(|_| Mutex::new(None)).collect(),
        n_input_slots: (0..n).map(|_| Mutex::new(settings.n_input)).collect(),
        perf_slots: (0..pool.n_threads()).map(|_| Mutex::new(PerformanceIndex::default())).collect(),
        error_slot: Mutex::new(None),
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
            if ctx.error_slot.lock().unwrap().is_some() {
                continue;
            }

            if i == ctx.n {
                let t_n = ctx.grid_times[ctx.n];
                match transcribe_terminal(t_n, &ctx.x[ctx.n], cost.as_ref(), ctx.desired.as_ref(), constraint, &ctx.settings) {
                    Ok(out) => {
                        *ctx.cost_slots[ctx.n].lock().unwrap() = Some(out.cost);
                        *ctx.constraint_slots[ctx.n].lock().unwrap() = out.constraint;
                        let mut p = ctx.perf_slots[worker_id].lock().unwrap();
                        *p = *p + out.performance;
                    }
                    Err(e) => *ctx.error_slot.lock().unwrap() = Some(e),
                }
            } else {
                let t_i = ctx.grid_times[i];
                let dt_i = ctx.grid_times[i + 1] - ctx.grid_times[i];
                let mode = ctx.mode_schedule.mode_at(t_i);
                match transcribe_intermediate(
                    i,
                    t_i,
                    dt_i,
                    &ctx.x[i],
                    &ctx.x[i + 1],
                    &ctx.u[i],
                    mode,
                    dynamics.as_ref(),
                    cost.as_ref(),
                    ctx.desired.as_ref(),
                    constraint,
                    &ctx.settings,
                ) {
                    Ok(out) => {
                        *ctx.n_input_slots[i].lock().unwrap() = out.effective_n_input;
                        *ctx.dynamics_slots[i].lock().unwrap() = Some(out.dynamics);
                        *ctx.cost_slots[i].lock().unwrap() = Some(out.cost);
                        *ctx.constraint_slots[i].lock().unwrap() = out.constraint;
                        *ctx.projection_slots[i].lock().unwrap() = out.projection;
                        let mut p = ctx.perf_slots[worker_id].lock().unwrap();
                        *p = *p + out.performance;
                    }
                    Err(e) => *ctx.error_slot.lock().unwrap() = Some(e),
                }
            }
        }
    });

    if let Some(e) = ctx.error_slot.lock().unwrap().take() {
        return Err(e);
    }

    let dynamics = (0..n)
        .map(|i| ctx.dynamics_slots[i].lock().unwrap().take().expect("every node index is claimed exactly once"))
        .collect();
    let cost = (0..=n)
        .map(|i| ctx.cost_slots[i].lock().unwrap().take().expect("every node index is claimed exactly once"))
        .collect();
    let constraints = (0..=n).map(|i| ctx.constraint_slots[i].lock().unwrap().take()).collect();
    let projections = (0..n).map(|i| ctx.projection_slots[i].lock().unwrap().take()).collect();
    let effective_n_input = (0..n).map(|i| *ctx.n_input_slots[i].lock().unwrap()).collect();

    // Left-to-right reduction in worker-id order (§5: bit-reproducible
    // summation under a fixed thread count).
    let mut aggregate = PerformanceIndex::default();
    for slot in &ctx.perf_slots {
        aggregate = aggregate + *slot.lock().unwrap();
    }

    let initial_residual: f64 = init_state
        .iter()
        .zip(&x[0])
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    aggregate.dynamics_violation += initial_residual;
    aggregate.merit = aggregate.cost + aggregate.inequality_constraint_penalty;

    let size = OcpSize::new(settings.n_state, settings.n_input, n);

    Ok(Assembly {
        dynamics,
        cost,
        constraints,
        projections,
        effective_n_input,
        performance: aggregate,
        size,
    })
}
