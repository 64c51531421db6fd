//! SQP driver (§4.8): owns the worker pool and collaborator prototypes,
//! runs the outer iteration loop, and emits a [`PrimalSolution`] plus a
//! [`PerformanceReport`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use shoot_core::{
    Constraint, CostFunction, DesiredTrajectories, ModeSchedule, OperatingTrajectories,
    PerformanceIndex, PrimalSolution, ShootError, ShootResult, SystemDynamics, Vector,
};
use tracing::{debug, info, info_span};

use crate::assembler::assemble;
use crate::config::SqpSettings;
use crate::grid::build_time_grid;
use crate::initializer::{initialize, PreviousTrajectory};
use crate::linalg::{mat_add, mat_mul, vec_sub};
use crate::linesearch::{self, euclidean_norm};
use crate::performance;
use crate::pool::WorkerPool;
use crate::project::Projection;
use crate::qp::RiccatiQp;
use shoot_core::Controller;

/// Wall-clock time spent in each phase of the last solve, accumulated over
/// every SQP iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimings {
    pub assembly: Duration,
    pub qp_solve: Duration,
    pub line_search: Duration,
    pub controller_emission: Duration,
}

impl PhaseTimings {
    fn total(&self) -> Duration {
        self.assembly + self.qp_solve + self.line_search + self.controller_emission
    }
}

/// A textual benchmarking report: per-phase total/average time and the
/// share of the solve it accounted for.
#[derive(Debug, Clone)]
pub struct PerformanceReport {
    pub timings: PhaseTimings,
    pub iterations: usize,
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.timings.total().as_secs_f64().max(1e-12);
        let rows: [(&str, Duration); 4] = [
            ("assembly", self.timings.assembly),
            ("qp solve", self.timings.qp_solve),
            ("line search", self.timings.line_search),
            ("controller emission", self.timings.controller_emission),
        ];
        writeln!(f, "SQP solve: {} iteration(s), {:.3} ms total", self.iterations, total * 1e3)?;
        for (name, d) in rows {
            let ms = d.as_secs_f64() * 1e3;
            let pct = 100.0 * d.as_secs_f64() / total;
            let avg_ms = if self.iterations > 0 {
                ms / self.iterations as f64
            } else {
                0.0
            };
            writeln!(f, "  {name:<20} {ms:>9.3} ms total  {avg_ms:>8.3} ms avg  {pct:>5.1}%")?;
        }
        Ok(())
    }
}

/// Owns one set of per-worker collaborator clones and the worker pool they
/// run on; a single instance is meant to be reused across receding-horizon
/// ticks (warm-starting each call from the previous one's trajectory).
pub struct SqpSolver {
    settings: SqpSettings,
    pool: Arc<WorkerPool>,
    dynamics_per_worker: Vec<Box<dyn SystemDynamics>>,
    cost_per_worker: Vec<Box<dyn CostFunction>>,
    constraint_per_worker: Option<Vec<Box<dyn Constraint>>>,
    operating: Option<Box<dyn OperatingTrajectories>>,
    desired: Box<dyn DesiredTrajectories>,
    mode_schedule: ModeSchedule,
    qp: RiccatiQp,
    previous: Option<PreviousTrajectory>,
    iteration_log: Vec<PerformanceIndex>,
}

impl SqpSolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SqpSettings,
        dynamics: Box<dyn SystemDynamics>,
        cost: Box<dyn CostFunction>,
        constraint: Option<Box<dyn Constraint>>,
        operating: Option<Box<dyn OperatingTrajectories>>,
        desired: Box<dyn DesiredTrajectories>,
        mode_schedule: ModeSchedule,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(settings.n_threads));
        let n = pool.n_threads();
        let dynamics_per_worker: Vec<Box<dyn SystemDynamics>> =
            (0..n).map(|_| dynamics.clone_boxed()).collect();
        let cost_per_worker: Vec<Box<dyn CostFunction>> = (0..n).map(|_| cost.clone_boxed()).collect();
        let constraint_per_worker: Option<Vec<Box<dyn Constraint>>> =
            constraint.map(|c| (0..n).map(|_| c.clone_boxed()).collect());
        let qp = RiccatiQp::new(settings.n_state);

        Self {
            settings,
            pool,
            dynamics_per_worker,
            cost_per_worker,
            constraint_per_worker,
            operating,
            desired,
            mode_schedule,
            qp,
            previous: None,
            iteration_log: Vec::new(),
        }
    }

    pub fn iteration_log(&self) -> &[PerformanceIndex] {
        &self.iteration_log
    }

    /// Renders the full iteration log as pretty-printed JSON, for callers
    /// persisting a solve's convergence history alongside its solution.
    pub fn iteration_log_json(&self) -> ShootResult<String> {
        Ok(serde_json::to_string_pretty(&self.iteration_log)?)
    }

    /// Returns the performance index recorded at `iteration`, or
    /// `EmptyLogQuery` if no solve has populated the log yet, or the index
    /// is out of range.
    pub fn iteration_log_entry(&self, iteration: usize) -> ShootResult<PerformanceIndex> {
        self.iteration_log
            .get(iteration)
            .copied()
            .ok_or(ShootError::EmptyLogQuery {
                requested: iteration,
                available: self.iteration_log.len(),
            })
    }

    /// Runs the SQP outer loop over `[init_time, final_time]` from
    /// `init_state`, returning the primal solution and a timing report.
    pub fn solve(
        &mut self,
        init_time: f64,
        init_state: &Vector,
        final_time: f64,
    ) -> ShootResult<(PrimalSolution, PerformanceReport)> {
        let span = info_span!("sqp_solve", init_time, final_time);
        let _guard = span.enter();

        let grid = build_time_grid(
            init_time,
            final_time,
            self.settings.dt,
            &self.mode_schedule,
            self.settings.event_epsilon,
        )?;
        let n = grid.n_nodes();

        let (mut x, mut u) = initialize(
            &grid.times,
            init_state,
            self.settings.n_input,
            self.previous.as_ref(),
            self.operating.as_deref(),
        );

        let mut timings = PhaseTimings::default();
        self.iteration_log.clear();

        let mut last_performance = PerformanceIndex::default();
        let mut last_qp_solution = None;
        let mut converged = false;
        let mut iterations_used = 0usize;

        for iter in 0..self.settings.sqp_iterations.max(1) {
            iterations_used = iter + 1;
            if self.settings.print_solver_status {
                info!(iter, "starting SQP iteration");
            }

            let t0 = Instant::now();
            let assembly = assemble(
                Arc::clone(&self.pool),
                &grid,
                init_state,
                &x,
                &u,
                &self.mode_schedule,
                &self.dynamics_per_worker,
                &self.cost_per_worker,
                &self.constraint_per_worker,
                self.desired.as_ref(),
                &self.settings,
            )?;
            timings.assembly += t0.elapsed();
            self.iteration_log.push(assembly.performance);
            last_performance = assembly.performance;

            let delta_x0 = vec_sub(init_state, &x[0]);

            let t1 = Instant::now();
            let qp_solution = self.qp.solve(
                &delta_x0,
                &assembly.dynamics,
                &assembly.cost,
                &assembly.constraints,
            )?;
            timings.qp_solve += t1.elapsed();

            // Merge the two sources of per-node projection: nodes already
            // projected at transcription time, and nodes the QP projected
            // internally from a raw constraint (§4.8 step 3c).
            let node_projection = |i: usize| -> Option<&Projection> {
                assembly.projections[i]
                    .as_ref()
                    .or_else(|| qp_solution.projections[i].as_ref())
            };

            let delta_u_real: Vec<Vector> = (0..n)
                .map(|i| match node_projection(i) {
                    Some(proj) => reconstruct_real_input(proj, &qp_solution.delta_x[i], &qp_solution.delta_u[i]),
                    None => qp_solution.delta_u[i].clone(),
                })
                .collect();

            let t2 = Instant::now();
            let baseline = last_performance;
            let candidate_x = |alpha: f64| -> Vec<Vector> {
                (0..=n)
                    .map(|i| {
                        x[i].iter()
                            .zip(&qp_solution.delta_x[i])
                            .map(|(xi, dxi)| xi + alpha * dxi)
                            .collect()
                    })
                    .collect()
            };
            let candidate_u = |alpha: f64| -> Vec<Vector> {
                (0..n)
                    .map(|i| {
                        u[i].iter()
                            .zip(&delta_u_real[i])
                            .map(|(ui, dui)| ui + alpha * dui)
                            .collect()
                    })
                    .collect()
            };

            let outcome = linesearch::search(
                &baseline,
                &self.settings,
                |alpha| {
                    let cx = candidate_x(alpha);
                    let cu = candidate_u(alpha);
                    performance::evaluate(
                        Arc::clone(&self.pool),
                        &grid,
                        init_state,
                        &cx,
                        &cu,
                        &self.mode_schedule,
                        &self.dynamics_per_worker,
                        &self.cost_per_worker,
                        &self.constraint_per_worker,
                        self.desired.as_ref(),
                        &self.settings,
                    )
                },
                |alpha| {
                    (
                        alpha * euclidean_norm(&delta_u_real),
                        alpha * euclidean_norm(&qp_solution.delta_x),
                    )
                },
            );
            timings.line_search += t2.elapsed();

            if self.settings.print_linesearch {
                debug!(alpha = outcome.alpha, accepted = outcome.accepted, attempts = outcome.attempts, "line search step");
            }

            if outcome.accepted {
                x = candidate_x(outcome.alpha);
                u = candidate_u(outcome.alpha);
                last_performance = outcome.candidate;
            }
            last_qp_solution = Some(qp_solution);

            if outcome.converged {
                converged = true;
                break;
            }
        }

        // Pad u to length N+1 by duplicating the last element (§4.8 step 4).
        let mut input = u.clone();
        if let Some(last) = input.last().cloned() {
            input.push(last);
        } else {
            input.push(vec![0.0; self.settings.n_input]);
        }

        let t3 = Instant::now();
        let controller = if self.settings.controller_feedback {
            self.build_feedback_controller(&grid.times, &x, &u, last_qp_solution)
        } else {
            Controller::Feedforward {
                time: grid.times.clone(),
                input: input.clone(),
            }
        };
        timings.controller_emission += t3.elapsed();

        self.previous = Some(PreviousTrajectory {
            time: grid.times.clone(),
            state: x.clone(),
            input: u.clone(),
        });

        let solution = PrimalSolution {
            time: grid.times,
            state: x,
            input,
            controller,
            performance: last_performance,
            iterations_used,
            converged,
        };

        let report = PerformanceReport {
            timings,
            iterations: iterations_used,
        };

        if self.settings.print_solver_statistics {
            info!(%report, "solve complete");
        }

        Ok((solution, report))
    }

    /// Builds the emitted affine-feedback controller from the last solved
    /// QP's Riccati gains (§4.8 step 5): `K_eff = dfdx + dfdu*K_reduced` at
    /// any node a projection was active on, else the gain as solved.
    fn build_feedback_controller(
        &self,
        time: &[f64],
        x: &[Vector],
        u: &[Vector],
        last: Option<crate::qp::QpSolution>,
    ) -> Controller {
        let qp_solution = match last {
            Some(v) => v,
            None => {
                return Controller::Feedforward {
                    time: time.to_vec(),
                    input: u.to_vec(),
                }
            }
        };
        let n = qp_solution.feedback.len();

        let mut gain = Vec::with_capacity(n);
        let mut state = Vec::with_capacity(n);
        let mut input = Vec::with_capacity(n);

        for i in 0..n {
            let node_projection = qp_solution.projections[i].as_ref();
            let k_eff = match node_projection {
                Some(proj) => mat_add(&proj.dfdx, &mat_mul(&proj.dfdu, &qp_solution.feedback[i].k)),
                None => qp_solution.feedback[i].k.clone(),
            };

            gain.push(k_eff);
            state.push(x[i].clone());
            input.push(u[i].clone());
        }

        // Duplicate the last gain/input sample to cover the final hold
        // interval (§4.8 step 5); the state array instead takes the real
        // terminal state, so sampling exactly at the final time compares
        // against the trajectory's own endpoint rather than a stale copy.
        if let Some(last_input) = input.last().cloned() {
            input.push(last_input);
        }
        if let Some(last_gain) = gain.last().cloned() {
            gain.push(last_gain);
        }
        if let Some(x_terminal) = x.last().cloned() {
            state.push(x_terminal);
        }

        Controller::Feedback {
            time: time.to_vec(),
            input,
            state,
            gain,
        }
    }
}

fn reconstruct_real_input(proj: &Projection, delta_x: &Vector, delta_u_tilde: &Vector) -> Vector {
    let mut out = proj.f.clone();
    for (row, o) in out.iter_mut().enumerate() {
        for col in 0..proj.dfdx.ncols() {
            *o += proj.dfdx.read(row, col) * delta_x[col];
        }
        for col in 0..proj.dfdu.ncols() {
            *o += proj.dfdu.read(row, col) * delta_u_tilde[col];
        }
    }
    out
}
