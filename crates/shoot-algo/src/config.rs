//! Solver configuration. Builder-style, following the `with_*` setter
//! convention used by the other solver configs in this workspace.

/// Explicit (non-sensitivity) integrator used to propagate a candidate
/// trajectory for performance re-evaluation, and the base scheme whose
/// matching sensitivity integrator produces the transcription's `A`/`B`
/// blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegratorType {
    Euler,
    #[default]
    Rk2,
    Rk4,
}

/// Requested OS scheduling priority for the worker pool's helper threads.
/// `std::thread` exposes no portable priority-setting API, so this is
/// recorded for the caller's benefit (and for a future platform-specific
/// backend) but is not currently applied to the spawned threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadPriority {
    #[default]
    Normal,
    High,
    Realtime,
}

/// Tunables for the SQP engine. Every field here corresponds to a
/// configuration item enumerated in the specification.
#[derive(Debug, Clone)]
pub struct SqpSettings {
    pub dt: f64,
    pub sqp_iterations: usize,
    pub delta_tol: f64,
    pub cost_tol: f64,

    pub alpha_decay: f64,
    pub alpha_min: f64,
    pub gamma_c: f64,
    pub g_max: f64,
    pub g_min: f64,

    pub integrator: IntegratorType,

    pub n_threads: usize,
    pub thread_priority: ThreadPriority,

    pub project_state_input_equality_constraints: bool,
    pub controller_feedback: bool,

    pub inequality_constraint_mu: f64,
    pub inequality_constraint_delta: f64,

    pub n_state: usize,
    pub n_input: usize,

    pub print_solver_status: bool,
    pub print_linesearch: bool,
    pub print_solver_statistics: bool,

    /// Epsilon separating a duplicated event-time pair on the time grid.
    pub event_epsilon: f64,
}

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            dt: 0.01,
            sqp_iterations: 10,
            delta_tol: 1e-6,
            cost_tol: 1e-6,
            alpha_decay: 0.5,
            alpha_min: 1e-4,
            gamma_c: 1e-4,
            g_max: 1e-1,
            g_min: 1e-4,
            integrator: IntegratorType::Rk2,
            n_threads: num_cpus::get().max(1),
            thread_priority: ThreadPriority::Normal,
            project_state_input_equality_constraints: false,
            controller_feedback: false,
            inequality_constraint_mu: 0.0,
            inequality_constraint_delta: 0.0,
            n_state: 0,
            n_input: 0,
            print_solver_status: false,
            print_linesearch: false,
            print_solver_statistics: false,
            event_epsilon: 1e-6,
        }
    }
}

impl SqpSettings {
    pub fn new(n_state: usize, n_input: usize) -> Self {
        Self {
            n_state,
            n_input,
            ..Default::default()
        }
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_sqp_iterations(mut self, n: usize) -> Self {
        self.sqp_iterations = n;
        self
    }

    pub fn with_tolerances(mut self, delta_tol: f64, cost_tol: f64) -> Self {
        self.delta_tol = delta_tol;
        self.cost_tol = cost_tol;
        self
    }

    pub fn with_linesearch_params(
        mut self,
        alpha_decay: f64,
        alpha_min: f64,
        gamma_c: f64,
        g_min: f64,
        g_max: f64,
    ) -> Self {
        self.alpha_decay = alpha_decay;
        self.alpha_min = alpha_min;
        self.gamma_c = gamma_c;
        self.g_min = g_min;
        self.g_max = g_max;
        self
    }

    pub fn with_integrator(mut self, integrator: IntegratorType) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn with_n_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads.max(1);
        self
    }

    pub fn with_thread_priority(mut self, priority: ThreadPriority) -> Self {
        self.thread_priority = priority;
        self
    }

    pub fn with_projection(mut self, enabled: bool) -> Self {
        self.project_state_input_equality_constraints = enabled;
        self
    }

    pub fn with_controller_feedback(mut self, enabled: bool) -> Self {
        self.controller_feedback = enabled;
        self
    }

    pub fn with_inequality_barrier(mut self, mu: f64, delta: f64) -> Self {
        self.inequality_constraint_mu = mu;
        self.inequality_constraint_delta = delta;
        self
    }

    pub fn with_diagnostics(mut self, status: bool, linesearch: bool, statistics: bool) -> Self {
        self.print_solver_status = status;
        self.print_linesearch = linesearch;
        self.print_solver_statistics = statistics;
        self
    }

    /// Whether the relaxed-barrier inequality penalty is active.
    pub fn barrier_active(&self) -> bool {
        self.inequality_constraint_mu > 0.0 && self.inequality_constraint_delta > 0.0
    }
}
