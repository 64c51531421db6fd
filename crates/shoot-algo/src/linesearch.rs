//! Filter line-search (§4.6): merit-plus-violation acceptance rule, step
//! contraction, and the convergence test.

use shoot_core::{PerformanceIndex, Vector};

use crate::config::SqpSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// Classifies a candidate performance index `candidate` against the
/// baseline `baseline` per the §4.6 regime table.
pub fn accept(baseline: &PerformanceIndex, candidate: &PerformanceIndex, settings: &SqpSettings) -> Decision {
    let v = candidate.violation_norm();
    let v_baseline = baseline.violation_norm();

    if v > settings.g_max {
        return Decision::Reject;
    }
    if v < settings.g_min {
        return if candidate.merit < baseline.merit {
            Decision::Accept
        } else {
            Decision::Reject
        };
    }
    let sufficient_merit_decrease = candidate.merit < baseline.merit - settings.gamma_c * v_baseline;
    let sufficient_violation_decrease = v < (1.0 - settings.gamma_c) * v_baseline;
    if sufficient_merit_decrease || sufficient_violation_decrease {
        Decision::Accept
    } else {
        Decision::Reject
    }
}

pub struct SearchOutcome {
    pub alpha: f64,
    pub accepted: bool,
    pub converged: bool,
    pub candidate: PerformanceIndex,
    pub attempts: usize,
}

/// Runs the backtracking filter search, calling `evaluate(alpha)` to
/// re-evaluate the performance index of the candidate
/// `(x + alpha*dx, u + alpha*du)`. `step_norm(alpha)` returns
/// `(alpha*||dx||, alpha*||du||)` so the step-size stopping criterion can be
/// checked without the search owning the trajectories itself.
pub fn search<E, S>(
    baseline: &PerformanceIndex,
    settings: &SqpSettings,
    mut evaluate: E,
    step_norm: S,
) -> SearchOutcome
where
    E: FnMut(f64) -> PerformanceIndex,
    S: Fn(f64) -> (f64, f64),
{
    let mut alpha = 1.0f64;
    let mut attempts = 0usize;

    loop {
        attempts += 1;
        let candidate = evaluate(alpha);
        let (du_norm, dx_norm) = step_norm(alpha);
        let small_step = du_norm < settings.delta_tol && dx_norm < settings.delta_tol;

        match accept(baseline, &candidate, settings) {
            Decision::Accept => {
                let v = candidate.violation_norm();
                let cost_converged =
                    (baseline.merit - candidate.merit).abs() < settings.cost_tol && v < settings.g_min;
                return SearchOutcome {
                    alpha,
                    accepted: true,
                    converged: small_step || cost_converged,
                    candidate,
                    attempts,
                };
            }
            Decision::Reject => {
                if small_step || alpha <= settings.alpha_min {
                    return SearchOutcome {
                        alpha,
                        accepted: false,
                        converged: true,
                        candidate,
                        attempts,
                    };
                }
                alpha *= settings.alpha_decay;
                if alpha < settings.alpha_min {
                    alpha = settings.alpha_min;
                }
            }
        }
    }
}

pub fn euclidean_norm(trajectory: &[Vector]) -> f64 {
    trajectory
        .iter()
        .flat_map(|v| v.iter())
        .map(|x| x * x)
        .sum::<f64>()
        .sqrt()
}
