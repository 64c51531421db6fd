//! Relaxed-barrier penalty for inequality constraints.
//!
//! Ordinary log barriers are undefined for an infeasible iterate
//! (`h <= 0`), which makes them unusable mid-line-search, where a
//! candidate step can easily violate a constraint the current iterate
//! satisfies. The relaxed variant below is smooth on all of `R`: below a
//! threshold `delta` it switches from `-mu*ln(h)` to a quadratic
//! extension with matching value and first derivative at `h = delta`, so
//! it stays finite (and its Hessian contribution stays positive
//! semi-definite) for `h <= 0`.

/// Value, first derivative, and second derivative of the relaxed barrier
/// `B_mu,delta(h)` at `h`, for constraint `h >= 0`.
pub fn relaxed_barrier(h: f64, mu: f64, delta: f64) -> (f64, f64, f64) {
    debug_assert!(mu > 0.0 && delta > 0.0);
    if h >= delta {
        (-mu * h.ln(), -mu / h, mu / (h * h))
    } else {
        let shifted = (h - 2.0 * delta) / delta;
        let value = 0.5 * mu * (shifted * shifted - 1.0) - mu * delta.ln();
        let d = mu * (h - 2.0 * delta) / (delta * delta);
        let dd = mu / (delta * delta);
        (value, d, dd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_log_barrier_value_and_slope_at_delta() {
        let mu = 1.0;
        let delta = 0.1;
        let (v_log, d_log, _) = relaxed_barrier(delta + 1e-9, mu, delta);
        let (v_quad, d_quad, _) = relaxed_barrier(delta - 1e-9, mu, delta);
        assert!((v_log - v_quad).abs() < 1e-6);
        assert!((d_log - d_quad).abs() < 1e-4);
    }

    #[test]
    fn defined_and_positive_hessian_for_infeasible_argument() {
        let (value, _d, dd) = relaxed_barrier(-1.0, 1.0, 0.05);
        assert!(value.is_finite());
        assert!(dd > 0.0);
    }

    #[test]
    fn decreasing_in_h_near_boundary() {
        let mu = 1.0;
        let delta = 0.05;
        let (v_a, _, _) = relaxed_barrier(0.01, mu, delta);
        let (v_b, _, _) = relaxed_barrier(0.2, mu, delta);
        assert!(v_a > v_b);
    }
}
