//! Explicit integrators (Euler, RK2/Heun, RK4) and their matching
//! sensitivity (variational) equations.
//!
//! The performance evaluator only needs [`integrate`]: it propagates a
//! candidate trajectory without derivatives. The node transcriber needs
//! [`integrate_with_sensitivity`], which additionally carries the
//! state/input Jacobians of the propagated step through the same scheme via
//! the chain rule, so the discretized `A`/`B` blocks are consistent with
//! the discretization actually used.

use shoot_core::{identity, Matrix, SystemDynamics, Vector};

use crate::config::IntegratorType;
use crate::linalg::{mat_add, mat_mul, mat_scale, vec_add, vec_scale};

pub fn integrate(
    integrator: IntegratorType,
    dynamics: &dyn SystemDynamics,
    t: f64,
    dt: f64,
    x: &Vector,
    u: &Vector,
    mode: usize,
) -> Vector {
    match integrator {
        IntegratorType::Euler => euler(dynamics, t, dt, x, u, mode),
        IntegratorType::Rk2 => rk2(dynamics, t, dt, x, u, mode),
        IntegratorType::Rk4 => rk4(dynamics, t, dt, x, u, mode),
    }
}

fn euler(d: &dyn SystemDynamics, t: f64, dt: f64, x: &Vector, u: &Vector, mode: usize) -> Vector {
    let k1 = d.flow_map(t, x, u, mode);
    vec_add(x, &vec_scale(&k1, dt))
}

fn rk2(d: &dyn SystemDynamics, t: f64, dt: f64, x: &Vector, u: &Vector, mode: usize) -> Vector {
    let k1 = d.flow_map(t, x, u, mode);
    let x2 = vec_add(x, &vec_scale(&k1, dt));
    let k2 = d.flow_map(t + dt, &x2, u, mode);
    vec_add(x, &vec_scale(&vec_add(&k1, &k2), dt * 0.5))
}

fn rk4(d: &dyn SystemDynamics, t: f64, dt: f64, x: &Vector, u: &Vector, mode: usize) -> Vector {
    let k1 = d.flow_map(t, x, u, mode);
    let xa = vec_add(x, &vec_scale(&k1, dt * 0.5));
    let k2 = d.flow_map(t + dt * 0.5, &xa, u, mode);
    let xb = vec_add(x, &vec_scale(&k2, dt * 0.5));
    let k3 = d.flow_map(t + dt * 0.5, &xb, u, mode);
    let xc = vec_add(x, &vec_scale(&k3, dt));
    let k4 = d.flow_map(t + dt, &xc, u, mode);
    let sum: Vector = k1
        .iter()
        .zip(&k2)
        .zip(&k3)
        .zip(&k4)
        .map(|(((a, b), c), e)| a + 2.0 * b + 2.0 * c + e)
        .collect();
    vec_add(x, &vec_scale(&sum, dt / 6.0))
}

/// Propagates `(x, u)` one step and returns `(x_next, A, B)` where
/// `A = d(x_next)/d(x)` and `B = d(x_next)/d(u)`, both consistent with the
/// same explicit scheme used to compute `x_next`.
pub fn integrate_with_sensitivity(
    integrator: IntegratorType,
    dynamics: &dyn SystemDynamics,
    t: f64,
    dt: f64,
    x: &Vector,
    u: &Vector,
    mode: usize,
) -> (Vector, Matrix, Matrix) {
    match integrator {
        IntegratorType::Euler => euler_sens(dynamics, t, dt, x, u, mode),
        IntegratorType::Rk2 => rk2_sens(dynamics, t, dt, x, u, mode),
        IntegratorType::Rk4 => rk4_sens(dynamics, t, dt, x, u, mode),
    }
}

fn euler_sens(
    d: &dyn SystemDynamics,
    t: f64,
    dt: f64,
    x: &Vector,
    u: &Vector,
    mode: usize,
) -> (Vector, Matrix, Matrix) {
    let k1 = d.flow_map(t, x, u, mode);
    let (fx, fu) = d.jacobians(t, x, u, mode);
    let x_next = vec_add(x, &vec_scale(&k1, dt));
    let a = mat_add(&identity(x.len()), &mat_scale(&fx, dt));
    let b = mat_scale(&fu, dt);
    (x_next, a, b)
}

fn rk2_sens(
    d: &dyn SystemDynamics,
    t: f64,
    dt: f64,
    x: &Vector,
    u: &Vector,
    mode: usize,
) -> (Vector, Matrix, Matrix) {
    let n = x.len();
    let k1 = d.flow_map(t, x, u, mode);
    let (fx1, fu1) = d.jacobians(t, x, u, mode);

    let x2 = vec_add(x, &vec_scale(&k1, dt));
    let k2 = d.flow_map(t + dt, &x2, u, mode);
    let (fx2, fu2) = d.jacobians(t + dt, &x2, u, mode);

    let dxa_dx = mat_add(&identity(n), &mat_scale(&fx1, dt));
    let dxa_du = mat_scale(&fu1, dt);

    let x_next = vec_add(x, &vec_scale(&vec_add(&k1, &k2), dt * 0.5));

    let a = mat_add(
        &identity(n),
        &mat_scale(&mat_add(&fx1, &mat_mul(&fx2, &dxa_dx)), dt * 0.5),
    );
    let b = mat_scale(
        &mat_add(&fu1, &mat_add(&mat_mul(&fx2, &dxa_du), &fu2)),
        dt * 0.5,
    );
    (x_next, a, b)
}

fn rk4_sens(
    d: &dyn SystemDynamics,
    t: f64,
    dt: f64,
    x: &Vector,
    u: &Vector,
    mode: usize,
) -> (Vector, Matrix, Matrix) {
    let n = x.len();
    let half = dt * 0.5;

    let k1 = d.flow_map(t, x, u, mode);
    let (fx1, fu1) = d.jacobians(t, x, u, mode);

    let xa = vec_add(x, &vec_scale(&k1, half));
    let k2 = d.flow_map(t + half, &xa, u, mode);
    let (fx2, fu2) = d.jacobians(t + half, &xa, u, mode);
    let dxa_dx = mat_add(&identity(n), &mat_scale(&fx1, half));
    let dxa_du = mat_scale(&fu1, half);

    let xb = vec_add(x, &vec_scale(&k2, half));
    let k3 = d.flow_map(t + half, &xb, u, mode);
    let (fx3, fu3) = d.jacobians(t + half, &xb, u, mode);
    let dxb_dx = mat_add(&identity(n), &mat_scale(&mat_mul(&fx2, &dxa_dx), half));
    let dxb_du = mat_scale(&mat_add(&mat_mul(&fx2, &dxa_du), &fu2), half);

    let xc = vec_add(x, &vec_scale(&k3, dt));
    let k4 = d.flow_map(t + dt, &xc, u, mode);
    let (fx4, fu4) = d.jacobians(t + dt, &xc, u, mode);
    let dxc_dx = mat_add(&identity(n), &mat_scale(&mat_mul(&fx3, &dxb_dx), dt));
    let dxc_du = mat_scale(&mat_add(&mat_mul(&fx3, &dxb_du), &fu3), dt);

    let sum: Vector = k1
        .iter()
        .zip(&k2)
        .zip(&k3)
        .zip(&k4)
        .map(|(((a, b), c), e)| a + 2.0 * b + 2.0 * c + e)
        .collect();
    let x_next = vec_add(x, &vec_scale(&sum, dt / 6.0));

    let a_sum = mat_add(
        &mat_add(&fx1, &mat_scale(&mat_mul(&fx2, &dxa_dx), 2.0)),
        &mat_add(&mat_scale(&mat_mul(&fx3, &dxb_dx), 2.0), &mat_mul(&fx4, &dxc_dx)),
    );
    let a = mat_add(&identity(n), &mat_scale(&a_sum, dt / 6.0));

    let b_sum = mat_add(
        &mat_add(&fu1, &mat_scale(&mat_add(&mat_mul(&fx2, &dxa_du), &fu2), 2.0)),
        &mat_add(
            &mat_scale(&mat_add(&mat_mul(&fx3, &dxb_du), &fu3), 2.0),
            &mat_add(&mat_mul(&fx4, &dxc_du), &fu4),
        ),
    );
    let b = mat_scale(&b_sum, dt / 6.0);

    (x_next, a, b)
}
