//! Null-space projection of a linearized state-input equality constraint.
//!
//! Given `C_u*u + C_x*x + f_eq = 0` at a node (`C_u` full row rank), solves
//! for the "dependent" components of `u` in terms of the "free" ones,
//! producing an affine map `u = f + dfdx*x + dfdu*u_tilde` where `u_tilde`
//! ranges over the free components. This is the mechanism both the
//! projected node transcriber (§4.3) and the unprojected QP back-end path
//! (which still must eliminate an equality-constrained stage QP) use, so it
//! lives in its own module rather than being duplicated.
//!
//! Implemented as Gauss-Jordan elimination with column-pivoting restricted
//! to the `u` columns of the augmented system `[C_u | -C_x | -f_eq]`,
//! following the same partial-pivot dense elimination style as the
//! workspace's other dense linear solvers (see [`crate::linalg`]).

use faer::Mat;
use shoot_core::{identity, zeros, ConstraintBlock, CostBlock, DynamicsBlock, Matrix, ShootError, ShootResult, Vector};

use crate::linalg::{hstack, mat_add, mat_mul, mat_vec, row_reduce, transpose, vec_add, vstack};

/// The affine reconstruction `u = f + dfdx*x + dfdu*u_tilde`.
#[derive(Debug, Clone)]
pub struct Projection {
    pub f: Vector,
    pub dfdx: Matrix,
    pub dfdu: Matrix,
    /// Dimension of the reduced free input `u_tilde`.
    pub n_reduced: usize,
}

pub fn project_equality(node: usize, constraint: &ConstraintBlock, n_x: usize) -> ShootResult<Projection> {
    let m = constraint.dfdu.nrows();
    let n_u = constraint.dfdu.ncols();
    if m == 0 {
        // No equality rows: the map is the identity on u.
        return Ok(Projection {
            f: vec![0.0; n_u],
            dfdx: Mat::from_fn(n_u, n_x, |_, _| 0.0),
            dfdu: shoot_core::identity(n_u),
            n_reduced: n_u,
        });
    }

    let width = n_u + n_x + 1;
    let mut augmented: Vec<Vec<f64>> = (0..m)
        .map(|r| {
            let mut row = Vec::with_capacity(width);
            for c in 0..n_u {
                row.push(constraint.dfdu.read(r, c));
            }
            for c in 0..n_x {
                row.push(-constraint.dfdx.read(r, c));
            }
            row.push(-constraint.f[r]);
            row
        })
        .collect();

    let pivots = row_reduce(&mut augmented, n_u).map_err(|rank| ShootError::RankDeficientProjection {
        node,
        rank,
        expected: m,
    })?;

    let is_pivot: Vec<bool> = {
        let mut flags = vec![false; n_u];
        for &p in &pivots {
            flags[p] = true;
        }
        flags
    };
    let free_cols: Vec<usize> = (0..n_u).filter(|&c| !is_pivot[c]).collect();
    let n_reduced = free_cols.len();

    let mut f = vec![0.0; n_u];
    let mut dfdx = Mat::from_fn(n_u, n_x, |_, _| 0.0);
    let mut dfdu = Mat::from_fn(n_u, n_reduced, |_, _| 0.0);

    for (k, &free_col) in free_cols.iter().enumerate() {
        dfdu.write(free_col, k, 1.0);
    }

    for (row_idx, &pivot_col) in pivots.iter().enumerate() {
        let row = &augmented[row_idx];
        f[pivot_col] = row[n_u + n_x];
        for c in 0..n_x {
            dfdx.write(pivot_col, c, row[n_u + c]);
        }
        for (k, &free_col) in free_cols.iter().enumerate() {
            dfdu.write(pivot_col, k, -row[free_col]);
        }
    }

    Ok(Projection {
        f,
        dfdx,
        dfdu,
        n_reduced,
    })
}

/// Rewrites `dx_{i+1} = A*dx_i + B*u_i + bias` to be expressed in the
/// reduced input `u_tilde`, given `u = f + dfdx*dx + dfdu*u_tilde`.
pub fn project_dynamics(block: &DynamicsBlock, proj: &Projection) -> DynamicsBlock {
    let b_dfdx = mat_mul(&block.b, &proj.dfdx);
    let a = mat_add(&block.a, &b_dfdx);
    let b = mat_mul(&block.b, &proj.dfdu);
    let bf = mat_vec(&block.b, &proj.f);
    let bias = vec_add(&block.bias, &bf);
    DynamicsBlock { a, b, bias }
}

/// Rewrites a stage cost quadratic `1/2 z'Hz + g'z` from `z = [dx;u]` to
/// `z' = [dx;u_tilde]` given `u = f + dfdx*dx + dfdu*u_tilde`, i.e.
/// `z = T*z' + t0` with `T = [[I,0],[dfdx,dfdu]]`, `t0 = [0;f]`.
pub fn project_cost(cost: &CostBlock, proj: &Projection, n_x: usize) -> CostBlock {
    let top = hstack(&identity(n_x), &zeros(n_x, proj.n_reduced));
    let bottom = hstack(&proj.dfdx, &proj.dfdu);
    let t = vstack(&top, &bottom);
    let t0: Vector = vec![0.0; n_x]
        .into_iter()
        .chain(proj.f.iter().copied())
        .collect();

    let tt = transpose(&t);
    let h_new = mat_mul(&mat_mul(&tt, &cost.h), &t);
    let h_t0 = mat_vec(&cost.h, &t0);
    let g_new = mat_vec(&tt, &vec_add(&cost.g, &h_t0));
    let c_new = cost.c
        + cost.g.iter().zip(&t0).map(|(g, t)| g * t).sum::<f64>()
        + 0.5 * t0.iter().zip(&h_t0).map(|(a, b)| a * b).sum::<f64>();

    CostBlock {
        h: h_new,
        g: g_new,
        c: c_new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoot_core::zeros;

    #[test]
    fn single_row_constraint_reduces_input_by_one() {
        // C_u = [1, 0] on a 2-input u -> u[0] is pivoted out, u[1] is free.
        let mut dfdu = zeros(1, 2);
        dfdu.write(0, 0, 1.0);
        let dfdx = zeros(1, 2);
        let block = ConstraintBlock {
            f: vec![0.3],
            dfdx,
            dfdu,
        };
        let proj = project_equality(0, &block, 2).unwrap();
        assert_eq!(proj.n_reduced, 1);
        // u = f + dfdx*x + dfdu*u_tilde; with x=0, u_tilde=[2.0]:
        let u0 = proj.f[0] + proj.dfdu.read(0, 0) * 2.0;
        let u1 = proj.f[1] + proj.dfdu.read(1, 0) * 2.0;
        assert!((u0 - (-0.3)).abs() < 1e-9);
        assert!((u1 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn rank_deficient_jacobian_is_rejected() {
        let mut dfdu = zeros(2, 2);
        dfdu.write(0, 0, 1.0);
        dfdu.write(0, 1, 2.0);
        dfdu.write(1, 0, 2.0);
        dfdu.write(1, 1, 4.0);
        let dfdx = zeros(2, 1);
        let block = ConstraintBlock {
            f: vec![0.0, 0.0],
            dfdx,
            dfdu,
        };
        let err = project_equality(3, &block, 1).unwrap_err();
        match err {
            ShootError::RankDeficientProjection { node, rank, expected } => {
                assert_eq!(node, 3);
                assert_eq!(rank, 1);
                assert_eq!(expected, 2);
            }
            _ => panic!("expected RankDeficientProjection"),
        }
    }
}
