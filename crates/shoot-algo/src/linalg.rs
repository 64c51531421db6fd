//! Small dense linear-algebra helpers shared by the integrator, projection,
//! and Riccati QP back-end.
//!
//! `faer::Mat<f64>` is read/written element-wise here (`.read`/`.write`),
//! the same idiom the workspace's own dense solver backends use, rather
//! than relying on operator overloads whose exact shape varies across
//! `faer` versions.

use faer::Mat;
use shoot_core::{Matrix, Vector};

pub fn mat_mul(a: &Matrix, b: &Matrix) -> Matrix {
    debug_assert_eq!(a.ncols(), b.nrows());
    let k = a.ncols();
    Mat::from_fn(a.nrows(), b.ncols(), |i, j| {
        let mut acc = 0.0;
        for l in 0..k {
            acc += a.read(i, l) * b.read(l, j);
        }
        acc
    })
}

pub fn mat_add(a: &Matrix, b: &Matrix) -> Matrix {
    debug_assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a.read(i, j) + b.read(i, j))
}

pub fn mat_scale(a: &Matrix, s: f64) -> Matrix {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a.read(i, j) * s)
}

pub fn transpose(a: &Matrix) -> Matrix {
    Mat::from_fn(a.ncols(), a.nrows(), |i, j| a.read(j, i))
}

pub fn mat_vec(a: &Matrix, v: &[f64]) -> Vector {
    debug_assert_eq!(a.ncols(), v.len());
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a.read(i, j) * v[j]).sum())
        .collect()
}

pub fn vec_add(a: &[f64], b: &[f64]) -> Vector {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

pub fn vec_sub(a: &[f64], b: &[f64]) -> Vector {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

pub fn vec_scale(a: &[f64], s: f64) -> Vector {
    a.iter().map(|x| x * s).collect()
}

pub fn vec_norm2(a: &[f64]) -> f64 {
    a.iter().map(|x| x * x).sum()
}

pub fn hstack(a: &Matrix, b: &Matrix) -> Matrix {
    debug_assert_eq!(a.nrows(), b.nrows());
    Mat::from_fn(a.nrows(), a.ncols() + b.ncols(), |i, j| {
        if j < a.ncols() {
            a.read(i, j)
        } else {
            b.read(i, j - a.ncols())
        }
    })
}

pub fn vstack(a: &Matrix, b: &Matrix) -> Matrix {
    debug_assert_eq!(a.ncols(), b.ncols());
    Mat::from_fn(a.nrows() + b.nrows(), a.ncols(), |i, j| {
        if i < a.nrows() {
            a.read(i, j)
        } else {
            b.read(i - a.nrows(), j)
        }
    })
}

/// Solves a dense square linear system `a * x = b` via Gaussian elimination
/// with partial pivoting. Returns `None` if `a` is (numerically) singular.
///
/// Mirrors the partial-pivot Gauss elimination used elsewhere in the
/// workspace's dense `LinearSystemBackend` implementations, specialized to
/// the small per-node systems the Riccati recursion solves.
pub fn solve_square(a: &[Vec<f64>], b: &[f64]) -> Option<Vector> {
    let n = a.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let mut m: Vec<Vec<f64>> = a.to_vec();
    let mut rhs = b.to_vec();

    for col in 0..n {
        let mut pivot = col;
        let mut best = m[col][col].abs();
        for row in col + 1..n {
            if m[row][col].abs() > best {
                best = m[row][col].abs();
                pivot = row;
            }
        }
        if best < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        let diag = m[col][col];
        for v in m[col][col..].iter_mut() {
            *v /= diag;
        }
        rhs[col] /= diag;

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    Some(rhs)
}

/// Reduces an `m x width` augmented matrix to row-echelon form, restricting
/// pivot search to columns `0..pivot_cols`. Used by [`crate::project`] to
/// eliminate the dependent (pivot) components of a constrained input.
///
/// Returns the pivot column index chosen for each row (row `r`'s pivot is
/// `pivots[r]`), or `Err(rank)` with the rank actually achieved if fewer
/// than `m` independent pivot columns exist among the first `pivot_cols`
/// columns.
pub fn row_reduce(matrix: &mut [Vec<f64>], pivot_cols: usize) -> Result<Vec<usize>, usize> {
    let m = matrix.len();
    let mut pivots = Vec::with_capacity(m);
    let mut row = 0usize;

    for col in 0..pivot_cols {
        if row == m {
            break;
        }
        let mut best_row = row;
        let mut best = matrix[row][col].abs();
        for r in row + 1..m {
            if matrix[r][col].abs() > best {
                best = matrix[r][col].abs();
                best_row = r;
            }
        }
        if best < 1e-10 {
            continue;
        }
        matrix.swap(row, best_row);

        let diag = matrix[row][col];
        let width = matrix[row].len();
        for v in matrix[row][col..width].iter_mut() {
            *v /= diag;
        }

        for r in 0..m {
            if r == row {
                continue;
            }
            let factor = matrix[r][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..width {
                matrix[r][k] -= factor * matrix[row][k];
            }
        }

        pivots.push(col);
        row += 1;
    }

    if row < m {
        Err(row)
    } else {
        Ok(pivots)
    }
}
