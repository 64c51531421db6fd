//! Trajectory initializer (§4.7): builds the starting `(x, u)` iterate for
//! a fresh solve, either cold (constant state, zero or operating-trajectory
//! input) or warm (time-interpolated from the previous solve's trajectory).

use shoot_core::{OperatingTrajectories, Vector};

/// The previous solve's trajectory, kept around by the driver to warm-start
/// the next one.
pub struct PreviousTrajectory {
    pub time: Vec<f64>,
    pub state: Vec<Vector>,
    pub input: Vec<Vector>,
}

/// Builds the initial `(x, u)` iterate on `grid_times` (length `n+1`).
///
/// `x[0]` is always pinned to `init_state`; every other state sample is
/// either linearly interpolated from `previous` (if supplied) or held at
/// `init_state`. Input samples beyond the span of `previous` fall back to
/// `operating` if present, else the zero vector.
pub fn initialize(
    grid_times: &[f64],
    init_state: &Vector,
    n_input: usize,
    previous: Option<&PreviousTrajectory>,
    operating: Option<&dyn OperatingTrajectories>,
) -> (Vec<Vector>, Vec<Vector>) {
    let n = grid_times.len() - 1;
    let mut x = Vec::with_capacity(n + 1);
    let mut u = Vec::with_capacity(n);

    for (i, &t) in grid_times.iter().enumerate() {
        if i == 0 {
            x.push(init_state.clone());
            continue;
        }
        match previous {
            Some(prev) if within_span(&prev.time, t) => {
                x.push(interpolate_state(&prev.time, &prev.state, t));
            }
            _ => x.push(init_state.clone()),
        }
    }

    for i in 0..n {
        let t = grid_times[i];
        let next_t = grid_times[i + 1];
        match previous {
            Some(prev) if within_span(&prev.time, t) && prev.input.len() == prev.time.len() - 1 => {
                // Inputs are one shorter than the state/time grid (one per
                // interval); interpolate against the interval start times.
                u.push(interpolate_state(&prev.time[..prev.input.len()], &prev.input, t));
            }
            _ => match operating {
                Some(op) => {
                    let (_, u_sample) = op.sample(t, next_t);
                    u.push(u_sample);
                }
                None => u.push(vec![0.0; n_input]),
            },
        }
    }

    (x, u)
}

fn within_span(time: &[f64], t: f64) -> bool {
    match (time.first(), time.last()) {
        (Some(&first), Some(&last)) => t >= first && t <= last,
        _ => false,
    }
}

fn interpolate_state(time: &[f64], values: &[Vector], t: f64) -> Vector {
    if time.len() == 1 {
        return values[0].clone();
    }
    let idx = match time.binary_search_by(|probe| probe.partial_cmp(&t).unwrap()) {
        Ok(i) => i.min(time.len() - 2),
        Err(0) => 0,
        Err(i) => (i - 1).min(time.len() - 2),
    };
    let (t0, t1) = (time[idx], time[idx + 1]);
    let alpha = if (t1 - t0).abs() < 1e-12 {
        0.0
    } else {
        ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
    };
    values[idx]
        .iter()
        .zip(values[idx + 1].iter())
        .map(|(a, b)| a + alpha * (b - a))
        .collect()
}
