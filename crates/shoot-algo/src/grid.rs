//! Shooting time-grid construction with event splitting.
//!
//! Every switching time in the mode schedule is duplicated with a small
//! epsilon offset, so a shooting interval never straddles a mode change:
//! the closing sample of one interval and the opening sample of the next
//! both sit at (numerically) the same instant.

use shoot_core::{ModeSchedule, ShootError, ShootResult};

/// A constructed shooting grid: strictly increasing except at duplicated
/// event boundaries, where two consecutive samples are `event_epsilon`
/// apart.
#[derive(Debug, Clone)]
pub struct TimeGrid {
    pub times: Vec<f64>,
    /// Index of the closing sample of each duplicated event pair (i.e. `k`
    /// such that `times[k] == event` and `times[k+1] == event + eps`).
    pub event_node_indices: Vec<usize>,
}

impl TimeGrid {
    pub fn n_nodes(&self) -> usize {
        self.times.len() - 1
    }
}

/// Builds a grid over `[t0, tf]` with nominal spacing `dt`, duplicating
/// every event time in `schedule` that lies strictly inside the horizon.
pub fn build_time_grid(
    t0: f64,
    tf: f64,
    dt: f64,
    schedule: &ModeSchedule,
    epsilon: f64,
) -> ShootResult<TimeGrid> {
    if !(dt > 0.0) {
        return Err(ShootError::InvalidTimeGrid(format!(
            "nominal step dt must be positive, got {dt}"
        )));
    }
    if !(tf > t0) {
        return Err(ShootError::InvalidTimeGrid(format!(
            "final time {tf} must exceed initial time {t0}"
        )));
    }

    let events: Vec<f64> = schedule
        .event_times()
        .iter()
        .copied()
        .filter(|&e| {
            if e <= t0 || e >= tf {
                return false;
            }
            (e - t0).abs() > epsilon && (tf - e).abs() > epsilon
        })
        .collect();
    for &e in &events {
        if e < t0 || e > tf {
            return Err(ShootError::InvalidTimeGrid(format!(
                "event time {e} outside horizon [{t0}, {tf}]"
            )));
        }
    }

    // Build interior samples segment by segment between consecutive event
    // boundaries (treating t0/tf as implicit boundaries), duplicating each
    // internal boundary.
    let mut boundaries = Vec::with_capacity(events.len() + 2);
    boundaries.push(t0);
    boundaries.extend(events.iter().copied());
    boundaries.push(tf);

    let mut times = Vec::new();
    let mut event_node_indices = Vec::new();

    for (seg_idx, window) in boundaries.windows(2).enumerate() {
        let (seg_start, seg_end) = (window[0], window[1]);
        let is_first_segment = seg_idx == 0;
        let n_steps = ((seg_end - seg_start) / dt).round().max(1.0) as usize;
        let actual_dt = (seg_end - seg_start) / n_steps as f64;

        let start_idx = if is_first_segment { 0 } else { 1 };
        for k in start_idx..n_steps {
            let mut t = seg_start + actual_dt * k as f64;
            if (t - seg_start).abs() < epsilon {
                t = seg_start;
            }
            times.push(t);
        }
        if seg_idx + 1 == boundaries.len() - 1 {
            times.push(seg_end);
        } else {
            // closing sample of this segment, then reopening at +epsilon
            event_node_indices.push(times.len());
            times.push(seg_end);
            times.push(seg_end + epsilon);
        }
    }

    Ok(TimeGrid {
        times,
        event_node_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_grid_has_n_plus_one_samples() {
        let schedule = ModeSchedule::new(vec![]);
        let grid = build_time_grid(0.0, 1.0, 0.1, &schedule, 1e-6).unwrap();
        assert_eq!(grid.times.first().copied(), Some(0.0));
        assert_eq!(grid.times.last().copied(), Some(1.0));
        assert!(grid.event_node_indices.is_empty());
    }

    #[test]
    fn events_are_duplicated_with_epsilon_gap() {
        let schedule = ModeSchedule::new(vec![0.25, 0.5]);
        let eps = 1e-6;
        let grid = build_time_grid(0.0, 1.0, 0.1, &schedule, eps).unwrap();

        assert!(grid.times.iter().any(|&t| (t - 0.25).abs() < 1e-9));
        assert!(grid.times.iter().any(|&t| (t - (0.25 + eps)).abs() < 1e-9));
        assert!(grid.times.iter().any(|&t| (t - 0.5).abs() < 1e-9));
        assert!(grid.times.iter().any(|&t| (t - (0.5 + eps)).abs() < 1e-9));

        for &k in &grid.event_node_indices {
            let gap = grid.times[k + 1] - grid.times[k];
            assert!((gap - eps).abs() < 1e-12);
        }
    }

    #[test]
    fn event_at_boundary_is_not_duplicated() {
        let schedule = ModeSchedule::new(vec![0.0, 1.0]);
        let grid = build_time_grid(0.0, 1.0, 0.1, &schedule, 1e-6).unwrap();
        assert!(grid.event_node_indices.is_empty());
    }

    #[test]
    fn rejects_nonpositive_step() {
        let schedule = ModeSchedule::new(vec![]);
        let err = build_time_grid(0.0, 1.0, 0.0, &schedule, 1e-6).unwrap_err();
        assert!(matches!(err, ShootError::InvalidTimeGrid(_)));
    }
}
