use crate::stage::BookkeepingSnapshot;
use serde::Serialize;
use std::time::Duration;

/// Completion and timing for one (entity, stage class).
///
/// `estimated_time`/`elapsed_time` of `None` mean "unknown": no worker has been
/// dispatched yet, so there is nothing to extrapolate from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    pub finished: bool,
    pub completed_units: usize,
    pub fraction: f64,
    pub estimated_time: Option<Duration>,
    pub elapsed_time: Option<Duration>,
}

impl ProgressState {
    pub fn unknown() -> Self {
        Self {
            finished: false,
            completed_units: 0,
            fraction: 0.0,
            estimated_time: None,
            elapsed_time: None,
        }
    }

    /// Remaining time as (minutes, seconds).
    pub fn estimated_mins_secs(&self) -> Option<(u64, u64)> {
        self.estimated_time.map(mins_secs)
    }

    pub fn elapsed_mins_secs(&self) -> Option<(u64, u64)> {
        self.elapsed_time.map(mins_secs)
    }
}

fn mins_secs(d: Duration) -> (u64, u64) {
    let secs = d.as_secs();
    (secs / 60, secs % 60)
}

/// Derive progress from a bookkeeping snapshot.
///
/// `total_units` is the number of units each tracked operation processes
/// (e.g. the page count); `elapsed` is time since the entity started.
pub fn compute(
    snapshot: &BookkeepingSnapshot,
    total_units: usize,
    elapsed: Duration,
) -> ProgressState {
    if snapshot.finished {
        return ProgressState {
            finished: true,
            completed_units: total_units,
            fraction: 1.0,
            estimated_time: Some(Duration::ZERO),
            elapsed_time: Some(elapsed),
        };
    }

    let completed: usize = snapshot.operations.iter().map(|op| op.completed).sum();
    let op_count = snapshot.operations.len();
    let denominator = (total_units * op_count) as f64;
    let fraction = if denominator > 0.0 {
        (completed as f64 / denominator).min(1.0)
    } else {
        0.0
    };

    if snapshot.thread_count == 0 {
        if completed == 0 {
            return ProgressState::unknown();
        }
        // Workers have come and gone: keep the completion, but there is no
        // live rate to estimate from.
        return ProgressState {
            finished: false,
            completed_units: completed,
            fraction,
            estimated_time: None,
            elapsed_time: Some(elapsed),
        };
    }

    let per_unit: Duration = snapshot
        .operations
        .iter()
        .filter(|op| op.completed > 0)
        .filter_map(|op| op.average_exec_time)
        .sum();
    let average_done = if op_count > 0 {
        completed as f64 / op_count as f64
    } else {
        0.0
    };
    let remaining_units = (total_units as f64 - average_done).max(0.0);
    let estimated = per_unit.mul_f64(remaining_units) / snapshot.thread_count as u32;

    ProgressState {
        finished: false,
        completed_units: completed,
        fraction,
        estimated_time: Some(estimated),
        elapsed_time: Some(elapsed),
    }
}
