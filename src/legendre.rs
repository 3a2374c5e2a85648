//! Legendre polynomial baseline/drift regressors (spec §3, supplemented from
//! the original tool's polynomial-baseline synthesis).
//!
//! Generates orthogonal polynomial columns over a run's timepoints, mapped
//! onto `[-1, 1]`, so baseline drift can be absorbed by the design without
//! introducing collinearity between polynomial orders.

use crate::error::{Result, VoxRemlError};
use ndarray::Array2;

/// Evaluate the Legendre polynomial of `order` at `x` in `[-1, 1]` via the
/// standard three-term recurrence.
pub fn legendre_p(order: usize, x: f64) -> f64 {
    match order {
        0 => 1.0,
        1 => x,
        _ => {
            let mut p0 = 1.0;
            let mut p1 = x;
            for n in 1..order {
                let p2 = ((2 * n + 1) as f64 * x * p1 - n as f64 * p0) / (n + 1) as f64;
                p0 = p1;
                p1 = p2;
            }
            p1
        }
    }
}

/// Build `max_order + 1` Legendre baseline columns (orders `0..=max_order`)
/// over `n` timepoints, each mapped linearly from its row index onto
/// `[-1, 1]`. Column 0 is the constant 1 (the intercept).
pub fn baseline_columns(n: usize, max_order: usize) -> Result<Array2<f64>> {
    if n < 2 {
        return Err(VoxRemlError::InvalidParam(
            "legendre baseline needs at least 2 timepoints".into(),
        ));
    }
    let mut out = Array2::<f64>::zeros((n, max_order + 1));
    let denom = (n - 1) as f64;
    for i in 0..n {
        let x = 2.0 * i as f64 / denom - 1.0;
        for order in 0..=max_order {
            out[[i, order]] = legendre_p(order, x);
        }
    }
    Ok(out)
}

/// Per-run baseline columns: each run gets its own Legendre basis over its
/// own extent, zero-padded outside the run, so drift is modeled
/// independently per run (spec's run-aware baseline).
pub fn per_run_baseline_columns(
    n_full: usize,
    run_starts: &[usize],
    max_order: usize,
) -> Result<Array2<f64>> {
    if run_starts.is_empty() || run_starts[0] != 0 {
        return Err(VoxRemlError::InvalidParam(
            "run starts must be non-empty with r[0] == 0".into(),
        ));
    }
    let n_runs = run_starts.len();
    let cols_per_run = max_order + 1;
    let mut out = Array2::<f64>::zeros((n_full, n_runs * cols_per_run));
    for (run_idx, &start) in run_starts.iter().enumerate() {
        let end = run_starts.get(run_idx + 1).copied().unwrap_or(n_full);
        let run_len = end - start;
        let run_cols = baseline_columns(run_len, max_order)?;
        out.slice_mut(ndarray::s![start..end, run_idx * cols_per_run..(run_idx + 1) * cols_per_run])
            .assign(&run_cols);
    }
    Ok(out)
}

/// Labels for a set of per-run baseline columns, matching the layout
/// produced by [`per_run_baseline_columns`].
pub fn per_run_labels(n_runs: usize, max_order: usize) -> Vec<String> {
    let mut labels = Vec::with_capacity(n_runs * (max_order + 1));
    for run_idx in 0..n_runs {
        for order in 0..=max_order {
            labels.push(format!("poly{order}_run{run_idx}"));
        }
    }
    labels
}
