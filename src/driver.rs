//! Voxel driver: the per-voxel state machine and its concurrency model
//! (spec §4.8, §5).
//!
//! Work is partitioned over a flat index of in-mask voxels and run through
//! a `rayon` thread pool sized by [`SolverConfig::n_threads`]. Each slice's
//! [`Rcoll`] is built at most once, guarded by a per-slice lock; other
//! threads block until the build completes. Per-voxel extra regressors or
//! scratch paging force sequential execution, per spec §5.

use crate::config::SolverConfig;
use crate::design::{self, ContrastMatrix, DesignMatrix};
use crate::error::{Result, VoxRemlError};
use crate::glt::{self, GltResult};
use crate::grid::Rcoll;
use crate::ljungbox::{self, LjungBoxResult};
use crate::objective::search;
use crate::output::OutputSink;
use crate::pseudotime::PseudoTime;
use crate::solver::{self, VoxelSolution};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Per-voxel extra regressors, supplied by the caller (spec §6).
pub type ExtraRegressorFn<'a> = dyn Fn(usize) -> Option<Array2<f64>> + Sync + 'a;
/// Per-voxel extraction callback: voxel index -> length-`n_full` y, from
/// which the slice's retained rows are selected (spec §6).
pub type VoxelExtractFn<'a> = dyn Fn(usize) -> Array1<f64> + Sync + 'a;
/// Maps a voxel index to its slice index (spec §4.8 step 2).
pub type SliceOfFn<'a> = dyn Fn(usize) -> usize + Sync + 'a;
/// Builds one slice's (design, τ, retained-row map `g`, `n_full`) (spec §6).
pub type SliceBuilderFn<'a> = dyn Fn() -> Result<(DesignMatrix, PseudoTime, Vec<usize>, usize)> + Sync + 'a;

/// Aggregate, atomically-combined diagnostic counters (spec §5, §6).
#[derive(Debug, Default)]
pub struct DiagnosticCounters {
    pub all_zero_columns: AtomicUsize,
    pub constant_extra_regressors: AtomicUsize,
    pub singular_setups: AtomicUsize,
    pub non_finite_voxels: AtomicUsize,
}

/// Per-voxel results the driver hands to the caller's [`OutputSink`].
/// `fitted_full`/`residual_full`/`whitened_residual_full` are expanded back
/// to `n_full` (spec §6): fitted keeps the original data at censored
/// positions, the residuals are zero there.
pub struct VoxelOutput {
    pub voxel_index: usize,
    pub a_star: f64,
    pub b_star: f64,
    pub solution: VoxelSolution,
    pub fitted_full: Array1<f64>,
    pub residual_full: Array1<f64>,
    pub whitened_residual_full: Array1<f64>,
    pub ljung_box: LjungBoxResult,
    pub glt_results: Vec<GltResult>,
}

/// Everything the driver needs to run one slice's worth of voxels: the
/// slice design, pseudo-time, retained-row map, and the lazily-built grid
/// shared by every voxel in the slice.
struct SliceContext {
    design: DesignMatrix,
    tau: PseudoTime,
    /// Retained-row map `g[0..n-1]`, `0 <= g[i] < n_full` (spec §6).
    g: Vec<usize>,
    n_full: usize,
    grid: Mutex<Rcoll>,
}

/// Drives the voxel loop end to end: per-voxel extraction, slice lookup,
/// REML search (or fixed-(a,b) short-circuit), solve, GLTs, and output.
pub struct VoxelDriver<'a> {
    cfg: SolverConfig,
    contrasts: Vec<ContrastMatrix>,
    counters: DiagnosticCounters,
    extract: &'a VoxelExtractFn<'a>,
    slice_of: &'a SliceOfFn<'a>,
    extra_regressors: Option<&'a ExtraRegressorFn<'a>>,
    slices: Vec<Mutex<Option<std::sync::Arc<SliceContext>>>>,
    slice_builders: Vec<Box<SliceBuilderFn<'a>>>,
}

impl<'a> VoxelDriver<'a> {
    pub fn new(
        cfg: SolverConfig,
        contrasts: Vec<ContrastMatrix>,
        extract: &'a VoxelExtractFn<'a>,
        slice_of: &'a SliceOfFn<'a>,
        extra_regressors: Option<&'a ExtraRegressorFn<'a>>,
        slice_builders: Vec<Box<SliceBuilderFn<'a>>>,
    ) -> Self {
        let slices = (0..slice_builders.len()).map(|_| Mutex::new(None)).collect();
        VoxelDriver {
            cfg,
            contrasts,
            counters: DiagnosticCounters::default(),
            extract,
            slice_of,
            extra_regressors,
            slices,
            slice_builders,
        }
    }

    pub fn counters(&self) -> &DiagnosticCounters {
        &self.counters
    }

    /// Get-or-build a slice's context, guarded by that slice's lock so the
    /// `Rcoll` is constructed at most once (spec §5).
    fn slice_context(&self, slice: usize) -> Result<std::sync::Arc<SliceContext>> {
        let mut guard = self.slices[slice]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            let (design, tau, g, n_full) = (self.slice_builders[slice])()?;
            let grid = Mutex::new(Rcoll::new(&self.cfg));
            *guard = Some(std::sync::Arc::new(SliceContext {
                design,
                tau,
                g,
                n_full,
                grid,
            }));
        }
        Ok(guard.as_ref().unwrap().clone())
    }

    /// Whether the configured mode forces sequential execution (spec §5:
    /// per-voxel extra regressors or scratch paging serialize the driver).
    fn must_run_sequential(&self) -> bool {
        self.extra_regressors.is_some() || self.cfg.scratch_dir.is_some() || self.cfg.n_threads <= 1
    }

    /// Run the driver over `voxel_indices`, writing each voxel's outputs to
    /// `sink`. A fatal error in any worker stops the pool and is returned
    /// to the caller (spec §5); non-fatal per-voxel conditions are
    /// recorded in the diagnostic counters instead.
    pub fn run<S: OutputSink + ?Sized>(&self, voxel_indices: &[usize], sink: &Mutex<S>) -> Result<()> {
        let process_one = |&v: &usize| -> Result<()> {
            if let Some(output) = self.process_voxel(v)? {
                self.write_output(sink, &output)?;
            }
            Ok(())
        };

        if self.must_run_sequential() {
            for v in voxel_indices {
                process_one(v)?;
            }
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.cfg.n_threads)
                .build()
                .map_err(|e| VoxRemlError::ResourceExhausted(e.to_string()))?;
            pool.install(|| voxel_indices.par_iter().try_for_each(process_one))?;
        }
        sink.lock().unwrap_or_else(|p| p.into_inner()).finalize()
    }

    /// Process a single voxel through the state machine in spec §4.8.
    /// Returns `Ok(None)` when the voxel's data was non-finite (a
    /// non-fatal, per-voxel condition that excludes it from the mask).
    fn process_voxel(&self, voxel_index: usize) -> Result<Option<VoxelOutput>> {
        let y_full = (self.extract)(voxel_index);
        if y_full.iter().any(|v| !v.is_finite()) {
            self.counters.non_finite_voxels.fetch_add(1, Ordering::Relaxed);
            warn!(voxel_index, "non-finite input; voxel excluded from mask");
            return Ok(None);
        }

        let slice = (self.slice_of)(voxel_index);
        let ctx = self.slice_context(slice)?;

        if y_full.len() != ctx.n_full {
            return Err(VoxRemlError::DimensionMismatch(format!(
                "voxel {voxel_index}: extracted {} values, slice n_full is {}",
                y_full.len(),
                ctx.n_full
            )));
        }
        let y = design::select_retained(&y_full, &ctx.g);

        let zero_cols = ctx.design.zero_columns();
        if !zero_cols.is_empty() {
            self.counters
                .all_zero_columns
                .fetch_add(zero_cols.len(), Ordering::Relaxed);
        }

        let extra = self.extra_regressors.and_then(|f| f(voxel_index));
        let has_extra = extra.is_some();
        let (design, y) = match extra {
            Some(z) => {
                if z.column(0).iter().all(|&v| v == z[[0, 0]]) {
                    self.counters
                        .constant_extra_regressors
                        .fetch_add(1, Ordering::Relaxed);
                }
                (ctx.design.augmented(&z, None)?, y)
            }
            None => (ctx.design.clone(), y),
        };

        let (search_result, setup) = if has_extra {
            // Per-voxel design: build a one-off grid rather than reusing
            // the slice's shared one (spec §4.8 step 3). search() already
            // cached the winning cell in it; reuse that instead of paying
            // for a second banded-Cholesky-plus-QR build.
            let mut one_off = Rcoll::new(&self.cfg);
            let sr = search(&mut one_off, &design, &ctx.tau, &y, &self.cfg)?;
            let setup = one_off
                .get(sr.idx)
                .expect("search caches the winning cell before returning")
                .clone();
            (sr, setup)
        } else {
            let mut grid = ctx.grid.lock().unwrap_or_else(|p| p.into_inner());
            let sr = match search(&mut grid, &design, &ctx.tau, &y, &self.cfg) {
                Ok(sr) => sr,
                Err(VoxRemlError::SingularMatrix(_)) => {
                    self.counters.singular_setups.fetch_add(1, Ordering::Relaxed);
                    return Err(VoxRemlError::SingularMatrix(format!(
                        "voxel {voxel_index}: no admissible (a,b) on the grid"
                    )));
                }
                Err(e) => return Err(e),
            };
            // Clone the cell search() already built under this same lock,
            // then release the lock before the (potentially slow) solve and
            // GLT work below so other voxels in this slice aren't blocked on
            // it (spec §5).
            let setup = grid
                .get(sr.idx)
                .expect("search caches the winning cell before returning")
                .clone();
            drop(grid);
            (sr, setup)
        };

        let solution = solver::solve(&design, &setup, &y, &search_result.objective)?;
        let lag = ljungbox::max_lag(setup.m(), ctx.tau.shortest_run_len());
        let ljung_box = ljungbox::evaluate(&solution.whitened_residual, &ctx.tau, lag);

        let mut glt_results = Vec::with_capacity(self.contrasts.len());
        for contrast in &self.contrasts {
            glt_results.push(glt::evaluate(contrast, &setup, &solution)?);
        }

        // Expand back to n_full (spec §6): fitted keeps the original data
        // at censored positions, the residuals are zero there.
        let fitted_full =
            design::expand_to_full(&solution.fitted, &ctx.g, ctx.n_full, |i| y_full[i]);
        let residual_full =
            design::expand_to_full(&solution.residual, &ctx.g, ctx.n_full, |_| 0.0);
        let whitened_residual_full =
            design::expand_to_full(&solution.whitened_residual, &ctx.g, ctx.n_full, |_| 0.0);

        Ok(Some(VoxelOutput {
            voxel_index,
            a_star: search_result.a,
            b_star: search_result.b,
            solution,
            fitted_full,
            residual_full,
            whitened_residual_full,
            ljung_box,
            glt_results,
        }))
    }

    fn write_output<S: OutputSink + ?Sized>(&self, sink: &Mutex<S>, output: &VoxelOutput) -> Result<()> {
        let mut sink = sink.lock().unwrap_or_else(|p| p.into_inner());
        sink.write_series("beta", output.voxel_index, output.solution.beta.as_slice().unwrap())?;
        sink.write_series(
            "fitted",
            output.voxel_index,
            output.fitted_full.as_slice().unwrap(),
        )?;
        sink.write_series(
            "residual",
            output.voxel_index,
            output.residual_full.as_slice().unwrap(),
        )?;
        sink.write_series(
            "whitened_residual",
            output.voxel_index,
            output.whitened_residual_full.as_slice().unwrap(),
        )?;
        sink.write_series(
            "ab_star",
            output.voxel_index,
            &[output.a_star, output.b_star, output.solution.sigma_hat],
        )?;
        sink.write_series(
            "ljung_box",
            output.voxel_index,
            &[output.ljung_box.statistic, output.ljung_box.p_value],
        )?;
        for glt_result in &output.glt_results {
            let series = format!("glt_{}", glt_result.label);
            sink.write_series(
                &series,
                output.voxel_index,
                &[
                    glt_result.f_stat,
                    glt_result.f_p_value,
                    glt_result.r_squared,
                    glt_result.t_stat.unwrap_or(f64::NAN),
                ],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemorySink;
    use ndarray::Array2;

    fn ols_slice(n: usize) -> (DesignMatrix, PseudoTime, Vec<usize>, usize) {
        let mut x = Array2::<f64>::zeros((n, 1));
        x.column_mut(0).fill(1.0);
        (
            DesignMatrix::new(x, None).unwrap(),
            PseudoTime::from_raw((0..n as i64).collect()),
            (0..n).collect(),
            n,
        )
    }

    #[test]
    fn single_slice_sequential_run_populates_sink() {
        let cfg = SolverConfig::new().with_fixed_ab(0.0, 0.0).unwrap();
        let extract = |_v: usize| Array1::from(vec![2.0; 10]);
        let slice_of = |_v: usize| 0usize;
        let builders: Vec<Box<SliceBuilderFn>> = vec![Box::new(|| Ok(ols_slice(10)))];

        let driver = VoxelDriver::new(cfg, vec![], &extract, &slice_of, None, builders);
        let sink = Mutex::new(MemorySink::new());
        driver.run(&[0, 1, 2], &sink).unwrap();

        let sink = sink.into_inner().unwrap();
        let beta_series = sink.series("beta").unwrap();
        assert_eq!(beta_series.len(), 3);
        for (_, values) in beta_series {
            assert!((values[0] - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn non_finite_voxel_is_excluded_not_fatal() {
        let cfg = SolverConfig::new().with_fixed_ab(0.0, 0.0).unwrap();
        let extract = |v: usize| {
            if v == 1 {
                Array1::from(vec![f64::NAN; 10])
            } else {
                Array1::from(vec![1.0; 10])
            }
        };
        let slice_of = |_v: usize| 0usize;
        let builders: Vec<Box<SliceBuilderFn>> = vec![Box::new(|| Ok(ols_slice(10)))];

        let driver = VoxelDriver::new(cfg, vec![], &extract, &slice_of, None, builders);
        let sink = Mutex::new(MemorySink::new());
        driver.run(&[0, 1, 2], &sink).unwrap();

        assert_eq!(driver.counters().non_finite_voxels.load(Ordering::Relaxed), 1);
        let sink = sink.into_inner().unwrap();
        assert_eq!(sink.series("beta").unwrap().len(), 2);
    }

    #[test]
    fn censoring_restores_original_data_at_censored_positions() {
        // n_full=12, two censored rows (4 and 9); fitted output must carry
        // the original y at those positions, residual/whitened zero there.
        let n_full = 12;
        let g: Vec<usize> = vec![0, 1, 2, 3, 5, 6, 7, 8, 10, 11];
        let cfg = SolverConfig::new().with_fixed_ab(0.0, 0.0).unwrap();
        let extract = move |_v: usize| {
            Array1::from((0..n_full).map(|i| i as f64).collect::<Vec<_>>())
        };
        let slice_of = |_v: usize| 0usize;
        let g_for_builder = g.clone();
        let builders: Vec<Box<SliceBuilderFn>> = vec![Box::new(move || {
            let mut x = Array2::<f64>::zeros((g_for_builder.len(), 1));
            x.column_mut(0).fill(1.0);
            let design = DesignMatrix::new(x, None).unwrap();
            let tau = PseudoTime::build(&g_for_builder, n_full, &[0]).unwrap();
            Ok((design, tau, g_for_builder.clone(), n_full))
        })];

        let driver = VoxelDriver::new(cfg, vec![], &extract, &slice_of, None, builders);
        let sink = Mutex::new(MemorySink::new());
        driver.run(&[0], &sink).unwrap();

        let sink = sink.into_inner().unwrap();
        let fitted = &sink.series("fitted").unwrap()[0].1;
        let residual = &sink.series("residual").unwrap()[0].1;
        assert_eq!(fitted.len(), n_full);
        // Censored positions 4 and 9 keep the original extracted value.
        assert_eq!(fitted[4], 4.0);
        assert_eq!(fitted[9], 9.0);
        assert_eq!(residual[4], 0.0);
        assert_eq!(residual[9], 0.0);
    }
}
