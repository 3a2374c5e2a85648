//! Threaded-explicit configuration (spec §9: no process-wide state).

use crate::error::{Result, VoxRemlError};

/// Parameters that govern the ARMA(1,1) correlation builder, the (a,b) grid
/// search, and the REML setup's handling of rank-deficient design matrices.
///
/// Constructed with [`SolverConfig::new`] and refined via the `with_*`
/// builder methods; each setter validates eagerly so a caller finds out
/// about an out-of-range value at configuration time rather than deep
/// inside a voxel loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Grid level L: the (a,b) grid has `2^L + 1` steps per axis.
    pub grid_level: u32,
    pub a_min: f64,
    pub a_max: f64,
    pub b_min: f64,
    pub b_max: f64,
    /// Entries of R below this magnitude are set to zero (default 1e-3).
    pub corr_cutoff: f64,
    /// Clip λ to `>= 0` (spec §3's "non-negative correlations" mode).
    pub non_negative_correlations: bool,
    /// Restrict the grid to `a > 0 && -a < b < 0` (spec §3's AR(1)+WN mode).
    pub ar1_plus_white_noise: bool,
    /// Skip the grid search and use this (a,b) pair for every voxel.
    pub fixed_ab: Option<(f64, f64)>,
    /// When a Cholesky pivot or QR diagonal is too small, project to a
    /// rank-truncated factor instead of raising `SingularMatrix`/`AllZeroRegressor`.
    pub de_singularize: bool,
    /// Number of worker threads for the voxel driver. `1` runs sequentially.
    pub n_threads: usize,
    /// Optional directory for paging `REMLSetup` values to scratch files.
    pub scratch_dir: Option<std::path::PathBuf>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            grid_level: 3,
            a_min: -0.9,
            a_max: 0.9,
            b_min: -0.9,
            b_max: 0.9,
            corr_cutoff: 1e-3,
            non_negative_correlations: false,
            ar1_plus_white_noise: false,
            fixed_ab: None,
            de_singularize: false,
            n_threads: 1,
            scratch_dir: None,
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grid_level(mut self, level: u32) -> Result<Self> {
        if !(3..=7).contains(&level) {
            return Err(VoxRemlError::InvalidParam(format!(
                "grid level must be in [3,7], got {}",
                level
            )));
        }
        self.grid_level = level;
        Ok(self)
    }

    pub fn with_a_range(mut self, a_min: f64, a_max: f64) -> Result<Self> {
        Self::check_ab_bound(a_min)?;
        Self::check_ab_bound(a_max)?;
        if a_min > a_max {
            return Err(VoxRemlError::InvalidParam("a_min > a_max".into()));
        }
        self.a_min = a_min;
        self.a_max = a_max;
        Ok(self)
    }

    pub fn with_b_range(mut self, b_min: f64, b_max: f64) -> Result<Self> {
        Self::check_ab_bound(b_min)?;
        Self::check_ab_bound(b_max)?;
        if b_min > b_max {
            return Err(VoxRemlError::InvalidParam("b_min > b_max".into()));
        }
        self.b_min = b_min;
        self.b_max = b_max;
        Ok(self)
    }

    pub fn with_corr_cutoff(mut self, cutoff: f64) -> Result<Self> {
        if !(cutoff > 0.0 && cutoff <= 0.01) {
            return Err(VoxRemlError::InvalidParam(format!(
                "correlation cutoff must be in (0, 0.01], got {}",
                cutoff
            )));
        }
        self.corr_cutoff = cutoff;
        Ok(self)
    }

    pub fn with_non_negative_correlations(mut self, flag: bool) -> Self {
        self.non_negative_correlations = flag;
        self
    }

    pub fn with_ar1_plus_white_noise(mut self, flag: bool) -> Self {
        self.ar1_plus_white_noise = flag;
        self
    }

    pub fn with_fixed_ab(mut self, a: f64, b: f64) -> Result<Self> {
        Self::check_ab_bound(a)?;
        Self::check_ab_bound(b)?;
        self.fixed_ab = Some((a, b));
        Ok(self)
    }

    pub fn with_de_singularize(mut self, flag: bool) -> Self {
        self.de_singularize = flag;
        self
    }

    pub fn with_n_threads(mut self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(VoxRemlError::InvalidParam("n_threads must be >= 1".into()));
        }
        self.n_threads = n;
        Ok(self)
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn check_ab_bound(v: f64) -> Result<()> {
        if !(-0.9..=0.9).contains(&v) {
            return Err(VoxRemlError::InvalidParam(format!(
                "(a,b) must lie in [-0.9, 0.9], got {}",
                v
            )));
        }
        Ok(())
    }

    /// Number of steps per axis implied by `grid_level` (spec §3: N = 2^L).
    pub fn grid_steps(&self) -> usize {
        1usize << self.grid_level
    }

    /// Whether an (a,b) pair satisfies this config's constraints (§3).
    pub fn ab_allowed(&self, a: f64, b: f64) -> bool {
        if a < self.a_min || a > self.a_max || b < self.b_min || b > self.b_max {
            return false;
        }
        if self.ar1_plus_white_noise && !(a > 0.0 && -a < b && b < 0.0) {
            return false;
        }
        true
    }

    /// Whether median filtering of the chosen (a,b) field should run
    /// (spec §4.9/§9: disabled whenever (a,b) is fixed or externally supplied).
    pub fn median_filter_eligible(&self) -> bool {
        self.fixed_ab.is_none()
    }
}
