//! REMLSetup construction for a single (a,b) pair (spec §4.3).

use crate::banded::{Banded, BandedChol};
use crate::config::SolverConfig;
use crate::corr::build_correlation;
use crate::design::DesignMatrix;
use crate::error::{Result, VoxRemlError};
use crate::pseudotime::PseudoTime;
use ndarray::{Array1, Array2};
use ndarray_linalg::QR;

/// Derived artifacts for one (a,b) pair, reused across every voxel that
/// shares a slice's design matrix (spec §3 REMLSetup).
#[derive(Debug, Clone)]
pub struct ReMlSetup {
    pub a: f64,
    pub b: f64,
    pub chol: BandedChol,
    /// `Q` from the thin QR of `W = L^-1 X` (n x m). `project` and `lift`
    /// use this to move between whitened-observation space and the
    /// design's column space without re-solving.
    q: Array2<f64>,
    /// `R_qr`, the m x m upper-triangular factor.
    r_qr: Array2<f64>,
    pub log_det_r: f64,
    pub log_det_xtrx: f64,
    /// Columns masked unidentifiable by de-singularization.
    pub unidentifiable: Vec<usize>,
    m: usize,
    n: usize,
}

impl ReMlSetup {
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn m(&self) -> usize {
        self.m
    }

    /// Effective column count excluding unidentifiable columns.
    pub fn m_eff(&self) -> usize {
        self.m - self.unidentifiable.len()
    }

    pub fn r_qr(&self) -> &Array2<f64> {
        &self.r_qr
    }

    /// Project a length-n whitened vector onto the design's column space:
    /// `Q^T v` (length m).
    pub fn project(&self, v: &Array1<f64>) -> Array1<f64> {
        self.q.t().dot(v)
    }

    /// Lift a length-m coefficient-space vector back to whitened
    /// observation space: `Q v` (length n).
    pub fn lift(&self, v: &Array1<f64>) -> Array1<f64> {
        self.q.dot(v)
    }

    /// `R_qr^-1`, with every unidentifiable index's row and column isolated
    /// before inversion.
    ///
    /// Back-substitution solves the *same* `R_qr` for every inverse column,
    /// so an unidentifiable index's near-zero diagonal leaks a huge pivot
    /// value into row `j` of every other column's solve too (not just
    /// column `j`), via the `R[i,k]*x[k]` accumulation term. Isolating row
    /// and column `j` (zero off-diagonal, 1 on the diagonal) before
    /// inverting decouples it from the rest of the triangular system
    /// entirely, so the masked direction resolves to exactly `e_j` instead
    /// of contaminating the identified columns. Every caller that inverts
    /// `R_qr` (β itself, not just `(X^T R^-1 X)^-1`) must go through this,
    /// not `invert_upper_triangular(&self.r_qr)` directly.
    pub fn r_qr_inv(&self) -> Result<Array2<f64>> {
        let mut r_mod = self.r_qr.clone();
        for &j in &self.unidentifiable {
            for k in (j + 1)..self.m {
                r_mod[[j, k]] = 0.0;
            }
            for i in 0..j {
                r_mod[[i, j]] = 0.0;
            }
            r_mod[[j, j]] = 1.0;
        }
        let mut r_inv = invert_upper_triangular(&r_mod)?;
        for &j in &self.unidentifiable {
            r_inv.column_mut(j).fill(0.0);
        }
        Ok(r_inv)
    }

    /// `(X^T R^-1 X)^-1`, reconstructed from the QR factor: since
    /// `W^T W = R_qr^T R_qr`, `(X^T R^-1 X)^-1 = R_qr^-1 R_qr^-T`.
    pub fn xtrx_inv(&self) -> Result<Array2<f64>> {
        let r_inv = self.r_qr_inv()?;
        Ok(r_inv.dot(&r_inv.t()))
    }

    /// Build the REMLSetup for `(a,b)` given a DesignMatrix and its τ.
    pub fn build(
        design: &DesignMatrix,
        tau: &PseudoTime,
        a: f64,
        b: f64,
        cfg: &SolverConfig,
    ) -> Result<Self> {
        let n = design.n();
        let m = design.m();
        if tau.len() != n {
            return Err(VoxRemlError::DimensionMismatch(format!(
                "tau has {} entries, design has {} rows",
                tau.len(),
                n
            )));
        }

        let zero_cols = design.zero_columns();
        if !zero_cols.is_empty() && !cfg.de_singularize {
            return Err(VoxRemlError::AllZeroRegressor(zero_cols));
        }

        let r: Banded = build_correlation(a, b, tau, cfg)?;
        let chol = r.cholesky()?;
        let w = chol.solve_forward_mat(design.x());

        let (q, r_qr) = w.qr()?;

        let diag_max = (0..m)
            .map(|i| r_qr[[i, i]].abs())
            .fold(0.0_f64, f64::max);
        let eps = f64::EPSILON.sqrt() * diag_max.max(1.0);

        let mut unidentifiable: Vec<usize> = zero_cols.clone();
        for i in 0..m {
            if r_qr[[i, i]].abs() <= eps && !unidentifiable.contains(&i) {
                if cfg.de_singularize {
                    unidentifiable.push(i);
                } else {
                    return Err(VoxRemlError::SingularMatrix(format!(
                        "QR diagonal at column {i} is too small ({})",
                        r_qr[[i, i]]
                    )));
                }
            }
        }
        unidentifiable.sort_unstable();
        unidentifiable.dedup();

        let log_det_r = chol.log_det();
        let log_det_xtrx = 2.0
            * (0..m)
                .filter(|i| !unidentifiable.contains(i))
                .map(|i| r_qr[[i, i]].abs().ln())
                .sum::<f64>();

        Ok(ReMlSetup {
            a,
            b,
            chol,
            q,
            r_qr,
            log_det_r,
            log_det_xtrx,
            unidentifiable,
            m,
            n,
        })
    }
}

/// Invert a (small, m x m) upper-triangular matrix by back substitution.
pub fn invert_upper_triangular(r: &Array2<f64>) -> Result<Array2<f64>> {
    let m = r.nrows();
    let mut inv = Array2::<f64>::zeros((m, m));
    for col in 0..m {
        let mut e = Array1::<f64>::zeros(m);
        e[col] = 1.0;
        let mut x = Array1::<f64>::zeros(m);
        for ii in 0..=col {
            let i = col - ii;
            let diag = r[[i, i]];
            if diag.abs() < 1e-300 {
                return Err(VoxRemlError::SingularMatrix(
                    "upper-triangular factor has a zero diagonal".into(),
                ));
            }
            let mut s = e[i];
            for k in (i + 1)..m {
                s -= r[[i, k]] * x[k];
            }
            x[i] = s / diag;
        }
        inv.column_mut(col).assign(&x);
    }
    Ok(inv)
}
