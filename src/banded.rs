//! Symmetric banded matrix storage and the handful of O(n·bw) operations the
//! REML machinery needs: multiply, in-place Cholesky, triangular solves, and
//! log-determinant (spec §4.1).
//!
//! Storage is row-major-by-band: `buf[i * (bw+1) + d]` holds entry `(i, i-d)`
//! for `d` in `0..=bw` (`d=0` is the diagonal). This keeps every column's
//! band contiguous for the forward/back substitution sweeps, which touch a
//! fixed number of off-diagonals per row regardless of `n`.

use crate::error::{Result, VoxRemlError};
use ndarray::Array1;

#[derive(Debug, Clone)]
pub struct Banded {
    n: usize,
    bw: usize,
    buf: Vec<f64>,
}

impl Banded {
    /// A zero-filled banded matrix of size `n` with half-bandwidth `bw`.
    pub fn zeros(n: usize, bw: usize) -> Self {
        Banded {
            n,
            bw,
            buf: vec![0.0; n * (bw + 1)],
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn bandwidth(&self) -> usize {
        self.bw
    }

    /// Reconstruct a `Banded` from its raw row-major-by-band buffer (the
    /// inverse of reading `buf` back off disk in [`crate::scratch`]).
    pub fn from_raw(n: usize, bw: usize, buf: Vec<f64>) -> Self {
        debug_assert_eq!(buf.len(), n * (bw + 1));
        Banded { n, bw, buf }
    }

    /// Entry `(i, j)` for `|i - j| <= bw`; zero outside the band.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (hi, lo) = if i >= j { (i, j) } else { (j, i) };
        let d = hi - lo;
        if d > self.bw {
            return 0.0;
        }
        self.buf[hi * (self.bw + 1) + d]
    }

    /// Set entry `(i,j)` (and implicitly `(j,i)` by symmetry). Panics if
    /// `|i-j| > bw` — callers must size the band before writing to it.
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        let (hi, lo) = if i >= j { (i, j) } else { (j, i) };
        let d = hi - lo;
        assert!(d <= self.bw, "entry ({i},{j}) is outside bandwidth {}", self.bw);
        self.buf[hi * (self.bw + 1) + d] = v;
    }

    /// y = A x, using the band only. O(n·bw).
    pub fn multiply(&self, x: &Array1<f64>) -> Array1<f64> {
        assert_eq!(x.len(), self.n);
        let mut y = Array1::<f64>::zeros(self.n);
        for i in 0..self.n {
            let mut acc = self.get(i, i) * x[i];
            let lo = i.saturating_sub(self.bw);
            for j in lo..i {
                let a = self.get(i, j);
                acc += a * x[j];
                y[j] += a * x[i];
            }
            y[i] += acc;
        }
        y
    }

    /// In-place lower-triangular banded Cholesky: returns `L` (reusing the
    /// same band storage, off-band entries implicitly zero) such that
    /// `L L^T` equals the original matrix, or `SingularMatrix` if a pivot
    /// is non-positive (spec §4.1).
    pub fn cholesky(&self) -> Result<BandedChol> {
        let n = self.n;
        let bw = self.bw;
        let mut l = self.clone();
        let diag0 = (0..n).map(|i| self.get(i, i)).fold(0.0_f64, f64::max);
        let eps = f64::EPSILON.sqrt() * diag0.max(1.0);

        for j in 0..n {
            let mut sum = l.get(j, j);
            let lo = j.saturating_sub(bw);
            for k in lo..j {
                let ljk = l.get(j, k);
                sum -= ljk * ljk;
            }
            if sum <= eps {
                return Err(VoxRemlError::SingularMatrix(format!(
                    "non-positive Cholesky pivot at index {j} ({sum:e})"
                )));
            }
            let ljj = sum.sqrt();
            l.set(j, j, ljj);

            let hi = (j + bw).min(n - 1);
            for i in (j + 1)..=hi {
                let mut s = l.get(i, j);
                let lo_i = i.saturating_sub(bw);
                let lo_common = lo_i.max(lo);
                for k in lo_common..j {
                    s -= l.get(i, k) * l.get(j, k);
                }
                l.set(i, j, s / ljj);
            }
        }
        Ok(BandedChol { l })
    }
}

/// A banded lower-triangular Cholesky factor `L` with `R = L L^T`.
#[derive(Debug, Clone)]
pub struct BandedChol {
    l: Banded,
}

impl BandedChol {
    pub fn n(&self) -> usize {
        self.l.n
    }

    /// Wrap an already-factored `L` directly (used when reloading a factor
    /// from scratch storage rather than recomputing it).
    pub fn from_raw(l: Banded) -> Self {
        BandedChol { l }
    }

    /// The raw row-major-by-band buffer backing `L`, for scratch persistence.
    pub fn raw_buf(&self) -> &[f64] {
        &self.l.buf
    }

    /// Forward solve: `L z = b`. O(n·bw).
    pub fn solve_forward(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.l.n;
        let bw = self.l.bw;
        let mut z = Array1::<f64>::zeros(n);
        for i in 0..n {
            let mut s = b[i];
            let lo = i.saturating_sub(bw);
            for k in lo..i {
                s -= self.l.get(i, k) * z[k];
            }
            z[i] = s / self.l.get(i, i);
        }
        z
    }

    /// Back solve: `L^T z = b`. O(n·bw).
    pub fn solve_back(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.l.n;
        let bw = self.l.bw;
        let mut z = Array1::<f64>::zeros(n);
        for ii in 0..n {
            let i = n - 1 - ii;
            let mut s = b[i];
            let hi = (i + bw).min(n - 1);
            for k in (i + 1)..=hi {
                s -= self.l.get(k, i) * z[k];
            }
            z[i] = s / self.l.get(i, i);
        }
        z
    }

    /// `L^-1 X`, column by column (used to prewhiten the design matrix).
    pub fn solve_forward_mat(&self, x: &ndarray::Array2<f64>) -> ndarray::Array2<f64> {
        let (n, m) = x.dim();
        assert_eq!(n, self.l.n);
        let mut out = ndarray::Array2::<f64>::zeros((n, m));
        for col in 0..m {
            let z = self.solve_forward(&x.column(col).to_owned());
            out.column_mut(col).assign(&z);
        }
        out
    }

    /// `log|R| = 2 * sum(log(diag(L)))`.
    pub fn log_det(&self) -> f64 {
        let mut s = 0.0;
        for i in 0..self.l.n {
            s += self.l.get(i, i).ln();
        }
        2.0 * s
    }
}
