//! ARMA(1,1) correlation matrix construction (spec §4.2).

use crate::banded::Banded;
use crate::config::SolverConfig;
use crate::error::{Result, VoxRemlError};
use crate::pseudotime::PseudoTime;

/// λ = (b+a)(1+ab) / (1+2ab+b²), the lag-1-and-beyond scale factor for the
/// ARMA(1,1) correlation (spec §3).
pub fn lambda(a: f64, b: f64) -> f64 {
    let num = (b + a) * (1.0 + a * b);
    let den = 1.0 + 2.0 * a * b + b * b;
    num / den
}

/// Build the banded ARMA(1,1) correlation matrix R(a,b,τ) (spec §4.2).
///
/// `bw_cap` bounds the half-bandwidth search (typically `n-1`); the returned
/// matrix's actual bandwidth is the largest `|i-j|` with a non-zero entry,
/// which may be smaller.
pub fn build_correlation(
    a: f64,
    b: f64,
    tau: &PseudoTime,
    cfg: &SolverConfig,
) -> Result<Banded> {
    if !(-0.9..=0.9).contains(&a) || !(-0.9..=0.9).contains(&b) {
        return Err(VoxRemlError::InvalidParam(format!(
            "(a,b)=({a},{b}) outside [-0.9,0.9]"
        )));
    }
    if cfg.ar1_plus_white_noise && !(a > 0.0 && -a < b && b < 0.0) {
        return Err(VoxRemlError::InvalidParam(format!(
            "(a,b)=({a},{b}) violates AR(1)+white-noise constraint"
        )));
    }

    let lam = lambda(a, b);
    if cfg.non_negative_correlations && lam < 0.0 {
        return Err(VoxRemlError::InvalidParam(format!(
            "lambda({a},{b}) = {lam} is negative under non-negative-correlations mode"
        )));
    }
    let lam = if cfg.non_negative_correlations {
        lam.max(0.0)
    } else {
        lam
    };

    let n = tau.len();
    if n == 0 {
        return Err(VoxRemlError::DimensionMismatch("empty pseudo-time".into()));
    }

    // entry(k) for k>=1; entry(0) = 1 handled separately.
    let entry_at_lag = |k: i64| -> f64 {
        if k == 0 {
            return 1.0;
        }
        let raw = if a != 0.0 {
            lam * a.powi((k - 1) as i32)
        } else if k == 1 {
            lam
        } else {
            0.0
        };
        if raw.abs() < cfg.corr_cutoff {
            0.0
        } else {
            raw
        }
    };

    // Determine the largest lag with a non-zero entry, bounded by n-1, to
    // size the band once instead of growing it as we fill entries.
    let mut bw = 0usize;
    if a != 0.0 && lam != 0.0 {
        // |lam * a^(k-1)| < cutoff  =>  k-1 > log(cutoff/|lam|) / log(|a|)
        let ratio = cfg.corr_cutoff / lam.abs();
        if ratio >= 1.0 {
            // Already below cutoff at k=1: no non-zero off-diagonal entries.
            bw = 0;
        } else {
            // k_max is 1 + the boundary k-1 value itself, so the largest
            // integer k whose entry is still >= cutoff is floor(k_max), not
            // its ceiling (ceil would size the band one lag too wide).
            let k_max = 1.0 + ratio.ln() / a.abs().ln();
            bw = (k_max.floor().max(1.0) as usize).min(n - 1);
        }
    } else if entry_at_lag(1) != 0.0 {
        bw = 1;
    }
    bw = bw.min(n - 1);

    let mut r = Banded::zeros(n, bw);
    for i in 0..n {
        r.set(i, i, 1.0);
        let lo = i.saturating_sub(bw);
        for j in lo..i {
            let k = tau.lag(i, j);
            let v = entry_at_lag(k);
            if v != 0.0 {
                r.set(i, j, v);
            }
        }
    }
    Ok(r)
}
