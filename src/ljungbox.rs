//! Ljung-Box whiteness diagnostic on whitened residuals (spec §4.7).
//!
//! Computed on the whitened residual series, respecting run-break and
//! censoring gaps the same way [`crate::pseudotime`] does: an
//! autocorrelation at lag k only accumulates over pairs of timepoints whose
//! pseudo-time difference is exactly k (i.e. no run break or censored gap
//! between them).

use crate::pseudotime::PseudoTime;
use ndarray::Array1;
use statrs::distribution::{ChiSquared, ContinuousCDF};

#[derive(Debug, Clone)]
pub struct LjungBoxResult {
    pub lags: usize,
    pub statistic: f64,
    pub p_value: f64,
}

/// Maximum lag `h` per spec §4.7: `h_base = min(m_run/2, max(m/8, round(3 ln
/// m_run)))`, `h = m + 2 + h_base`, then clamped to `m_run/2`. `m` is the
/// design's regressor count, `m_run` the shortest run length (spec §4.7,
/// [`PseudoTime::shortest_run_len`]).
pub fn max_lag(m: usize, m_run: usize) -> usize {
    let m_run = m_run.max(1);
    let half_run = m_run / 2;
    let log_term = (3.0 * (m_run as f64).ln()).round();
    let log_term = if log_term.is_finite() && log_term > 0.0 {
        log_term as usize
    } else {
        0
    };
    let h_base = half_run.min((m / 8).max(log_term));
    (m + 2 + h_base).min(half_run)
}

/// Compute the Ljung-Box Q statistic over lags `1..=max_lag` for a whitened
/// residual series `e`, using `tau` to determine which pairs of timepoints
/// are adjacent at each lag (gaps from censoring or run breaks exclude a
/// pair from that lag's autocorrelation sum).
pub fn evaluate(e: &Array1<f64>, tau: &PseudoTime, max_lag: usize) -> LjungBoxResult {
    let n = e.len();
    let mean = e.iter().sum::<f64>() / n.max(1) as f64;
    let centered: Vec<f64> = e.iter().map(|&v| v - mean).collect();
    let c0: f64 = centered.iter().map(|v| v * v).sum();

    let mut q = 0.0;
    let mut used_lags = 0;
    for k in 1..=max_lag {
        let (num, count) = autocovariance_at_lag(&centered, tau, k);
        if count == 0 || c0 <= 0.0 {
            continue;
        }
        let rho_k = num / c0;
        let eff_n = count as f64;
        q += rho_k * rho_k / (eff_n - k as f64).max(1.0);
        used_lags += 1;
    }
    q *= n as f64 * (n as f64 + 2.0);

    if used_lags == 0 {
        return LjungBoxResult {
            lags: 0,
            statistic: 0.0,
            p_value: 1.0,
        };
    }

    let chi2 = ChiSquared::new(used_lags as f64).expect("lags >= 1");
    let p_value = 1.0 - chi2.cdf(q.max(0.0));

    LjungBoxResult {
        lags: used_lags,
        statistic: q,
        p_value,
    }
}

/// Sum of e[i]*e[i+k] over index pairs whose pseudo-time difference is
/// exactly `k` (i.e. `tau.lag(i, i+k) == k as i64`), plus the count of such
/// pairs.
fn autocovariance_at_lag(centered: &[f64], tau: &PseudoTime, k: usize) -> (f64, usize) {
    let n = centered.len();
    if k >= n {
        return (0.0, 0);
    }
    let mut sum = 0.0;
    let mut count = 0;
    for i in 0..(n - k) {
        if tau.lag(i, i + k) == k as i64 {
            sum += centered[i] * centered[i + k];
            count += 1;
        }
    }
    (sum, count)
}
