//! General Linear Test (GLT) contrast engine (spec §4.6).
//!
//! Tests H0: G β = 0 for a contrast matrix G (r x m) against the voxel's
//! fitted model, producing an F statistic (and, for single-row contrasts,
//! a signed t statistic) plus a partial R^2.

use crate::design::ContrastMatrix;
use crate::error::Result;
use crate::reml_setup::ReMlSetup;
use crate::solver::VoxelSolution;
use ndarray::{Array1, Array2};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

/// Result of testing one contrast against one voxel's solution.
#[derive(Debug, Clone)]
pub struct GltResult {
    pub label: String,
    /// Rows of G that survived de-singularization masking.
    pub rows_tested: usize,
    pub f_stat: f64,
    pub f_p_value: f64,
    /// `Some` only when the (masked) contrast has exactly one surviving row.
    pub t_stat: Option<f64>,
    pub t_p_value: Option<f64>,
    pub r_squared: f64,
    pub dof_num: usize,
    pub dof_den: usize,
}

/// Evaluate a GLT contrast against a solved voxel.
///
/// `xtrx_inv` is `(X^T R^-1 X)^-1` from the [`ReMlSetup`] used to solve this
/// voxel; `solution` carries β, σ̂, and y^T P y from [`crate::solver::solve`].
pub fn evaluate(
    contrast: &ContrastMatrix,
    setup: &ReMlSetup,
    solution: &VoxelSolution,
) -> Result<GltResult> {
    let (g_masked, kept_rows) = contrast.masked(&setup.unidentifiable);
    let r = g_masked.nrows();
    let m_eff = setup.m_eff();
    let dof_den = setup.n().saturating_sub(m_eff).max(1);

    if r == 0 {
        return Ok(GltResult {
            label: contrast.label().to_string(),
            rows_tested: 0,
            f_stat: 0.0,
            f_p_value: 1.0,
            t_stat: None,
            t_p_value: None,
            r_squared: 0.0,
            dof_num: 0,
            dof_den,
        });
    }

    let xtrx_inv = setup.xtrx_inv()?;
    let beta = restrict_to_identified(&solution.beta, setup);

    let g_beta = g_masked.dot(&beta);
    let middle = g_masked.dot(&xtrx_inv).dot(&g_masked.t());
    let middle_inv = small_inverse(&middle)?;

    let ssq_num = g_beta.dot(&middle_inv.dot(&g_beta));
    let sigma2 = solution.sigma_hat * solution.sigma_hat;
    let f_stat = if sigma2 > 0.0 {
        (ssq_num / r as f64) / sigma2
    } else {
        0.0
    };

    let f_dist = FisherSnedecor::new(r as f64, dof_den as f64)
        .map_err(|e| crate::error::VoxRemlError::InvalidParam(e.to_string()))?;
    let f_p_value = 1.0 - f_dist.cdf(f_stat.max(0.0));

    let (t_stat, t_p_value) = if r == 1 && middle_inv[[0, 0]] > 0.0 {
        let se = (middle_inv[[0, 0]] * sigma2).sqrt();
        let t = if se > 0.0 { g_beta[0] / se } else { 0.0 };
        let t_dist = StudentsT::new(0.0, 1.0, dof_den as f64)
            .map_err(|e| crate::error::VoxRemlError::InvalidParam(e.to_string()))?;
        let p = 2.0 * (1.0 - t_dist.cdf(t.abs()));
        (Some(t), Some(p))
    } else {
        (None, None)
    };

    let r_squared = if solution.ytpy > 0.0 {
        (ssq_num / solution.ytpy).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(GltResult {
        label: contrast.label().to_string(),
        rows_tested: r,
        f_stat,
        f_p_value,
        t_stat,
        t_p_value,
        r_squared,
        dof_num: r,
        dof_den,
    })
}

fn restrict_to_identified(beta: &Array1<f64>, setup: &ReMlSetup) -> Array1<f64> {
    let mut out = beta.clone();
    for &j in &setup.unidentifiable {
        out[j] = 0.0;
    }
    out
}

/// Invert the (small, r x r) contrast middle matrix `G (X^T R^-1 X)^-1 G^T`.
fn small_inverse(m: &Array2<f64>) -> Result<Array2<f64>> {
    use ndarray_linalg::Inverse;
    m.inv().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::design::DesignMatrix;
    use crate::grid::Rcoll;
    use crate::objective::search;
    use crate::pseudotime::PseudoTime;
    use crate::solver::solve;
    use ndarray::Array2;

    #[test]
    fn intercept_only_contrast_matches_t_test() {
        let n = 30;
        let mut x = Array2::<f64>::zeros((n, 2));
        x.column_mut(0).fill(1.0);
        for i in 0..n {
            x[[i, 1]] = i as f64;
        }
        let design = DesignMatrix::new(x, None).unwrap();
        let tau = PseudoTime::from_raw((0..n as i64).collect());
        let cfg = SolverConfig::new().with_fixed_ab(0.0, 0.0).unwrap();
        let y = Array1::from((0..n).map(|i| 2.0 + 0.3 * i as f64).collect::<Vec<_>>());

        let mut grid = Rcoll::new(&cfg);
        let search_result = search(&mut grid, &design, &tau, &y, &cfg).unwrap();
        let setup = crate::reml_setup::ReMlSetup::build(&design, &tau, 0.0, 0.0, &cfg).unwrap();
        let solution = solve(&design, &setup, &y, &search_result.objective).unwrap();

        let g = Array2::from_shape_vec((1, 2), vec![0.0, 1.0]).unwrap();
        let contrast = ContrastMatrix::new(g, "slope", 2).unwrap();
        let result = evaluate(&contrast, &setup, &solution).unwrap();

        assert!(result.t_stat.unwrap() > 0.0);
        assert!(result.r_squared > 0.9);
    }

    #[test]
    fn masked_rows_reduce_dof_num() {
        let mut x = Array2::<f64>::zeros((10, 3));
        x.column_mut(0).fill(1.0);
        for i in 0..10 {
            x[[i, 1]] = i as f64;
            x[[i, 2]] = i as f64;
        }
        let design = DesignMatrix::new(x, None).unwrap();
        let tau = PseudoTime::from_raw((0..10).collect());
        let cfg = SolverConfig::new().with_de_singularize(true).with_fixed_ab(0.0, 0.0).unwrap();
        let y = Array1::from((0..10).map(|i| 1.0 + i as f64).collect::<Vec<_>>());

        let mut grid = Rcoll::new(&cfg);
        let search_result = search(&mut grid, &design, &tau, &y, &cfg).unwrap();
        let setup = crate::reml_setup::ReMlSetup::build(&design, &tau, 0.0, 0.0, &cfg).unwrap();
        let solution = solve(&design, &setup, &y, &search_result.objective).unwrap();

        let g = Array2::from_shape_vec((2, 3), vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        let contrast = ContrastMatrix::new(g, "both-slopes", 3).unwrap();
        let result = evaluate(&contrast, &setup, &solution).unwrap();
        assert_eq!(result.rows_tested, 1);
    }
}
