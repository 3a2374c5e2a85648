//! Voxel solver: betas, fitted values, residuals, and σ̂ for a chosen
//! (a,b) (spec §4.5).

use crate::design::DesignMatrix;
use crate::error::Result;
use crate::objective::ObjectiveResult;
use crate::reml_setup::ReMlSetup;
use ndarray::Array1;

/// Output of the voxel solver for one voxel at its chosen (a,b).
#[derive(Debug, Clone)]
pub struct VoxelSolution {
    /// β, length m (unidentifiable columns are exactly zero).
    pub beta: Array1<f64>,
    /// X β, length n.
    pub fitted: Array1<f64>,
    /// y - fitted, length n.
    pub residual: Array1<f64>,
    /// L^-1 (y - fitted), length n.
    pub whitened_residual: Array1<f64>,
    /// sqrt(whitened_residual^T whitened_residual / (n - m_eff)).
    pub sigma_hat: f64,
    /// y^T P y, carried from the objective evaluation for GLT use.
    pub ytpy: f64,
}

/// Solve for β, fitted values, and residuals given `y`, the `DesignMatrix`,
/// the chosen `ReMlSetup`, and the `ObjectiveResult` already computed for
/// this (y, setup) pair (so we do not re-solve the prewhitening).
pub fn solve(
    design: &DesignMatrix,
    setup: &ReMlSetup,
    y: &Array1<f64>,
    objective: &ObjectiveResult,
) -> Result<VoxelSolution> {
    // r_qr_inv() isolates each unidentifiable column before inverting, so
    // its near-zero diagonal can't leak a huge pivot into the identified
    // betas the way inverting the raw R_qr and masking afterward would.
    let mut beta = setup.r_qr_inv()?.dot(&objective.qtz);

    for &j in &setup.unidentifiable {
        beta[j] = 0.0;
    }

    let fitted = design.x().dot(&beta);
    let residual = y - &fitted;
    let whitened_residual = setup.chol.solve_forward(&residual);

    let n = setup.n();
    let m_eff = setup.m_eff();
    let df = n.saturating_sub(m_eff).max(1) as f64;
    let rss_whitened: f64 = whitened_residual.iter().map(|v| v * v).sum();
    let sigma_hat = (rss_whitened / df).sqrt();

    Ok(VoxelSolution {
        beta,
        fitted,
        residual,
        whitened_residual,
        sigma_hat,
        ytpy: objective.ytpy,
    })
}
