//! Voxel-wise generalized least-squares regression under ARMA(1,1)
//! correlated noise, fit by REML grid search.
//!
//! The solver is threaded through an explicit [`config::SolverConfig`]
//! rather than any process-wide state: build a [`design::DesignMatrix`] and
//! [`pseudotime::PseudoTime`] per slice, hand them with a list of
//! [`design::ContrastMatrix`] GLTs to a [`driver::VoxelDriver`], and run it
//! over a flat index of in-mask voxels against an [`output::OutputSink`].

pub mod banded;
pub mod config;
pub mod corr;
pub mod design;
pub mod driver;
pub mod error;
pub mod glt;
pub mod grid;
pub mod legendre;
pub mod ljungbox;
pub mod median_filter;
pub mod objective;
pub mod output;
pub mod pseudotime;
pub mod reml_setup;
pub mod scratch;
pub mod solver;

pub use config::SolverConfig;
pub use design::{ContrastMatrix, DesignMatrix};
pub use driver::{DiagnosticCounters, VoxelDriver, VoxelOutput};
pub use error::{Result, VoxRemlError};
pub use glt::GltResult;
pub use grid::{GridIndex, Rcoll};
pub use ljungbox::LjungBoxResult;
pub use output::{MemorySink, OutputSink};
pub use pseudotime::PseudoTime;
pub use reml_setup::ReMlSetup;
pub use solver::VoxelSolution;
