use thiserror::Error;

/// Error taxonomy for the REML/GLS core (spec §7).
#[derive(Error, Debug)]
pub enum VoxRemlError {
    /// Out-of-range (a,b), grid level, cutoff, or inconsistent n/m/run structure.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Design/row map/run starts inconsistent.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Cholesky pivot non-positive, or QR diagonal too small, without
    /// "de-singularize" permission.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// One or more design columns are all zero, without "de-singularize"
    /// permission. Carries the offending column indices.
    #[error("all-zero regressor column(s): {0:?}")]
    AllZeroRegressor(Vec<usize>),

    /// NaN/Inf encountered in y or an intermediate result.
    #[error("non-finite value encountered: {0}")]
    NumericNonFinite(String),

    /// Worker pool or scratch storage could not be allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Wrapper for errors from the dense linear-algebra backend.
    #[error("linear algebra backend error: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),

    /// Scratch-file I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VoxRemlError>;
