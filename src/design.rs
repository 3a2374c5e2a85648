//! DesignMatrix and ContrastMatrix (spec §3).
//!
//! `DesignMatrix` wraps an `n x m` design together with optional column
//! labels and tracks which columns are explicitly permitted to be all-zero
//! (unidentifiable) rather than treated as a configuration error. Per-slice
//! and per-voxel variants are distinct `DesignMatrix` values built by the
//! driver (spec §3's "Each variant is a distinct logical DesignMatrix").

use crate::error::{Result, VoxRemlError};
use ndarray::{Array1, Array2};

#[derive(Debug, Clone)]
pub struct DesignMatrix {
    x: Array2<f64>,
    labels: Vec<String>,
}

impl DesignMatrix {
    pub fn new(x: Array2<f64>, labels: Option<Vec<String>>) -> Result<Self> {
        let m = x.ncols();
        let labels = match labels {
            Some(l) => {
                if l.len() != m {
                    return Err(VoxRemlError::DimensionMismatch(format!(
                        "{} labels for {} columns",
                        l.len(),
                        m
                    )));
                }
                l
            }
            None => (0..m).map(|i| format!("x{i}")).collect(),
        };
        if x.nrows() <= m {
            return Err(VoxRemlError::DimensionMismatch(format!(
                "n ({}) must exceed m ({}) by at least 1",
                x.nrows(),
                m
            )));
        }
        Ok(DesignMatrix { x, labels })
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn n(&self) -> usize {
        self.x.nrows()
    }

    pub fn m(&self) -> usize {
        self.x.ncols()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Indices of columns that are all zero.
    pub fn zero_columns(&self) -> Vec<usize> {
        (0..self.m())
            .filter(|&j| self.x.column(j).iter().all(|&v| v == 0.0))
            .collect()
    }

    /// Build a new DesignMatrix with extra columns appended (global extra
    /// regressors, or per-voxel `Z_v` concatenated on the fly, spec §3).
    pub fn augmented(&self, extra: &Array2<f64>, extra_labels: Option<Vec<String>>) -> Result<Self> {
        if extra.nrows() != self.n() {
            return Err(VoxRemlError::DimensionMismatch(format!(
                "extra regressors have {} rows, expected {}",
                extra.nrows(),
                self.n()
            )));
        }
        let q = extra.ncols();
        let mut x_new = Array2::<f64>::zeros((self.n(), self.m() + q));
        x_new.slice_mut(ndarray::s![.., ..self.m()]).assign(&self.x);
        x_new.slice_mut(ndarray::s![.., self.m()..]).assign(extra);

        let mut labels = self.labels.clone();
        match extra_labels {
            Some(l) if l.len() == q => labels.extend(l),
            _ => labels.extend((0..q).map(|i| format!("z{i}"))),
        }
        DesignMatrix::new(x_new, Some(labels))
    }
}

/// A contrast (General Linear Test) matrix G (r x m), tested against
/// H0: Gβ = 0 (spec §3, §4.6).
#[derive(Debug, Clone)]
pub struct ContrastMatrix {
    g: Array2<f64>,
    label: String,
}

impl ContrastMatrix {
    pub fn new(g: Array2<f64>, label: impl Into<String>, m: usize) -> Result<Self> {
        if g.ncols() != m {
            return Err(VoxRemlError::DimensionMismatch(format!(
                "contrast has {} columns, expected {}",
                g.ncols(),
                m
            )));
        }
        if g.nrows() == 0 {
            return Err(VoxRemlError::DimensionMismatch(
                "contrast matrix must have at least one row".into(),
            ));
        }
        Ok(ContrastMatrix {
            g,
            label: label.into(),
        })
    }

    pub fn g(&self) -> &Array2<f64> {
        &self.g
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn rows(&self) -> usize {
        self.g.nrows()
    }

    pub fn cols(&self) -> usize {
        self.g.ncols()
    }

    /// Drop rows that become all-zero after masking the given unidentifiable
    /// column indices (spec §3, §4.6). Returns the reduced matrix plus the
    /// original row indices that survived, so callers can re-expand outputs.
    pub fn masked(&self, unidentifiable: &[usize]) -> (Array2<f64>, Vec<usize>) {
        if unidentifiable.is_empty() {
            return (self.g.clone(), (0..self.rows()).collect());
        }
        let mut kept_rows = Vec::new();
        for i in 0..self.rows() {
            let row = self.g.row(i);
            let all_zero = (0..self.cols()).all(|j| {
                unidentifiable.contains(&j) || row[j] == 0.0
            });
            if !all_zero {
                kept_rows.push(i);
            }
        }
        let mut out = Array2::<f64>::zeros((kept_rows.len(), self.cols()));
        for (new_i, &old_i) in kept_rows.iter().enumerate() {
            out.row_mut(new_i).assign(&self.g.row(old_i));
        }
        (out, kept_rows)
    }
}

/// Extract a single voxel's y vector from a full n_full-length source,
/// selecting the retained rows named by `g`.
pub fn select_retained(y_full: &Array1<f64>, g: &[usize]) -> Array1<f64> {
    Array1::from_iter(g.iter().map(|&i| y_full[i]))
}

/// Expand a length-n vector back to n_full, leaving `fill` at censored
/// positions (spec §6: fitted/residual outputs restore original length).
pub fn expand_to_full(
    v: &Array1<f64>,
    g: &[usize],
    n_full: usize,
    fill: impl Fn(usize) -> f64,
) -> Array1<f64> {
    let mut out = Array1::<f64>::from_shape_fn(n_full, &fill);
    for (i, &full_idx) in g.iter().enumerate() {
        out[full_idx] = v[i];
    }
    out
}
