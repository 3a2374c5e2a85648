//! Result-sink abstraction (spec §9: "polymorphism over result sinks" —
//! the core never writes a dataset file format directly; it hands finished
//! per-voxel series to whatever implements [`OutputSink`]).

use crate::error::Result;
use ndarray::Array1;

/// A named output series (one per β column, fit statistic, or GLT result)
/// that the driver accumulates one voxel at a time and a sink persists in
/// whatever format it owns.
pub trait OutputSink: Send + Sync {
    /// Write `values` for voxel `voxel_index` under the given series name.
    /// Called once per voxel per series; sinks that buffer in memory should
    /// flush lazily and finish on `finalize`.
    fn write_series(&mut self, series: &str, voxel_index: usize, values: &[f64]) -> Result<()>;

    /// Called once after all voxels have been processed, so file-backed
    /// sinks can flush and close.
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An in-memory [`OutputSink`] that collects every series into dense
/// per-voxel arrays, for callers that want the result set as data rather
/// than a file (and for tests).
#[derive(Debug, Default)]
pub struct MemorySink {
    series: std::collections::HashMap<String, Vec<(usize, Vec<f64>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            series: std::collections::HashMap::new(),
        }
    }

    /// Retrieve a series' entries as written, in insertion order.
    pub fn series(&self, name: &str) -> Option<&[(usize, Vec<f64>)]> {
        self.series.get(name).map(|v| v.as_slice())
    }

    /// Reassemble one series into an `n_voxels`-length array, assuming
    /// each write carried exactly one value; voxels never written are left
    /// at `fill`.
    pub fn to_dense(&self, name: &str, n_voxels: usize, fill: f64) -> Array1<f64> {
        let mut out = Array1::<f64>::from_elem(n_voxels, fill);
        if let Some(entries) = self.series.get(name) {
            for (idx, values) in entries {
                if let Some(&v) = values.first() {
                    out[*idx] = v;
                }
            }
        }
        out
    }
}

impl OutputSink for MemorySink {
    fn write_series(&mut self, series: &str, voxel_index: usize, values: &[f64]) -> Result<()> {
        self.series
            .entry(series.to_string())
            .or_default()
            .push((voxel_index, values.to_vec()));
        Ok(())
    }
}
