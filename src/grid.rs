//! Rcoll: the 2-D (a,b) grid of REMLSetups for one slice (spec §3, §4.4).

use crate::config::SolverConfig;
use crate::design::DesignMatrix;
use crate::error::Result;
use crate::pseudotime::PseudoTime;
use crate::reml_setup::ReMlSetup;

/// A point on the grid, indexed by (a_index, b_index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridIndex {
    pub ai: usize,
    pub bi: usize,
}

/// Collection of REMLSetups over a 2-D (a,b) grid (spec's "Rcoll"), built
/// lazily: each cell is `None` until first requested.
pub struct Rcoll {
    a_values: Vec<f64>,
    b_values: Vec<f64>,
    cells: Vec<Option<ReMlSetup>>,
    /// Index of the (0,0) entry, if (0,0) lies on the grid.
    pub zero_index: Option<GridIndex>,
}

impl Rcoll {
    fn cell_index(&self, idx: GridIndex) -> usize {
        idx.ai * self.b_values.len() + idx.bi
    }

    pub fn n_a(&self) -> usize {
        self.a_values.len()
    }

    pub fn n_b(&self) -> usize {
        self.b_values.len()
    }

    pub fn a_value(&self, ai: usize) -> f64 {
        self.a_values[ai]
    }

    pub fn b_value(&self, bi: usize) -> f64 {
        self.b_values[bi]
    }

    /// Build the grid's (a,b) axis values and empty cells; setups are
    /// constructed on demand via [`Rcoll::get_or_build`].
    pub fn new(cfg: &SolverConfig) -> Self {
        let steps = cfg.grid_steps();
        let a_values = axis_values(cfg.a_min, cfg.a_max, steps);
        let b_values = axis_values(cfg.b_min, cfg.b_max, steps);
        let zero_index = a_values
            .iter()
            .position(|&a| a == 0.0)
            .and_then(|ai| b_values.iter().position(|&b| b == 0.0).map(|bi| GridIndex { ai, bi }));
        let cells = vec![None; a_values.len() * b_values.len()];
        Rcoll {
            a_values,
            b_values,
            cells,
            zero_index,
        }
    }

    /// Whether (a,b) at this index satisfies the config's constraints.
    pub fn allowed(&self, idx: GridIndex, cfg: &SolverConfig) -> bool {
        cfg.ab_allowed(self.a_value(idx.ai), self.b_value(idx.bi))
    }

    /// Lazily construct (or fetch) the REMLSetup at `idx`. Guarded by the
    /// caller (the driver takes a per-slice lock around this call, spec §5).
    pub fn get_or_build(
        &mut self,
        idx: GridIndex,
        design: &DesignMatrix,
        tau: &PseudoTime,
        cfg: &SolverConfig,
    ) -> Result<&ReMlSetup> {
        let flat = self.cell_index(idx);
        if self.cells[flat].is_none() {
            let a = self.a_value(idx.ai);
            let b = self.b_value(idx.bi);
            let setup = ReMlSetup::build(design, tau, a, b, cfg)?;
            self.cells[flat] = Some(setup);
        }
        Ok(self.cells[flat].as_ref().unwrap())
    }

    pub fn get(&self, idx: GridIndex) -> Option<&ReMlSetup> {
        self.cells[self.cell_index(idx)].as_ref()
    }

    /// Caches `setup` at `idx` unconditionally, bypassing the axis-value
    /// match `get_or_build` relies on. Used for fixed-(a,b) mode (spec
    /// §4.8), where the configured (a,b) need not lie on the grid's axes,
    /// so the winning setup is still cached for callers to reuse instead of
    /// rebuilding it.
    pub fn cache(&mut self, idx: GridIndex, setup: ReMlSetup) {
        let flat = self.cell_index(idx);
        self.cells[flat] = Some(setup);
    }

    /// Iterate all grid indices that satisfy the config's (a,b) constraints.
    pub fn allowed_indices<'a>(&'a self, cfg: &'a SolverConfig) -> impl Iterator<Item = GridIndex> + 'a {
        (0..self.n_a()).flat_map(move |ai| {
            (0..self.n_b()).filter_map(move |bi| {
                let idx = GridIndex { ai, bi };
                if self.allowed(idx, cfg) {
                    Some(idx)
                } else {
                    None
                }
            })
        })
    }

    /// Evict a cell from memory (spec §3: "may be evicted to scratch").
    pub fn evict(&mut self, idx: GridIndex) -> Option<ReMlSetup> {
        let flat = self.cell_index(idx);
        self.cells[flat].take()
    }
}

fn axis_values(lo: f64, hi: f64, steps: usize) -> Vec<f64> {
    let n_points = steps + 1;
    if n_points == 1 {
        return vec![lo];
    }
    (0..n_points)
        .map(|i| lo + (hi - lo) * (i as f64) / (steps as f64))
        .collect()
}
