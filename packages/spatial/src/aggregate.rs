//! Point-to-grid aggregation.

use std::collections::BTreeMap;

use crime_risk_feature_models::CellId;

use crate::{Fishnet, PointLayer};

/// Per-cell point counts for one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellCounts {
    /// Layer label the counts were computed from.
    pub label: String,
    /// Count per cell. Every grid cell is present, empty cells hold zero.
    pub counts: BTreeMap<CellId, u32>,
    /// Points that fell outside every cell.
    pub discarded: usize,
}

impl CellCounts {
    /// Sum of all per-cell counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| u64::from(c)).sum()
    }

    /// Counts as floating point values, for feature columns.
    pub fn as_values(&self) -> impl Iterator<Item = (CellId, f64)> + '_ {
        self.counts.iter().map(|(&cell, &count)| (cell, f64::from(count)))
    }
}

/// Counts the points of `layer` falling in each cell of `fishnet`.
///
/// A point on a shared cell edge is counted once, in the lowest-numbered
/// cell. Points outside the grid are discarded and reported in
/// [`CellCounts::discarded`], so `total() + discarded == layer.len()`.
#[must_use]
pub fn count_points(fishnet: &Fishnet, layer: &PointLayer) -> CellCounts {
    let mut counts: BTreeMap<CellId, u32> = fishnet.cells().iter().map(|c| (c.id, 0)).collect();
    let mut discarded = 0usize;

    for point in &layer.points {
        match fishnet.locate(*point) {
            Some(cell) => *counts.entry(cell).or_default() += 1,
            None => discarded += 1,
        }
    }

    if discarded > 0 {
        log::debug!(
            "{}: {discarded} of {} points fell outside the grid",
            layer.label,
            layer.len()
        );
    }

    CellCounts {
        label: layer.label.clone(),
        counts,
        discarded,
    }
}
