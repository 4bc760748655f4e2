//! Queen contiguity between grid cells.
//!
//! Two cells are neighbors when their closed polygons share at least one
//! point (an edge or a single vertex). Candidates come from an R-tree
//! envelope query; the exact test is a polygon intersection.

use std::collections::{BTreeMap, BTreeSet};

use crime_risk_feature_models::CellId;
use geo::{BoundingRect, Intersects};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};

use crate::GridCell;

/// Undirected queen adjacency graph over a set of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueenAdjacency {
    neighbors: BTreeMap<CellId, Vec<CellId>>,
}

impl QueenAdjacency {
    /// Builds contiguity for exactly the given cells. Cells outside the set
    /// are never neighbors, so a subset can leave some cells isolated.
    #[must_use]
    pub fn from_cells<'a>(cells: impl IntoIterator<Item = &'a GridCell>) -> Self {
        let cells: Vec<&GridCell> = cells.into_iter().collect();

        let entries: Vec<GeomWithData<Rectangle<[f64; 2]>, usize>> = cells
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| {
                let rect = cell.polygon.bounding_rect()?;
                Some(GeomWithData::new(
                    Rectangle::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    idx,
                ))
            })
            .collect();
        let tree = RTree::bulk_load(entries);

        let mut neighbors: BTreeMap<CellId, BTreeSet<CellId>> =
            cells.iter().map(|c| (c.id, BTreeSet::new())).collect();

        for cell in &cells {
            let Some(rect) = cell.polygon.bounding_rect() else {
                continue;
            };
            let envelope =
                AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

            for candidate in tree.locate_in_envelope_intersecting(&envelope) {
                let other = cells[candidate.data];
                if other.id == cell.id || !cell.polygon.intersects(&other.polygon) {
                    continue;
                }
                neighbors.entry(cell.id).or_default().insert(other.id);
                neighbors.entry(other.id).or_default().insert(cell.id);
            }
        }

        let adjacency = Self {
            neighbors: neighbors
                .into_iter()
                .map(|(id, set)| (id, set.into_iter().collect()))
                .collect(),
        };

        let isolated = adjacency.isolated().len();
        if isolated > 0 {
            log::warn!(
                "{isolated} of {} cells have no queen neighbors (zero weight)",
                adjacency.len()
            );
        }

        adjacency
    }

    /// Neighbors of `cell`, ascending. Empty for isolated or unknown cells.
    #[must_use]
    pub fn neighbors(&self, cell: CellId) -> &[CellId] {
        self.neighbors.get(&cell).map(Vec::as_slice).unwrap_or_default()
    }

    /// Cells in the graph, ascending.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.neighbors.keys().copied()
    }

    /// Number of cells in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether the graph has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Cells with no neighbors.
    #[must_use]
    pub fn isolated(&self) -> Vec<CellId> {
        self.neighbors
            .iter()
            .filter(|(_, n)| n.is_empty())
            .map(|(&id, _)| id)
            .collect()
    }
}
