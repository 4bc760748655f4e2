//! Local Moran's I under the randomisation assumption.
//!
//! Weights are row-standardized queen contiguity. Cells without neighbors
//! keep a zero weight row: they count toward the global moments but get a
//! statistic of zero and a p-value of one.

use std::collections::BTreeMap;

use crime_risk_analytics_models::{LocalMoran, SignificanceThresholds};
use crime_risk_feature_models::CellId;
use crime_risk_spatial::QueenAdjacency;

use crate::AnalyticsError;
use crate::special::normal_sf;

/// Row-standardized spatial weights.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialWeights {
    rows: BTreeMap<CellId, Vec<(CellId, f64)>>,
}

impl SpatialWeights {
    /// Gives each neighbor of a cell weight `1 / neighbor_count`.
    #[must_use]
    pub fn row_standardized(adjacency: &QueenAdjacency) -> Self {
        let rows = adjacency
            .cells()
            .map(|cell| {
                let neighbors = adjacency.neighbors(cell);
                #[allow(clippy::cast_precision_loss)]
                let weight = 1.0 / neighbors.len().max(1) as f64;
                (cell, neighbors.iter().map(|&n| (n, weight)).collect())
            })
            .collect();
        Self { rows }
    }

    /// Weighted neighbors of `cell`.
    #[must_use]
    pub fn neighbors(&self, cell: CellId) -> &[(CellId, f64)] {
        self.rows.get(&cell).map(Vec::as_slice).unwrap_or_default()
    }

    /// Weighted cells, ascending.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.rows.keys().copied()
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Computes Local Moran's I for every weighted cell, in ascending cell order.
///
/// `p_value` is the upper-tail normal probability of the standardized
/// statistic, so only positive autocorrelation (cluster membership) is
/// flagged. A zero-variance input yields statistic 0 and p-value 1 for every
/// cell.
///
/// # Errors
///
/// * [`AnalyticsError::TooFewCells`] with fewer than three cells.
/// * [`AnalyticsError::MissingValue`] if a weighted cell has no value.
#[allow(clippy::cast_precision_loss, clippy::similar_names)]
pub fn local_moran(
    values: &BTreeMap<CellId, f64>,
    weights: &SpatialWeights,
    thresholds: SignificanceThresholds,
) -> Result<Vec<LocalMoran>, AnalyticsError> {
    let n = weights.len();
    if n < 3 {
        return Err(AnalyticsError::TooFewCells(n));
    }

    let x = weights
        .cells()
        .map(|cell| {
            values
                .get(&cell)
                .map(|&v| (cell, v))
                .ok_or(AnalyticsError::MissingValue(cell))
        })
        .collect::<Result<BTreeMap<CellId, f64>, _>>()?;

    let nf = n as f64;
    let mean = x.values().sum::<f64>() / nf;
    let z: BTreeMap<CellId, f64> = x.iter().map(|(&c, &v)| (c, v - mean)).collect();
    let m2 = z.values().map(|d| d * d).sum::<f64>() / nf;

    if m2 <= f64::MIN_POSITIVE {
        log::warn!("Local Moran's I: input has zero variance, no cell is significant");
        return Ok(weights
            .cells()
            .map(|cell| not_significant(cell, weights.neighbors(cell).is_empty()))
            .collect());
    }

    let m4 = z.values().map(|d| d.powi(4)).sum::<f64>() / nf;
    let b2 = m4 / (m2 * m2);
    let a = (nf - b2) / (nf - 1.0);
    let b = 2.0f64.mul_add(b2, -nf) / ((nf - 1.0) * (nf - 2.0));

    let mut results = Vec::with_capacity(n);
    for (&cell, &zi) in &z {
        let neighbors = weights.neighbors(cell);
        if neighbors.is_empty() {
            results.push(not_significant(cell, true));
            continue;
        }

        let lag: f64 = neighbors.iter().map(|&(j, w)| w * z[&j]).sum();
        let wi: f64 = neighbors.iter().map(|&(_, w)| w).sum();
        let wi2: f64 = neighbors.iter().map(|&(_, w)| w * w).sum();

        let statistic = zi / m2 * lag;
        let expected = -wi / (nf - 1.0);
        let variance =
            b.mul_add(wi.mul_add(wi, -wi2), a * wi2) - wi * wi / ((nf - 1.0) * (nf - 1.0));

        let (z_score, p_value) = if variance > 0.0 {
            let z_score = (statistic - expected) / variance.sqrt();
            (z_score, normal_sf(z_score))
        } else {
            (0.0, 1.0)
        };

        results.push(LocalMoran {
            cell,
            statistic,
            expected,
            variance,
            z_score,
            p_value,
            significant: p_value <= thresholds.display_alpha,
            hotspot: p_value <= thresholds.cluster_alpha,
            isolated: false,
        });
    }

    let hotspots = results.iter().filter(|r| r.hotspot).count();
    log::info!(
        "Local Moran's I: {hotspots} of {n} cells are hot spots at alpha {}",
        thresholds.cluster_alpha
    );

    Ok(results)
}

const fn not_significant(cell: CellId, isolated: bool) -> LocalMoran {
    LocalMoran {
        cell,
        statistic: 0.0,
        expected: 0.0,
        variance: 0.0,
        z_score: 0.0,
        p_value: 1.0,
        significant: false,
        hotspot: false,
        isolated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crime_risk_spatial::Fishnet;
    use geo::{MultiPolygon, Rect, coord};

    fn grid_weights(side: f64) -> (Fishnet, SpatialWeights) {
        let boundary = MultiPolygon(vec![
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: side * 10.0, y: side * 10.0 })
                .to_polygon(),
        ]);
        let fishnet = Fishnet::build(&boundary, 10.0).unwrap();
        let weights =
            SpatialWeights::row_standardized(&QueenAdjacency::from_cells(fishnet.cells()));
        (fishnet, weights)
    }

    #[test]
    fn row_weights_sum_to_one() {
        let (_, weights) = grid_weights(3.0);
        for cell in weights.cells() {
            let total: f64 = weights.neighbors(cell).iter().map(|&(_, w)| w).sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
        assert_eq!(weights.neighbors(CellId(0))[0].1, 1.0 / 3.0);
    }

    #[test]
    fn uniform_values_are_never_significant() {
        let (fishnet, weights) = grid_weights(4.0);
        let values = fishnet.cells().iter().map(|c| (c.id, 5.0)).collect();

        let results = local_moran(&values, &weights, SignificanceThresholds::default()).unwrap();
        assert_eq!(results.len(), 16);
        for r in &results {
            assert_eq!(r.statistic, 0.0);
            assert_eq!(r.p_value, 1.0);
            assert!(!r.significant);
            assert!(!r.hotspot);
        }
    }

    #[test]
    fn detects_a_high_value_block() {
        // 6x6 grid with a 3x3 block of 10s in the bottom-left corner.
        let (fishnet, weights) = grid_weights(6.0);
        let values = fishnet
            .cells()
            .iter()
            .map(|c| (c.id, if c.row < 3 && c.col < 3 { 10.0 } else { 0.0 }))
            .collect();

        let results = local_moran(&values, &weights, SignificanceThresholds::default()).unwrap();
        let by_cell: BTreeMap<CellId, &LocalMoran> = results.iter().map(|r| (r.cell, r)).collect();

        // Block center (row 1, col 1) has only high neighbors: I = 3.
        let center = by_cell[&CellId(7)];
        assert!((center.statistic - 3.0).abs() < 1e-9);
        assert!((center.expected + 1.0 / 35.0).abs() < 1e-12);
        assert!(center.z_score > 9.0);
        assert!(center.significant);
        assert!(center.hotspot);

        // Far corner is a low-low cluster: positive I but not significant.
        let corner = by_cell[&CellId(35)];
        assert!(corner.statistic > 0.0);
        assert!(!corner.significant);
        assert!(corner.p_value > 0.05 && corner.p_value < 1.0);
    }

    #[test]
    fn isolated_cells_get_zero_statistic() {
        let (fishnet, _) = grid_weights(3.0);
        let subset = [CellId(0), CellId(1), CellId(3), CellId(8)];
        let adjacency = QueenAdjacency::from_cells(
            fishnet.cells().iter().filter(|c| subset.contains(&c.id)),
        );
        let weights = SpatialWeights::row_standardized(&adjacency);
        let values = BTreeMap::from([
            (CellId(0), 4.0),
            (CellId(1), 3.0),
            (CellId(3), 1.0),
            (CellId(8), 9.0),
        ]);

        let results = local_moran(&values, &weights, SignificanceThresholds::default()).unwrap();
        let isolated = results.iter().find(|r| r.cell == CellId(8)).unwrap();
        assert!(isolated.isolated);
        assert_eq!(isolated.statistic, 0.0);
        assert_eq!(isolated.p_value, 1.0);
        assert!(results.iter().filter(|r| r.cell != CellId(8)).all(|r| !r.isolated));
    }

    #[test]
    fn rejects_small_or_incomplete_input() {
        let (fishnet, weights) = grid_weights(2.0);
        let partial = fishnet
            .cells()
            .iter()
            .skip(1)
            .map(|c| (c.id, 1.0))
            .collect();
        assert!(matches!(
            local_moran(&partial, &weights, SignificanceThresholds::default()),
            Err(AnalyticsError::MissingValue(CellId(0)))
        ));

        let tiny = QueenAdjacency::from_cells(fishnet.cells().iter().take(2));
        let weights = SpatialWeights::row_standardized(&tiny);
        assert!(matches!(
            local_moran(&BTreeMap::new(), &weights, SignificanceThresholds::default()),
            Err(AnalyticsError::TooFewCells(2))
        ));
    }
}
