//! Builds the per-cell feature table for a study area.
//!
//! Risk-factor counts and `.nn` distances, the city-center distance and the
//! group names come first. Rows missing any of them are dropped, then Local
//! Moran's I runs over the surviving cells (with contiguity rebuilt for
//! exactly those cells) to derive the hot-spot features.

use std::collections::BTreeMap;

use crime_risk_analytics::{SpatialWeights, local_moran};
use crime_risk_analytics_models::LocalMoran;
use crime_risk_feature_models::{
    CellId, FeatureName, FeatureTable, FeatureTableBuilder, GroupKind, RiskFactor, TableAssembly,
};
use crime_risk_ingest::StudyData;
use crime_risk_spatial::{
    CellCounts, Fishnet, GridCell, NamedRegion, QueenAdjacency, RegionIndex, count_points,
    mean_nearest_distance, planar_distance,
};
use geo::{Centroid, Point};

use crate::{CityCenter, ModelConfig, PipelineError};

/// The grid, the feature table, and the intermediate results behind it.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// The study grid.
    pub fishnet: Fishnet,
    /// Complete feature rows.
    pub table: FeatureTable,
    /// Cells dropped for incomplete features or groups.
    pub dropped: Vec<CellId>,
    /// Modelled incident counts for every grid cell.
    pub incident_counts: CellCounts,
    /// Local Moran's I of the incident counts, one per table row.
    pub moran: Vec<LocalMoran>,
    /// Risk factor layers present, in order.
    pub risk_factors: Vec<RiskFactor>,
}

impl Assembly {
    /// Number of hot spot cells.
    #[must_use]
    pub fn hotspots(&self) -> usize {
        self.moran.iter().filter(|m| m.hotspot).count()
    }

    /// Centroids of the table rows, in row order.
    #[must_use]
    pub fn row_centroids(&self) -> Vec<(CellId, Point<f64>)> {
        self.table
            .rows()
            .iter()
            .filter_map(|row| self.fishnet.cell(row.cell).map(|c| (c.id, c.centroid)))
            .collect()
    }
}

/// Grids the study area and assembles the feature table.
///
/// # Errors
///
/// * [`PipelineError::InvalidConfig`] for an invalid configuration.
/// * [`PipelineError::Spatial`] for an invalid boundary or a risk factor
///   layer with fewer points than `nearest_neighbors`.
/// * [`PipelineError::MissingCityCenter`] if the center neighborhood is
///   unknown.
/// * [`PipelineError::MissingGroupLayer`] if the LOGO grouping has no
///   polygons.
/// * [`PipelineError::EmptyTable`] if every row is incomplete.
/// * [`PipelineError::Analytics`] if Local Moran's I fails.
/// * [`PipelineError::TooFewHotSpots`] if there are fewer hot spots than
///   `cluster_distance_neighbors`.
pub fn assemble(study: &StudyData, config: &ModelConfig) -> Result<Assembly, PipelineError> {
    config.validate()?;
    ensure_group_layer(study, config.logo_group)?;

    let fishnet = Fishnet::build(&study.boundary, config.cell_size)?;
    let cells: Vec<CellId> = fishnet.cells().iter().map(|c| c.id).collect();
    let centroids: Vec<Point<f64>> = fishnet.cells().iter().map(|c| c.centroid).collect();

    let incident_counts = count_points(&fishnet, &study.incidents);
    log::info!(
        "{}: {} of {} incidents on the grid ({} discarded)",
        study.source_id,
        incident_counts.total(),
        study.incidents.len(),
        incident_counts.discarded
    );

    let mut builder = FeatureTableBuilder::new(cells.iter().copied());
    builder.observed(incident_counts.as_values())?;

    for (factor, layer) in &study.risk_factors {
        let counts = count_points(&fishnet, layer);
        builder.feature(FeatureName::Count(*factor), counts.as_values())?;

        let distances = mean_nearest_distance(&centroids, &layer.points, config.nearest_neighbors)?;
        builder.feature(
            FeatureName::NearestNeighbor(*factor),
            cells.iter().copied().zip(distances),
        )?;
    }

    let center = resolve_city_center(&study.neighborhoods, &config.city_center)?;
    builder.feature(
        FeatureName::CityCenterDistance,
        cells
            .iter()
            .copied()
            .zip(centroids.iter().map(|&p| planar_distance(p, center))),
    )?;

    builder.group(
        GroupKind::Neighborhood,
        group_names(&fishnet, &study.neighborhoods),
    )?;
    if !study.police_districts.is_empty() {
        builder.group(
            GroupKind::PoliceDistrict,
            group_names(&fishnet, &study.police_districts),
        )?;
    }

    let TableAssembly { table, mut dropped } = builder.build();
    if table.is_empty() {
        return Err(PipelineError::EmptyTable);
    }

    let kept: Vec<&GridCell> = table
        .rows()
        .iter()
        .filter_map(|row| fishnet.cell(row.cell))
        .collect();
    let weights = SpatialWeights::row_standardized(&QueenAdjacency::from_cells(
        kept.iter().copied(),
    ));
    let values: BTreeMap<CellId, f64> = table.rows().iter().map(|r| (r.cell, r.observed)).collect();
    let moran = local_moran(&values, &weights, config.thresholds())?;

    let hotspot_centroids: Vec<Point<f64>> = moran
        .iter()
        .filter(|m| m.hotspot)
        .filter_map(|m| fishnet.cell(m.cell))
        .map(|c| c.centroid)
        .collect();
    if hotspot_centroids.len() < config.cluster_distance_neighbors {
        return Err(PipelineError::TooFewHotSpots {
            found: hotspot_centroids.len(),
            required: config.cluster_distance_neighbors,
        });
    }

    let kept_centroids: Vec<Point<f64>> = kept.iter().map(|c| c.centroid).collect();
    let hotspot_distance = mean_nearest_distance(
        &kept_centroids,
        &hotspot_centroids,
        config.cluster_distance_neighbors,
    )?;

    let mut builder = table.into_builder();
    builder
        .feature(
            FeatureName::SignificantCluster,
            moran
                .iter()
                .map(|m| (m.cell, if m.hotspot { 1.0 } else { 0.0 })),
        )?
        .feature(
            FeatureName::SignificantClusterDistance,
            kept.iter().map(|c| c.id).zip(hotspot_distance),
        )?;
    let TableAssembly {
        table,
        dropped: late_drops,
    } = builder.build();
    dropped.extend(late_drops);
    dropped.sort_unstable();

    log::info!(
        "Feature table: {} cells, {} features, {} dropped, {} hot spots",
        table.len(),
        table.features().len(),
        dropped.len(),
        hotspot_centroids.len()
    );

    Ok(Assembly {
        fishnet,
        table,
        dropped,
        incident_counts,
        moran,
        risk_factors: study.risk_factors.keys().copied().collect(),
    })
}

fn ensure_group_layer(study: &StudyData, kind: GroupKind) -> Result<(), PipelineError> {
    let regions = match kind {
        GroupKind::Neighborhood => &study.neighborhoods,
        GroupKind::PoliceDistrict => &study.police_districts,
    };
    if regions.is_empty() {
        return Err(PipelineError::MissingGroupLayer(kind));
    }
    Ok(())
}

fn resolve_city_center(
    neighborhoods: &[NamedRegion],
    center: &CityCenter,
) -> Result<Point<f64>, PipelineError> {
    match center {
        CityCenter::Point { x, y } => Ok(Point::new(*x, *y)),
        CityCenter::Neighborhood(name) => RegionIndex::new(neighborhoods)
            .find(name)
            .and_then(Centroid::centroid)
            .ok_or_else(|| PipelineError::MissingCityCenter(name.clone())),
    }
}

/// Names each cell by the region containing its centroid.
fn group_names(fishnet: &Fishnet, regions: &[NamedRegion]) -> Vec<(CellId, String)> {
    let index = RegionIndex::new(regions);
    fishnet
        .cells()
        .iter()
        .filter_map(|cell| {
            index
                .lookup(cell.centroid)
                .map(|name| (cell.id, name.to_string()))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crime_risk_ingest_models::DistanceUnit;
    use crime_risk_spatial::PointLayer;
    use geo::{MultiPolygon, Rect, coord};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![
            Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon(),
        ])
    }

    fn in_block(row: u32, col: u32) -> bool {
        (row < 3 && col < 3) || ((6..9).contains(&row) && (6..9).contains(&col))
    }

    /// 1000x1000 study area on a 10x10 grid of 100-unit cells with two
    /// dense incident blocks, one in each neighborhood.
    pub(crate) fn synthetic_study() -> StudyData {
        let mut incidents = Vec::new();
        for row in 0..10u32 {
            for col in 0..10u32 {
                let count = if in_block(row, col) {
                    20
                } else {
                    (row * 7 + col * 3) % 4
                };
                let x = f64::from(col).mul_add(100.0, 50.0);
                let y = f64::from(row).mul_add(100.0, 50.0);
                for i in 0..count {
                    incidents.push(Point::new(x + f64::from(i % 5), y - f64::from(i / 5)));
                }
            }
        }

        let graffiti: Vec<Point<f64>> = (0..12)
            .map(|i| {
                let t = f64::from(i);
                Point::new(t.mul_add(83.0, 20.0) % 1000.0, t.mul_add(37.0, 40.0) % 1000.0)
            })
            .collect();

        StudyData {
            source_id: "synthetic".to_string(),
            units: DistanceUnit::Feet,
            boundary: rect(0.0, 0.0, 1000.0, 1000.0),
            incidents: PointLayer::new("Battery_Domestic", incidents),
            holdout_incidents: None,
            risk_factors: BTreeMap::from([(
                RiskFactor::Graffiti,
                PointLayer::new("Graffiti", graffiti),
            )]),
            neighborhoods: vec![
                NamedRegion {
                    name: "Loop".to_string(),
                    polygon: rect(0.0, 0.0, 500.0, 1000.0),
                },
                NamedRegion {
                    name: "Uptown".to_string(),
                    polygon: rect(500.0, 0.0, 1000.0, 1000.0),
                },
            ],
            police_districts: Vec::new(),
            tracts: Vec::new(),
        }
    }

    pub(crate) fn synthetic_config() -> ModelConfig {
        ModelConfig {
            cell_size: 100.0,
            random_folds: Some(3),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn assembles_every_declared_feature() {
        let study = synthetic_study();
        let assembly = assemble(&study, &synthetic_config()).unwrap();

        assert_eq!(assembly.fishnet.len(), 100);
        assert_eq!(assembly.table.len(), 100);
        assert!(assembly.dropped.is_empty());
        assert_eq!(
            assembly.table.features(),
            &[
                FeatureName::Count(RiskFactor::Graffiti),
                FeatureName::NearestNeighbor(RiskFactor::Graffiti),
                FeatureName::CityCenterDistance,
                FeatureName::SignificantCluster,
                FeatureName::SignificantClusterDistance,
            ]
        );
        assert_eq!(
            assembly.incident_counts.total() + assembly.incident_counts.discarded as u64,
            study.incidents.len() as u64
        );
        for row in assembly.table.rows() {
            for feature in assembly.table.features() {
                assert!(row.value(*feature).is_some_and(f64::is_finite));
            }
        }
    }

    #[test]
    fn block_centers_are_hot_spots() {
        let assembly = assemble(&synthetic_study(), &synthetic_config()).unwrap();

        // Cell (row 1, col 1) and (row 7, col 7).
        for cell in [CellId(11), CellId(77)] {
            let row = assembly.table.row(cell).unwrap();
            assert_eq!(row.value(FeatureName::SignificantCluster), Some(1.0));
            assert_eq!(row.value(FeatureName::SignificantClusterDistance), Some(0.0));
        }

        let far = assembly.table.row(CellId(9)).unwrap();
        assert_eq!(far.value(FeatureName::SignificantCluster), Some(0.0));
        assert!(far.value(FeatureName::SignificantClusterDistance).unwrap() > 0.0);
        assert!(assembly.hotspots() >= 2);
    }

    #[test]
    fn cells_are_grouped_and_measured_from_the_loop() {
        let assembly = assemble(&synthetic_study(), &synthetic_config()).unwrap();

        let first = assembly.table.row(CellId(0)).unwrap();
        assert_eq!(first.group(GroupKind::Neighborhood), Some("Loop"));
        let last = assembly.table.row(CellId(99)).unwrap();
        assert_eq!(last.group(GroupKind::Neighborhood), Some("Uptown"));

        // Loop centroid is (250, 500); cell 0 centroid is (50, 50).
        let expected = 200.0f64.hypot(450.0);
        let distance = first.value(FeatureName::CityCenterDistance).unwrap();
        assert!((distance - expected).abs() < 1e-9);
    }

    #[test]
    fn configuration_problems_fail_before_computation() {
        let study = synthetic_study();

        let config = ModelConfig {
            city_center: CityCenter::Neighborhood("Downtown".to_string()),
            ..synthetic_config()
        };
        assert!(matches!(
            assemble(&study, &config),
            Err(PipelineError::MissingCityCenter(_))
        ));

        let config = ModelConfig {
            logo_group: GroupKind::PoliceDistrict,
            ..synthetic_config()
        };
        assert!(matches!(
            assemble(&study, &config),
            Err(PipelineError::MissingGroupLayer(GroupKind::PoliceDistrict))
        ));

        let config = ModelConfig {
            nearest_neighbors: 50,
            ..synthetic_config()
        };
        assert!(matches!(
            assemble(&study, &config),
            Err(PipelineError::Spatial(_))
        ));
    }

    #[test]
    fn cells_outside_every_neighborhood_are_dropped() {
        let mut study = synthetic_study();
        study.neighborhoods[1].polygon = rect(500.0, 0.0, 1000.0, 900.0);

        let assembly = assemble(&study, &synthetic_config()).unwrap();
        assert_eq!(assembly.dropped.len(), 5);
        assert_eq!(assembly.table.len(), 95);
        assert!(assembly.table.row(CellId(99)).is_none());
        assert_eq!(assembly.moran.len(), 95);
    }
}
