#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Planar spatial primitives for the risk model.
//!
//! Builds the fishnet grid, joins point layers onto it, computes
//! nearest-neighbor distance features, and derives queen contiguity
//! between cells. All coordinates are planar (already projected), so
//! distances are plain Euclidean distances in the projection's unit.
//!
//! Also provides [`RegionIndex`], an R-tree of named polygons used to
//! attribute cells to neighborhoods, police districts, and census tracts.

pub mod adjacency;
pub mod aggregate;
pub mod grid;
pub mod nearest;

use geo::{Area, BoundingRect, Intersects, MultiPolygon, Point};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};

pub use adjacency::QueenAdjacency;
pub use aggregate::{CellCounts, count_points};
pub use grid::{Fishnet, GridCell};
pub use nearest::mean_nearest_distance;

/// Errors raised by spatial operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpatialError {
    /// The study boundary cannot be gridded.
    #[error("Invalid boundary: {message}")]
    InvalidBoundary {
        /// Description of what is wrong with the boundary.
        message: String,
    },

    /// The cell side length is not a positive finite number.
    #[error("Invalid cell size {0}: must be a positive finite number")]
    InvalidCellSize(f64),

    /// `k` was zero.
    #[error("Nearest-neighbor count must be at least 1")]
    InvalidNeighborCount,

    /// The reference layer has fewer points than requested neighbors.
    #[error("Need at least {required} reference points for k={required}, found {available}")]
    InsufficientPoints {
        /// The requested `k`.
        required: usize,
        /// Points available in the reference layer.
        available: usize,
    },
}

/// A labelled collection of planar points (incidents, service requests,
/// business licenses).
#[derive(Debug, Clone, PartialEq)]
pub struct PointLayer {
    /// Category label, e.g. `"Abandoned_Cars"`.
    pub label: String,
    /// Projected coordinates.
    pub points: Vec<Point<f64>>,
}

impl PointLayer {
    /// Creates a layer from a label and its points.
    #[must_use]
    pub fn new(label: impl Into<String>, points: Vec<Point<f64>>) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }

    /// Number of points in the layer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the layer has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A named polygon such as a neighborhood or police district.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRegion {
    /// Region name.
    pub name: String,
    /// Projected region geometry.
    pub polygon: MultiPolygon<f64>,
}

/// A region polygon stored in the R-tree with its metadata.
struct RegionEntry {
    name: String,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for RegionEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over named regions for point-in-polygon attribution.
pub struct RegionIndex {
    regions: RTree<RegionEntry>,
}

impl RegionIndex {
    /// Builds the index. Regions without a bounding box (empty geometry)
    /// are skipped.
    #[must_use]
    pub fn new(regions: &[NamedRegion]) -> Self {
        let entries: Vec<RegionEntry> = regions
            .iter()
            .filter_map(|region| {
                let Some(envelope) = compute_envelope(&region.polygon) else {
                    log::warn!("Skipping empty region geometry for {}", region.name);
                    return None;
                };
                Some(RegionEntry {
                    name: region.name.clone(),
                    area: region.polygon.unsigned_area(),
                    envelope,
                    polygon: region.polygon.clone(),
                })
            })
            .collect();

        Self {
            regions: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.size()
    }

    /// Whether the index holds no regions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.size() == 0
    }

    /// Returns the name of the region containing `point`.
    ///
    /// Regions can overlap; the smallest area wins, then the name for
    /// equal areas.
    #[must_use]
    pub fn lookup(&self, point: Point<f64>) -> Option<&str> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        self.regions
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.intersects(&point))
            .min_by(|a, b| a.area.total_cmp(&b.area).then_with(|| a.name.cmp(&b.name)))
            .map(|entry| entry.name.as_str())
    }

    /// Returns the polygon of the region with exactly this name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&MultiPolygon<f64>> {
        self.regions
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.polygon)
    }
}

/// Parse a `GeoJSON` geometry value into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
#[must_use]
pub fn parse_geojson_to_multipolygon(value: &geojson::JsonValue) -> Option<MultiPolygon<f64>> {
    let geojson = GeoJson::from_json_value(value.clone()).ok()?;
    let geom = match geojson {
        GeoJson::Geometry(geom) => geom,
        GeoJson::Feature(feature) => feature.geometry?,
        GeoJson::FeatureCollection(_) => return None,
    };
    let geo_geom: geo::Geometry<f64> = geom.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

/// Euclidean distance between two planar points.
#[must_use]
pub fn planar_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    (a.x() - b.x()).hypot(a.y() - b.y())
}
