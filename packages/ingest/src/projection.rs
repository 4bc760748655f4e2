//! Local equirectangular projection.
//!
//! Accurate to well under a percent across a single city, which is all the
//! grid and distance features need. Output axes are east (x) and north (y)
//! of the configured origin.

use crime_risk_ingest_models::{DistanceUnit, ProjectionConfig};
use geo::{Coord, MapCoords, MultiPolygon, Point};

/// Mean Earth radius (IUGG).
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Projects longitude/latitude degrees into planar feet or meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    origin_lon: f64,
    origin_lat: f64,
    x_scale: f64,
    y_scale: f64,
    units: DistanceUnit,
}

impl LocalProjection {
    /// Builds the projection for `config`.
    #[must_use]
    pub fn new(config: &ProjectionConfig) -> Self {
        let y_scale = EARTH_RADIUS_METERS.to_radians() * config.units.per_meter();
        Self {
            origin_lon: config.origin_lon,
            origin_lat: config.origin_lat,
            x_scale: y_scale * config.origin_lat.to_radians().cos(),
            y_scale,
            units: config.units,
        }
    }

    /// Output unit.
    #[must_use]
    pub const fn units(&self) -> DistanceUnit {
        self.units
    }

    /// Projects one coordinate.
    #[must_use]
    pub fn coord(&self, lon_lat: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (lon_lat.x - self.origin_lon) * self.x_scale,
            y: (lon_lat.y - self.origin_lat) * self.y_scale,
        }
    }

    /// Projects a point.
    #[must_use]
    pub fn point(&self, lon_lat: Point<f64>) -> Point<f64> {
        Point::from(self.coord(lon_lat.0))
    }

    /// Projects every vertex of a polygon set.
    #[must_use]
    pub fn multi_polygon(&self, lon_lat: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        lon_lat.map_coords(|c| self.coord(c))
    }
}
