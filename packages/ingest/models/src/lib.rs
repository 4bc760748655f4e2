#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Study-area source definition types.
//!
//! A [`StudySource`] describes every dataset one city needs for a model
//! run: the study boundary, the modelled incident layer (and optionally a
//! later year used for evaluation), one layer per risk factor, and the
//! polygons cells are grouped by. Sources are TOML files embedded at
//! compile time.

use crime_risk_feature_models::RiskFactor;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A study area and its datasets, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySource {
    /// Unique source identifier (e.g., `"chicago"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// City name.
    pub city: String,
    /// Two-letter state abbreviation.
    pub state: String,
    /// Planar projection used for every layer.
    pub projection: ProjectionConfig,
    /// Study-area outline.
    pub boundary: LayerSource,
    /// Incidents the model is fitted to.
    pub incidents: LayerSource,
    /// Incidents from a later period, used to evaluate risk categories.
    #[serde(default)]
    pub holdout_incidents: Option<LayerSource>,
    /// One point layer per risk factor.
    pub risk_factors: Vec<RiskFactorSource>,
    /// Neighborhood polygons (must set `name_field`).
    pub neighborhoods: LayerSource,
    /// Police district polygons (must set `name_field`).
    #[serde(default)]
    pub police_districts: Option<LayerSource>,
    /// Census tracts with population counts.
    #[serde(default)]
    pub tracts: Option<TractSource>,
}

impl StudySource {
    /// Returns the source identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the layer definition for `factor`, if configured.
    #[must_use]
    pub fn risk_factor(&self, factor: RiskFactor) -> Option<&LayerSource> {
        self.risk_factors
            .iter()
            .find(|source| source.factor == factor)
            .map(|source| &source.layer)
    }
}

/// Local equirectangular projection settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Longitude of the projection origin.
    pub origin_lon: f64,
    /// Latitude of the projection origin.
    pub origin_lat: f64,
    /// Output distance unit.
    #[serde(default)]
    pub units: DistanceUnit,
}

/// Planar distance unit.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistanceUnit {
    /// International feet.
    #[default]
    Feet,
    /// Meters.
    Meters,
}

impl DistanceUnit {
    /// Number of units in one meter.
    #[must_use]
    pub const fn per_meter(self) -> f64 {
        match self {
            Self::Feet => 1.0 / 0.3048,
            Self::Meters => 1.0,
        }
    }
}

/// One dataset: where to fetch it and how to read geometry from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSource {
    /// Fetcher configuration.
    pub fetcher: FetcherConfig,
    /// How to extract geometry from each record.
    #[serde(default)]
    pub geometry: GeometryExtractor,
    /// Property holding the region name, for polygon layers.
    #[serde(default)]
    pub name_field: Option<String>,
}

/// A risk factor layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactorSource {
    /// Which risk factor this layer measures.
    pub factor: RiskFactor,
    /// Dataset definition.
    #[serde(flatten)]
    pub layer: LayerSource,
}

/// Census tracts with total and white population fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TractSource {
    /// Dataset definition.
    #[serde(flatten)]
    pub layer: LayerSource,
    /// Property holding the total population.
    pub total_field: String,
    /// Property holding the white population.
    pub white_field: String,
}

/// How to fetch a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetcherConfig {
    /// Socrata SODA JSON rows, paged with `$limit` / `$offset`.
    Socrata {
        /// Resource URL (e.g. `https://data.cityofchicago.org/resource/ijzp-q8t2.json`).
        url: String,
        /// SoQL `$where` clause.
        #[serde(default)]
        where_clause: Option<String>,
        /// Rows per page (default: 50,000).
        #[serde(default)]
        page_size: Option<u32>,
        /// Cap on total rows.
        #[serde(default)]
        limit: Option<u64>,
    },
    /// A URL returning a `GeoJSON` `FeatureCollection`.
    GeojsonUrl {
        /// Full URL.
        url: String,
    },
    /// `ArcGIS` `FeatureServer` / `MapServer` query endpoint, paged.
    Arcgis {
        /// Base query URL (up to `.../query`).
        url: String,
        /// SQL `where` filter (default: `1=1`).
        #[serde(default)]
        where_clause: Option<String>,
        /// Maximum records per page (default: 1000).
        #[serde(default)]
        max_records: Option<u32>,
    },
    /// A local `GeoJSON` `FeatureCollection` or JSON array of rows.
    File {
        /// Path, relative to the working directory.
        path: String,
    },
}

impl FetcherConfig {
    /// Short description for log lines.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Socrata { url, .. } => format!("socrata {url}"),
            Self::GeojsonUrl { url } => format!("geojson {url}"),
            Self::Arcgis { url, .. } => format!("arcgis {url}"),
            Self::File { path } => format!("file {path}"),
        }
    }
}

/// How to read geometry from a fetched record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometryExtractor {
    /// Standard `GeoJSON` feature geometry.
    #[default]
    Geojson,
    /// Separate latitude and longitude properties (numbers or strings).
    LatLon {
        /// Latitude property.
        lat_field: String,
        /// Longitude property.
        lon_field: String,
    },
    /// Esri JSON geometry (`{ "rings": [...] }`).
    EsriRings,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
id = "test"
name = "Test City"
city = "Test"
state = "IL"

[projection]
origin_lon = -87.6
origin_lat = 41.8

[boundary.fetcher]
type = "file"
path = "boundary.geojson"

[incidents]
geometry = { type = "lat_lon", lat_field = "latitude", lon_field = "longitude" }

[incidents.fetcher]
type = "socrata"
url = "https://example.org/resource/abcd-1234.json"
where_clause = "year = 2017"

[[risk_factors]]
factor = "Graffiti"
fetcher = { type = "geojson_url", url = "https://example.org/graffiti.geojson" }

[neighborhoods]
name_field = "pri_neigh"
fetcher = { type = "arcgis", url = "https://example.org/query", where_clause = "GEOID LIKE '17031%'", max_records = 500 }

[tracts]
total_field = "total"
white_field = "white"
fetcher = { type = "file", path = "tracts.geojson" }
"#;

    #[test]
    fn parses_a_minimal_source() {
        let source: StudySource = toml::from_str(MINIMAL).unwrap();

        assert_eq!(source.id(), "test");
        assert_eq!(source.projection.units, DistanceUnit::Feet);
        assert_eq!(source.boundary.geometry, GeometryExtractor::Geojson);
        assert!(matches!(
            source.incidents.fetcher,
            FetcherConfig::Socrata {
                where_clause: Some(_),
                page_size: None,
                ..
            }
        ));
        assert!(source.risk_factor(RiskFactor::Graffiti).is_some());
        assert!(source.risk_factor(RiskFactor::PawnShops).is_none());
        assert_eq!(
            source.neighborhoods.name_field.as_deref(),
            Some("pri_neigh")
        );
        assert!(matches!(
            &source.neighborhoods.fetcher,
            FetcherConfig::Arcgis {
                where_clause: Some(filter),
                max_records: Some(500),
                ..
            } if filter == "GEOID LIKE '17031%'"
        ));
        assert!(source.holdout_incidents.is_none());
        assert_eq!(source.tracts.unwrap().white_field, "white");
    }

    #[test]
    fn feet_per_meter() {
        assert!((DistanceUnit::Feet.per_meter() - 3.280_839_895).abs() < 1e-9);
        assert_eq!("meters".parse::<DistanceUnit>().unwrap(), DistanceUnit::Meters);
    }
}
