//! Loads every layer of a study area into projected, in-memory form.

use std::collections::BTreeMap;
use std::time::Duration;

use crime_risk_feature_models::RiskFactor;
use crime_risk_ingest_models::{DistanceUnit, LayerSource, StudySource};
use crime_risk_spatial::{NamedRegion, PointLayer};
use geo::MultiPolygon;

use crate::IngestError;
use crate::fetchers::fetch_records;
use crate::normalize::{PolygonRecord, extract_points, extract_polygons};
use crate::projection::LocalProjection;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Label of the modelled incident layer.
pub const INCIDENT_LABEL: &str = "Battery_Domestic";

/// Knobs for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Cap on rows fetched from each Socrata layer.
    pub limit: Option<u64>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            limit: None,
        }
    }
}

/// A census tract with its population counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Tract {
    /// Projected tract polygon.
    pub polygon: MultiPolygon<f64>,
    /// Total population.
    pub total: f64,
    /// White population.
    pub white: f64,
}

impl Tract {
    /// White share of the population, or `None` for unpopulated tracts.
    #[must_use]
    pub fn white_share(&self) -> Option<f64> {
        (self.total > 0.0).then(|| self.white / self.total)
    }
}

/// Every projected layer of one study area.
#[derive(Debug, Clone)]
pub struct StudyData {
    /// Source identifier.
    pub source_id: String,
    /// Planar unit of every coordinate.
    pub units: DistanceUnit,
    /// Study-area outline.
    pub boundary: MultiPolygon<f64>,
    /// Modelled incidents.
    pub incidents: PointLayer,
    /// Later-period incidents for evaluation.
    pub holdout_incidents: Option<PointLayer>,
    /// Risk factor layers.
    pub risk_factors: BTreeMap<RiskFactor, PointLayer>,
    /// Neighborhood polygons.
    pub neighborhoods: Vec<NamedRegion>,
    /// Police district polygons.
    pub police_districts: Vec<NamedRegion>,
    /// Census tracts.
    pub tracts: Vec<Tract>,
}

/// Fetches, normalizes, and projects every layer of `source`.
///
/// Layers are fetched one after another so a slow portal never has more
/// than one request in flight.
///
/// # Errors
///
/// Returns [`IngestError`] if a fetch fails, a polygon layer lacks its
/// name field, or a required layer ends up empty.
pub async fn load_study_data(
    source: &StudySource,
    options: &IngestOptions,
) -> Result<StudyData, IngestError> {
    let client = reqwest::Client::builder()
        .timeout(options.timeout)
        .build()?;
    let projection = LocalProjection::new(&source.projection);
    let loader = Loader {
        client: &client,
        projection,
        limit: options.limit,
    };

    log::info!("Loading study area {} ({})", source.name, source.id);

    let boundary_records = loader.polygons("boundary", &source.boundary).await?;
    let boundary = MultiPolygon(
        boundary_records
            .into_iter()
            .flat_map(|record| record.polygon.0)
            .collect(),
    );

    let incidents = loader.points(INCIDENT_LABEL, &source.incidents).await?;

    let holdout_incidents = match &source.holdout_incidents {
        Some(layer) => Some(loader.points(INCIDENT_LABEL, layer).await?),
        None => None,
    };

    let mut risk_factors = BTreeMap::new();
    for factor_source in &source.risk_factors {
        let label = factor_source.factor.to_string();
        let layer = loader.points(&label, &factor_source.layer).await?;
        risk_factors.insert(factor_source.factor, layer);
    }

    let neighborhoods = loader.regions("neighborhoods", &source.neighborhoods).await?;

    let police_districts = match &source.police_districts {
        Some(layer) => loader.regions("police_districts", layer).await?,
        None => Vec::new(),
    };

    // Unloadable tracts leave the study without demographic context.
    let tracts = match &source.tracts {
        Some(tract_source) => match loader.polygons("tracts", &tract_source.layer).await {
            Ok(records) => records
                .into_iter()
                .filter_map(|record| {
                    Some(Tract {
                        total: record.number(&tract_source.total_field)?,
                        white: record.number(&tract_source.white_field)?,
                        polygon: record.polygon,
                    })
                })
                .collect(),
            Err(e) => {
                log::warn!("Skipping tract demographics: {e}");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    log::info!(
        "Loaded {}: {} incidents, {} risk factor layers, {} neighborhoods, {} police districts, {} tracts",
        source.id,
        incidents.len(),
        risk_factors.len(),
        neighborhoods.len(),
        police_districts.len(),
        tracts.len()
    );

    Ok(StudyData {
        source_id: source.id.clone(),
        units: projection.units(),
        boundary,
        incidents,
        holdout_incidents,
        risk_factors,
        neighborhoods,
        police_districts,
        tracts,
    })
}

struct Loader<'a> {
    client: &'a reqwest::Client,
    projection: LocalProjection,
    limit: Option<u64>,
}

impl Loader<'_> {
    async fn points(&self, label: &str, layer: &LayerSource) -> Result<PointLayer, IngestError> {
        log::info!("Fetching {label} from {}", layer.fetcher.describe());
        let records = fetch_records(self.client, &layer.fetcher, self.limit).await?;
        let (points, skipped) = extract_points(&records, &layer.geometry);
        if skipped > 0 {
            log::warn!(
                "{label}: skipped {skipped} of {} records without coordinates",
                records.len()
            );
        }
        if points.is_empty() {
            return Err(IngestError::EmptyLayer {
                layer: label.to_string(),
            });
        }

        Ok(PointLayer::new(
            label,
            points.into_iter().map(|p| self.projection.point(p)).collect(),
        ))
    }

    async fn polygons(
        &self,
        label: &str,
        layer: &LayerSource,
    ) -> Result<Vec<PolygonRecord>, IngestError> {
        log::info!("Fetching {label} from {}", layer.fetcher.describe());
        let records = fetch_records(self.client, &layer.fetcher, self.limit).await?;
        let polygons = extract_polygons(&records, &layer.geometry)?;
        if polygons.is_empty() {
            return Err(IngestError::EmptyLayer {
                layer: label.to_string(),
            });
        }

        Ok(polygons
            .into_iter()
            .map(|record| PolygonRecord {
                polygon: self.projection.multi_polygon(&record.polygon),
                properties: record.properties,
            })
            .collect())
    }

    async fn regions(
        &self,
        label: &str,
        layer: &LayerSource,
    ) -> Result<Vec<NamedRegion>, IngestError> {
        let Some(name_field) = layer.name_field.as_deref() else {
            return Err(IngestError::Conversion {
                message: format!("{label} layer has no name_field"),
            });
        };

        let records = self.polygons(label, layer).await?;
        let total = records.len();
        let regions = named_regions(records, name_field);
        if regions.len() < total {
            log::warn!(
                "{label}: {} of {total} polygons have no {name_field}",
                total - regions.len()
            );
        }
        Ok(regions)
    }
}

/// Pairs each polygon with the value of `name_field`, dropping unnamed ones.
#[must_use]
pub fn named_regions(records: Vec<PolygonRecord>, name_field: &str) -> Vec<NamedRegion> {
    records
        .into_iter()
        .filter_map(|record| {
            Some(NamedRegion {
                name: record.text(name_field)?,
                polygon: record.polygon,
            })
        })
        .collect()
}
