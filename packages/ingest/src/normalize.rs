//! Normalizes raw records into geographic (longitude/latitude) geometry.
//!
//! A layer's [`GeometryExtractor`] says where the geometry lives in each
//! record, regardless of the API-specific field naming. Records without
//! usable geometry are skipped and counted.

use crime_risk_ingest_models::GeometryExtractor;
use crime_risk_spatial::parse_geojson_to_multipolygon;
use geo::{MultiPolygon, Point};

use crate::IngestError;

/// A polygon record with the property object it came from.
#[derive(Debug, Clone)]
pub struct PolygonRecord {
    /// Record properties (`properties`, `attributes`, or the row itself).
    pub properties: serde_json::Value,
    /// Geographic geometry.
    pub polygon: MultiPolygon<f64>,
}

impl PolygonRecord {
    /// Returns the trimmed, non-empty string (or number) value of `field`.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<String> {
        match self.properties.get(field)? {
            serde_json::Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Returns the numeric value of `field`, accepting numeric strings.
    #[must_use]
    pub fn number(&self, field: &str) -> Option<f64> {
        self.properties.get(field).and_then(as_f64)
    }
}

/// Extracts one point per record. Returns the points and the number of
/// records skipped.
#[must_use]
pub fn extract_points(
    records: &[serde_json::Value],
    extractor: &GeometryExtractor,
) -> (Vec<Point<f64>>, usize) {
    let points: Vec<Point<f64>> = records
        .iter()
        .filter_map(|record| extract_point(record, extractor))
        .filter(|p| valid_lon_lat(p.x(), p.y()))
        .collect();
    let skipped = records.len() - points.len();
    (points, skipped)
}

/// Extracts polygon geometry from every record that has it.
///
/// # Errors
///
/// Returns [`IngestError::Conversion`] if the extractor cannot describe
/// polygons (`lat_lon`).
pub fn extract_polygons(
    records: &[serde_json::Value],
    extractor: &GeometryExtractor,
) -> Result<Vec<PolygonRecord>, IngestError> {
    if matches!(extractor, GeometryExtractor::LatLon { .. }) {
        return Err(IngestError::Conversion {
            message: "lat_lon geometry cannot describe polygons".to_string(),
        });
    }

    let polygons: Vec<PolygonRecord> = records
        .iter()
        .filter_map(|record| {
            let polygon = match extractor {
                GeometryExtractor::Geojson => {
                    parse_geojson_to_multipolygon(record.get("geometry")?)?
                }
                GeometryExtractor::EsriRings => {
                    parse_geojson_to_multipolygon(&esri_to_geojson(record.get("geometry")?)?)?
                }
                GeometryExtractor::LatLon { .. } => return None,
            };
            Some(PolygonRecord {
                properties: properties(record, extractor).clone(),
                polygon,
            })
        })
        .collect();

    let skipped = records.len() - polygons.len();
    if skipped > 0 {
        log::warn!("Skipped {skipped} records without polygon geometry");
    }

    Ok(polygons)
}

fn extract_point(record: &serde_json::Value, extractor: &GeometryExtractor) -> Option<Point<f64>> {
    match extractor {
        GeometryExtractor::Geojson => {
            let geometry = record.get("geometry").filter(|g| !g.is_null())?;
            let geometry = geojson::Geometry::from_json_value(geometry.clone()).ok()?;
            match geo::Geometry::<f64>::try_from(geometry).ok()? {
                geo::Geometry::Point(point) => Some(point),
                geo::Geometry::MultiPoint(points) => points.0.first().copied(),
                _ => None,
            }
        }
        GeometryExtractor::LatLon {
            lat_field,
            lon_field,
        } => {
            let lat = record.get(lat_field).and_then(as_f64)?;
            let lon = record.get(lon_field).and_then(as_f64)?;
            Some(Point::new(lon, lat))
        }
        GeometryExtractor::EsriRings => {
            let geometry = record.get("geometry")?;
            let x = geometry.get("x").and_then(as_f64)?;
            let y = geometry.get("y").and_then(as_f64)?;
            Some(Point::new(x, y))
        }
    }
}

fn properties<'a>(
    record: &'a serde_json::Value,
    extractor: &GeometryExtractor,
) -> &'a serde_json::Value {
    let key = match extractor {
        GeometryExtractor::Geojson => "properties",
        GeometryExtractor::EsriRings => "attributes",
        GeometryExtractor::LatLon { .. } => return record,
    };
    record.get(key).unwrap_or(record)
}

/// Converts Esri JSON geometry (`{ "rings": [...] }`) to a `GeoJSON`
/// Polygon or `MultiPolygon`. Every ring becomes its own polygon.
fn esri_to_geojson(esri_geom: &serde_json::Value) -> Option<serde_json::Value> {
    let rings = esri_geom.get("rings")?.as_array()?;

    match rings.as_slice() {
        [] => None,
        [_] => Some(serde_json::json!({
            "type": "Polygon",
            "coordinates": rings,
        })),
        _ => {
            let polygons: Vec<serde_json::Value> =
                rings.iter().map(|ring| serde_json::json!([ring])).collect();
            Some(serde_json::json!({
                "type": "MultiPolygon",
                "coordinates": polygons,
            }))
        }
    }
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Rejects non-finite, out-of-range, and null-island coordinates.
fn valid_lon_lat(lon: f64, lat: f64) -> bool {
    lon.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lon)
        && (-90.0..=90.0).contains(&lat)
        && !(lon == 0.0 && lat == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_lat_lon_rows() {
        let records = vec![
            json!({"latitude": "41.88", "longitude": "-87.63"}),
            json!({"latitude": 41.9, "longitude": -87.7}),
            json!({"latitude": "", "longitude": "-87.7"}),
            json!({"latitude": 0, "longitude": 0}),
            json!({"longitude": -87.7}),
        ];
        let extractor = GeometryExtractor::LatLon {
            lat_field: "latitude".to_string(),
            lon_field: "longitude".to_string(),
        };

        let (points, skipped) = extract_points(&records, &extractor);
        assert_eq!(points.len(), 2);
        assert_eq!(skipped, 3);
        assert!((points[0].x() + 87.63).abs() < 1e-12);
        assert!((points[0].y() - 41.88).abs() < 1e-12);
    }

    #[test]
    fn extracts_geojson_points() {
        let records = vec![
            json!({
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [-87.6, 41.8]},
                "properties": {}
            }),
            json!({"type": "Feature", "geometry": null, "properties": {}}),
        ];
        let (points, skipped) = extract_points(&records, &GeometryExtractor::Geojson);
        assert_eq!(points, vec![Point::new(-87.6, 41.8)]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn extracts_polygons_with_properties() {
        let records = vec![
            json!({
                "type": "Feature",
                "properties": {"pri_neigh": " Loop ", "dist_num": 1, "total": "120"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]
                }
            }),
            json!({"type": "Feature", "properties": {"pri_neigh": "Nowhere"}, "geometry": null}),
        ];

        let polygons = extract_polygons(&records, &GeometryExtractor::Geojson).unwrap();
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].text("pri_neigh").as_deref(), Some("Loop"));
        assert_eq!(polygons[0].text("dist_num").as_deref(), Some("1"));
        assert_eq!(polygons[0].number("total"), Some(120.0));
        assert_eq!(polygons[0].text("missing"), None);
    }

    #[test]
    fn converts_esri_rings() {
        let records = vec![json!({
            "attributes": {"NAME": "Tract 1"},
            "geometry": {"rings": [
                [[0, 0], [1, 0], [1, 1], [0, 0]],
                [[5, 5], [6, 5], [6, 6], [5, 5]]
            ]}
        })];

        let polygons = extract_polygons(&records, &GeometryExtractor::EsriRings).unwrap();
        assert_eq!(polygons[0].polygon.0.len(), 2);
        assert_eq!(polygons[0].text("NAME").as_deref(), Some("Tract 1"));
    }

    #[test]
    fn lat_lon_cannot_describe_polygons() {
        let extractor = GeometryExtractor::LatLon {
            lat_field: "y".to_string(),
            lon_field: "x".to_string(),
        };
        assert!(matches!(
            extract_polygons(&[], &extractor),
            Err(IngestError::Conversion { .. })
        ));
    }
}
