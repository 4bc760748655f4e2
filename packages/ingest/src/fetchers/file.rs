//! Local file fetcher.
//!
//! Reads either a `GeoJSON` `FeatureCollection` or a JSON array of row
//! objects (for example a saved Socrata export).

use crate::IngestError;

use super::feature_array;

/// Reads all records from a local JSON file.
///
/// # Errors
///
/// Returns [`IngestError`] if the file cannot be read or holds neither a
/// `FeatureCollection` nor an array.
pub async fn fetch(path: &str) -> Result<Vec<serde_json::Value>, IngestError> {
    log::info!("Reading {path}");
    let text = tokio::fs::read_to_string(path).await?;
    records_from_str(&text, path)
}

/// Parses file contents into records.
///
/// # Errors
///
/// Returns [`IngestError`] for invalid JSON or an unsupported top-level
/// shape.
pub fn records_from_str(text: &str, label: &str) -> Result<Vec<serde_json::Value>, IngestError> {
    match serde_json::from_str(text)? {
        serde_json::Value::Array(rows) => Ok(rows),
        json @ serde_json::Value::Object(_) => feature_array(json, label),
        _ => Err(IngestError::Conversion {
            message: format!("{label} holds neither a FeatureCollection nor an array"),
        }),
    }
}
