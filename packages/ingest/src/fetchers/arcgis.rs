//! `ArcGIS` `FeatureServer` / `MapServer` fetcher.
//!
//! Queries with `f=geojson` and pages via `resultOffset` while the server
//! reports `exceededTransferLimit`.

use crate::{IngestError, retry};

use super::feature_array;

/// Fetches all features from an `ArcGIS` query endpoint matching
/// `where_clause` (every feature when `None`).
///
/// # Errors
///
/// Returns [`IngestError`] if a request fails, the service reports an
/// error, or a page has no `features` array.
pub async fn fetch(
    client: &reqwest::Client,
    base_url: &str,
    where_clause: Option<&str>,
    max_records: Option<u32>,
) -> Result<Vec<serde_json::Value>, IngestError> {
    let filter = where_clause.unwrap_or("1=1");
    let record_count = max_records.unwrap_or(1000).to_string();
    let mut all_features = Vec::new();
    let mut offset = 0usize;

    loop {
        let offset_param = offset.to_string();
        let json = retry::send_json(|| {
            client.get(base_url).query(&[
                ("where", filter),
                ("outFields", "*"),
                ("f", "geojson"),
                ("returnGeometry", "true"),
                ("outSR", "4326"),
                ("resultRecordCount", record_count.as_str()),
                ("resultOffset", offset_param.as_str()),
            ])
        })
        .await?;

        if let Some(error) = json.get("error") {
            return Err(IngestError::Conversion {
                message: format!(
                    "ArcGIS API error: {}",
                    error["message"].as_str().unwrap_or("unknown error")
                ),
            });
        }

        let exceeded = json["exceededTransferLimit"].as_bool().unwrap_or(false);
        let features = feature_array(json, "ArcGIS")?;
        if features.is_empty() {
            break;
        }

        offset += features.len();
        all_features.extend(features);
        log::debug!("ArcGIS {base_url}: {offset} features");

        if !exceeded {
            break;
        }
    }

    Ok(all_features)
}
