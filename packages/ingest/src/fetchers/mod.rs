//! Fetcher dispatch and implementations for the supported dataset APIs.
//!
//! Every fetcher returns raw records as `serde_json::Value`s: `GeoJSON`
//! features for the geometry APIs, plain row objects for Socrata.

pub mod arcgis;
pub mod file;
pub mod geojson_url;
pub mod socrata;

use crime_risk_ingest_models::FetcherConfig;

use crate::IngestError;

/// Downloads every record of a dataset.
///
/// `limit` caps the number of Socrata rows (useful for smoke runs); the
/// other APIs return whole collections.
///
/// # Errors
///
/// Returns [`IngestError`] if the request, file read, or response parsing
/// fails.
pub async fn fetch_records(
    client: &reqwest::Client,
    fetcher: &FetcherConfig,
    limit: Option<u64>,
) -> Result<Vec<serde_json::Value>, IngestError> {
    match fetcher {
        FetcherConfig::Socrata {
            url,
            where_clause,
            page_size,
            limit: configured,
        } => {
            let cap = match (limit, *configured) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            socrata::fetch(client, url, where_clause.as_deref(), *page_size, cap).await
        }
        FetcherConfig::GeojsonUrl { url } => geojson_url::fetch(client, url).await,
        FetcherConfig::Arcgis {
            url,
            where_clause,
            max_records,
        } => arcgis::fetch(client, url, where_clause.as_deref(), *max_records).await,
        FetcherConfig::File { path } => file::fetch(path).await,
    }
}

/// Pulls the `features` array out of a `GeoJSON` `FeatureCollection`.
///
/// # Errors
///
/// Returns [`IngestError::Conversion`] if there is no `features` array.
pub fn feature_array(
    json: serde_json::Value,
    label: &str,
) -> Result<Vec<serde_json::Value>, IngestError> {
    match json {
        serde_json::Value::Object(mut map) => match map.remove("features") {
            Some(serde_json::Value::Array(features)) => Ok(features),
            _ => Err(IngestError::Conversion {
                message: format!("No features array in {label} response"),
            }),
        },
        _ => Err(IngestError::Conversion {
            message: format!("{label} response is not a JSON object"),
        }),
    }
}
