//! Direct `GeoJSON` URL fetcher.

use crate::{IngestError, retry};

use super::feature_array;

/// Fetches all features from a URL returning a `GeoJSON`
/// `FeatureCollection`.
///
/// # Errors
///
/// Returns [`IngestError`] if the request fails or the response has no
/// `features` array.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<serde_json::Value>, IngestError> {
    let json = retry::send_json(|| client.get(url)).await?;
    feature_array(json, "GeoJSON")
}
