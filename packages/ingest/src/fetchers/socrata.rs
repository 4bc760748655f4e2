//! Socrata SODA API fetcher.
//!
//! Pages through a dataset's JSON rows with `$limit`, `$offset`, and a
//! stable `$order=:id`, optionally filtered by a SoQL `$where` clause.

use crate::{IngestError, retry};

/// Default rows per page.
const DEFAULT_PAGE_SIZE: u32 = 50_000;

/// Fetches every row matching `where_clause`, up to `limit` rows.
///
/// # Errors
///
/// Returns [`IngestError`] if a request fails or a page is not a JSON
/// array.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    where_clause: Option<&str>,
    page_size: Option<u32>,
    limit: Option<u64>,
) -> Result<Vec<serde_json::Value>, IngestError> {
    let page_size = u64::from(page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1));
    let fetch_limit = limit.unwrap_or(u64::MAX);
    let mut all_records = Vec::new();
    let mut offset = 0u64;

    loop {
        let remaining = fetch_limit.saturating_sub(offset);
        if remaining == 0 {
            break;
        }
        let page_limit = remaining.min(page_size);

        let mut params = vec![
            ("$limit", page_limit.to_string()),
            ("$offset", offset.to_string()),
            ("$order", ":id".to_string()),
        ];
        if let Some(clause) = where_clause {
            params.push(("$where", clause.to_string()));
        }

        log::info!("Fetching {url}: offset={offset}, limit={page_limit}");
        let json = retry::send_json(|| client.get(url).query(&params)).await?;

        let serde_json::Value::Array(records) = json else {
            return Err(IngestError::Conversion {
                message: format!("Socrata response from {url} is not an array"),
            });
        };

        let count = records.len() as u64;
        all_records.extend(records);
        offset += count;

        if count < page_limit {
            break;
        }
    }

    log::info!("Downloaded {} rows from {url}", all_records.len());
    Ok(all_records)
}
