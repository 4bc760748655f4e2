//! HTTP retry helpers for transient errors.
//!
//! Every fetcher sends requests through [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly, so timeouts, connection
//! resets, server errors, and rate limiting are retried with exponential
//! backoff. The per-request timeout itself is configured on the client.

use std::time::Duration;

use crate::IngestError;

/// Maximum number of retries for transient HTTP errors.
///
/// With exponential backoff (2s, 4s, 8s, 16s) the total wait before giving
/// up is 30 seconds.
const MAX_RETRIES: u32 = 4;

/// Maximum number of full re-fetches when the body cannot be decoded.
const MAX_BODY_RETRIES: u32 = 2;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`], since builders are consumed by
/// `.send()`.
///
/// A body that arrives but does not parse (truncated or garbled) triggers a
/// full re-fetch, up to [`MAX_BODY_RETRIES`] times. HTTP 4xx other than 429
/// is permanent and never retried.
///
/// # Errors
///
/// Returns [`IngestError`] if the request fails after all retries, the
/// server returns a non-retryable status, or the body never parses.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, IngestError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut body_attempt = 0;
    loop {
        let response = send_inner(&build_request, MAX_RETRIES).await?;
        let url = response.url().to_string();
        let status = response.status();
        let text = response.text().await?;

        match serde_json::from_str(&text) {
            Ok(value) => return Ok(value),
            Err(e) if body_attempt < MAX_BODY_RETRIES => {
                body_attempt += 1;
                let delay = Duration::from_secs(1u64 << body_attempt);
                log::warn!(
                    "JSON parse failed (body retry {body_attempt}/{MAX_BODY_RETRIES}), \
                     re-fetching in {delay:?}\n  url: {url}\n  status: {status}\n  \
                     received: {} bytes\n  error: {e}\n  body preview: {}",
                    text.len(),
                    preview(&text),
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                log::error!(
                    "JSON parse failed after {MAX_BODY_RETRIES} retries: {url} ({} bytes)",
                    text.len()
                );
                return Err(IngestError::Json(e));
            }
        }
    }
}

/// Sends the request built by `build_request`, retrying transient failures
/// up to `max_retries` times. Returns the first 2xx/3xx response.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, IngestError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) if is_transient(&e) && attempt < max_retries => {
                log::warn!("  transient error: {e}");
            }
            Err(e) => return Err(IngestError::Http(e)),
            Ok(response) => {
                let status = response.status();
                let retryable =
                    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

                if retryable && attempt < max_retries {
                    log::warn!("  HTTP {status}");
                } else if retryable || status.is_client_error() {
                    return Err(IngestError::Conversion {
                        message: format!("HTTP {status} from {}", response.url()),
                    });
                } else {
                    return Ok(response);
                }
            }
        }

        attempt += 1;
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

fn preview(text: &str) -> &str {
    if text.len() <= BODY_PREVIEW_LEN {
        return text;
    }
    let mut end = BODY_PREVIEW_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
