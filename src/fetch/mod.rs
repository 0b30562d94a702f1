// src/fetch/mod.rs
pub mod mirror;
pub mod urls;
pub mod zips;

use crate::errors::{TariffError, TariffResult};
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Logical name of the commercial conditions document.
pub const CONDITIONS: &str = "conditions";
/// Logical name of the per-offer price document.
pub const PRICES: &str = "prices";

/// A downloaded document before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// `"conditions"` or `"prices"`.
    pub name: &'static str,
    pub text: String,
}

/// Builds the shared HTTP client. Timeouts are set per request.
pub fn build_client() -> TariffResult<Client> {
    Client::builder()
        .cookie_store(true)
        .gzip(true)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TariffError::Config(format!("failed to build HTTP client: {}", e)))
}

pub(crate) async fn get_text(client: &Client, url: &str, timeout: Duration) -> TariffResult<String> {
    debug!("Fetching text from {}", url);
    client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| TariffError::http(url, e))?
        .text()
        .await
        .map_err(|e| TariffError::http(url, e))
}

pub(crate) async fn get_bytes(client: &Client, url: &str, timeout: Duration) -> TariffResult<Vec<u8>> {
    debug!("Fetching bytes from {}", url);
    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| TariffError::http(url, e))?;
    let bytes = resp.bytes().await.map_err(|e| TariffError::http(url, e))?;
    debug!(url, size = bytes.len(), "downloaded");
    Ok(bytes.to_vec())
}

pub(crate) async fn get_text_with_retry(
    client: &Client,
    url: &str,
    timeout: Duration,
    max_retries: u32,
    initial_backoff_ms: u64,
) -> TariffResult<String> {
    let mut attempts = 0;
    loop {
        match get_text(client, url, timeout).await {
            Ok(t) => return Ok(t),
            Err(e) if attempts < max_retries => {
                attempts += 1;
                let backoff = initial_backoff_ms * 2u64.pow(attempts - 1);
                warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "Retrying");
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                error!(%url, error = %e, "Exhausted retries");
                return Err(e);
            }
        }
    }
}

/// Decodes UTF-8, dropping a leading byte-order mark. Invalid sequences are replaced.
pub fn decode_text(bytes: &[u8]) -> String {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(body).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_dropped() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFCOM;COD"), "COM;COD");
        assert_eq!(decode_text("Potência".as_bytes()), "Potência");
    }
}
