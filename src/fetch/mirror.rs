// src/fetch/mirror.rs
use super::{decode_text, get_text_with_retry, RawDocument, CONDITIONS, PRICES};
use crate::config::MirrorSettings;
use crate::errors::TariffResult;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, instrument};

const MAX_RETRIES: u32 = 2;
const BACKOFF_MS: u64 = 500;

/// Fetches both documents straight from their mirror URLs, as one parallel pair.
#[instrument(level = "info", skip_all, fields(conditions = %settings.conditions_url, prices = %settings.prices_url))]
pub async fn fetch_documents(
    client: &Client,
    settings: &MirrorSettings,
) -> TariffResult<(RawDocument, RawDocument)> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    let (conditions, prices) = tokio::try_join!(
        get_text_with_retry(client, &settings.conditions_url, timeout, MAX_RETRIES, BACKOFF_MS),
        get_text_with_retry(client, &settings.prices_url, timeout, MAX_RETRIES, BACKOFF_MS),
    )?;
    info!(
        conditions_chars = conditions.len(),
        prices_chars = prices.len(),
        "fetched mirror documents"
    );
    Ok((
        RawDocument {
            name: CONDITIONS,
            text: strip_bom(conditions),
        },
        RawDocument {
            name: PRICES,
            text: strip_bom(prices),
        },
    ))
}

fn strip_bom(text: String) -> String {
    if text.starts_with('\u{FEFF}') {
        decode_text(text.as_bytes())
    } else {
        text
    }
}
