// src/process/mod.rs
pub mod aggregate;
pub mod raw_table;
pub mod reconcile;
pub mod utils;

pub use aggregate::{aggregate_offers, OfferRecord};
pub use raw_table::Table;
pub use reconcile::{reconcile, Filters};

use crate::errors::TariffError;
use csv::ReaderBuilder;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Delimiters tried in order; the first that yields more than one column wins.
const DELIMITERS: &[u8] = b";,";

/// Parses a delimited text document into a [`Table`] of raw string cells.
///
/// Tries `;` first and falls back to `,`. A document that yields at most one column with
/// either delimiter, or that cannot be read as CSV at all, becomes an empty table.
#[tracing::instrument(level = "info", skip(text), fields(bytes = text.len()))]
pub fn parse_table(text: &str, label: &str) -> Table {
    for &delimiter in DELIMITERS {
        match parse_with_delimiter(text, label, delimiter) {
            Ok(table) if table.num_columns() > 1 => {
                debug!(
                    delimiter = %(delimiter as char),
                    columns = table.num_columns(),
                    rows = table.num_rows(),
                    "parsed document"
                );
                return table;
            }
            Ok(_) => {
                debug!(delimiter = %(delimiter as char), "at most one column, trying next delimiter");
            }
            Err(e) => {
                warn!(error = %e, "giving up on document");
                return Table::default();
            }
        }
    }
    warn!("no delimiter produced more than one column; using empty table");
    Table::default()
}

fn parse_with_delimiter(text: &str, label: &str, delimiter: u8) -> Result<Table, TariffError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let parse_failure = |e: csv::Error| TariffError::ParseFailure {
        document: label.to_string(),
        reason: e.to_string(),
    };

    let raw_headers: Vec<String> = rdr
        .headers()
        .map_err(parse_failure)?
        .iter()
        .map(utils::clean_str)
        .collect();
    let headers = dedupe_headers(raw_headers);
    let width = headers.len();

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| TariffError::ParseFailure {
            document: label.to_string(),
            reason: format!("record {}: {}", idx, e),
        })?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let mut row: Vec<Option<String>> = record.iter().take(width).map(utils::cell_value).collect();
        row.resize(width, None);
        rows.push(row);
    }

    Ok(Table::new(headers, rows))
}

/// Repeated header names get a `.1`, `.2`, ... suffix so every column stays addressable.
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .into_iter()
        .map(|h| {
            let count = seen.entry(h.clone()).or_insert(0);
            let name = if *count == 0 {
                h.clone()
            } else {
                format!("{}.{}", h, count)
            };
            *count += 1;
            name
        })
        .collect()
}
