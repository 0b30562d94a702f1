// src/process/aggregate.rs
use super::raw_table::Table;
use super::utils::{clean_value, parse_decimal, sanitize_key};
use crate::config::NonCyclePolicy;
use crate::schema::columns::{is_energy_term, ColumnRoles};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Numeric daily fixed term. Kept apart from `termo_fixo_eur_dia`, which holds the cell as published.
pub const FIXED_TERM_VALUE_KEY: &str = "termo_fixo_eur_dia_valor";

/// One published commercial offer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferRecord {
    /// Offer code, also the record's stable identifier.
    pub code: String,
    pub name: String,
    pub seller: Option<String>,
    /// Daily fixed term in €/day, when present and numeric.
    pub fixed_term_eur_day: Option<f64>,
    /// Sanitized column key → cleaned value.
    pub attributes: BTreeMap<String, Value>,
    pub refreshed_at: DateTime<Utc>,
}

/// Folds the merged table into one record per offer code.
///
/// The first row of an offer seeds the record. Every row, first included, adds its energy
/// price columns under a key suffixed with its billing cycle, so per-cycle prices sit side by
/// side instead of overwriting each other. What later rows do with the other columns is
/// decided by `policy`. Rows without an offer code are skipped.
#[instrument(level = "info", skip(table, roles), fields(rows = table.num_rows()))]
pub fn aggregate_offers(
    table: &Table,
    roles: &ColumnRoles,
    policy: NonCyclePolicy,
    refreshed_at: DateTime<Utc>,
) -> BTreeMap<String, OfferRecord> {
    let mut offers: BTreeMap<String, OfferRecord> = BTreeMap::new();
    let mut sightings: BTreeMap<String, usize> = BTreeMap::new();
    let keys: Vec<String> = table.headers.iter().map(|h| sanitize_key(h)).collect();
    let energy_cols: Vec<usize> = (0..table.num_columns())
        .filter(|&i| is_energy_term(&table.headers[i]))
        .collect();
    let mut skipped = 0usize;

    for (row, cells) in table.rows.iter().enumerate() {
        let Some(code) = table.cell(row, roles.code).map(str::trim).filter(|c| !c.is_empty()) else {
            skipped += 1;
            continue;
        };
        let seen = sightings.entry(code.to_string()).or_insert(0);
        *seen += 1;
        let cycle = roles
            .cycle
            .and_then(|c| table.cell(row, c))
            .map(sanitize_key)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("ciclo_{}", seen));

        let record = offers
            .entry(code.to_string())
            .or_insert_with(|| new_record(table, row, code, roles, &keys, refreshed_at));

        if *seen > 1 {
            debug!(code, cycle = %cycle, "merging repeated offer row");
            if policy == NonCyclePolicy::FillAbsent {
                for (i, key) in keys.iter().enumerate() {
                    if energy_cols.contains(&i) {
                        continue;
                    }
                    let value = clean_value(cells.get(i).and_then(|c| c.as_deref()));
                    if let Some(slot) = record.attributes.get_mut(key) {
                        if slot.is_null() && !value.is_null() {
                            *slot = value;
                        }
                    }
                }
            }
        }

        for &i in &energy_cols {
            let mut key = format!("{}_{}", keys[i], cycle);
            let mut n = 2;
            while record.attributes.contains_key(&key) {
                key = format!("{}_{}_{}", keys[i], cycle, n);
                n += 1;
            }
            let value = clean_value(cells.get(i).and_then(|c| c.as_deref()));
            record.attributes.insert(key, value);
        }
    }

    if skipped > 0 {
        warn!(skipped, "rows without an offer code were skipped");
    }
    info!(offers = offers.len(), rows = table.num_rows(), "aggregated offers");
    offers
}

fn new_record(
    table: &Table,
    row: usize,
    code: &str,
    roles: &ColumnRoles,
    keys: &[String],
    refreshed_at: DateTime<Utc>,
) -> OfferRecord {
    let cell = |col: Option<usize>| {
        col.and_then(|c| table.cell(row, c))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let mut attributes: BTreeMap<String, Value> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| (key.clone(), clean_value(table.cell(row, i))))
        .collect();

    let name = cell(roles.name)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Tarifa {}", code));
    let seller = cell(roles.seller).map(str::to_string);
    let fixed_term_eur_day = cell(roles.fixed_term).and_then(parse_decimal);

    attributes.insert("codigo_original".into(), Value::String(code.to_string()));
    attributes.insert(
        "last_refresh_iso".into(),
        Value::String(refreshed_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    attributes.insert(
        FIXED_TERM_VALUE_KEY.into(),
        fixed_term_eur_day.map(Value::from).unwrap_or(Value::Null),
    );
    if let Some(seller) = &seller {
        attributes.insert("comercializador".into(), Value::String(seller.clone()));
    }
    if roles.power_norm.is_some() {
        attributes.insert(
            "potencia_norm".into(),
            cell(roles.power_norm)
                .map(|p| Value::String(p.to_string()))
                .unwrap_or(Value::Null),
        );
    }

    OfferRecord {
        code: code.to_string(),
        name,
        seller,
        fixed_term_eur_day,
        attributes,
        refreshed_at,
    }
}
