// src/process/utils.rs
use serde_json::Value;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Cell contents read as "no value".
pub const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// 1) Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// 2) Raw cell → `None` when it is blank or a missing-value marker.
pub fn cell_value(raw: &str) -> Option<String> {
    if MISSING_MARKERS.contains(&raw.trim()) {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Turns a free-form column name into a lowercase, identifier-safe key.
///
/// `"Termo de energia (€/kWh)"` becomes `"termo_de_energia_eur_kwh"`. Total: every
/// input, including the empty string, maps to some key.
pub fn sanitize_key(name: &str) -> String {
    let stripped: String = name.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let mut key = stripped.to_lowercase();

    for (from, to) in [
        ("€", "eur"),
        ("%", "pct"),
        ("/", "_"),
        ("-", "_"),
        ("|", "_"),
        (":", "_"),
    ] {
        key = key.replace(from, to);
    }
    key.retain(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}'));

    let key = key.split_whitespace().collect::<Vec<_>>().join("_");

    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Published form of a cell: missing markers (including NaN) become `null`, anything else
/// passes through untouched.
pub fn clean_value(raw: Option<&str>) -> Value {
    match raw {
        Some(s) if !MISSING_MARKERS.contains(&s.trim()) => Value::String(s.to_string()),
        _ => Value::Null,
    }
}

/// Canonical comparison form of a contracted power: comma decimals become dots, trimmed.
pub fn normalize_power(raw: &str) -> String {
    raw.replace(',', ".").trim().to_string()
}

/// Parses a locale formatted decimal such as `"0,1234"`. Unparseable or non-finite → `None`.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().replace(',', ".").parse().ok()?;
    v.is_finite().then_some(v)
}
