// src/process/reconcile.rs
use super::raw_table::Table;
use super::utils::normalize_power;
use crate::config::{EnergyType, FilterSettings};
use crate::schema::columns::{
    resolve, resolve_index, CODE_COLUMNS, NORM_SUFFIX, POWER_COLUMNS, POWER_FILTER_COLUMNS,
    SELLER_COLUMNS, SUPPLY_TYPE_COLUMNS,
};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

/// Suffix given to a price column whose name is already taken by a conditions column.
pub const PRICE_SUFFIX: &str = "_preco";

/// Row filters applied after the join. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub offer_codes: BTreeSet<String>,
    pub seller: Option<String>,
    pub contracted_power: Option<String>,
    pub energy_type: EnergyType,
}

impl Filters {
    pub fn from_settings(settings: &FilterSettings) -> Self {
        Self {
            offer_codes: settings
                .offer_codes
                .as_ref()
                .map(|c| c.to_set())
                .unwrap_or_default(),
            seller: settings
                .seller
                .clone()
                .filter(|s| !s.trim().is_empty()),
            contracted_power: settings
                .contracted_power
                .clone()
                .filter(|s| !s.trim().is_empty()),
            energy_type: settings.energy_type,
        }
    }
}

/// Joins conditions to prices and applies `filters`, producing one merged table.
///
/// No step is fatal: a step whose columns are missing is skipped, and the energy-type and
/// power filters are undone when they would leave no rows.
#[instrument(level = "info", skip_all, fields(conditions = conditions.num_rows(), prices = prices.num_rows()))]
pub fn reconcile(conditions: &Table, prices: &Table, filters: &Filters) -> Table {
    let merged = join(conditions, prices);
    let merged = add_normalized_power(&merged);
    let merged = filter_energy_type(&merged, filters.energy_type);
    let merged = filter_offer_codes(&merged, &filters.offer_codes);
    let merged = filter_seller(&merged, filters.seller.as_deref());
    let merged = filter_power(&merged, filters.contracted_power.as_deref());
    info!(rows = merged.num_rows(), columns = merged.num_columns(), "reconciled");
    merged
}

/// Left join on the best code column of each side.
///
/// Conditions rows without a price keep absent price cells; a conditions row with several
/// prices (one per billing cycle or power tier) appears once per price row. Prices without
/// conditions are dropped.
pub fn join(conditions: &Table, prices: &Table) -> Table {
    if prices.is_empty() {
        warn!("price table is empty; skipping join");
        return conditions.clone();
    }
    let (left_key, right_key) = match (resolve(conditions, CODE_COLUMNS), resolve(prices, CODE_COLUMNS)) {
        (Some(l), Some(r)) => (l, r),
        (l, r) => {
            warn!(conditions_key = ?l, prices_key = ?r, "no shared code column; skipping join");
            return conditions.clone();
        }
    };
    let (Some(left_idx), Some(right_idx)) =
        (conditions.column_index(left_key), prices.column_index(right_key))
    else {
        return conditions.clone();
    };

    // price columns carried over, with their output names
    let mut headers = conditions.headers.clone();
    let mut carried = Vec::with_capacity(prices.num_columns());
    for (i, name) in prices.headers.iter().enumerate() {
        if i == right_idx && left_key == right_key {
            continue;
        }
        let mut out = name.clone();
        while headers.contains(&out) {
            out.push_str(PRICE_SUFFIX);
        }
        headers.push(out);
        carried.push(i);
    }

    let mut by_code: HashMap<&str, Vec<usize>> = HashMap::new();
    for (row, code) in prices.column_values(right_idx).enumerate() {
        if let Some(code) = code {
            by_code.entry(code).or_default().push(row);
        }
    }

    let left_width = conditions.num_columns();
    let mut rows = Vec::with_capacity(conditions.num_rows());
    let mut unmatched = 0usize;
    for left in &conditions.rows {
        let matches = left
            .get(left_idx)
            .and_then(|c| c.as_deref())
            .and_then(|code| by_code.get(code));
        match matches {
            Some(price_rows) => {
                for &p in price_rows {
                    let mut row = left.clone();
                    row.resize(left_width, None);
                    row.extend(carried.iter().map(|&c| prices.rows[p].get(c).cloned().flatten()));
                    rows.push(row);
                }
            }
            None => {
                unmatched += 1;
                let mut row = left.clone();
                row.resize(headers.len(), None);
                rows.push(row);
            }
        }
    }

    debug!(left_key, right_key, rows = rows.len(), unmatched, "joined conditions and prices");
    Table::new(headers, rows)
}

/// Adds a `__norm` sibling to every contracted power column.
pub fn add_normalized_power(table: &Table) -> Table {
    let mut out = table.clone();
    for &col in POWER_COLUMNS {
        let norm_name = format!("{}{}", col, NORM_SUFFIX);
        let Some(idx) = table.column_index(col) else {
            continue;
        };
        if out.has_column(&norm_name) {
            continue;
        }
        out = out.with_column(norm_name, |r| {
            r.get(idx)
                .and_then(|c| c.as_deref())
                .map(normalize_power)
                .filter(|v| !v.is_empty())
        });
    }
    out
}

pub fn filter_energy_type(table: &Table, energy_type: EnergyType) -> Table {
    let Some(prefix) = energy_type.prefix() else {
        return table.clone();
    };
    let Some(col) = resolve_index(table, SUPPLY_TYPE_COLUMNS) else {
        debug!("no supply type column; energy filter skipped");
        return table.clone();
    };
    let filtered = table.filter_rows(|r| {
        row_cell(r, col)
            .map(|v| v.trim().to_uppercase().starts_with(prefix))
            .unwrap_or(false)
    });
    keep_unless_empty(table, filtered, "energy type")
}

pub fn filter_offer_codes(table: &Table, codes: &BTreeSet<String>) -> Table {
    if codes.is_empty() {
        return table.clone();
    }
    let Some(col) = resolve_index(table, CODE_COLUMNS) else {
        warn!("no offer code column; offer code filter skipped");
        return table.clone();
    };
    let filtered = table.filter_rows(|r| {
        row_cell(r, col)
            .map(|v| codes.contains(v.trim()))
            .unwrap_or(false)
    });
    debug!(before = table.num_rows(), after = filtered.num_rows(), "offer code filter");
    filtered
}

pub fn filter_seller(table: &Table, seller: Option<&str>) -> Table {
    let Some(seller) = seller else {
        return table.clone();
    };
    let Some(col) = resolve_index(table, SELLER_COLUMNS) else {
        warn!(seller, "no seller column; seller filter skipped");
        return table.clone();
    };
    let filtered = table.filter_rows(|r| row_cell(r, col) == Some(seller));
    debug!(seller, before = table.num_rows(), after = filtered.num_rows(), "seller filter");
    filtered
}

pub fn filter_power(table: &Table, power: Option<&str>) -> Table {
    let Some(requested) = power.map(normalize_power).filter(|p| !p.is_empty()) else {
        return table.clone();
    };
    let Some(col) = resolve_index(table, POWER_FILTER_COLUMNS) else {
        warn!(power = %requested, "no contracted power column; power filter skipped");
        return table.clone();
    };
    let filtered = table.filter_rows(|r| {
        row_cell(r, col)
            .map(|v| normalize_power(v) == requested)
            .unwrap_or(false)
    });
    keep_unless_empty(table, filtered, "contracted power")
}

/// Rows may be shorter than the headers; missing trailing cells read as absent.
fn row_cell(row: &[Option<String>], col: usize) -> Option<&str> {
    row.get(col).and_then(|c| c.as_deref())
}

fn keep_unless_empty(before: &Table, after: Table, filter: &str) -> Table {
    if after.is_empty() {
        warn!(filter, rows = before.num_rows(), "filter removed every row; keeping unfiltered table");
        before.clone()
    } else {
        debug!(filter, before = before.num_rows(), after = after.num_rows(), "filter applied");
        after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| {
                    r.iter()
                        .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
                        .collect()
                })
                .collect(),
        )
    }

    fn conditions() -> Table {
        t(
            &["Comercializador", "Código da oferta comercial", "Tipo de fornecimento"],
            &[
                &["G9", "ABC1", "ELE"],
                &["EDP", "XYZ9", "ELE"],
                &["GALP", "GAS1", "GN"],
            ],
        )
    }

    fn prices() -> Table {
        t(
            &["Comercializador", "Código da oferta comercial", "Potência contratada", "Termo fixo (€/dia)"],
            &[
                &["G9", "ABC1", "6,9", "0,30"],
                &["EDP", "XYZ9", "3,45", "0,20"],
                &["ORPHAN", "NOPE", "6,9", "0,10"],
            ],
        )
    }

    #[test]
    fn join_keeps_every_condition_row_once() {
        let merged = join(&conditions(), &prices());
        assert_eq!(merged.num_rows(), 3);
        assert_eq!(
            merged.headers,
            vec![
                "Comercializador",
                "Código da oferta comercial",
                "Tipo de fornecimento",
                "Comercializador_preco",
                "Potência contratada",
                "Termo fixo (€/dia)"
            ]
        );
        let code = merged.column_index("Código da oferta comercial").unwrap();
        for (i, cond) in conditions().rows.iter().enumerate() {
            let matching: Vec<_> = merged
                .rows
                .iter()
                .filter(|r| r[code] == cond[1])
                .collect();
            assert_eq!(matching.len(), 1);
            assert_eq!(&matching[0][..3], &cond[..], "row {i}");
        }
        // GAS1 has no price
        assert_eq!(merged.cell(2, 4), None);
        assert!(!merged.rows.iter().any(|r| r[code].as_deref() == Some("NOPE")));
    }

    #[test]
    fn join_repeats_condition_per_price_row() {
        let prices = t(
            &["COD_Proposta", "Ciclo de contagem"],
            &[&["ABC1", "Simples"], &["ABC1", "Bi-horária"]],
        );
        let merged = join(&conditions(), &prices);
        assert_eq!(merged.num_rows(), 4);
        assert!(merged.has_column("COD_Proposta"));
        assert_eq!(merged.cell(0, 4), Some("Simples"));
        assert_eq!(merged.cell(1, 4), Some("Bi-horária"));
        assert_eq!(merged.cell(2, 1), Some("XYZ9"));
        assert_eq!(merged.cell(2, 4), None);
    }

    #[test]
    fn join_skipped_without_prices_or_codes() {
        assert_eq!(join(&conditions(), &Table::default()), conditions());
        let no_code = t(&["Foo", "Bar"], &[&["1", "2"]]);
        assert_eq!(join(&conditions(), &no_code), conditions());
    }

    fn short_row_conditions() -> Table {
        Table::new(
            vec![
                "Comercializador".into(),
                "Código da oferta comercial".into(),
                "Tipo de fornecimento".into(),
            ],
            vec![
                vec![Some("G9".into()), Some("ABC1".into()), Some("ELE".into())],
                vec![Some("EDP".into()), Some("XYZ9".into())],
            ],
        )
    }

    #[test]
    fn short_rows_are_padded_before_price_columns() {
        let prices = t(&["COD_Proposta", "Potência contratada"], &[&["XYZ9", "3,45"]]);
        let merged = join(&short_row_conditions(), &prices);
        let supply = merged.column_index("Tipo de fornecimento").unwrap();
        let power = merged.column_index("Potência contratada").unwrap();

        assert_eq!(merged.rows[1].len(), merged.num_columns());
        assert_eq!(merged.cell(1, supply), None);
        assert_eq!(merged.cell(1, power), Some("3,45"));
    }

    #[test]
    fn filters_read_short_rows_as_absent() {
        let conditions = short_row_conditions();
        let out = reconcile(&conditions, &Table::default(), &Filters::default());
        // XYZ9 has no supply type, so only ABC1 passes the electricity filter
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.cell(0, 1), Some("ABC1"));

        let short = Table::new(
            vec!["Comercializador".into(), "Código da oferta comercial".into(), "Pot_Cont".into()],
            vec![vec![Some("EDP".into())], vec![Some("G9".into()), Some("ABC1".into()), Some("6,9".into())]],
        );
        let codes = BTreeSet::from(["ABC1".to_string()]);
        assert_eq!(filter_offer_codes(&short, &codes).num_rows(), 1);
        assert_eq!(filter_seller(&short, Some("G9")).num_rows(), 1);
        assert_eq!(filter_power(&short, Some("6.9")).num_rows(), 1);
    }

    #[test]
    fn gas_only_table_survives_electricity_filter() {
        let gas = t(
            &["Código da oferta comercial", "Tipo de fornecimento"],
            &[&["GAS1", "GN"], &["GAS2", " gn "]],
        );
        let out = reconcile(&gas, &Table::default(), &Filters::default());
        assert_eq!(out, gas);
    }

    #[test]
    fn electricity_filter_matches_prefix() {
        let mut cond = conditions();
        cond.rows.push(vec![Some("X".into()), Some("D1".into()), Some(" ele ".into())]);
        let out = filter_energy_type(&cond, EnergyType::Ele);
        assert_eq!(out.num_rows(), 3);
        assert_eq!(filter_energy_type(&cond, EnergyType::All), cond);
        assert_eq!(filter_energy_type(&cond, EnergyType::Gn).num_rows(), 1);
    }

    #[test]
    fn power_is_normalized_and_filtered() {
        let filters = Filters {
            contracted_power: Some("6.9".into()),
            ..Default::default()
        };
        let out = reconcile(&conditions(), &prices(), &filters);
        assert!(out.has_column("Potência contratada__norm"));
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.cell(0, 1), Some("ABC1"));
        // display value untouched
        let raw = out.column_index("Potência contratada").unwrap();
        assert_eq!(out.cell(0, raw), Some("6,9"));
    }

    #[test]
    fn power_filter_reverts_when_nothing_matches() {
        let filters = Filters {
            contracted_power: Some("10,35".into()),
            ..Default::default()
        };
        let out = reconcile(&conditions(), &prices(), &filters);
        assert_eq!(out.num_rows(), 2);
    }

    #[test]
    fn offer_codes_and_seller() {
        let filters = Filters {
            offer_codes: ["XYZ9".to_string(), "ABC1".to_string()].into_iter().collect(),
            seller: Some("G9".into()),
            ..Default::default()
        };
        let out = reconcile(&conditions(), &prices(), &filters);
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.cell(0, 1), Some("ABC1"));

        let none = Filters {
            seller: Some("NOBODY".into()),
            ..Default::default()
        };
        assert!(reconcile(&conditions(), &prices(), &none).is_empty());
    }
}
