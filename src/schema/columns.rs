// src/schema/columns.rs
use crate::process::Table;

/// Suffix of the derived, comparison-ready contracted power columns.
pub const NORM_SUFFIX: &str = "__norm";

/// Offer code, most specific name first.
pub const CODE_COLUMNS: &[&str] = &["Código da oferta comercial", "COD_Proposta", "CODProposta"];
pub const NAME_COLUMNS: &[&str] = &[
    "Nome da oferta comercial",
    "NomeProposta",
    "Nome Proposta",
    "Nome",
];
pub const SELLER_COLUMNS: &[&str] = &["Comercializador", "COM"];
pub const SUPPLY_TYPE_COLUMNS: &[&str] = &["Tipo de fornecimento", "Fornecimento", "fornecimento"];
pub const CYCLE_COLUMNS: &[&str] = &["Ciclo de contagem", "Contagem", "CicloContagem"];
pub const FIXED_TERM_COLUMNS: &[&str] = &["Termo fixo (€/dia)", "TF"];
/// Raw contracted power columns; each gets a `__norm` sibling during reconciliation.
pub const POWER_COLUMNS: &[&str] = &["Potência contratada", "Pot_Cont"];
/// Power columns in filter preference order: normalized siblings before raw values.
pub const POWER_FILTER_COLUMNS: &[&str] = &[
    "Potência contratada__norm",
    "Pot_Cont__norm",
    "Potência contratada",
    "Pot_Cont",
];

/// Lowercased fragments marking a column as a per-cycle energy price.
pub const ENERGY_TERM_KEYWORDS: &[&str] = &["termo de energia", "€/kwh", "energia ativa"];

/// First name in `candidates` that `table` has a column for.
pub fn resolve<'a>(table: &Table, candidates: &[&'a str]) -> Option<&'a str> {
    candidates.iter().copied().find(|c| table.has_column(c))
}

/// Same as [`resolve`], returning the column position.
pub fn resolve_index(table: &Table, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|c| table.column_index(c))
}

pub fn is_energy_term(column: &str) -> bool {
    let lower = column.to_lowercase();
    ENERGY_TERM_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Columns of one table bound to the roles the aggregator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRoles {
    pub code: usize,
    pub name: Option<usize>,
    pub seller: Option<usize>,
    pub cycle: Option<usize>,
    pub fixed_term: Option<usize>,
    pub power_norm: Option<usize>,
}

impl ColumnRoles {
    /// Binds every role; `None` when the table has no offer code column.
    pub fn resolve(table: &Table) -> Option<Self> {
        Some(Self {
            code: resolve_index(table, CODE_COLUMNS)?,
            name: resolve_index(table, NAME_COLUMNS),
            seller: resolve_index(table, SELLER_COLUMNS),
            cycle: resolve_index(table, CYCLE_COLUMNS),
            fixed_term: resolve_index(table, FIXED_TERM_COLUMNS),
            power_norm: resolve_index(table, &POWER_FILTER_COLUMNS[..2]),
        })
    }
}
