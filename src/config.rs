// src/config.rs
use crate::errors::{TariffError, TariffResult};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fs, path::Path, time::Duration};
use tracing::{info, warn};

/// Landing page of the regulator's price simulator.
pub const DEFAULT_LANDING_URL: &str = "https://simuladorprecos.erse.pt";
/// Directory the simulator publishes its CSV bundles under.
pub const DEFAULT_CSV_BASE_URL: &str = "https://simuladorprecos.erse.pt/Admin/csvs";
/// Last bundle known to have been published.
pub const DEFAULT_FALLBACK_URL: &str =
    "https://simuladorprecos.erse.pt/Admin/csvs/20250919%20100313%20CSV.zip";

/// Time-of-day codes the regulator has used in bundle file names.
pub const DEFAULT_TIME_CODES: &[&str] = &[
    "100313", "100000", "110000", "120000", "090000", "100300", "100330", "100315", "100310",
];

/// Contracted power tiers (kVA) the simulator offers.
pub const KNOWN_POWER_TIERS: &[&str] = &["3.45", "4.6", "5.75", "6.9", "10.35"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefix of every published entity id.
    pub installation_id: String,
    pub refresh_interval_hours: u64,
    pub refresh_timeout_secs: u64,
    /// Refresh once and exit instead of scheduling.
    pub run_once: bool,
    /// Where the current snapshot is written after each successful refresh.
    pub output_path: Option<String>,
    pub source: SourceSettings,
    pub filters: FilterSettings,
    pub aggregation: AggregationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            installation_id: "default".to_string(),
            refresh_interval_hours: 24,
            refresh_timeout_secs: 300,
            run_once: false,
            output_path: None,
            source: SourceSettings::default(),
            filters: FilterSettings::default(),
            aggregation: AggregationSettings::default(),
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_hours.max(1) * 3600)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

/// Where the two documents come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSettings {
    /// Discover the published zip bundle and extract both documents from it.
    Bundle(BundleSettings),
    /// Fetch both documents directly as text.
    Mirror(MirrorSettings),
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings::Bundle(BundleSettings::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    pub landing_url: String,
    pub csv_base_url: String,
    pub fallback_url: String,
    pub page_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub lookback_days: u32,
    pub time_codes: Vec<String>,
    pub conditions_member: String,
    pub prices_member: String,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            landing_url: DEFAULT_LANDING_URL.to_string(),
            csv_base_url: DEFAULT_CSV_BASE_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            page_timeout_secs: 30,
            probe_timeout_secs: 5,
            download_timeout_secs: 60,
            lookback_days: 10,
            time_codes: DEFAULT_TIME_CODES.iter().map(|s| s.to_string()).collect(),
            conditions_member: "CondComerciais.csv".to_string(),
            prices_member: "Precos_ELEGN.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSettings {
    pub conditions_url: String,
    pub prices_url: String,
    #[serde(default = "default_mirror_timeout")]
    pub timeout_secs: u64,
}

fn default_mirror_timeout() -> u64 {
    30
}

/// Supply type kept by the energy-type filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyType {
    #[default]
    Ele,
    Gn,
    Dual,
    All,
}

impl EnergyType {
    /// Upper-case prefix a supply type value must start with, `None` keeps everything.
    pub fn prefix(self) -> Option<&'static str> {
        match self {
            EnergyType::Ele => Some("ELE"),
            EnergyType::Gn => Some("GN"),
            EnergyType::Dual => Some("DUAL"),
            EnergyType::All => None,
        }
    }
}

/// Offer codes as either a YAML list or one comma separated string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OfferCodes {
    List(Vec<String>),
    Joined(String),
}

impl OfferCodes {
    pub fn to_set(&self) -> BTreeSet<String> {
        let raw: Vec<&str> = match self {
            OfferCodes::List(items) => items.iter().map(String::as_str).collect(),
            OfferCodes::Joined(s) => s.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub seller: Option<String>,
    pub offer_codes: Option<OfferCodes>,
    pub contracted_power: Option<String>,
    pub energy_type: EnergyType,
}

/// How a repeated offer row treats attributes that are not cycle specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonCyclePolicy {
    /// Only the first row of an offer contributes non-cycle attributes.
    #[default]
    FirstSeen,
    /// Later rows fill non-cycle attributes the first row left absent.
    FillAbsent,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub non_cycle_policy: NonCyclePolicy,
}

/// Loads settings from a YAML file, every missing field falls back to its default.
pub fn load_settings(path: impl AsRef<Path>) -> TariffResult<Settings> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| TariffError::Config(format!("reading {}: {}", path.display(), e)))?;
    let settings = parse_settings(&text)?;
    info!(path = %path.display(), "loaded settings");
    Ok(settings)
}

pub fn parse_settings(text: &str) -> TariffResult<Settings> {
    if text.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings: Settings =
        serde_yaml::from_str(text).map_err(|e| TariffError::Config(e.to_string()))?;

    if let Some(power) = settings.filters.contracted_power.as_deref() {
        let norm = crate::process::utils::normalize_power(power);
        if !norm.is_empty() && !KNOWN_POWER_TIERS.contains(&norm.as_str()) {
            warn!(power = %norm, tiers = ?KNOWN_POWER_TIERS, "contracted power is not a published tier");
        }
    }
    Ok(settings)
}
