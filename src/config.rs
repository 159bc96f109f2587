//! Configuration
//!
//! Settings are loaded from YAML once per run and passed explicitly to every
//! stage. The `atlas_index` subtree holds the scoring rules; its fingerprint
//! versions every persisted index row.

use crate::error::IndexError;
use crate::scorer::ThresholdCurve;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Floor applied to scores before the log transform
pub const DEFAULT_SCORE_FLOOR: f64 = 1.0;

/// Number of hex characters kept from the configuration hash
pub const FINGERPRINT_LEN: usize = 7;

/// Top-level settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Start used when neither index rows nor measurements exist yet
    pub datetime_start: DateTime<Utc>,
    /// Canonical field name -> aliases used by data sources
    #[serde(default)]
    pub field_synonyms: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub store: StoreSettings,
    pub atlas_index: IndexConfig,
}

impl Settings {
    /// Parse and validate settings from YAML.
    ///
    /// # Arguments
    /// * `yaml` - Settings document with `datetime_start`, optional
    ///   `field_synonyms` and `store`, and the `atlas_index` section
    ///
    /// # Returns
    /// Settings whose index configuration passed `IndexConfig::validate`
    ///
    /// # Example
    /// ```ignore
    /// let settings = Settings::from_yaml_str(&std::fs::read_to_string("settings.yaml")?)?;
    /// println!("fingerprint {}", settings.fingerprint()?);
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, IndexError> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.atlas_index.validate()?;
        Ok(settings)
    }

    pub fn fingerprint(&self) -> Result<String, IndexError> {
        self.atlas_index.fingerprint()
    }
}

/// Retry behavior of the storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_retries")]
    pub maximum_query_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub query_retry_delay_seconds: f64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            maximum_query_retries: default_retries(),
            query_retry_delay_seconds: default_retry_delay(),
        }
    }
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

/// Scoring rules for the ATLAS index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub resample: ResampleConfig,
    /// brand -> field -> multiplicative factor
    #[serde(default)]
    pub unit_conversion_factors: BTreeMap<String, BTreeMap<String, f64>>,
    pub light_percent: LightPercentConfig,
    pub sla: SlaConfig,
    pub temperature: TemperatureConfig,
    /// field -> threshold curve
    pub thresholds: BTreeMap<String, ThresholdCurve>,
    /// category -> fields
    pub index_fields: BTreeMap<String, Vec<String>>,
    /// category -> weight in the composite
    pub weights: BTreeMap<String, f64>,
    #[serde(default = "default_score_floor")]
    pub score_floor: f64,
}

fn default_score_floor() -> f64 {
    DEFAULT_SCORE_FLOOR
}

/// Moving-average resampling applied to the hourly fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResampleConfig {
    pub frequency_minutes: u32,
    pub window_minutes: u32,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            frequency_minutes: 60,
            window_minutes: 60,
        }
    }
}

impl ResampleConfig {
    pub fn frequency(&self) -> Duration {
        Duration::minutes(i64::from(self.frequency_minutes))
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(i64::from(self.window_minutes))
    }
}

/// Derivation of the light-percent metric from minute brightness samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightPercentConfig {
    #[serde(default = "default_light_brand")]
    pub brand: String,
    #[serde(default = "default_light_field")]
    pub field: String,
    pub day_start_hour: u32,
    pub night_start_hour: u32,
    pub day_threshold: f64,
    pub night_threshold: f64,
}

impl LightPercentConfig {
    pub fn is_day(&self, hour: u32) -> bool {
        self.day_start_hour <= hour && hour < self.night_start_hour
    }

    pub fn threshold(&self, hour: u32) -> f64 {
        if self.is_day(hour) {
            self.day_threshold
        } else {
            self.night_threshold
        }
    }
}

fn default_light_brand() -> String {
    "uhoo".to_string()
}

fn default_light_field() -> String {
    "light".to_string()
}

/// Day/night split of the SLA field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConfig {
    #[serde(default = "default_sla_field")]
    pub field: String,
    pub day_start_hour: u32,
    pub night_start_hour: u32,
}

impl SlaConfig {
    pub fn is_day(&self, hour: u32) -> bool {
        self.day_start_hour <= hour && hour < self.night_start_hour
    }
}

fn default_sla_field() -> String {
    "sla".to_string()
}

/// Thermal comfort adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    /// Field carrying indoor temperature
    #[serde(default = "default_temperature_field")]
    pub field: String,
    /// Brands whose temperature readings are indoor observations
    pub brands: Vec<String>,
    /// Brand providing the outdoor reference temperature
    pub outdoor_brand: String,
    #[serde(default = "default_temperature_field")]
    pub outdoor_field: String,
    /// Geometric decay of the lagged running mean
    pub running_mean_alpha: f64,
    /// Share of the running mean added to natural-cooling readings
    pub outdoor_adjustment_factor: f64,
    pub datacenters: BTreeMap<String, DatacenterRules>,
}

fn default_temperature_field() -> String {
    "temperature".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterRules {
    pub heating_months: MonthRange,
    pub natural_cooling: bool,
}

/// Inclusive month range; `start > end` wraps over new year
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthRange {
    pub start: u32,
    pub end: u32,
}

impl MonthRange {
    pub fn contains(&self, month: u32) -> bool {
        if self.start <= self.end {
            self.start <= month && month <= self.end
        } else {
            month >= self.start || month <= self.end
        }
    }
}

impl IndexConfig {
    /// Parse and validate the `atlas_index` subtree on its own
    pub fn from_yaml_str(yaml: &str) -> Result<Self, IndexError> {
        let config: IndexConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every rule that would otherwise surface mid-run
    pub fn validate(&self) -> Result<(), IndexError> {
        for (field, curve) in &self.thresholds {
            curve.validate(field)?;
        }

        for category in self.index_fields.keys() {
            if !self.weights.contains_key(category) {
                return Err(IndexError::MissingWeight(category.clone()));
            }
        }
        for (category, weight) in &self.weights {
            if !self.index_fields.contains_key(category) {
                return Err(IndexError::InvalidConfig(format!(
                    "weight given for unknown category '{category}'"
                )));
            }
            if !weight.is_finite() {
                return Err(IndexError::InvalidConfig(format!(
                    "weight of category '{category}' is not finite"
                )));
            }
        }

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (category, fields) in &self.index_fields {
            for field in fields {
                if let Some(previous) = seen.insert(field, category) {
                    return Err(IndexError::InvalidConfig(format!(
                        "field '{field}' listed in categories '{previous}' and '{category}'"
                    )));
                }
            }
        }

        validate_hours(
            "light_percent",
            self.light_percent.day_start_hour,
            self.light_percent.night_start_hour,
        )?;
        validate_hours("sla", self.sla.day_start_hour, self.sla.night_start_hour)?;

        let temperature = &self.temperature;
        if !(0.0..1.0).contains(&temperature.running_mean_alpha) {
            return Err(IndexError::InvalidConfig(format!(
                "running_mean_alpha must be in [0, 1), got {}",
                temperature.running_mean_alpha
            )));
        }
        if !temperature.outdoor_adjustment_factor.is_finite() {
            return Err(IndexError::InvalidConfig(
                "outdoor_adjustment_factor is not finite".to_string(),
            ));
        }
        for (name, rules) in &temperature.datacenters {
            let months = rules.heating_months;
            if !(1..=12).contains(&months.start) || !(1..=12).contains(&months.end) {
                return Err(IndexError::InvalidConfig(format!(
                    "datacenter '{name}' heating months must be within 1-12"
                )));
            }
        }

        for (brand, factors) in &self.unit_conversion_factors {
            if let Some((field, _)) = factors.iter().find(|(_, f)| !f.is_finite()) {
                return Err(IndexError::InvalidConfig(format!(
                    "conversion factor for {brand}/{field} is not finite"
                )));
            }
        }

        if !(self.score_floor.is_finite() && self.score_floor > 0.0) {
            return Err(IndexError::InvalidConfig(format!(
                "score_floor must be positive, got {}",
                self.score_floor
            )));
        }
        if self.resample.frequency_minutes == 0 || self.resample.window_minutes == 0 {
            return Err(IndexError::InvalidConfig(
                "resample frequency and window must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// field -> category lookup
    pub fn category_per_field(&self) -> HashMap<String, String> {
        self.index_fields
            .iter()
            .flat_map(|(category, fields)| {
                fields
                    .iter()
                    .map(move |field| (field.clone(), category.clone()))
            })
            .collect()
    }

    /// Short, stable hash of the scoring rules.
    ///
    /// The subtree is serialized to compact JSON with sorted keys before
    /// hashing, so map ordering in the source file does not matter.
    pub fn fingerprint(&self) -> Result<String, IndexError> {
        let value = serde_json::to_value(self)?;
        let canonical = serde_json::to_string(&value)?;
        let digest = Sha256::digest(canonical.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(FINGERPRINT_LEN);
        Ok(encoded)
    }
}

fn validate_hours(section: &str, day_start: u32, night_start: u32) -> Result<(), IndexError> {
    if day_start >= 24 || night_start >= 24 {
        return Err(IndexError::InvalidConfig(format!(
            "{section}: hours must be below 24"
        )));
    }
    if day_start >= night_start {
        return Err(IndexError::InvalidConfig(format!(
            "{section}: day must start before night"
        )));
    }
    Ok(())
}
