//! Temperature adjustment
//!
//! Indoor temperature readings are relabelled by comfort regime before
//! scoring:
//! - `temperature_heating` during a datacenter's heating season
//! - `temperature_cooling_mec` outside it, for mechanically cooled buildings
//! - `temperature_cooling_nat` outside it, for naturally cooled buildings,
//!   shifted by the lagged outdoor running mean (adaptive comfort)

use crate::config::{DatacenterRules, TemperatureConfig};
use crate::types::{LocatedRow, MeasurementRow, QualityIssue, QualityReport};
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeMap;

pub const FIELD_HEATING: &str = "temperature_heating";
pub const FIELD_COOLING_NATURAL: &str = "temperature_cooling_nat";
pub const FIELD_COOLING_MECHANICAL: &str = "temperature_cooling_mec";

/// Days of outdoor history the running mean looks back on
pub const RUNNING_MEAN_LAG_DAYS: i64 = 3;

/// Mean outdoor temperature per calendar date
pub fn outdoor_daily_means(
    rows: &[MeasurementRow],
    outdoor_brand: &str,
    outdoor_field: &str,
) -> BTreeMap<NaiveDate, f64> {
    let mut sums: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();

    for row in rows {
        if row.brand != outdoor_brand || row.field != outdoor_field || !row.value.is_finite() {
            continue;
        }
        let entry = sums.entry(row.time.date_naive()).or_insert((0.0, 0));
        entry.0 += row.value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(date, (sum, count))| (date, sum / count as f64))
        .collect()
}

/// Lagged, geometrically weighted outdoor temperature.
///
/// For day N: `(1 - alpha) * (t[N-1] + alpha * t[N-2] + alpha^2 * t[N-3])`.
/// Undefined unless all three previous days have a daily mean.
#[derive(Debug, Clone)]
pub struct OutdoorRunningMean {
    daily: BTreeMap<NaiveDate, f64>,
    alpha: f64,
}

impl OutdoorRunningMean {
    pub fn new(daily: BTreeMap<NaiveDate, f64>, alpha: f64) -> Self {
        Self { daily, alpha }
    }

    pub fn from_rows(rows: &[MeasurementRow], config: &TemperatureConfig) -> Self {
        Self::new(
            outdoor_daily_means(rows, &config.outdoor_brand, &config.outdoor_field),
            config.running_mean_alpha,
        )
    }

    pub fn at(&self, date: NaiveDate) -> Option<f64> {
        let mut total = 0.0;
        let mut weight = 1.0;
        for lag in 1..=RUNNING_MEAN_LAG_DAYS {
            let day = date - Duration::days(lag);
            total += weight * self.daily.get(&day)?;
            weight *= self.alpha;
        }
        Some((1.0 - self.alpha) * total)
    }

    pub fn daily_means(&self) -> &BTreeMap<NaiveDate, f64> {
        &self.daily
    }
}

/// Comfort regime of one indoor temperature reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalRegime {
    Heating,
    NaturalCooling,
    MechanicalCooling,
}

impl ThermalRegime {
    pub fn classify(rules: &DatacenterRules, month: u32) -> Self {
        if rules.heating_months.contains(month) {
            ThermalRegime::Heating
        } else if rules.natural_cooling {
            ThermalRegime::NaturalCooling
        } else {
            ThermalRegime::MechanicalCooling
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            ThermalRegime::Heating => FIELD_HEATING,
            ThermalRegime::NaturalCooling => FIELD_COOLING_NATURAL,
            ThermalRegime::MechanicalCooling => FIELD_COOLING_MECHANICAL,
        }
    }
}

/// Rewrites indoor temperature rows into regime-specific fields
pub struct TemperatureAdjuster<'a> {
    config: &'a TemperatureConfig,
}

impl<'a> TemperatureAdjuster<'a> {
    pub fn new(config: &'a TemperatureConfig) -> Self {
        Self { config }
    }

    /// Whether the row is an indoor temperature observation
    pub fn applies_to(&self, row: &MeasurementRow) -> bool {
        row.field == self.config.field && self.config.brands.iter().any(|b| *b == row.brand)
    }

    /// Adjust temperature rows; every other row passes through unchanged.
    ///
    /// Temperature rows are dropped (and reported) when the device has no
    /// datacenter, the datacenter has no rules, or a natural-cooling reading
    /// has no running mean yet.
    pub fn adjust(
        &self,
        rows: Vec<LocatedRow>,
        running_mean: &OutdoorRunningMean,
        report: &mut QualityReport,
    ) -> Vec<LocatedRow> {
        let mut adjusted = Vec::with_capacity(rows.len());

        for mut row in rows {
            if !self.applies_to(&row.measurement) {
                adjusted.push(row);
                continue;
            }

            let Some(datacenter) = row.tags.datacenter.as_deref() else {
                report.record(QualityIssue::MissingDatacenter {
                    device: row.measurement.device.clone(),
                });
                continue;
            };
            let Some(rules) = self.config.datacenters.get(datacenter) else {
                report.record(QualityIssue::UnknownDatacenter {
                    datacenter: datacenter.to_string(),
                });
                continue;
            };

            let regime = ThermalRegime::classify(rules, row.measurement.time.month());
            if regime == ThermalRegime::NaturalCooling {
                let date = row.measurement.time.date_naive();
                let Some(t_rm) = running_mean.at(date) else {
                    report.record(QualityIssue::InsufficientHistory { date });
                    continue;
                };
                row.measurement.value += t_rm * self.config.outdoor_adjustment_factor;
            }

            row.measurement.field = regime.field().to_string();
            adjusted.push(row);
        }

        adjusted
    }
}
