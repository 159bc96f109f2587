//! Measurement preprocessing
//!
//! Turns raw stored measurements into the rows the scorer expects:
//! - hourly moving averages of every series
//! - unit conversion by per-brand, per-field factors
//! - `light_percent_day` / `light_percent_night` derived from minute brightness
//! - `sla` relabelled to `sla_day` / `sla_night`

use crate::config::{IndexConfig, LightPercentConfig, SlaConfig};
use crate::error::IndexError;
use crate::store::{FetchRequest, MeasurementSource};
use crate::types::{MeasurementRow, Window};
use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use std::collections::BTreeMap;

pub const FIELD_LIGHT_PERCENT_DAY: &str = "light_percent_day";
pub const FIELD_LIGHT_PERCENT_NIGHT: &str = "light_percent_night";
pub const FIELD_SLA_DAY: &str = "sla_day";
pub const FIELD_SLA_NIGHT: &str = "sla_night";

/// Fetches and normalizes the measurements of a window
pub struct Preprocessor<'a> {
    source: &'a dyn MeasurementSource,
    config: &'a IndexConfig,
}

impl<'a> Preprocessor<'a> {
    pub fn new(source: &'a dyn MeasurementSource, config: &'a IndexConfig) -> Self {
        Self { source, config }
    }

    /// Preprocessed rows of `window`; empty when the window holds no data
    pub fn preprocess(&self, window: Window) -> Result<Vec<MeasurementRow>, IndexError> {
        let resample = self.config.resample;
        let request = FetchRequest::new(window).resample(resample.frequency(), resample.window());
        let mut rows = self.source.fetch(&request)?;

        if rows.is_empty() {
            tracing::debug!(%window, "no measurements in window");
            return Ok(rows);
        }

        convert_units(&mut rows, &self.config.unit_conversion_factors);

        let light = &self.config.light_percent;
        let samples = self.source.fetch(
            &FetchRequest::new(window)
                .brands([light.brand.as_str()])
                .fields([light.field.as_str()]),
        )?;
        rows.extend(light_percent(&samples, light));

        relabel_sla(&mut rows, &self.config.sla);

        tracing::debug!(%window, rows = rows.len(), "preprocessed measurements");
        Ok(rows)
    }
}

/// Multiply values by their brand/field conversion factor
pub fn convert_units(
    rows: &mut [MeasurementRow],
    factors: &BTreeMap<String, BTreeMap<String, f64>>,
) {
    for row in rows.iter_mut() {
        if let Some(factor) = factors.get(&row.brand).and_then(|f| f.get(&row.field)) {
            row.value *= factor;
        }
    }
}

fn floor_hour(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(Duration::hours(1)).unwrap_or(time)
}

/// Percentage of brightness samples above the day or night threshold, per
/// device and hour
pub fn light_percent(samples: &[MeasurementRow], config: &LightPercentConfig) -> Vec<MeasurementRow> {
    let mut buckets: BTreeMap<(DateTime<Utc>, &str), (usize, usize)> = BTreeMap::new();

    for sample in samples {
        let hour = floor_hour(sample.time);
        let above = sample.value > config.threshold(hour.hour());
        let entry = buckets.entry((hour, sample.device.as_str())).or_insert((0, 0));
        entry.0 += usize::from(above);
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|((hour, device), (above, total))| {
            let field = if config.is_day(hour.hour()) {
                FIELD_LIGHT_PERCENT_DAY
            } else {
                FIELD_LIGHT_PERCENT_NIGHT
            };
            MeasurementRow::new(
                hour,
                config.brand.as_str(),
                device,
                field,
                above as f64 / total as f64 * 100.0,
            )
        })
        .collect()
}

/// Split the SLA field by hour of day
pub fn relabel_sla(rows: &mut [MeasurementRow], config: &SlaConfig) {
    for row in rows.iter_mut().filter(|row| row.field == config.field) {
        row.field = if config.is_day(row.time.hour()) {
            FIELD_SLA_DAY.to_string()
        } else {
            FIELD_SLA_NIGHT.to_string()
        };
    }
}
