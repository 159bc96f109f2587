//! Score pipeline
//!
//! Orchestrates the per-measurement stages of an index computation.
//!
//! Pipeline stages:
//! 1. OutdoorRunningMean - Lagged outdoor temperature from the reference brand
//! 2. DeviceLookup - Attach unit number and datacenter, drop unknown devices
//! 3. TemperatureAdjuster - Relabel indoor temperature by comfort regime
//! 4. ScoreTable - Score each row along its field's threshold curve

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::scorer::ScoreTable;
use crate::tags::DeviceLookup;
use crate::temperature::{OutdoorRunningMean, TemperatureAdjuster};
use crate::types::{LocatedRow, MeasurementRow, QualityIssue, QualityReport, ScoredRow};
use std::collections::HashMap;

/// Scored rows of one batch together with the rows skipped on the way
#[derive(Debug, Clone, Default)]
pub struct ScoreOutcome {
    pub scored: Vec<ScoredRow>,
    pub quality: QualityReport,
}

/// Scores preprocessed measurements
pub struct ScorePipeline<'a> {
    config: &'a IndexConfig,
    lookup: &'a dyn DeviceLookup,
    scores: ScoreTable,
    categories: HashMap<String, String>,
}

impl<'a> ScorePipeline<'a> {
    /// Build the score table once; fails on an invalid threshold curve
    pub fn new(config: &'a IndexConfig, lookup: &'a dyn DeviceLookup) -> Result<Self, IndexError> {
        Ok(Self {
            config,
            lookup,
            scores: ScoreTable::build(&config.thresholds)?,
            categories: config.category_per_field(),
        })
    }

    /// Score one batch of preprocessed measurements.
    ///
    /// # Arguments
    /// * `rows` - Preprocessed rows, including the outdoor reference series
    ///   and the lead-in days needed by the running mean
    ///
    /// # Returns
    /// Scored rows tagged with unit and category, plus a report of every row
    /// skipped on the way
    ///
    /// # Example
    /// ```ignore
    /// let pipeline = ScorePipeline::new(&settings.atlas_index, &tags)?;
    /// let outcome = pipeline.score(rows);
    /// outcome.quality.log(&window);
    /// ```
    pub fn score(&self, rows: Vec<MeasurementRow>) -> ScoreOutcome {
        let mut quality = QualityReport::new();

        let running_mean = OutdoorRunningMean::from_rows(&rows, &self.config.temperature);
        let located = self.locate(rows, &mut quality);
        let adjusted = TemperatureAdjuster::new(&self.config.temperature).adjust(
            located,
            &running_mean,
            &mut quality,
        );

        let mut scored = Vec::with_capacity(adjusted.len());
        for row in adjusted {
            if let Some(scored_row) = self.score_row(row, &mut quality) {
                scored.push(scored_row);
            }
        }

        ScoreOutcome { scored, quality }
    }

    fn locate(&self, rows: Vec<MeasurementRow>, quality: &mut QualityReport) -> Vec<LocatedRow> {
        rows.into_iter()
            .filter_map(|measurement| match self.lookup.lookup(&measurement.device) {
                Some(tags) => Some(LocatedRow { measurement, tags }),
                None => {
                    quality.record(QualityIssue::UnknownDevice {
                        device: measurement.device,
                    });
                    None
                }
            })
            .collect()
    }

    fn score_row(&self, row: LocatedRow, quality: &mut QualityReport) -> Option<ScoredRow> {
        let LocatedRow { measurement, tags } = row;
        let field = measurement.field.as_str();

        if !measurement.value.is_finite() {
            quality.record(QualityIssue::NonFiniteValue {
                field: field.to_string(),
            });
            return None;
        }
        let Some(score) = self.scores.score(field, measurement.value) else {
            quality.record(QualityIssue::MissingThreshold {
                field: field.to_string(),
            });
            return None;
        };
        let Some(category) = self.categories.get(field) else {
            quality.record(QualityIssue::MissingCategory {
                field: field.to_string(),
            });
            return None;
        };

        Some(ScoredRow {
            category: category.clone(),
            unit_number: tags.unit_number,
            score,
            measurement,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_settings;
    use crate::tags::TagTable;
    use crate::temperature::{FIELD_COOLING_NATURAL, FIELD_HEATING};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap()
    }

    fn tags() -> TagTable {
        let mut table = TagTable::new();
        table.insert("uhoo-a", "101", Some("north"));
        table.insert("uhoo-b", "102", Some("north"));
        table
    }

    #[test]
    fn test_scores_and_categorizes() {
        let settings = sample_settings();
        let table = tags();
        let pipeline = ScorePipeline::new(&settings.atlas_index, &table).unwrap();

        let outcome = pipeline.score(vec![
            MeasurementRow::new(at(1, 10, 9), "uhoo", "uhoo-a", "co2", 1000.0),
            MeasurementRow::new(at(1, 10, 9), "uhoo", "uhoo-b", "temperature", 21.0),
        ]);

        assert!(outcome.quality.is_empty());
        assert_eq!(outcome.scored.len(), 2);

        let co2 = &outcome.scored[0];
        assert_eq!(co2.unit_number, "101");
        assert_eq!(co2.category, "air_quality");
        assert!((co2.score - 75.0).abs() < 1e-9);

        let temperature = &outcome.scored[1];
        assert_eq!(temperature.measurement.field, FIELD_HEATING);
        assert_eq!(temperature.category, "thermal");
        assert_eq!(temperature.score, 100.0);
    }

    #[test]
    fn test_uses_outdoor_rows_before_dropping_them() {
        let settings = sample_settings();
        let table = tags();
        let pipeline = ScorePipeline::new(&settings.atlas_index, &table).unwrap();

        let mut rows: Vec<MeasurementRow> = [10.0, 12.0, 14.0]
            .iter()
            .enumerate()
            .map(|(i, t)| MeasurementRow::new(at(6, i as u32 + 1, 12), "airly", "out-1", "temperature", *t))
            .collect();
        rows.push(MeasurementRow::new(at(6, 4, 12), "uhoo", "uhoo-a", "temperature", 22.0));

        let outcome = pipeline.score(rows);
        assert_eq!(outcome.scored.len(), 1);
        let row = &outcome.scored[0];
        assert_eq!(row.measurement.field, FIELD_COOLING_NATURAL);
        // 22 + 11.25 * 0.5
        assert!((row.measurement.value - 27.625).abs() < 1e-9);
        assert_eq!(row.score, 100.0);
        assert_eq!(
            outcome.quality.count(&QualityIssue::UnknownDevice {
                device: "out-1".to_string()
            }),
            3
        );
    }

    #[test]
    fn test_missing_threshold_is_recorded_not_fatal() {
        let settings = sample_settings();
        let table = tags();
        let pipeline = ScorePipeline::new(&settings.atlas_index, &table).unwrap();

        let outcome = pipeline.score(vec![
            MeasurementRow::new(at(1, 10, 9), "uhoo", "uhoo-a", "humidity", 40.0),
            MeasurementRow::new(at(1, 10, 9), "uhoo", "uhoo-a", "co2", f64::NAN),
            MeasurementRow::new(at(1, 10, 9), "uhoo", "uhoo-a", "co2", 700.0),
        ]);

        assert_eq!(outcome.scored.len(), 1);
        assert_eq!(
            outcome.quality.count(&QualityIssue::MissingThreshold {
                field: "humidity".to_string()
            }),
            1
        );
        assert_eq!(
            outcome.quality.count(&QualityIssue::NonFiniteValue {
                field: "co2".to_string()
            }),
            1
        );
    }

    #[test]
    fn test_threshold_without_category_is_recorded() {
        let mut settings = sample_settings();
        settings.atlas_index.index_fields.get_mut("air_quality").unwrap().clear();
        let table = tags();
        let pipeline = ScorePipeline::new(&settings.atlas_index, &table).unwrap();

        let outcome = pipeline.score(vec![MeasurementRow::new(
            at(1, 10, 9),
            "uhoo",
            "uhoo-a",
            "co2",
            700.0,
        )]);

        assert!(outcome.scored.is_empty());
        assert_eq!(
            outcome.quality.count(&QualityIssue::MissingCategory {
                field: "co2".to_string()
            }),
            1
        );
    }

    #[test]
    fn test_invalid_curve_fails_construction() {
        let mut settings = sample_settings();
        settings.atlas_index.thresholds.insert(
            "pm25".to_string(),
            crate::scorer::ThresholdCurve::Greater {
                high_score: 5.0,
                mid_score: 5.0,
                low_score: 0.0,
            },
        );
        let table = tags();
        assert!(ScorePipeline::new(&settings.atlas_index, &table).is_err());
    }
}
