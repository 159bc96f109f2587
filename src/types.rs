//! Core types for the ATLAS index pipeline
//!
//! This module defines the rows that flow through each stage of the pipeline:
//! raw measurements, located rows (device resolved to a building unit), scored
//! rows, and the final index rows, plus the data-quality bookkeeping shared by
//! every stage.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end
    }

    /// Same window with its start moved `lead` earlier
    pub fn with_lead_in(&self, lead: Duration) -> Self {
        Self {
            start: self.start - lead,
            end: self.end,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Normalized measurement as returned by a measurement source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub time: DateTime<Utc>,
    pub brand: String,
    pub device: String,
    pub field: String,
    pub value: f64,
}

impl MeasurementRow {
    pub fn new(
        time: DateTime<Utc>,
        brand: impl Into<String>,
        device: impl Into<String>,
        field: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            time,
            brand: brand.into(),
            device: device.into(),
            field: field.into(),
            value,
        }
    }
}

/// Static tags attached to a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTags {
    pub unit_number: String,
    /// Datacenter governing heating/cooling rules, if tagged
    pub datacenter: Option<String>,
}

/// Measurement whose device has been resolved to a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedRow {
    pub measurement: MeasurementRow,
    pub tags: DeviceTags,
}

/// Measurement scored against its threshold curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    #[serde(flatten)]
    pub measurement: MeasurementRow,
    pub unit_number: String,
    pub category: String,
    /// Linear score (0-100), before the log transform
    pub score: f64,
}

/// Composite comfort index for one unit at one time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub time: DateTime<Utc>,
    pub unit_number: String,
    /// Weighted composite; absent when a weighted category has no score
    pub atlas_index: Option<f64>,
    /// Per-category sub-index, one top-level column per category
    #[serde(flatten)]
    pub categories: BTreeMap<String, f64>,
    /// Fingerprint of the configuration that produced this row
    pub fingerprint: String,
}

/// Non-fatal data problem that caused rows to be skipped
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityIssue {
    UnknownDevice { device: String },
    MissingDatacenter { device: String },
    UnknownDatacenter { datacenter: String },
    InsufficientHistory { date: NaiveDate },
    MissingThreshold { field: String },
    MissingCategory { field: String },
    NonFiniteValue { field: String },
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityIssue::UnknownDevice { device } => {
                write!(f, "device '{device}' has no unit number")
            }
            QualityIssue::MissingDatacenter { device } => {
                write!(f, "device '{device}' has no datacenter tag")
            }
            QualityIssue::UnknownDatacenter { datacenter } => {
                write!(f, "datacenter '{datacenter}' has no heating/cooling rules")
            }
            QualityIssue::InsufficientHistory { date } => {
                write!(f, "no outdoor running mean available for {date}")
            }
            QualityIssue::MissingThreshold { field } => {
                write!(f, "field '{field}' has no threshold curve")
            }
            QualityIssue::MissingCategory { field } => {
                write!(f, "field '{field}' belongs to no index category")
            }
            QualityIssue::NonFiniteValue { field } => {
                write!(f, "field '{field}' carries a non-finite value")
            }
        }
    }
}

/// Occurrence counts of data-quality issues
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityReport {
    issues: BTreeMap<QualityIssue, usize>,
}

impl QualityReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, issue: QualityIssue) {
        *self.issues.entry(issue).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: QualityReport) {
        for (issue, count) in other.issues {
            *self.issues.entry(issue).or_insert(0) += count;
        }
    }

    pub fn count(&self, issue: &QualityIssue) -> usize {
        self.issues.get(issue).copied().unwrap_or(0)
    }

    /// Total number of skipped rows
    pub fn total(&self) -> usize {
        self.issues.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QualityIssue, usize)> {
        self.issues.iter().map(|(issue, count)| (issue, *count))
    }

    /// Emit one warning per distinct issue
    pub fn log(&self, window: &Window) {
        for (issue, count) in &self.issues {
            tracing::warn!(%window, rows = *count, "skipped rows: {issue}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_contains_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let window = Window::new(start, end);

        assert!(window.contains(start));
        assert!(!window.contains(end));
        assert_eq!(
            window.with_lead_in(Duration::days(4)).start,
            Utc.with_ymd_and_hms(2023, 12, 28, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_quality_report_merge() {
        let mut report = QualityReport::new();
        let missing = QualityIssue::MissingThreshold {
            field: "humidity".to_string(),
        };
        report.record(missing.clone());
        report.record(missing.clone());

        let mut other = QualityReport::new();
        other.record(missing.clone());
        other.record(QualityIssue::UnknownDevice {
            device: "outdoor-1".to_string(),
        });

        report.merge(other);
        assert_eq!(report.count(&missing), 3);
        assert_eq!(report.total(), 4);
    }

    #[test]
    fn test_scored_row_flattens_measurement() {
        let row = ScoredRow {
            measurement: MeasurementRow::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
                "uhoo",
                "dev-1",
                "co2",
                650.0,
            ),
            unit_number: "101".to_string(),
            category: "air_quality".to_string(),
            score: 100.0,
        };

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["field"], "co2");
        assert_eq!(json["unit_number"], "101");
    }

    #[test]
    fn test_index_row_categories_are_top_level_columns() {
        let row = IndexRow {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            unit_number: "101".to_string(),
            atlas_index: None,
            categories: BTreeMap::from([
                ("air_quality".to_string(), 80.0),
                ("thermal".to_string(), 50.0),
            ]),
            fingerprint: "abc1234".to_string(),
        };

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["air_quality"], 80.0);
        assert_eq!(json["thermal"], 50.0);
        assert!(json.get("categories").is_none());
        assert!(json["atlas_index"].is_null());

        let back: IndexRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }
}
