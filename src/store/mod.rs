//! Storage collaborators
//!
//! The index engine reads normalized measurements through [`MeasurementSource`]
//! and persists index rows through [`IndexSink`]. Vendor API clients and the
//! concrete time-series database live behind these traits.

mod memory;
mod retry;

pub use memory::MemoryStore;
pub use retry::{RetryPolicy, RetryingStore};

use crate::error::IndexError;
use crate::types::{IndexRow, MeasurementRow, Window};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};

/// Moving-average resampling of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resample {
    /// Spacing of output points
    pub frequency: Duration,
    /// Span averaged for each point, ending at the bucket end
    pub window: Duration,
}

/// Filters of a measurement fetch; `None` means "no filter"
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub window: Window,
    pub brands: Option<Vec<String>>,
    pub devices: Option<Vec<String>>,
    pub fields: Option<Vec<String>>,
    pub resample: Option<Resample>,
}

impl FetchRequest {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            brands: None,
            devices: None,
            fields: None,
            resample: None,
        }
    }

    pub fn brands<I, S>(mut self, brands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.brands = Some(brands.into_iter().map(Into::into).collect());
        self
    }

    pub fn devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn resample(mut self, frequency: Duration, window: Duration) -> Self {
        self.resample = Some(Resample { frequency, window });
        self
    }
}

/// Predicate of a bulk delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePredicate {
    /// Every row whose fingerprint differs from the given one
    FingerprintNot(String),
}

impl DeletePredicate {
    pub fn matches(&self, row: &IndexRow) -> bool {
        match self {
            DeletePredicate::FingerprintNot(fingerprint) => row.fingerprint != *fingerprint,
        }
    }
}

/// Source of normalized measurement rows
pub trait MeasurementSource {
    /// Rows matching `request`; an empty window yields an empty vector
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<MeasurementRow>, IndexError>;

    /// Timestamp of the oldest stored measurement
    fn earliest_time(&self) -> Result<Option<DateTime<Utc>>, IndexError>;
}

/// Persistence of index rows, versioned by configuration fingerprint
pub trait IndexSink {
    /// Write rows tagged with `fingerprint`. Rows sharing fingerprint, time
    /// and unit overwrite each other.
    fn write_index_rows(&mut self, rows: &[IndexRow], fingerprint: &str) -> Result<(), IndexError>;

    /// Bulk delete; returns the number of rows removed
    fn delete_rows(&mut self, predicate: &DeletePredicate) -> Result<usize, IndexError>;

    /// Latest index timestamp computed under `fingerprint`
    fn latest_index_time(&self, fingerprint: &str) -> Result<Option<DateTime<Utc>>, IndexError>;
}

/// Alias -> canonical field name mapping
#[derive(Debug, Clone, Default)]
pub struct FieldSynonyms {
    canonical: HashMap<String, String>,
}

impl FieldSynonyms {
    /// Build from `canonical -> [aliases]` as found in the settings
    pub fn new(synonyms: &BTreeMap<String, Vec<String>>) -> Self {
        let canonical = synonyms
            .iter()
            .flat_map(|(name, aliases)| {
                aliases
                    .iter()
                    .map(move |alias| (alias.clone(), name.clone()))
            })
            .collect();
        Self { canonical }
    }

    pub fn canonical<'a>(&'a self, field: &'a str) -> &'a str {
        self.canonical.get(field).map_or(field, String::as_str)
    }
}

/// Moving average over each (brand, device, field) series.
///
/// One point per `frequency` bucket that has samples in its averaging span,
/// labelled with the bucket start. Buckets are aligned to the Unix epoch.
pub fn resample(rows: Vec<MeasurementRow>, window: &Window, params: Resample) -> Vec<MeasurementRow> {
    let step = params.frequency.num_seconds().max(1);
    let span = params.window.num_seconds().max(1);

    let mut series: BTreeMap<(String, String, String), Vec<(i64, f64)>> = BTreeMap::new();
    for row in rows {
        series
            .entry((row.brand, row.device, row.field))
            .or_default()
            .push((row.time.timestamp(), row.value));
    }

    let first_bucket = window.start.timestamp().div_euclid(step) * step;
    let end = window.end.timestamp();

    let mut resampled = Vec::new();
    for ((brand, device, field), mut samples) in series {
        samples.sort_by_key(|(t, _)| *t);

        let mut bucket = first_bucket;
        while bucket < end {
            let span_end = bucket + step;
            let span_start = span_end - span;
            let lo = samples.partition_point(|(t, _)| *t < span_start);
            let hi = samples.partition_point(|(t, _)| *t < span_end);

            if hi > lo {
                let mean = samples[lo..hi].iter().map(|(_, v)| v).sum::<f64>() / (hi - lo) as f64;
                if let Some(time) = DateTime::<Utc>::from_timestamp(bucket, 0) {
                    if window.contains(time) {
                        resampled.push(MeasurementRow {
                            time,
                            brand: brand.clone(),
                            device: device.clone(),
                            field: field.clone(),
                            value: mean,
                        });
                    }
                }
            }
            bucket += step;
        }
    }

    resampled.sort_by(|a, b| a.time.cmp(&b.time));
    resampled
}
