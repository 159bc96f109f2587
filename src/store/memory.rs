//! In-memory time-series store
//!
//! Holds measurements and index rows in process memory, with NDJSON import
//! and export for file-based runs.

use super::{resample, DeletePredicate, FetchRequest, FieldSynonyms, IndexSink, MeasurementSource};
use crate::error::IndexError;
use crate::types::{IndexRow, MeasurementRow};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

type IndexKey = (String, DateTime<Utc>, String);

/// Measurement and index storage backed by process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    measurements: Vec<MeasurementRow>,
    index: BTreeMap<IndexKey, IndexRow>,
    synonyms: FieldSynonyms,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that maps field aliases to canonical names on fetch
    pub fn with_synonyms(synonyms: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            synonyms: FieldSynonyms::new(synonyms),
            ..Self::default()
        }
    }

    pub fn insert_measurements<I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = MeasurementRow>,
    {
        self.measurements.extend(rows);
    }

    /// Stored index rows ordered by fingerprint, time and unit
    pub fn index_rows(&self) -> impl Iterator<Item = &IndexRow> {
        self.index.values()
    }

    /// Parse NDJSON measurement rows and append them; returns the row count
    pub fn load_measurements_ndjson(&mut self, ndjson: &str) -> Result<usize, IndexError> {
        let rows: Vec<MeasurementRow> = parse_ndjson(ndjson)?;
        let count = rows.len();
        self.insert_measurements(rows);
        Ok(count)
    }

    /// Parse previously exported NDJSON index rows, keeping their fingerprints
    pub fn load_index_ndjson(&mut self, ndjson: &str) -> Result<usize, IndexError> {
        let rows: Vec<IndexRow> = parse_ndjson(ndjson)?;
        let count = rows.len();
        for row in rows {
            self.index.insert(index_key(&row), row);
        }
        Ok(count)
    }

    pub fn index_to_ndjson(&self) -> Result<String, IndexError> {
        let mut out = String::new();
        for row in self.index.values() {
            out.push_str(&serde_json::to_string(row)?);
            out.push('\n');
        }
        Ok(out)
    }
}

fn index_key(row: &IndexRow) -> IndexKey {
    (row.fingerprint.clone(), row.time, row.unit_number.clone())
}

fn parse_ndjson<T: serde::de::DeserializeOwned>(ndjson: &str) -> Result<Vec<T>, IndexError> {
    let mut rows = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row = serde_json::from_str(trimmed).map_err(|e| {
            IndexError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn matches_filter(filter: &Option<Vec<String>>, value: &str) -> bool {
    filter
        .as_ref()
        .map_or(true, |allowed| allowed.iter().any(|a| a == value))
}

impl MeasurementSource for MemoryStore {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<MeasurementRow>, IndexError> {
        let requested_fields = request.fields.as_ref().map(|fields| {
            fields
                .iter()
                .map(|f| self.synonyms.canonical(f).to_string())
                .collect::<Vec<_>>()
        });

        let rows: Vec<MeasurementRow> = self
            .measurements
            .iter()
            .filter(|row| request.window.contains(row.time))
            .filter(|row| matches_filter(&request.brands, &row.brand))
            .filter(|row| matches_filter(&request.devices, &row.device))
            .filter_map(|row| {
                let field = self.synonyms.canonical(&row.field);
                if !matches_filter(&requested_fields, field) {
                    return None;
                }
                let mut row = row.clone();
                row.field = field.to_string();
                Some(row)
            })
            .collect();

        Ok(match request.resample {
            Some(params) => resample(rows, &request.window, params),
            None => rows,
        })
    }

    fn earliest_time(&self) -> Result<Option<DateTime<Utc>>, IndexError> {
        Ok(self.measurements.iter().map(|row| row.time).min())
    }
}

impl IndexSink for MemoryStore {
    fn write_index_rows(&mut self, rows: &[IndexRow], fingerprint: &str) -> Result<(), IndexError> {
        for row in rows {
            let mut row = row.clone();
            row.fingerprint = fingerprint.to_string();
            self.index.insert(index_key(&row), row);
        }
        Ok(())
    }

    fn delete_rows(&mut self, predicate: &DeletePredicate) -> Result<usize, IndexError> {
        let before = self.index.len();
        self.index.retain(|_, row| !predicate.matches(row));
        Ok(before - self.index.len())
    }

    fn latest_index_time(&self, fingerprint: &str) -> Result<Option<DateTime<Utc>>, IndexError> {
        Ok(self
            .index
            .values()
            .filter(|row| row.fingerprint == fingerprint)
            .map(|row| row.time)
            .max())
    }
}
