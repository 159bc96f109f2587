//! Index runner
//!
//! Drives a batch computation of the ATLAS index:
//! 1. DetermineStart - Drop rows of stale fingerprints, then resume after the
//!    latest computed index, else start at the earliest measurement, else at
//!    the configured default
//! 2. ChunkLoop - One calendar month at a time up to "now"; each chunk is an
//!    independent fetch/score/aggregate/write transaction
//! 3. Done
//!
//! Chunks run strictly in calendar order. A failed chunk stops the run but
//! leaves previously written chunks in place.

use crate::aggregator::IndexAggregator;
use crate::config::Settings;
use crate::error::IndexError;
use crate::pipeline::ScorePipeline;
use crate::preprocessor::Preprocessor;
use crate::store::{DeletePredicate, IndexSink, MeasurementSource};
use crate::tags::DeviceLookup;
use crate::types::{IndexRow, QualityReport, Window};
use chrono::{DateTime, Datelike, Duration, DurationRound, TimeZone, Utc};
use uuid::Uuid;

/// Days fetched ahead of each chunk: three for the running-mean lag, one
/// for day-boundary rounding
pub const CHUNK_LEAD_IN_DAYS: i64 = 4;

/// Runner state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    DetermineStart,
    ChunkLoop { cursor: DateTime<Utc> },
    Done,
}

/// Where the run started from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSource {
    /// Latest index row of the current fingerprint
    Resumed,
    /// Oldest stored measurement
    EarliestMeasurement,
    /// `datetime_start` from the settings
    ConfiguredDefault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    pub window: Window,
    pub measurements: usize,
    pub scored: usize,
    pub index_rows: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub fingerprint: String,
    pub start: Option<DateTime<Utc>>,
    pub start_source: Option<StartSource>,
    /// Rows of other fingerprints deleted before computing
    pub deleted_rows: usize,
    pub chunks: Vec<ChunkSummary>,
    pub quality: QualityReport,
}

impl RunSummary {
    fn new(run_id: Uuid, fingerprint: &str) -> Self {
        Self {
            run_id,
            fingerprint: fingerprint.to_string(),
            start: None,
            start_source: None,
            deleted_rows: 0,
            chunks: Vec::new(),
            quality: QualityReport::new(),
        }
    }

    pub fn index_rows_written(&self) -> usize {
        self.chunks.iter().map(|c| c.index_rows).sum()
    }
}

/// First instant of the calendar month after `time`
pub fn next_month_start(time: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if time.month() == 12 {
        (time.year() + 1, 1)
    } else {
        (time.year(), time.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Computes and persists the index for one configuration
pub struct IndexRunner<'a, S> {
    settings: &'a Settings,
    store: &'a mut S,
    lookup: &'a dyn DeviceLookup,
    fingerprint: String,
    run_id: Uuid,
}

impl<'a, S> IndexRunner<'a, S>
where
    S: MeasurementSource + IndexSink,
{
    /// Validate the configuration and compute its fingerprint
    pub fn new(
        settings: &'a Settings,
        store: &'a mut S,
        lookup: &'a dyn DeviceLookup,
    ) -> Result<Self, IndexError> {
        settings.atlas_index.validate()?;
        let fingerprint = settings.fingerprint()?;
        Ok(Self {
            settings,
            store,
            lookup,
            fingerprint,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Compute everything missing up to the current time
    pub fn run(&mut self) -> Result<RunSummary, IndexError> {
        self.run_until(Utc::now())
    }

    /// Compute everything missing up to `now`.
    ///
    /// # Arguments
    /// * `now` - Exclusive end of the computation; the last chunk stops here
    ///
    /// # Returns
    /// Summary of the run: start point, rows deleted for stale fingerprints,
    /// one entry per computed chunk, and the merged data-quality report
    ///
    /// # Errors
    /// `ChunkFailed` carrying the failed range when a chunk aborts; chunks
    /// before it stay written
    ///
    /// # Example
    /// ```ignore
    /// let mut runner = IndexRunner::new(&settings, &mut store, &tags)?;
    /// let summary = runner.run_until(Utc::now())?;
    /// println!("{} rows", summary.index_rows_written());
    /// ```
    pub fn run_until(&mut self, now: DateTime<Utc>) -> Result<RunSummary, IndexError> {
        let span = tracing::info_span!(
            "atlas_index",
            run_id = %self.run_id,
            fingerprint = %self.fingerprint
        );
        let _guard = span.enter();

        let settings = self.settings;
        let pipeline = ScorePipeline::new(&settings.atlas_index, self.lookup)?;
        let mut summary = RunSummary::new(self.run_id, &self.fingerprint);
        let mut state = RunnerState::DetermineStart;

        loop {
            state = match state {
                RunnerState::DetermineStart => {
                    let (start, source, deleted) = self.determine_start()?;
                    tracing::info!(%start, ?source, "starting index computation");
                    summary.start = Some(start);
                    summary.start_source = Some(source);
                    summary.deleted_rows = deleted;
                    RunnerState::ChunkLoop { cursor: start }
                }
                RunnerState::ChunkLoop { cursor } if cursor >= now => RunnerState::Done,
                RunnerState::ChunkLoop { cursor } => {
                    let window = Window::new(cursor, next_month_start(cursor).min(now));
                    match self.compute_chunk(&pipeline, window) {
                        Ok((chunk, quality)) => {
                            summary.chunks.push(chunk);
                            summary.quality.merge(quality);
                            RunnerState::ChunkLoop { cursor: window.end }
                        }
                        Err(e) => {
                            tracing::error!(%window, "index chunk failed: {e}");
                            return Err(IndexError::ChunkFailed {
                                start: window.start,
                                end: window.end,
                                source: Box::new(e),
                            });
                        }
                    }
                }
                RunnerState::Done => break,
            };
        }

        tracing::info!(
            chunks = summary.chunks.len(),
            rows = summary.index_rows_written(),
            skipped = summary.quality.total(),
            "index computation finished"
        );
        Ok(summary)
    }

    /// Remove stale rows, then pick the first instant to compute
    pub fn determine_start(&mut self) -> Result<(DateTime<Utc>, StartSource, usize), IndexError> {
        let deleted = self
            .store
            .delete_rows(&DeletePredicate::FingerprintNot(self.fingerprint.clone()))?;
        if deleted > 0 {
            tracing::info!(deleted, "removed index rows computed with another configuration");
        }

        if let Some(latest) = self.store.latest_index_time(&self.fingerprint)? {
            return Ok((latest, StartSource::Resumed, deleted));
        }
        if let Some(earliest) = self.store.earliest_time()? {
            return Ok((
                self.align_start(earliest),
                StartSource::EarliestMeasurement,
                deleted,
            ));
        }
        Ok((
            self.align_start(self.settings.datetime_start),
            StartSource::ConfiguredDefault,
            deleted,
        ))
    }

    /// Floor a fresh start to the resample grid so its first bucket is kept
    fn align_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        time.duration_trunc(self.settings.atlas_index.resample.frequency())
            .unwrap_or(time)
    }

    fn compute_chunk(
        &mut self,
        pipeline: &ScorePipeline<'_>,
        window: Window,
    ) -> Result<(ChunkSummary, QualityReport), IndexError> {
        let settings = self.settings;
        let config = &settings.atlas_index;
        let fetch_window = window.with_lead_in(Duration::days(CHUNK_LEAD_IN_DAYS));
        tracing::info!(%fetch_window, "computing ATLAS index");

        let measurements = Preprocessor::new(&*self.store, config).preprocess(fetch_window)?;
        let measurement_count = measurements.len();

        let outcome = pipeline.score(measurements);
        outcome.quality.log(&window);

        let aggregator = IndexAggregator::new(&config.weights, config.score_floor, &self.fingerprint);
        let rows: Vec<IndexRow> = aggregator
            .aggregate(&outcome.scored)?
            .into_iter()
            .filter(|row| window.contains(row.time))
            .collect();

        if !rows.is_empty() {
            tracing::info!("Writing {} entries to the database.", rows.len());
            self.store.write_index_rows(&rows, &self.fingerprint)?;
        }

        Ok((
            ChunkSummary {
                window,
                measurements: measurement_count,
                scored: outcome.scored.len(),
                index_rows: rows.len(),
            },
            outcome.quality,
        ))
    }
}
