//! ATLAS index - Batch engine for a building comfort index
//!
//! Turns environmental sensor time series (CO2, temperature, light, radon,
//! SLA, ...) into a per-unit, per-hour comfort score through a deterministic
//! pipeline: preprocessing → outdoor-adjusted temperature → threshold scoring
//! → log-space aggregation → weighted composite.
//!
//! ## Modules
//!
//! - **Scoring**: Threshold curves, temperature regimes and the score pipeline
//! - **Aggregation**: Category sub-indices and the composite `atlas_index`
//! - **Runner**: Resumable, month-chunked batch computation against a store

pub mod aggregator;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod preprocessor;
pub mod runner;
pub mod scorer;
pub mod store;
pub mod tags;
pub mod temperature;
pub mod types;

pub use aggregator::IndexAggregator;
pub use config::{IndexConfig, Settings};
pub use error::IndexError;
pub use pipeline::{ScoreOutcome, ScorePipeline};
pub use preprocessor::Preprocessor;
pub use runner::{IndexRunner, RunSummary};
pub use scorer::{ScoreTable, ThresholdCurve};
pub use store::{IndexSink, MeasurementSource, MemoryStore, RetryingStore};
pub use tags::{DeviceLookup, TagTable};
pub use types::{IndexRow, MeasurementRow, QualityIssue, QualityReport, ScoredRow, Window};

/// Engine version recorded in run logs
pub const ATLAS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported index rows
pub const PRODUCER_NAME: &str = "atlas-index";
