//! Atlas CLI - Command-line interface for the ATLAS index engine
//!
//! Commands:
//! - run: Compute missing index rows from NDJSON measurements (batch mode)
//! - fingerprint: Print the fingerprint of an index configuration
//! - check-config: Validate a settings file

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use atlas_index::config::Settings;
use atlas_index::runner::IndexRunner;
use atlas_index::store::{MemoryStore, RetryPolicy, RetryingStore};
use atlas_index::tags::TagTable;
use atlas_index::{IndexError, ATLAS_VERSION, PRODUCER_NAME};

/// Atlas - Building comfort index from environmental sensor data
#[derive(Parser)]
#[command(name = "atlas")]
#[command(version = ATLAS_VERSION)]
#[command(about = "Compute the ATLAS comfort index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute index rows up to now (batch mode)
    Run {
        /// Settings file (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Measurements file (NDJSON, use - for stdin)
        #[arg(short, long)]
        measurements: PathBuf,

        /// Device tag table (`;`-separated)
        #[arg(short, long)]
        tags: PathBuf,

        /// Previously computed index rows (NDJSON)
        #[arg(long)]
        index_in: Option<PathBuf>,

        /// Output file for all index rows (NDJSON, use - for stdout)
        #[arg(short = 'o', long)]
        index_out: PathBuf,

        /// Compute up to this instant instead of the current time (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Print the fingerprint of the index configuration
    Fingerprint {
        /// Settings file (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Validate a settings file
    CheckConfig {
        /// Settings file (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), AtlasCliError> {
    match cli.command {
        Commands::Run {
            config,
            measurements,
            tags,
            index_in,
            index_out,
            now,
        } => cmd_run(
            &config,
            &measurements,
            &tags,
            index_in.as_deref(),
            &index_out,
            now,
        ),

        Commands::Fingerprint { config } => cmd_fingerprint(&config),

        Commands::CheckConfig { config, json } => cmd_check_config(&config, json),
    }
}

fn read_input(path: &Path) -> Result<String, AtlasCliError> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn load_settings(path: &Path) -> Result<Settings, AtlasCliError> {
    Ok(Settings::from_yaml_str(&fs::read_to_string(path)?)?)
}

fn cmd_run(
    config: &Path,
    measurements: &Path,
    tags: &Path,
    index_in: Option<&Path>,
    index_out: &Path,
    now: Option<DateTime<Utc>>,
) -> Result<(), AtlasCliError> {
    let settings = load_settings(config)?;
    let table = TagTable::parse(&fs::read_to_string(tags)?)?;
    if table.is_empty() {
        return Err(AtlasCliError::NoDevices);
    }

    let mut memory = MemoryStore::with_synonyms(&settings.field_synonyms);
    let loaded = memory.load_measurements_ndjson(&read_input(measurements)?)?;
    tracing::info!(measurements = loaded, devices = table.len(), "loaded input");
    if let Some(path) = index_in {
        let previous = memory.load_index_ndjson(&fs::read_to_string(path)?)?;
        tracing::info!(rows = previous, "loaded previous index rows");
    }

    let mut store = RetryingStore::new(memory, RetryPolicy::from(&settings.store));
    let summary = {
        let mut runner = IndexRunner::new(&settings, &mut store, &table)?;
        match now {
            Some(now) => runner.run_until(now)?,
            None => runner.run()?,
        }
    };

    let output = store.into_inner().index_to_ndjson()?;
    if index_out.as_os_str() == "-" {
        io::stdout().write_all(output.as_bytes())?;
    } else {
        fs::write(index_out, output)?;
    }

    for (issue, count) in summary.quality.iter() {
        tracing::debug!(%issue, count, "skipped rows");
    }
    eprintln!(
        "{} {}: wrote {} index rows in {} chunks (fingerprint {}, {} rows skipped)",
        PRODUCER_NAME,
        ATLAS_VERSION,
        summary.index_rows_written(),
        summary.chunks.len(),
        summary.fingerprint,
        summary.quality.total()
    );
    Ok(())
}

fn cmd_fingerprint(config: &Path) -> Result<(), AtlasCliError> {
    let settings = load_settings(config)?;
    println!("{}", settings.fingerprint()?);
    Ok(())
}

fn cmd_check_config(config: &Path, json: bool) -> Result<(), AtlasCliError> {
    let mut checks: Vec<ConfigCheck> = Vec::new();

    let settings = match fs::read_to_string(config) {
        Ok(content) => match Settings::from_yaml_str(&content) {
            Ok(settings) => {
                checks.push(ConfigCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Ok,
                    message: "Settings parsed and validated".to_string(),
                });
                Some(settings)
            }
            Err(e) => {
                checks.push(ConfigCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                None
            }
        },
        Err(e) => {
            checks.push(ConfigCheck {
                name: "settings".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot read settings file: {}", e),
            });
            None
        }
    };

    let mut fingerprint = None;
    if let Some(settings) = &settings {
        let index = &settings.atlas_index;
        checks.push(ConfigCheck {
            name: "thresholds".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} threshold curves", index.thresholds.len()),
        });

        let categories = index.category_per_field();
        let unscored: Vec<&String> = index
            .thresholds
            .keys()
            .filter(|field| !categories.contains_key(*field))
            .collect();
        checks.push(if unscored.is_empty() {
            ConfigCheck {
                name: "categories".to_string(),
                status: CheckStatus::Ok,
                message: format!("{} categories", index.index_fields.len()),
            }
        } else {
            ConfigCheck {
                name: "categories".to_string(),
                status: CheckStatus::Warning,
                message: format!("Fields with thresholds but no category: {:?}", unscored),
            }
        });

        if index.weights.values().all(|w| *w == 0.0) {
            checks.push(ConfigCheck {
                name: "weights".to_string(),
                status: CheckStatus::Warning,
                message: "All category weights are zero".to_string(),
            });
        }

        fingerprint = Some(settings.fingerprint()?);
    }

    let report = ConfigReport {
        producer: PRODUCER_NAME.to_string(),
        version: ATLAS_VERSION.to_string(),
        fingerprint,
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Atlas Config Report");
        println!("===================");
        println!("Producer:    {}", report.producer);
        println!("Version:     {}", report.version);
        if let Some(fingerprint) = &report.fingerprint {
            println!("Fingerprint: {}", fingerprint);
        }
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(AtlasCliError::ConfigCheckFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum AtlasCliError {
    Io(io::Error),
    Index(IndexError),
    Json(serde_json::Error),
    NoDevices,
    ConfigCheckFailed,
}

impl From<io::Error> for AtlasCliError {
    fn from(e: io::Error) -> Self {
        AtlasCliError::Io(e)
    }
}

impl From<IndexError> for AtlasCliError {
    fn from(e: IndexError) -> Self {
        AtlasCliError::Index(e)
    }
}

impl From<serde_json::Error> for AtlasCliError {
    fn from(e: serde_json::Error) -> Self {
        AtlasCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AtlasCliError> for CliError {
    fn from(e: AtlasCliError) -> Self {
        match e {
            AtlasCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            AtlasCliError::Index(e) if e.is_config_error() => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'atlas check-config' for details".to_string()),
            },
            AtlasCliError::Index(e @ IndexError::ChunkFailed { .. }) => CliError {
                code: "CHUNK_FAILED".to_string(),
                message: e.to_string(),
                hint: Some("Earlier chunks were kept; rerun to resume".to_string()),
            },
            AtlasCliError::Index(e) => CliError {
                code: "INDEX_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check measurement and tag input format".to_string()),
            },
            AtlasCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            AtlasCliError::NoDevices => CliError {
                code: "NO_DEVICES".to_string(),
                message: "Tag table contains no devices with a unit number".to_string(),
                hint: Some("Ensure the table has 'device' and 'unit_number' columns".to_string()),
            },
            AtlasCliError::ConfigCheckFailed => CliError {
                code: "CONFIG_CHECK_FAILED".to_string(),
                message: "One or more configuration checks failed".to_string(),
                hint: Some("Review the config report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ConfigReport {
    producer: String,
    version: String,
    fingerprint: Option<String>,
    checks: Vec<ConfigCheck>,
}

#[derive(serde::Serialize)]
struct ConfigCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
