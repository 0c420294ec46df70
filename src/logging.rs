/// Structured logging for the weather readiness service
///
/// Provides context-rich logging with data source and station identifiers on
/// top of `tracing`. Output always goes to stderr (stdout carries the MCP
/// protocol) and optionally to an append-mode log file for daemon operation.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::model::WeatherError;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    BigQuery,
    Mirror,
    Fixture,
    Mcp,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::BigQuery => write!(f, "BQ"),
            DataSource::Mirror => write!(f, "PG"),
            DataSource::Fixture => write!(f, "FIXTURE"),
            DataSource::Mcp => write!(f, "MCP"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - caller error or a station with no record
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a failure by error kind and, for remote failures, by the detail
/// text returned from the source.
pub fn classify_failure(err: &WeatherError) -> FailureType {
    match err {
        WeatherError::InvalidArgument(_)
        | WeatherError::UnsupportedConversion(_)
        | WeatherError::NotImplemented { .. } => FailureType::Expected,
        WeatherError::MalformedResponse(_) | WeatherError::Config(_) => FailureType::Unexpected,
        WeatherError::DataSourceUnavailable { detail, transient, .. } => {
            // Auth and permission problems never fix themselves
            if detail.contains("HTTP 401") || detail.contains("HTTP 403") {
                FailureType::Unexpected
            }
            // Missing year tables are normal for stations/years without data
            else if detail.contains("Not found: Table") {
                FailureType::Expected
            } else if *transient {
                FailureType::Unknown
            } else {
                FailureType::Unexpected
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber Setup
// ---------------------------------------------------------------------------

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Returns an error
/// if the log file cannot be opened or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), WeatherError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| WeatherError::Config(format!("invalid log level '{}': {}", config.level, e)))?;

    let console = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = match &config.file {
        Some(path) => {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| WeatherError::Config(format!("cannot open log file {}: {}", path, e)))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(handle))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| WeatherError::Config(format!("logger already initialized: {}", e)))
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(source: DataSource, station_id: Option<&str>, message: &str) {
    tracing::info!(source = %source, station = station_id.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(source: DataSource, station_id: Option<&str>, message: &str) {
    tracing::warn!(source = %source, station = station_id.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(source: DataSource, station_id: Option<&str>, message: &str) {
    tracing::error!(source = %source, station = station_id.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(source: DataSource, station_id: Option<&str>, message: &str) {
    tracing::debug!(source = %source, station = station_id.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a failed operation with automatic classification
pub fn log_failure(source: DataSource, station_id: Option<&str>, operation: &str, err: &WeatherError) {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(source, station_id, &message),
        FailureType::Unexpected => error(source, station_id, &message),
        FailureType::Unknown => warn(source, station_id, &message),
    }
}

/// Log the row count of a completed query
pub fn log_query_summary(source: DataSource, station_id: Option<&str>, operation: &str, rows: usize) {
    let message = format!("{} returned {} row(s)", operation, rows);
    if rows == 0 {
        warn(source, station_id, &message);
    } else {
        info(source, station_id, &message);
    }
}
