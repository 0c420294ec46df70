/// Service configuration.
///
/// Settings come from a TOML file (every section optional, with defaults),
/// then secrets and connection strings are overlaid from the environment
/// after `.env` has been loaded:
///
///   GOOGLE_CLOUD_PROJECT   -> bigquery.project_id (if unset in the file)
///   BIGQUERY_ACCESS_TOKEN  -> bigquery access token (never read from TOML)
///   DATABASE_URL           -> mirror.url (if unset in the file)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::WeatherError;

/// Which observation backend the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// BigQuery public dataset over the REST API
    #[default]
    #[value(name = "bigquery")]
    BigQuery,
    /// Local PostgreSQL copy of GHCN-Daily
    Mirror,
    /// JSON replay file (development mode)
    Fixture,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub source: SourceKind,

    #[serde(default)]
    pub bigquery: BigQueryConfig,

    #[serde(default)]
    pub mirror: MirrorConfig,

    #[serde(default)]
    pub fixture: FixtureConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    /// Billing project for query jobs.
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default = "default_bigquery_endpoint")]
    pub endpoint: String,

    /// Fully qualified dataset holding the `ghcnd_*` tables.
    #[serde(default = "default_dataset")]
    pub dataset: String,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Page size for query results.
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    #[serde(skip)]
    pub access_token: Option<String>,
}

fn default_bigquery_endpoint() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_dataset() -> String {
    "bigquery-public-data.ghcn_d".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_results() -> u32 {
    10_000
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            endpoint: default_bigquery_endpoint(),
            dataset: default_dataset(),
            location: None,
            timeout_secs: default_timeout_secs(),
            max_results: default_max_results(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// libpq-style connection string.
    #[serde(default)]
    pub url: Option<String>,

    /// Schema holding the `stations` and `daily` tables.
    #[serde(default = "default_mirror_schema")]
    pub schema: String,
}

fn default_mirror_schema() -> String {
    "ghcn".to_string()
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            url: None,
            schema: default_mirror_schema(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,

    /// Optional append-mode log file.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl ServiceConfig {
    /// Load `.env`, then the TOML file at `path` if it exists (defaults
    /// otherwise), then overlay the environment.
    pub fn load(path: &Path) -> Result<Self, WeatherError> {
        dotenv::dotenv().ok();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                WeatherError::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, WeatherError> {
        toml::from_str(content)
            .map_err(|e| WeatherError::Config(format!("failed to parse configuration: {}", e)))
    }

    /// Overlay values from an environment lookup. File values win for
    /// everything except the access token, which is only read from the
    /// environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.bigquery.project_id.is_none() {
            self.bigquery.project_id = lookup("GOOGLE_CLOUD_PROJECT");
        }
        self.bigquery.access_token = lookup("BIGQUERY_ACCESS_TOKEN");
        if self.mirror.url.is_none() {
            self.mirror.url = lookup("DATABASE_URL");
        }
    }

    /// Check that the selected source has what it needs to connect.
    pub fn validate(&self) -> Result<(), WeatherError> {
        match self.source {
            SourceKind::BigQuery => {
                if self.bigquery.project_id.as_deref().is_none_or(str::is_empty) {
                    return Err(WeatherError::Config(
                        "bigquery.project_id (or GOOGLE_CLOUD_PROJECT) is required".to_string(),
                    ));
                }
                if self.bigquery.access_token.as_deref().is_none_or(str::is_empty) {
                    return Err(WeatherError::Config(
                        "BIGQUERY_ACCESS_TOKEN must be set for the bigquery source".to_string(),
                    ));
                }
                if self.bigquery.timeout_secs == 0 {
                    return Err(WeatherError::Config(
                        "bigquery.timeout_secs must be positive".to_string(),
                    ));
                }
            }
            SourceKind::Mirror => {
                if self.mirror.url.as_deref().is_none_or(str::is_empty) {
                    return Err(WeatherError::Config(
                        "mirror.url (or DATABASE_URL) is required for the mirror source".to_string(),
                    ));
                }
            }
            SourceKind::Fixture => {
                if self.fixture.path.is_none() {
                    return Err(WeatherError::Config(
                        "fixture.path is required for the fixture source".to_string(),
                    ));
                }
            }
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(WeatherError::Config(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        Ok(())
    }
}
