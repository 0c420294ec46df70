/// Core data types for the weather readiness service.
///
/// This module defines the shared domain model imported by all other modules:
/// GHCN element codes, observations as they come back from the query layer,
/// heat events, precipitation exceedance counts and the service-wide error
/// type. It contains no logic beyond small accessors, and no I/O.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::logging::DataSource;

// ---------------------------------------------------------------------------
// Element codes
// ---------------------------------------------------------------------------

/// A GHCN-Daily element code (the measured quantity).
///
/// Variants are declared in alphabetical order of their codes, so the derived
/// `Ord` matches the `ORDER BY element` tie-break of the fetch layer.
/// Metadata for each code lives in `elements::ELEMENT_REGISTRY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Element {
    Awnd,
    Prcp,
    Snow,
    Snwd,
    Tavg,
    Tmax,
    Tmin,
    Wsf2,
    Wt01,
    Wt03,
    Wt05,
}

impl Element {
    /// The GHCN code as stored in the `element` column.
    pub fn code(&self) -> &'static str {
        match self {
            Element::Awnd => "AWND",
            Element::Prcp => "PRCP",
            Element::Snow => "SNOW",
            Element::Snwd => "SNWD",
            Element::Tavg => "TAVG",
            Element::Tmax => "TMAX",
            Element::Tmin => "TMIN",
            Element::Wsf2 => "WSF2",
            Element::Wt01 => "WT01",
            Element::Wt03 => "WT03",
            Element::Wt05 => "WT05",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Default element set for the closest-station lookup.
pub const DEFAULT_LOOKUP_ELEMENTS: &[Element] = &[Element::Tmax, Element::Tmin, Element::Prcp];

/// Default element set for historical retrieval.
pub const DEFAULT_HISTORY_ELEMENTS: &[Element] = &[Element::Tmax, Element::Prcp];

// ---------------------------------------------------------------------------
// Observation types
// ---------------------------------------------------------------------------

/// A single daily measurement from a GHCN station.
///
/// `raw_value` is in the GHCN storage encoding: tenths of °C for TMAX/TMIN,
/// tenths of mm for PRCP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub station_id: String,
    pub date: NaiveDate,
    pub element: Element,
    pub raw_value: i32,
}

/// An observation with its metric and imperial values derived.
///
/// Produced by `units::convert`; only exists for elements with a defined
/// conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvertedObservation {
    pub date: NaiveDate,
    pub element: Element,
    pub value_metric: f64,
    pub value_imperial: f64,
    pub unit: &'static str,
}

/// One row of the closest-station lookup: an observation enriched with the
/// station's name and its distance from the requested point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationObservation {
    pub station_id: String,
    pub station_name: String,
    pub date: NaiveDate,
    pub element: Element,
    pub value: i32,
    pub distance_miles: f64,
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// A run of calendar-consecutive days with maximum temperature at or above
/// a threshold.
///
/// Only built by `analysis::heat_events`. Invariants:
///   start_date == days[0], end_date == days[last],
///   duration_days == days.len(), consecutive days differ by exactly one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatEvent {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: Vec<NaiveDate>,
    pub max_temp_f: f64,
    pub avg_temp_f: f64,
    pub duration_days: usize,
}

/// Daily precipitation totals at or above a threshold, out of all PRCP
/// observations in the analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExceedanceCounts {
    pub exceedance_count: u64,
    pub total_observations: u64,
}

/// Outcome classification carried by every tool response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    NoData,
    InsufficientData,
    PartialImplementation,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while validating, fetching or converting weather
/// data.
///
/// An empty result set is not an error: it is reported as
/// `ToolStatus::NoData` by the service layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeatherError {
    /// An argument failed validation at the function boundary.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The remote query failed (network, auth, timeout, HTTP status).
    /// `context` names the station and query parameters for reporting.
    #[error("{data_source} unavailable [{context}]: {detail}")]
    DataSourceUnavailable {
        data_source: DataSource,
        context: String,
        detail: String,
        transient: bool,
    },

    /// The remote payload could not be decoded into typed rows.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The element has no metric/imperial conversion.
    #[error("No unit conversion defined for element {0}")]
    UnsupportedConversion(Element),

    /// The operation exists in the tool catalogue but has no implementation.
    #[error("{feature} is not implemented")]
    NotImplemented {
        feature: String,
        next_steps: Vec<String>,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WeatherError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, WeatherError::DataSourceUnavailable { transient: true, .. })
    }

    /// Short type name reported to tool callers as `error_type`.
    pub fn kind(&self) -> &'static str {
        match self {
            WeatherError::InvalidArgument(_) => "InvalidArgument",
            WeatherError::DataSourceUnavailable { .. } => "DataSourceUnavailable",
            WeatherError::MalformedResponse(_) => "MalformedResponse",
            WeatherError::UnsupportedConversion(_) => "UnsupportedConversion",
            WeatherError::NotImplemented { .. } => "NotImplemented",
            WeatherError::Config(_) => "Config",
        }
    }
}

pub type WeatherResult<T> = Result<T, WeatherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_ordering_is_alphabetical_by_code() {
        let mut elements = vec![Element::Tmin, Element::Prcp, Element::Tmax, Element::Awnd];
        elements.sort();
        let codes: Vec<_> = elements.iter().map(|e| e.code()).collect();
        assert_eq!(codes, vec!["AWND", "PRCP", "TMAX", "TMIN"]);
    }

    #[test]
    fn test_element_serializes_as_ghcn_code() {
        assert_eq!(serde_json::to_string(&Element::Tmax).unwrap(), "\"TMAX\"");
        assert_eq!(serde_json::to_string(&Element::Wsf2).unwrap(), "\"WSF2\"");
        let parsed: Element = serde_json::from_str("\"PRCP\"").unwrap();
        assert_eq!(parsed, Element::Prcp);
    }

    #[test]
    fn test_tool_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ToolStatus::NoData).unwrap(), "\"no_data\"");
        assert_eq!(
            serde_json::to_string(&ToolStatus::PartialImplementation).unwrap(),
            "\"partial_implementation\""
        );
    }

    #[test]
    fn test_only_transient_source_failures_are_retryable() {
        let transient = WeatherError::DataSourceUnavailable {
            data_source: DataSource::BigQuery,
            context: "station=USC00045860".to_string(),
            detail: "HTTP 503".to_string(),
            transient: true,
        };
        let permanent = WeatherError::DataSourceUnavailable {
            data_source: DataSource::BigQuery,
            context: "station=USC00045860".to_string(),
            detail: "HTTP 403".to_string(),
            transient: false,
        };
        assert!(transient.is_transient());
        assert!(!permanent.is_transient());
        assert!(!WeatherError::InvalidArgument("x".into()).is_transient());
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = WeatherError::DataSourceUnavailable {
            data_source: DataSource::Mirror,
            context: "station=USW00023174 years=2019..2024".to_string(),
            detail: "connection refused".to_string(),
            transient: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("PG"), "message should name the source: {}", msg);
        assert!(msg.contains("USW00023174"), "message should name the station: {}", msg);
    }
}
