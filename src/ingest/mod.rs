/// Observation sources and the fetch layer.
///
/// Every backend implements `ObservationSource`. The rest of the crate only
/// sees the trait, the query types defined here, and `fetch_observations`,
/// which validates a query, retries transient failures and guarantees the
/// result order (date descending, then element code ascending).

pub mod bigquery;
pub mod fixture;
pub mod mirror;
pub mod retry;

use chrono::{Datelike, NaiveDate};
use std::sync::Arc;

use crate::config::{ServiceConfig, SourceKind};
use crate::logging::{self, DataSource};
use crate::model::{
    Element, ExceedanceCounts, Observation, StationObservation, WeatherError, WeatherResult,
};
use crate::stations;
use crate::units::Inches;
use retry::RetryPolicy;

/// Earliest year present in GHCN-Daily.
pub const MIN_GHCN_YEAR: i32 = 1763;

/// Upper bound on rows requested by the closest-station lookup.
pub const MAX_ROW_LIMIT: usize = 10_000;

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Daily observations for one station over an inclusive year range,
/// optionally narrowed by date and by a raw-value floor.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationQuery {
    pub station_id: String,
    pub elements: Vec<Element>,
    pub start_year: i32,
    pub end_year: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Keep only rows whose raw storage value is >= this.
    pub min_raw_value: Option<i32>,
}

impl ObservationQuery {
    pub fn new(station_id: &str, elements: &[Element], start_year: i32, end_year: i32) -> Self {
        Self {
            station_id: station_id.to_string(),
            elements: elements.to_vec(),
            start_year,
            end_year,
            start_date: None,
            end_date: None,
            min_raw_value: None,
        }
    }

    pub fn with_dates(mut self, start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    pub fn with_min_raw_value(mut self, min_raw_value: i32) -> Self {
        self.min_raw_value = Some(min_raw_value);
        self
    }

    pub fn validate(&self) -> WeatherResult<()> {
        stations::validate_station_id(&self.station_id)?;
        if self.elements.is_empty() {
            return Err(WeatherError::InvalidArgument(
                "at least one element is required".to_string(),
            ));
        }
        validate_year_range(self.start_year, self.end_year)?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(WeatherError::InvalidArgument(format!(
                    "start_date {} is after end_date {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// Whether an observation satisfies every filter of this query.
    pub fn matches(&self, obs: &Observation) -> bool {
        obs.station_id == self.station_id
            && self.elements.contains(&obs.element)
            && (self.start_year..=self.end_year).contains(&obs.date.year())
            && self.start_date.is_none_or(|d| obs.date >= d)
            && self.end_date.is_none_or(|d| obs.date <= d)
            && self.min_raw_value.is_none_or(|min| obs.raw_value >= min)
    }

    /// Human-readable description used in error context.
    pub fn describe(&self) -> String {
        format!(
            "station={} elements={} years={}..{}",
            self.station_id,
            element_codes(&self.elements).join(","),
            self.start_year,
            self.end_year
        )
    }
}

/// Observations from the station nearest to a point, for one year.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestStationQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub elements: Vec<Element>,
    pub year: i32,
    pub limit: usize,
}

impl NearestStationQuery {
    pub fn validate(&self) -> WeatherResult<()> {
        stations::validate_coordinates(self.latitude, self.longitude)?;
        if self.elements.is_empty() {
            return Err(WeatherError::InvalidArgument(
                "at least one element is required".to_string(),
            ));
        }
        validate_year_range(self.year, self.year)?;
        if self.limit == 0 || self.limit > MAX_ROW_LIMIT {
            return Err(WeatherError::InvalidArgument(format!(
                "limit must be between 1 and {}, got {}",
                MAX_ROW_LIMIT, self.limit
            )));
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!("lat={} lon={} year={}", self.latitude, self.longitude, self.year)
    }
}

/// Daily precipitation totals at or above a threshold for one station.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceedanceQuery {
    pub station_id: String,
    pub start_year: i32,
    pub end_year: i32,
    pub threshold: Inches,
}

impl ExceedanceQuery {
    pub fn validate(&self) -> WeatherResult<()> {
        stations::validate_station_id(&self.station_id)?;
        validate_year_range(self.start_year, self.end_year)?;
        if !self.threshold.0.is_finite() || self.threshold.0 < 0.0 {
            return Err(WeatherError::InvalidArgument(format!(
                "rainfall threshold must be a non-negative number of inches, got {}",
                self.threshold.0
            )));
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "station={} years={}..{} threshold_in={}",
            self.station_id, self.start_year, self.end_year, self.threshold.0
        )
    }
}

pub fn validate_year_range(start_year: i32, end_year: i32) -> WeatherResult<()> {
    for year in [start_year, end_year] {
        if !(MIN_GHCN_YEAR..=9999).contains(&year) {
            return Err(WeatherError::InvalidArgument(format!(
                "year {} is outside the GHCN-Daily record ({}..9999)",
                year, MIN_GHCN_YEAR
            )));
        }
    }
    if start_year > end_year {
        return Err(WeatherError::InvalidArgument(format!(
            "start_year {} is after end_year {}",
            start_year, end_year
        )));
    }
    Ok(())
}

pub fn element_codes(elements: &[Element]) -> Vec<&'static str> {
    elements.iter().map(Element::code).collect()
}

// ---------------------------------------------------------------------------
// Source abstraction
// ---------------------------------------------------------------------------

/// A backend that can answer the three GHCN-Daily queries the service needs.
///
/// Implementations receive already-validated queries.
pub trait ObservationSource: Send + Sync {
    /// Tag used in logs and error context.
    fn data_source(&self) -> DataSource;

    fn observations(&self, query: &ObservationQuery) -> WeatherResult<Vec<Observation>>;

    /// Rows come back ordered date descending, then element, and capped at
    /// `query.limit`. An empty vector means no station or no data.
    fn nearest_station_observations(
        &self,
        query: &NearestStationQuery,
    ) -> WeatherResult<Vec<StationObservation>>;

    fn precipitation_counts(&self, query: &ExceedanceQuery) -> WeatherResult<ExceedanceCounts>;
}

/// Build the backend selected in configuration.
pub fn connect(config: &ServiceConfig) -> WeatherResult<Arc<dyn ObservationSource>> {
    config.validate()?;
    let source: Arc<dyn ObservationSource> = match config.source {
        SourceKind::BigQuery => Arc::new(bigquery::BigQuerySource::new(&config.bigquery)?),
        SourceKind::Mirror => Arc::new(mirror::MirrorSource::connect(&config.mirror)?),
        SourceKind::Fixture => {
            let path = config.fixture.path.as_deref().ok_or_else(|| {
                WeatherError::Config("fixture.path is required for the fixture source".to_string())
            })?;
            Arc::new(fixture::FixtureSource::load(path)?)
        }
    };
    logging::info(source.data_source(), None, "observation source ready");
    Ok(source)
}

// ---------------------------------------------------------------------------
// Fetch layer
// ---------------------------------------------------------------------------

/// Order rows date descending, then element code ascending.
pub fn sort_fetch_order(observations: &mut [Observation]) {
    observations.sort_by(|a, b| b.date.cmp(&a.date).then(a.element.cmp(&b.element)));
}

/// Validate, fetch with retries, and return rows in fetch order.
pub fn fetch_observations(
    source: &dyn ObservationSource,
    retry: &RetryPolicy,
    query: &ObservationQuery,
) -> WeatherResult<Vec<Observation>> {
    query.validate()?;
    let station = Some(query.station_id.as_str());
    let mut rows = retry.run(source.data_source(), station, "observations", || {
        source.observations(query)
    })?;
    sort_fetch_order(&mut rows);
    logging::log_query_summary(source.data_source(), station, "observations", rows.len());
    Ok(rows)
}

pub fn fetch_nearest_station(
    source: &dyn ObservationSource,
    retry: &RetryPolicy,
    query: &NearestStationQuery,
) -> WeatherResult<Vec<StationObservation>> {
    query.validate()?;
    let mut rows = retry.run(source.data_source(), None, "nearest_station", || {
        source.nearest_station_observations(query)
    })?;
    rows.sort_by(|a, b| b.date.cmp(&a.date).then(a.element.cmp(&b.element)));
    rows.truncate(query.limit);
    let station = rows.first().map(|r| r.station_id.as_str());
    logging::log_query_summary(source.data_source(), station, "nearest_station", rows.len());
    Ok(rows)
}

pub fn fetch_precipitation_counts(
    source: &dyn ObservationSource,
    retry: &RetryPolicy,
    query: &ExceedanceQuery,
) -> WeatherResult<ExceedanceCounts> {
    query.validate()?;
    let station = Some(query.station_id.as_str());
    let counts = retry.run(source.data_source(), station, "precipitation_counts", || {
        source.precipitation_counts(query)
    })?;
    if counts.exceedance_count > counts.total_observations {
        return Err(WeatherError::MalformedResponse(format!(
            "exceedance count {} exceeds total {} for {}",
            counts.exceedance_count,
            counts.total_observations,
            query.describe()
        )));
    }
    logging::debug(
        source.data_source(),
        station,
        &format!(
            "{} of {} PRCP days at or above {} in",
            counts.exceedance_count, counts.total_observations, query.threshold.0
        ),
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn obs(date: NaiveDate, element: Element, raw_value: i32) -> Observation {
        Observation {
            station_id: "USC00045860".to_string(),
            date,
            element,
            raw_value,
        }
    }

    /// Returns canned responses in order, recording how often it was called.
    struct ScriptedSource {
        responses: Mutex<Vec<WeatherResult<Vec<Observation>>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedSource {
        fn new(mut responses: Vec<WeatherResult<Vec<Observation>>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }
    }

    impl ObservationSource for ScriptedSource {
        fn data_source(&self) -> DataSource {
            DataSource::Fixture
        }

        fn observations(&self, _query: &ObservationQuery) -> WeatherResult<Vec<Observation>> {
            *self.calls.lock().unwrap() += 1;
            self.responses.lock().unwrap().pop().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn nearest_station_observations(
            &self,
            _query: &NearestStationQuery,
        ) -> WeatherResult<Vec<StationObservation>> {
            Ok(Vec::new())
        }

        fn precipitation_counts(&self, _query: &ExceedanceQuery) -> WeatherResult<ExceedanceCounts> {
            Ok(ExceedanceCounts {
                exceedance_count: 5,
                total_observations: 2,
            })
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: std::time::Duration::ZERO,
            max_backoff: std::time::Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    #[test]
    fn test_sort_fetch_order() {
        let mut rows = vec![
            obs(date(2024, 7, 1), Element::Tmax, 300),
            obs(date(2024, 7, 2), Element::Tmin, 200),
            obs(date(2024, 7, 2), Element::Prcp, 0),
            obs(date(2024, 7, 2), Element::Tmax, 310),
        ];
        sort_fetch_order(&mut rows);
        let order: Vec<_> = rows.iter().map(|o| (o.date.day(), o.element.code())).collect();
        assert_eq!(order, vec![(2, "PRCP"), (2, "TMAX"), (2, "TMIN"), (1, "TMAX")]);
    }

    #[test]
    fn test_query_matches_filters() {
        let query = ObservationQuery::new("USC00045860", &[Element::Tmax], 2024, 2024)
            .with_dates(Some(date(2024, 6, 1)), None)
            .with_min_raw_value(350);
        assert!(query.matches(&obs(date(2024, 7, 1), Element::Tmax, 350)));
        assert!(!query.matches(&obs(date(2024, 7, 1), Element::Tmax, 349)));
        assert!(!query.matches(&obs(date(2024, 5, 31), Element::Tmax, 400)));
        assert!(!query.matches(&obs(date(2024, 7, 1), Element::Prcp, 400)));
        assert!(!query.matches(&obs(date(2023, 7, 1), Element::Tmax, 400)));
    }

    #[test]
    fn test_validation_rejects_bad_queries() {
        let base = ObservationQuery::new("USC00045860", &[Element::Tmax], 2020, 2024);
        assert!(base.validate().is_ok());

        let mut reversed = base.clone();
        reversed.start_year = 2025;
        assert!(matches!(reversed.validate(), Err(WeatherError::InvalidArgument(_))));

        let mut no_elements = base.clone();
        no_elements.elements.clear();
        assert!(no_elements.validate().is_err());

        let bad_dates = base.clone().with_dates(Some(date(2024, 2, 1)), Some(date(2024, 1, 1)));
        assert!(bad_dates.validate().is_err());

        let bad_station = ObservationQuery::new("x'; DROP", &[Element::Tmax], 2020, 2024);
        assert!(bad_station.validate().is_err());

        assert!(validate_year_range(1700, 1800).is_err());
    }

    #[test]
    fn test_nearest_query_limit_bounds() {
        let mut query = NearestStationQuery {
            latitude: 37.39,
            longitude: -122.08,
            elements: vec![Element::Tmax],
            year: 2024,
            limit: 0,
        };
        assert!(query.validate().is_err());
        query.limit = 10;
        assert!(query.validate().is_ok());
        query.latitude = 91.0;
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_exceedance_query_rejects_negative_threshold() {
        let query = ExceedanceQuery {
            station_id: "USC00045860".to_string(),
            start_year: 2015,
            end_year: 2024,
            threshold: Inches(-0.5),
        };
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_fetch_retries_transient_then_sorts() {
        let source = ScriptedSource::new(vec![
            Err(WeatherError::DataSourceUnavailable {
                data_source: DataSource::Fixture,
                context: "test".into(),
                detail: "timeout".into(),
                transient: true,
            }),
            Ok(vec![
                obs(date(2024, 7, 1), Element::Tmax, 300),
                obs(date(2024, 7, 3), Element::Tmax, 320),
            ]),
        ]);
        let query = ObservationQuery::new("USC00045860", &[Element::Tmax], 2024, 2024);
        let rows = fetch_observations(&source, &fast_retry(), &query).unwrap();
        assert_eq!(*source.calls.lock().unwrap(), 2);
        assert_eq!(rows[0].date, date(2024, 7, 3));
    }

    #[test]
    fn test_fetch_validates_before_calling_source() {
        let source = ScriptedSource::new(vec![]);
        let query = ObservationQuery::new("", &[Element::Tmax], 2024, 2024);
        assert!(fetch_observations(&source, &fast_retry(), &query).is_err());
        assert_eq!(*source.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_inconsistent_counts_are_malformed() {
        let source = ScriptedSource::new(vec![]);
        let query = ExceedanceQuery {
            station_id: "USC00045860".to_string(),
            start_year: 2015,
            end_year: 2024,
            threshold: Inches(2.0),
        };
        let err = fetch_precipitation_counts(&source, &fast_retry(), &query).unwrap_err();
        assert!(matches!(err, WeatherError::MalformedResponse(_)));
    }
}
