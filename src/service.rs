/// Weather readiness operations.
///
/// One method per tool. Each takes a typed request (deserialized from tool
/// arguments, with the defaults applied by serde), validates it before any
/// remote call, fetches through the shared source with retries, runs the
/// analysis and returns a serializable report carrying a `status`.
///
/// Requests that depend on "now" accept an optional `current_year`, so
/// tests pin the clock instead of reading it.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use crate::analysis::{flood_probability, heat_events};
use crate::elements::{self, ELEMENT_REGISTRY};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::{self, ExceedanceQuery, NearestStationQuery, ObservationQuery, ObservationSource};
use crate::logging::{self, DataSource};
use crate::model::{
    ConvertedObservation, DEFAULT_HISTORY_ELEMENTS, DEFAULT_LOOKUP_ELEMENTS, Element, HeatEvent,
    StationObservation, ToolStatus, WeatherError, WeatherResult,
};
use crate::stations;
use crate::units::{self, Fahrenheit, Inches};

/// Longest lookback accepted by the analysis tools.
pub const MAX_LOOKBACK_YEARS: u32 = 100;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

fn default_limit() -> usize {
    10
}

fn default_heat_lookback() -> u32 {
    5
}

fn default_temperature_threshold() -> f64 {
    95.0
}

fn default_consecutive_days() -> u32 {
    3
}

fn default_flood_lookback() -> u32 {
    10
}

fn default_time_window_hours() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClosestStationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub elements: Option<Vec<String>>,
    /// Year table to query; defaults to the current year.
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoricalWeatherRequest {
    pub station_id: String,
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default)]
    pub elements: Option<Vec<String>>,
    /// YYYY-MM-DD
    #[serde(default)]
    pub start_date: Option<String>,
    /// YYYY-MM-DD
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeatEventRequest {
    pub station_id: String,
    #[serde(default = "default_heat_lookback")]
    pub lookback_years: u32,
    #[serde(default = "default_temperature_threshold")]
    pub temperature_threshold_f: f64,
    #[serde(default = "default_consecutive_days")]
    pub consecutive_days: u32,
    #[serde(default)]
    pub current_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FloodProbabilityRequest {
    pub station_id: String,
    pub rainfall_threshold_inches: f64,
    #[serde(default = "default_flood_lookback")]
    pub lookback_years: u32,
    /// Recorded in the criteria. GHCN-Daily totals are per day, so this
    /// does not change the computation.
    #[serde(default = "default_time_window_hours")]
    pub time_window_hours: u32,
    #[serde(default)]
    pub current_year: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeFilter {
    #[default]
    BelowCityMedian,
    BelowStateMedian,
    BelowNationalMedian,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityFilter {
    #[default]
    AboveCityAverage,
    AboveStateAverage,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CensusTractRequest {
    #[serde(default)]
    pub city_name: Option<String>,
    #[serde(default)]
    pub state_code: Option<String>,
    /// `[longitude, latitude]` pairs.
    #[serde(default)]
    pub path_coordinates: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub income_filter: IncomeFilter,
    #[serde(default)]
    pub custom_income_threshold: Option<f64>,
    #[serde(default)]
    pub population_density_filter: DensityFilter,
    #[serde(default)]
    pub custom_density_threshold: Option<f64>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosestStationReport {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_miles: Option<f64>,
    pub location: Location,
    pub year: i32,
    pub data: Vec<StationObservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub start_year: i32,
    pub end_year: i32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalWeatherReport {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub station_id: String,
    pub date_range: DateRange,
    pub elements: Vec<Element>,
    pub record_count: usize,
    pub data: Vec<ConvertedObservation>,
    pub unit_conversions: BTreeMap<&'static str, &'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnalysisPeriod {
    pub start_year: i32,
    pub end_year: i32,
    pub lookback_years: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatCriteria {
    pub temperature_threshold_f: f64,
    pub consecutive_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatEventReport {
    pub status: ToolStatus,
    pub station_id: String,
    pub analysis_period: AnalysisPeriod,
    pub criteria: HeatCriteria,
    pub heat_events_count: usize,
    pub heat_events: Vec<HeatEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FloodCriteria {
    pub rainfall_threshold_inches: f64,
    pub time_window_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloodProbabilityReport {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub station_id: String,
    pub analysis_period: AnalysisPeriod,
    pub criteria: FloodCriteria,
    pub exceedance_count: u64,
    pub total_observations: u64,
    /// Rounded to two decimals.
    pub probability_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<flood_probability::RiskBand>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct WeatherService {
    source: Arc<dyn ObservationSource>,
    retry: RetryPolicy,
}

fn current_year(requested: Option<i32>) -> i32 {
    requested.unwrap_or_else(|| Utc::now().year())
}

fn parse_date(field: &str, value: Option<&str>) -> WeatherResult<Option<NaiveDate>> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
                WeatherError::InvalidArgument(format!("{} '{}' is not a YYYY-MM-DD date", field, raw))
            })
        })
        .transpose()
}

fn parse_elements(requested: Option<&[String]>, default: &[Element]) -> WeatherResult<Vec<Element>> {
    match requested {
        Some(codes) => elements::parse_element_list(codes),
        None => Ok(default.to_vec()),
    }
}

fn lookback_period(lookback_years: u32, current: Option<i32>) -> WeatherResult<AnalysisPeriod> {
    if lookback_years > MAX_LOOKBACK_YEARS {
        return Err(WeatherError::InvalidArgument(format!(
            "lookback_years must be at most {}, got {}",
            MAX_LOOKBACK_YEARS, lookback_years
        )));
    }
    let end_year = current_year(current);
    ingest::validate_year_range(end_year, end_year)?;
    let start_year = end_year.checked_sub(lookback_years as i32).ok_or_else(|| {
        WeatherError::InvalidArgument(format!(
            "lookback of {} years from {} is out of range",
            lookback_years, end_year
        ))
    })?;
    ingest::validate_year_range(start_year, end_year)?;
    Ok(AnalysisPeriod { start_year, end_year, lookback_years })
}

/// Conversion labels for every element that has one.
fn unit_conversions() -> BTreeMap<&'static str, &'static str> {
    ELEMENT_REGISTRY
        .iter()
        .filter_map(|info| info.imperial_unit.map(|unit| (info.code, unit)))
        .collect()
}

impl WeatherService {
    pub fn new(source: Arc<dyn ObservationSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    pub fn data_source(&self) -> DataSource {
        self.source.data_source()
    }

    /// Nearest station to a point and its most recent rows for one year.
    pub fn find_closest_station_and_get_data(
        &self,
        request: &ClosestStationRequest,
    ) -> WeatherResult<ClosestStationReport> {
        stations::validate_coordinates(request.latitude, request.longitude)?;
        let query = NearestStationQuery {
            latitude: request.latitude,
            longitude: request.longitude,
            elements: parse_elements(request.elements.as_deref(), DEFAULT_LOOKUP_ELEMENTS)?,
            year: current_year(request.year),
            limit: request.limit,
        };

        let rows = ingest::fetch_nearest_station(self.source.as_ref(), &self.retry, &query)?;
        let location = Location { latitude: request.latitude, longitude: request.longitude };

        let Some(first) = rows.first() else {
            return Ok(ClosestStationReport {
                status: ToolStatus::NoData,
                message: Some(format!(
                    "No weather station found near ({}, {}) with {} data",
                    request.latitude, request.longitude, query.year
                )),
                station_id: None,
                station_name: None,
                distance_miles: None,
                location,
                year: query.year,
                data: Vec::new(),
            });
        };

        Ok(ClosestStationReport {
            status: ToolStatus::Success,
            message: None,
            station_id: Some(first.station_id.clone()),
            station_name: Some(first.station_name.clone()),
            distance_miles: Some(units::round_to(first.distance_miles, 2)),
            location,
            year: query.year,
            data: rows,
        })
    }

    /// Multi-year history for one station with metric and imperial values.
    pub fn get_historical_weather_with_conversions(
        &self,
        request: &HistoricalWeatherRequest,
    ) -> WeatherResult<HistoricalWeatherReport> {
        let station_id = stations::validate_station_id(&request.station_id)?;
        let elements = parse_elements(request.elements.as_deref(), DEFAULT_HISTORY_ELEMENTS)?;
        if let Some(element) = elements.iter().find(|e| !elements::is_convertible(**e)) {
            return Err(WeatherError::InvalidArgument(format!(
                "element {} has no unit conversion; use TMAX, TMIN or PRCP",
                element
            )));
        }
        let start_date = parse_date("start_date", request.start_date.as_deref())?;
        let end_date = parse_date("end_date", request.end_date.as_deref())?;

        let query = ObservationQuery::new(station_id, &elements, request.start_year, request.end_year)
            .with_dates(start_date, end_date);
        let rows = ingest::fetch_observations(self.source.as_ref(), &self.retry, &query)?;

        let data = rows
            .iter()
            .map(|obs| {
                units::convert(obs).map(|converted| ConvertedObservation {
                    value_imperial: units::round_to(converted.value_imperial, 2),
                    ..converted
                })
            })
            .collect::<WeatherResult<Vec<_>>>()?;

        let (status, message) = if data.is_empty() {
            (
                ToolStatus::NoData,
                Some(format!(
                    "No {} observations for {} between {} and {}",
                    ingest::element_codes(&elements).join("/"),
                    station_id,
                    request.start_year,
                    request.end_year
                )),
            )
        } else {
            (ToolStatus::Success, None)
        };

        Ok(HistoricalWeatherReport {
            status,
            message,
            station_id: station_id.to_string(),
            date_range: DateRange {
                start_year: request.start_year,
                end_year: request.end_year,
                start_date,
                end_date,
            },
            elements,
            record_count: data.len(),
            data,
            unit_conversions: unit_conversions(),
        })
    }

    /// Heat waves over the last `lookback_years` years.
    pub fn analyze_heat_events(&self, request: &HeatEventRequest) -> WeatherResult<HeatEventReport> {
        let station_id = stations::validate_station_id(&request.station_id)?;
        if !request.temperature_threshold_f.is_finite() {
            return Err(WeatherError::InvalidArgument(format!(
                "temperature_threshold_f must be a finite number, got {}",
                request.temperature_threshold_f
            )));
        }
        if request.consecutive_days == 0 {
            return Err(WeatherError::InvalidArgument(
                "consecutive_days must be at least 1".to_string(),
            ));
        }
        let period = lookback_period(request.lookback_years, request.current_year)?;

        // Storage-unit floor keeps every row whose °F value could qualify.
        let floor = units::fahrenheit_to_tenths_celsius(Fahrenheit(request.temperature_threshold_f))
            .floor()
            .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
        let query = ObservationQuery::new(station_id, &[Element::Tmax], period.start_year, period.end_year)
            .with_min_raw_value(floor);
        let rows = ingest::fetch_observations(self.source.as_ref(), &self.retry, &query)?;

        let events: Vec<HeatEvent> = heat_events::detect(
            &rows,
            request.temperature_threshold_f,
            request.consecutive_days as usize,
        )
        .into_iter()
        .map(|event| HeatEvent {
            max_temp_f: units::round_to(event.max_temp_f, 1),
            avg_temp_f: units::round_to(event.avg_temp_f, 1),
            ..event
        })
        .collect();

        logging::info(
            self.data_source(),
            Some(station_id),
            &format!(
                "{} heat event(s) >= {} °F for {}+ days in {}..{}",
                events.len(),
                request.temperature_threshold_f,
                request.consecutive_days,
                period.start_year,
                period.end_year
            ),
        );

        Ok(HeatEventReport {
            status: ToolStatus::Success,
            station_id: station_id.to_string(),
            analysis_period: period,
            criteria: HeatCriteria {
                temperature_threshold_f: request.temperature_threshold_f,
                consecutive_days: request.consecutive_days,
            },
            heat_events_count: events.len(),
            heat_events: events,
        })
    }

    /// Share of days with rainfall at or above a threshold, with a risk band.
    pub fn calculate_flood_probability(
        &self,
        request: &FloodProbabilityRequest,
    ) -> WeatherResult<FloodProbabilityReport> {
        let station_id = stations::validate_station_id(&request.station_id)?;
        if request.time_window_hours == 0 {
            return Err(WeatherError::InvalidArgument(
                "time_window_hours must be at least 1".to_string(),
            ));
        }
        let period = lookback_period(request.lookback_years, request.current_year)?;

        let query = ExceedanceQuery {
            station_id: station_id.to_string(),
            start_year: period.start_year,
            end_year: period.end_year,
            threshold: Inches(request.rainfall_threshold_inches),
        };
        let counts = ingest::fetch_precipitation_counts(self.source.as_ref(), &self.retry, &query)?;
        let estimate = flood_probability::estimate(counts);

        let message = (estimate.status == ToolStatus::InsufficientData)
            .then(|| "No precipitation data available for this station".to_string());

        Ok(FloodProbabilityReport {
            status: estimate.status,
            message,
            station_id: station_id.to_string(),
            analysis_period: period,
            criteria: FloodCriteria {
                rainfall_threshold_inches: request.rainfall_threshold_inches,
                time_window_hours: request.time_window_hours,
            },
            exceedance_count: counts.exceedance_count,
            total_observations: counts.total_observations,
            probability_percent: units::round_to(estimate.probability_percent, 2),
            interpretation: estimate.interpretation,
        })
    }

    /// Census tract vulnerability lookup.
    ///
    /// Arguments are validated, then the call fails with `NotImplemented`:
    /// there is no census backend, and no data is ever fabricated.
    pub fn get_census_tract_vulnerabilities(
        &self,
        request: &CensusTractRequest,
    ) -> WeatherResult<Infallible> {
        if let Some(state) = &request.state_code {
            if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(WeatherError::InvalidArgument(format!(
                    "state_code must be a two-letter code, got '{}'",
                    state
                )));
            }
        }
        if let Some(path) = &request.path_coordinates {
            for pair in path {
                let [lon, lat] = pair.as_slice() else {
                    return Err(WeatherError::InvalidArgument(format!(
                        "path_coordinates entries must be [longitude, latitude], got {:?}",
                        pair
                    )));
                };
                stations::validate_coordinates(*lat, *lon)?;
            }
        }
        if let Some(bbox) = &request.bounding_box {
            stations::validate_coordinates(bbox.min_lat, bbox.min_lon)?;
            stations::validate_coordinates(bbox.max_lat, bbox.max_lon)?;
            if bbox.min_lat > bbox.max_lat || bbox.min_lon > bbox.max_lon {
                return Err(WeatherError::InvalidArgument(
                    "bounding_box minimums must not exceed maximums".to_string(),
                ));
            }
        }
        if request.income_filter == IncomeFilter::Custom && request.custom_income_threshold.is_none() {
            return Err(WeatherError::InvalidArgument(
                "custom_income_threshold is required when income_filter is 'custom'".to_string(),
            ));
        }
        if request.population_density_filter == DensityFilter::Custom
            && request.custom_density_threshold.is_none()
        {
            return Err(WeatherError::InvalidArgument(
                "custom_density_threshold is required when population_density_filter is 'custom'"
                    .to_string(),
            ));
        }

        logging::warn(
            DataSource::System,
            None,
            "census tract vulnerability analysis requested but not implemented",
        );
        Err(WeatherError::NotImplemented {
            feature: "Census tract vulnerability analysis".to_string(),
            next_steps: vec![
                "Configure access to bigquery-public-data.census_bureau_acs tables".to_string(),
                "Set up geospatial indexing for storm path analysis".to_string(),
                "Define vulnerability thresholds based on local baselines".to_string(),
            ],
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixture::FixtureSource;
    use crate::model::Observation;
    use crate::stations::StationInfo;

    const PHOENIX: &str = "USW00023183";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn obs(date: NaiveDate, element: Element, raw_value: i32) -> Observation {
        Observation { station_id: PHOENIX.to_string(), date, element, raw_value }
    }

    fn service_with(observations: Vec<Observation>) -> WeatherService {
        let stations = vec![StationInfo {
            id: PHOENIX.to_string(),
            name: "PHOENIX AIRPORT, AZ".to_string(),
            latitude: 33.4278,
            longitude: -112.0037,
        }];
        WeatherService::new(
            Arc::new(FixtureSource::new(stations, observations)),
            RetryPolicy::no_retry(),
        )
    }

    fn heat_request() -> HeatEventRequest {
        serde_json::from_value(serde_json::json!({
            "station_id": PHOENIX,
            "current_year": 2024
        }))
        .unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let request = heat_request();
        assert_eq!(request.lookback_years, 5);
        assert_eq!(request.temperature_threshold_f, 95.0);
        assert_eq!(request.consecutive_days, 3);

        let flood: FloodProbabilityRequest = serde_json::from_value(serde_json::json!({
            "station_id": PHOENIX,
            "rainfall_threshold_inches": 3.0
        }))
        .unwrap();
        assert_eq!(flood.lookback_years, 10);
        assert_eq!(flood.time_window_hours, 1);

        let census: CensusTractRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(census.income_filter, IncomeFilter::BelowCityMedian);
        assert_eq!(census.population_density_filter, DensityFilter::AboveCityAverage);
    }

    #[test]
    fn test_unknown_argument_is_rejected() {
        let result: Result<HeatEventRequest, _> = serde_json::from_value(serde_json::json!({
            "station_id": PHOENIX,
            "threshold": 100
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_closest_station_success() {
        let service = service_with(vec![
            obs(date(2024, 7, 10), Element::Tmax, 456),
            obs(date(2024, 7, 11), Element::Tmax, 461),
            obs(date(2024, 7, 11), Element::Prcp, 0),
        ]);
        let report = service
            .find_closest_station_and_get_data(&ClosestStationRequest {
                latitude: 33.45,
                longitude: -112.07,
                elements: None,
                year: Some(2024),
                limit: 2,
            })
            .unwrap();

        assert_eq!(report.status, ToolStatus::Success);
        assert_eq!(report.station_id.as_deref(), Some(PHOENIX));
        assert_eq!(report.data.len(), 2);
        assert_eq!(report.data[0].date, date(2024, 7, 11));
        let miles = report.distance_miles.unwrap();
        assert_eq!(miles, units::round_to(miles, 2));
    }

    #[test]
    fn test_closest_station_no_data_for_year() {
        let service = service_with(vec![obs(date(2024, 7, 10), Element::Tmax, 456)]);
        let report = service
            .find_closest_station_and_get_data(&ClosestStationRequest {
                latitude: 33.45,
                longitude: -112.07,
                elements: None,
                year: Some(1990),
                limit: 10,
            })
            .unwrap();
        assert_eq!(report.status, ToolStatus::NoData);
        assert!(report.data.is_empty());
        assert!(report.message.is_some());
    }

    #[test]
    fn test_closest_station_validates_latitude() {
        let service = service_with(Vec::new());
        let err = service
            .find_closest_station_and_get_data(&ClosestStationRequest {
                latitude: 91.0,
                longitude: 0.0,
                elements: None,
                year: Some(2024),
                limit: 10,
            })
            .unwrap_err();
        assert_eq!(
            err,
            WeatherError::InvalidArgument("Latitude must be between -90 and 90, got 91".to_string())
        );
    }

    #[test]
    fn test_historical_conversions() {
        let service = service_with(vec![
            obs(date(2022, 8, 1), Element::Tmax, 350),
            obs(date(2022, 8, 1), Element::Prcp, 760),
            obs(date(2022, 8, 2), Element::Tmax, 361),
        ]);
        let request = HistoricalWeatherRequest {
            station_id: PHOENIX.to_string(),
            start_year: 2020,
            end_year: 2024,
            elements: None,
            start_date: None,
            end_date: None,
        };
        let report = service.get_historical_weather_with_conversions(&request).unwrap();

        assert_eq!(report.status, ToolStatus::Success);
        assert_eq!(report.record_count, 3);
        assert_eq!(report.data[0].date, date(2022, 8, 2));
        assert_eq!(report.data[1].element, Element::Prcp);
        assert_eq!(report.data[1].value_metric, 76.0);
        assert_eq!(report.data[1].value_imperial, 2.99);
        assert_eq!(report.data[2].value_imperial, 95.0);
        assert_eq!(report.unit_conversions.get("TMAX"), Some(&"degrees Fahrenheit"));
        assert_eq!(report.unit_conversions.get("PRCP"), Some(&"inches"));
    }

    #[test]
    fn test_historical_rejects_unconvertible_elements_and_bad_dates() {
        let service = service_with(Vec::new());
        let mut request = HistoricalWeatherRequest {
            station_id: PHOENIX.to_string(),
            start_year: 2020,
            end_year: 2024,
            elements: Some(vec!["TMAX".to_string(), "SNOW".to_string()]),
            start_date: None,
            end_date: None,
        };
        let err = service.get_historical_weather_with_conversions(&request).unwrap_err();
        assert!(err.to_string().contains("SNOW"), "got: {}", err);

        request.elements = None;
        request.start_date = Some("06/01/2024".to_string());
        assert!(matches!(
            service.get_historical_weather_with_conversions(&request),
            Err(WeatherError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_historical_empty_is_no_data() {
        let service = service_with(Vec::new());
        let report = service
            .get_historical_weather_with_conversions(&HistoricalWeatherRequest {
                station_id: PHOENIX.to_string(),
                start_year: 2020,
                end_year: 2024,
                elements: None,
                start_date: Some("2024-06-01".to_string()),
                end_date: Some("2024-06-30".to_string()),
            })
            .unwrap();
        assert_eq!(report.status, ToolStatus::NoData);
        assert_eq!(report.record_count, 0);
        assert_eq!(report.date_range.start_date, Some(date(2024, 6, 1)));
    }

    #[test]
    fn test_heat_events_end_to_end() {
        // 35.6, 36.1, 34.4, 36.7, 37.2, 37.8 °C on Jun 1..6.
        let raw = [356, 361, 344, 367, 372, 378];
        let rows = raw
            .iter()
            .enumerate()
            .map(|(i, &v)| obs(date(2023, 6, 1 + i as u32), Element::Tmax, v))
            .collect();
        let report = service_with(rows).analyze_heat_events(&heat_request()).unwrap();

        assert_eq!(report.status, ToolStatus::Success);
        assert_eq!(report.analysis_period.start_year, 2019);
        assert_eq!(report.analysis_period.end_year, 2024);
        assert_eq!(report.heat_events_count, 1);
        let event = &report.heat_events[0];
        assert_eq!(event.start_date, date(2023, 6, 4));
        assert_eq!(event.end_date, date(2023, 6, 6));
        assert_eq!(event.max_temp_f, 100.0);
        assert_eq!(event.avg_temp_f, 99.0);
    }

    #[test]
    fn test_heat_events_prefilter_keeps_boundary_rows() {
        // 35.0 °C is exactly 95 °F and must survive the storage-unit prefilter.
        let rows = (1..=3).map(|d| obs(date(2024, 7, d), Element::Tmax, 350)).collect();
        let report = service_with(rows).analyze_heat_events(&heat_request()).unwrap();
        assert_eq!(report.heat_events_count, 1);
    }

    #[test]
    fn test_heat_events_validation() {
        let service = service_with(Vec::new());
        let mut request = heat_request();
        request.consecutive_days = 0;
        assert!(matches!(service.analyze_heat_events(&request), Err(WeatherError::InvalidArgument(_))));

        let mut request = heat_request();
        request.temperature_threshold_f = f64::INFINITY;
        assert!(service.analyze_heat_events(&request).is_err());

        let mut request = heat_request();
        request.lookback_years = 500;
        assert!(service.analyze_heat_events(&request).is_err());
    }

    #[test]
    fn test_extreme_current_year_is_rejected_not_overflowed() {
        let service = service_with(Vec::new());
        for year in [i32::MIN, i32::MAX, 1763] {
            let mut heat = heat_request();
            heat.current_year = Some(year);
            assert!(
                matches!(service.analyze_heat_events(&heat), Err(WeatherError::InvalidArgument(_))),
                "heat current_year {}",
                year
            );

            let flood = FloodProbabilityRequest {
                station_id: PHOENIX.to_string(),
                rainfall_threshold_inches: 3.0,
                lookback_years: 10,
                time_window_hours: 1,
                current_year: Some(year),
            };
            assert!(
                matches!(service.calculate_flood_probability(&flood), Err(WeatherError::InvalidArgument(_))),
                "flood current_year {}",
                year
            );
        }
    }

    #[test]
    fn test_flood_probability_report() {
        let mut rows: Vec<Observation> =
            (1..=30).map(|d| obs(date(2021, 9, d), Element::Prcp, 0)).collect();
        rows[0].raw_value = 800;
        rows[1].raw_value = 900;
        let service = service_with(rows);
        let report = service
            .calculate_flood_probability(&FloodProbabilityRequest {
                station_id: PHOENIX.to_string(),
                rainfall_threshold_inches: 3.0,
                lookback_years: 10,
                time_window_hours: 1,
                current_year: Some(2024),
            })
            .unwrap();

        assert_eq!(report.status, ToolStatus::Success);
        assert_eq!(report.exceedance_count, 2);
        assert_eq!(report.total_observations, 30);
        assert_eq!(report.probability_percent, 6.67);
        assert_eq!(report.interpretation, Some(flood_probability::RiskBand::Moderate));
        assert_eq!(report.analysis_period.start_year, 2014);
    }

    #[test]
    fn test_flood_probability_insufficient_data() {
        let report = service_with(Vec::new())
            .calculate_flood_probability(&FloodProbabilityRequest {
                station_id: PHOENIX.to_string(),
                rainfall_threshold_inches: 3.0,
                lookback_years: 10,
                time_window_hours: 1,
                current_year: Some(2024),
            })
            .unwrap();
        assert_eq!(report.status, ToolStatus::InsufficientData);
        assert_eq!(report.probability_percent, 0.0);
        assert!(report.interpretation.is_none());
        assert!(report.message.is_some());
    }

    #[test]
    fn test_flood_probability_rejects_negative_threshold() {
        let err = service_with(Vec::new())
            .calculate_flood_probability(&FloodProbabilityRequest {
                station_id: PHOENIX.to_string(),
                rainfall_threshold_inches: -1.0,
                lookback_years: 10,
                time_window_hours: 1,
                current_year: Some(2024),
            })
            .unwrap_err();
        assert!(matches!(err, WeatherError::InvalidArgument(_)));
    }

    #[test]
    fn test_census_is_not_implemented_after_validation() {
        let service = service_with(Vec::new());
        let request: CensusTractRequest = serde_json::from_value(serde_json::json!({
            "city_name": "San Jose",
            "state_code": "CA",
            "bounding_box": {"min_lat": 37.2, "max_lat": 37.5, "min_lon": -122.2, "max_lon": -121.8}
        }))
        .unwrap();
        let err = service.get_census_tract_vulnerabilities(&request).unwrap_err();
        assert!(matches!(err, WeatherError::NotImplemented { ref next_steps, .. } if next_steps.len() == 3));
    }

    #[test]
    fn test_census_validates_inputs() {
        let service = service_with(Vec::new());

        let bad_enum: Result<CensusTractRequest, _> =
            serde_json::from_value(serde_json::json!({"income_filter": "richest"}));
        assert!(bad_enum.is_err());

        let custom_without_threshold: CensusTractRequest =
            serde_json::from_value(serde_json::json!({"income_filter": "custom"})).unwrap();
        assert!(matches!(
            service.get_census_tract_vulnerabilities(&custom_without_threshold),
            Err(WeatherError::InvalidArgument(_))
        ));

        let bad_path: CensusTractRequest =
            serde_json::from_value(serde_json::json!({"path_coordinates": [[-122.0]]})).unwrap();
        assert!(matches!(
            service.get_census_tract_vulnerabilities(&bad_path),
            Err(WeatherError::InvalidArgument(_))
        ));

        let bad_state: CensusTractRequest =
            serde_json::from_value(serde_json::json!({"state_code": "California"})).unwrap();
        assert!(service.get_census_tract_vulnerabilities(&bad_state).is_err());
    }
}
