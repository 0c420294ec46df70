/// Weather data tools exposed over MCP

use serde_json::{Value, json};
use std::sync::Arc;

use super::{
    Tool, ToolRegistry, json_schema_array, json_schema_enum, json_schema_integer, json_schema_number,
    json_schema_object, json_schema_string, parse_arguments, to_json,
};
use crate::elements;
use crate::mcp::protocol::ToolSchema;
use crate::model::WeatherResult;
use crate::service::{
    ClosestStationRequest, CensusTractRequest, FloodProbabilityRequest, HeatEventRequest,
    HistoricalWeatherRequest, WeatherService,
};

fn element_list_schema(default: &[&str]) -> Value {
    let description = format!("GHCN element codes: {}", elements::describe_codes());
    let mut schema = json_schema_array(json!({"type": "string"}), &description);
    schema["default"] = json!(default);
    schema
}

/// Registers the five weather tools in catalogue order.
pub fn register_weather_tools(registry: &mut ToolRegistry, service: Arc<WeatherService>) {
    registry.register(Arc::new(ClosestStationTool::new(Arc::clone(&service))));
    registry.register(Arc::new(HistoricalWeatherTool::new(Arc::clone(&service))));
    registry.register(Arc::new(HeatEventsTool::new(Arc::clone(&service))));
    registry.register(Arc::new(FloodProbabilityTool::new(Arc::clone(&service))));
    registry.register(Arc::new(CensusTractTool::new(service)));
}

/// Closest GHCN station plus its most recent observations.
pub struct ClosestStationTool {
    service: Arc<WeatherService>,
}

impl ClosestStationTool {
    pub const NAME: &'static str = "find_closest_station_and_get_data";

    pub fn new(service: Arc<WeatherService>) -> Self {
        Self { service }
    }
}

impl Tool for ClosestStationTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.to_string(),
            description: "Finds the closest GHCN weather station to a target location and retrieves \
                          recent weather data. Combines station lookup with immediate data retrieval."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "latitude": json_schema_number("Target latitude in decimal degrees, -90 to 90 (e.g., 37.39)"),
                    "longitude": json_schema_number("Target longitude in decimal degrees, -180 to 180 (e.g., -122.08)"),
                    "elements": element_list_schema(&["TMAX", "TMIN", "PRCP"]),
                    "year": json_schema_integer("Year table to query. Defaults to the current year.", None),
                    "limit": json_schema_integer("Maximum number of records to return", Some(10))
                }),
                vec!["latitude", "longitude"],
            ),
        }
    }

    fn execute(&self, arguments: Value) -> WeatherResult<Value> {
        let request: ClosestStationRequest = parse_arguments(Self::NAME, arguments)?;
        to_json(&self.service.find_closest_station_and_get_data(&request)?)
    }
}

/// Multi-year station history with unit conversions.
pub struct HistoricalWeatherTool {
    service: Arc<WeatherService>,
}

impl HistoricalWeatherTool {
    pub const NAME: &'static str = "get_historical_weather_with_conversions";

    pub fn new(service: Arc<WeatherService>) -> Self {
        Self { service }
    }
}

impl Tool for HistoricalWeatherTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.to_string(),
            description: "Retrieves historical weather data for a specific station across multiple \
                          years with automatic unit conversions. Use after finding station ID or \
                          when station ID is known."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "station_id": json_schema_string("GHCN station ID (e.g., 'USC00045860'). Obtain from find_closest_station_and_get_data first."),
                    "start_year": json_schema_integer("Start year for historical data range (e.g., 2019)", None),
                    "end_year": json_schema_integer("End year for historical data range (e.g., 2025)", None),
                    "elements": element_list_schema(&["TMAX", "PRCP"]),
                    "start_date": json_schema_string("Optional start date filter, YYYY-MM-DD"),
                    "end_date": json_schema_string("Optional end date filter, YYYY-MM-DD")
                }),
                vec!["station_id", "start_year", "end_year"],
            ),
        }
    }

    fn execute(&self, arguments: Value) -> WeatherResult<Value> {
        let request: HistoricalWeatherRequest = parse_arguments(Self::NAME, arguments)?;
        to_json(&self.service.get_historical_weather_with_conversions(&request)?)
    }
}

pub struct HeatEventsTool {
    service: Arc<WeatherService>,
}

impl HeatEventsTool {
    pub const NAME: &'static str = "analyze_heat_events";

    pub fn new(service: Arc<WeatherService>) -> Self {
        Self { service }
    }
}

impl Tool for HeatEventsTool {
    fn schema(&self) -> ToolSchema {
        let mut threshold = json_schema_number("Temperature threshold in Fahrenheit that defines a heat event");
        threshold["default"] = json!(95);
        ToolSchema {
            name: Self::NAME.to_string(),
            description: "Analyzes historical heat events to identify severe heat waves based on \
                          temperature thresholds and duration."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "station_id": json_schema_string("GHCN station ID"),
                    "lookback_years": json_schema_integer("Number of years to analyze", Some(5)),
                    "temperature_threshold_f": threshold,
                    "consecutive_days": json_schema_integer("Consecutive days at or above the threshold that qualify as a heat wave", Some(3)),
                    "current_year": json_schema_integer("Year the lookback counts back from. Defaults to the current year.", None)
                }),
                vec!["station_id"],
            ),
        }
    }

    fn execute(&self, arguments: Value) -> WeatherResult<Value> {
        let request: HeatEventRequest = parse_arguments(Self::NAME, arguments)?;
        to_json(&self.service.analyze_heat_events(&request)?)
    }
}

pub struct FloodProbabilityTool {
    service: Arc<WeatherService>,
}

impl FloodProbabilityTool {
    pub const NAME: &'static str = "calculate_flood_probability";

    pub fn new(service: Arc<WeatherService>) -> Self {
        Self { service }
    }
}

impl Tool for FloodProbabilityTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.to_string(),
            description: "Calculates historical probability of flash floods based on rainfall \
                          intensity thresholds."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "station_id": json_schema_string("GHCN station ID"),
                    "rainfall_threshold_inches": json_schema_number("Daily rainfall threshold in inches (e.g., 3)"),
                    "lookback_years": json_schema_integer("Number of years of historical data to analyze", Some(10)),
                    "time_window_hours": json_schema_integer("Accumulation window in hours. Recorded in the criteria; GHCN-Daily totals are per day.", Some(1)),
                    "current_year": json_schema_integer("Year the lookback counts back from. Defaults to the current year.", None)
                }),
                vec!["station_id", "rainfall_threshold_inches"],
            ),
        }
    }

    fn execute(&self, arguments: Value) -> WeatherResult<Value> {
        let request: FloodProbabilityRequest = parse_arguments(Self::NAME, arguments)?;
        to_json(&self.service.calculate_flood_probability(&request)?)
    }
}

/// Validates its arguments, then reports that census analysis is not available.
pub struct CensusTractTool {
    service: Arc<WeatherService>,
}

impl CensusTractTool {
    pub const NAME: &'static str = "get_census_tract_vulnerabilities";

    pub fn new(service: Arc<WeatherService>) -> Self {
        Self { service }
    }
}

impl Tool for CensusTractTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.to_string(),
            description: "Identifies census tracts with socioeconomic vulnerabilities in a specified \
                          geographic area."
                .to_string(),
            input_schema: json_schema_object(
                json!({
                    "city_name": json_schema_string("City name for reference median income and population density"),
                    "state_code": json_schema_string("Two-letter state code (e.g., 'CA')"),
                    "path_coordinates": json_schema_array(
                        json!({"type": "array", "items": {"type": "number"}}),
                        "Array of [longitude, latitude] pairs defining a storm path or area of interest"
                    ),
                    "bounding_box": {
                        "type": "object",
                        "description": "Alternative to path_coordinates: rectangular area",
                        "properties": {
                            "min_lat": {"type": "number"},
                            "max_lat": {"type": "number"},
                            "min_lon": {"type": "number"},
                            "max_lon": {"type": "number"}
                        },
                        "required": ["min_lat", "max_lat", "min_lon", "max_lon"]
                    },
                    "income_filter": json_schema_enum(
                        &["below_city_median", "below_state_median", "below_national_median", "custom"],
                        "below_city_median",
                        "Income comparison filter"
                    ),
                    "custom_income_threshold": json_schema_number("Median income threshold when income_filter is 'custom'"),
                    "population_density_filter": json_schema_enum(
                        &["above_city_average", "above_state_average", "custom"],
                        "above_city_average",
                        "Population density comparison filter"
                    ),
                    "custom_density_threshold": json_schema_number("People per square mile when population_density_filter is 'custom'")
                }),
                vec![],
            ),
        }
    }

    fn execute(&self, arguments: Value) -> WeatherResult<Value> {
        let request: CensusTractRequest = parse_arguments(Self::NAME, arguments)?;
        match self.service.get_census_tract_vulnerabilities(&request)? {}
    }
}
