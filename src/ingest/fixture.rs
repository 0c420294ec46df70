/// In-memory replay source backed by a JSON file.
///
/// Lets the server run without cloud credentials or a database, and gives the
/// integration tests a deterministic backend. File format:
///
/// ```json
/// {
///   "stations": [{"id": "USW00023183", "name": "PHOENIX AIRPORT, AZ",
///                 "latitude": 33.4278, "longitude": -112.0037}],
///   "observations": [{"station_id": "USW00023183", "date": "2024-07-10",
///                     "element": "TMAX", "raw_value": 456}]
/// }
/// ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{ExceedanceQuery, NearestStationQuery, ObservationQuery, ObservationSource};
use crate::analysis::flood_probability;
use crate::logging::{self, DataSource};
use crate::model::{ExceedanceCounts, Observation, StationObservation, WeatherError, WeatherResult};
use crate::stations::{self, StationInfo};
use chrono::Datelike;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    #[serde(default)]
    pub stations: Vec<StationInfo>,
    #[serde(default)]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    data: FixtureData,
}

impl FixtureSource {
    pub fn new(stations: Vec<StationInfo>, observations: Vec<Observation>) -> Self {
        Self {
            data: FixtureData { stations, observations },
        }
    }

    pub fn from_json(json: &str) -> WeatherResult<Self> {
        let data: FixtureData = serde_json::from_str(json)
            .map_err(|e| WeatherError::Config(format!("invalid fixture file: {}", e)))?;
        Ok(Self { data })
    }

    pub fn load(path: &Path) -> WeatherResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            WeatherError::Config(format!("cannot read fixture {}: {}", path.display(), e))
        })?;
        let source = Self::from_json(&json)?;
        logging::info(
            DataSource::Fixture,
            None,
            &format!(
                "loaded {} station(s) and {} observation(s) from {}",
                source.data.stations.len(),
                source.data.observations.len(),
                path.display()
            ),
        );
        Ok(source)
    }
}

impl ObservationSource for FixtureSource {
    fn data_source(&self) -> DataSource {
        DataSource::Fixture
    }

    fn observations(&self, query: &ObservationQuery) -> WeatherResult<Vec<Observation>> {
        Ok(self
            .data
            .observations
            .iter()
            .filter(|obs| query.matches(obs))
            .cloned()
            .collect())
    }

    fn nearest_station_observations(
        &self,
        query: &NearestStationQuery,
    ) -> WeatherResult<Vec<StationObservation>> {
        let Some((station, distance)) =
            stations::closest_station(&self.data.stations, query.latitude, query.longitude)
        else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<StationObservation> = self
            .data
            .observations
            .iter()
            .filter(|obs| {
                obs.station_id == station.id
                    && obs.date.year() == query.year
                    && query.elements.contains(&obs.element)
            })
            .map(|obs| StationObservation {
                station_id: station.id.clone(),
                station_name: station.name.clone(),
                date: obs.date,
                element: obs.element,
                value: obs.raw_value,
                distance_miles: distance,
            })
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(a.element.cmp(&b.element)));
        rows.truncate(query.limit);
        Ok(rows)
    }

    fn precipitation_counts(&self, query: &ExceedanceQuery) -> WeatherResult<ExceedanceCounts> {
        let window: Vec<Observation> = self
            .data
            .observations
            .iter()
            .filter(|obs| {
                obs.station_id == query.station_id
                    && (query.start_year..=query.end_year).contains(&obs.date.year())
            })
            .cloned()
            .collect();
        Ok(flood_probability::count_exceedances(&window, query.threshold))
    }
}
