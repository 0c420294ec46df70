/// Station identifiers and geometry.
///
/// GHCN station ids are treated as opaque strings, but they are validated
/// once at the tool boundary: non-empty, bounded length, and restricted to
/// characters that can appear in a GHCN id. The module also holds the
/// great-circle distance used by the in-memory and mirror backends for the
/// closest-station lookup, and a small registry of well-known reference
/// stations used by the live source checks.

use serde::{Deserialize, Serialize};

use crate::model::WeatherError;

/// Upper bound on accepted station id length. GHCN ids are 11 characters.
pub const MAX_STATION_ID_LEN: usize = 32;

/// Mean earth radius in meters (IUGG), as used by BigQuery geography
/// functions.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per statute mile, matching `ST_DISTANCE(...) / 1609.34`.
const METERS_PER_MILE: f64 = 1609.34;

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

/// Location metadata for a GHCN station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub id: String,
    pub name: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
}

/// A reference station with long, continuous TMAX/PRCP records.
pub struct ReferenceStation {
    pub id: &'static str,
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

/// First-order NWS stations used to sanity-check live data sources.
///
/// Source: GHCN-Daily station list (ghcnd-stations.txt).
pub static REFERENCE_STATIONS: &[ReferenceStation] = &[
    ReferenceStation {
        id: "USW00023183",
        name: "PHOENIX AIRPORT, AZ",
        latitude: 33.4278,
        longitude: -112.0037,
    },
    ReferenceStation {
        id: "USW00094728",
        name: "NY CITY CNTRL PARK, NY",
        latitude: 40.7789,
        longitude: -73.9692,
    },
    ReferenceStation {
        id: "USW00023174",
        name: "LOS ANGELES INTL AP, CA",
        latitude: 33.9381,
        longitude: -118.3889,
    },
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validates a station id and returns it trimmed.
pub fn validate_station_id(station_id: &str) -> Result<&str, WeatherError> {
    let id = station_id.trim();
    if id.is_empty() {
        return Err(WeatherError::InvalidArgument(
            "station_id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_STATION_ID_LEN {
        return Err(WeatherError::InvalidArgument(format!(
            "station_id '{}' is longer than {} characters",
            id, MAX_STATION_ID_LEN
        )));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(WeatherError::InvalidArgument(format!(
            "station_id '{}' contains characters outside [A-Za-z0-9_-]",
            id
        )));
    }
    Ok(id)
}

/// Validates a latitude/longitude pair in decimal degrees.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), WeatherError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(WeatherError::InvalidArgument(format!(
            "Latitude must be between -90 and 90, got {}",
            latitude
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(WeatherError::InvalidArgument(format!(
            "Longitude must be between -180 and 180, got {}",
            longitude
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Great-circle distance in statute miles (haversine).
pub fn distance_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c / METERS_PER_MILE
}

/// Returns the station nearest to a point, or `None` for an empty list.
pub fn closest_station<'a>(
    stations: &'a [StationInfo],
    latitude: f64,
    longitude: f64,
) -> Option<(&'a StationInfo, f64)> {
    stations
        .iter()
        .map(|s| (s, distance_miles(latitude, longitude, s.latitude, s.longitude)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_station_ids_are_ghcn_format() {
        // GHCN ids: 2-char country code, 1-char network code, 8-char station.
        for station in REFERENCE_STATIONS {
            assert_eq!(
                station.id.len(),
                11,
                "id for '{}' should be 11 characters, got '{}'",
                station.name,
                station.id
            );
            assert!(
                validate_station_id(station.id).is_ok(),
                "reference id '{}' should pass validation",
                station.id
            );
        }
    }

    #[test]
    fn test_validate_station_id_trims_and_accepts() {
        assert_eq!(validate_station_id("  USC00045860 ").unwrap(), "USC00045860");
    }

    #[test]
    fn test_validate_station_id_rejects_empty_and_quotes() {
        assert!(validate_station_id("").is_err());
        assert!(validate_station_id("   ").is_err());
        assert!(validate_station_id("USC0004' OR '1'='1").is_err());
        assert!(validate_station_id(&"A".repeat(MAX_STATION_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_coordinates_bounds_are_inclusive() {
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(-90.0, -180.0).is_ok());
        assert!(validate_coordinates(90.1, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_distance_zero_for_same_point() {
        assert!(distance_miles(37.39, -122.08, 37.39, -122.08).abs() < 1e-9);
    }

    #[test]
    fn test_distance_phoenix_to_los_angeles() {
        // Sky Harbor to LAX is roughly 370 statute miles.
        let d = distance_miles(33.4278, -112.0037, 33.9381, -118.3889);
        assert!((360.0..380.0).contains(&d), "expected ~370 miles, got {}", d);
    }

    #[test]
    fn test_closest_station_picks_minimum() {
        let stations = vec![
            StationInfo { id: "A".into(), name: "Far".into(), latitude: 40.0, longitude: -100.0 },
            StationInfo { id: "B".into(), name: "Near".into(), latitude: 37.4, longitude: -122.1 },
        ];
        let (station, miles) = closest_station(&stations, 37.39, -122.08).unwrap();
        assert_eq!(station.id, "B");
        assert!(miles < 5.0);
        assert!(closest_station(&[], 0.0, 0.0).is_none());
    }
}
