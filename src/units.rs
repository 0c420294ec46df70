/// Unit conversions between the GHCN storage encoding and public units.
///
/// GHCN-Daily stores temperatures in tenths of °C and precipitation in
/// tenths of mm. The tool interface speaks °F and inches. Everything that
/// crosses that boundary goes through this module so the formulas exist in
/// exactly one place:
///
///   °F = °C × 9/5 + 32
///   in = mm / 25.4

use crate::model::{ConvertedObservation, Element, Observation, WeatherError, WeatherResult};

const MM_PER_INCH: f64 = 25.4;

#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
pub struct Celsius(pub f64);

#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
pub struct Fahrenheit(pub f64);

#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
pub struct Millimeters(pub f64);

#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
pub struct Inches(pub f64);

impl From<Celsius> for Fahrenheit {
    fn from(value: Celsius) -> Self {
        Fahrenheit(value.0 * 9.0 / 5.0 + 32.0)
    }
}

impl From<Fahrenheit> for Celsius {
    fn from(value: Fahrenheit) -> Self {
        Celsius((value.0 - 32.0) * 5.0 / 9.0)
    }
}

impl From<Millimeters> for Inches {
    fn from(value: Millimeters) -> Self {
        Inches(value.0 / MM_PER_INCH)
    }
}

impl From<Inches> for Millimeters {
    fn from(value: Inches) -> Self {
        Millimeters(value.0 * MM_PER_INCH)
    }
}

/// Decode a raw storage value (tenths) into whole units.
pub fn from_tenths(raw: i32) -> f64 {
    raw as f64 / 10.0
}

/// Raw TMAX/TMIN value to °F.
pub fn tenths_celsius_to_fahrenheit(raw: i32) -> Fahrenheit {
    Celsius(from_tenths(raw)).into()
}

/// Raw PRCP value to inches.
pub fn tenths_mm_to_inches(raw: i32) -> Inches {
    Millimeters(from_tenths(raw)).into()
}

/// A Fahrenheit threshold expressed in the storage encoding (tenths of °C).
pub fn fahrenheit_to_tenths_celsius(threshold: Fahrenheit) -> f64 {
    Celsius::from(threshold).0 * 10.0
}

/// An inch threshold expressed in the storage encoding (tenths of mm).
pub fn inches_to_tenths_mm(threshold: Inches) -> f64 {
    Millimeters::from(threshold).0 * 10.0
}

/// Derive metric and imperial values for an observation.
///
/// Total for the temperatures and PRCP. Every other element is an
/// `UnsupportedConversion` error rather than a guessed unit.
pub fn convert(obs: &Observation) -> WeatherResult<ConvertedObservation> {
    let value_metric = from_tenths(obs.raw_value);
    let (value_imperial, unit) = match obs.element {
        Element::Tmax | Element::Tmin | Element::Tavg => (tenths_celsius_to_fahrenheit(obs.raw_value).0, "Fahrenheit"),
        Element::Prcp => (tenths_mm_to_inches(obs.raw_value).0, "inches"),
        other => return Err(WeatherError::UnsupportedConversion(other)),
    };

    Ok(ConvertedObservation {
        date: obs.date,
        element: obs.element,
        value_metric,
        value_imperial,
        unit,
    })
}

/// Round half away from zero to `places` decimal places, for reporting.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
