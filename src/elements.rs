/// GHCN element registry.
///
/// Defines the element codes this service accepts from tool callers, with a
/// description and the storage encoding of each. This is the single source
/// of truth for element codes: parsing a code not listed here is rejected at
/// the tool boundary, so nothing outside this list ever reaches a query.
/// GHCN-Daily defines many more codes; supporting one means adding a
/// `model::Element` variant and an entry here.

use std::str::FromStr;

use crate::model::{Element, WeatherError};

// ---------------------------------------------------------------------------
// Element metadata
// ---------------------------------------------------------------------------

/// Metadata for a single GHCN-Daily element.
pub struct ElementInfo {
    pub element: Element,
    /// Four-character GHCN code.
    pub code: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Encoding of the raw `value` column.
    pub storage_unit: &'static str,
    /// Public unit after conversion, for elements that have one.
    pub imperial_unit: Option<&'static str>,
}

/// All elements accepted by the tools.
///
/// Source: GHCN-Daily readme (ncei.noaa.gov/pub/data/ghcn/daily/readme.txt).
pub static ELEMENT_REGISTRY: &[ElementInfo] = &[
    ElementInfo {
        element: Element::Tmax,
        code: "TMAX",
        description: "Maximum temperature",
        storage_unit: "tenths of degrees Celsius",
        imperial_unit: Some("degrees Fahrenheit"),
    },
    ElementInfo {
        element: Element::Tmin,
        code: "TMIN",
        description: "Minimum temperature",
        storage_unit: "tenths of degrees Celsius",
        imperial_unit: Some("degrees Fahrenheit"),
    },
    ElementInfo {
        element: Element::Tavg,
        code: "TAVG",
        description: "Average temperature",
        storage_unit: "tenths of degrees Celsius",
        imperial_unit: Some("degrees Fahrenheit"),
    },
    ElementInfo {
        element: Element::Prcp,
        code: "PRCP",
        description: "Precipitation",
        storage_unit: "tenths of millimeters",
        imperial_unit: Some("inches"),
    },
    ElementInfo {
        element: Element::Snow,
        code: "SNOW",
        description: "Snowfall",
        storage_unit: "millimeters",
        imperial_unit: None,
    },
    ElementInfo {
        element: Element::Snwd,
        code: "SNWD",
        description: "Snow depth",
        storage_unit: "millimeters",
        imperial_unit: None,
    },
    ElementInfo {
        element: Element::Awnd,
        code: "AWND",
        description: "Average wind speed",
        storage_unit: "tenths of meters per second",
        imperial_unit: None,
    },
    ElementInfo {
        element: Element::Wsf2,
        code: "WSF2",
        description: "Fastest 2-minute wind speed",
        storage_unit: "tenths of meters per second",
        imperial_unit: None,
    },
    ElementInfo {
        element: Element::Wt01,
        code: "WT01",
        description: "Fog",
        storage_unit: "flag (1 = present)",
        imperial_unit: None,
    },
    ElementInfo {
        element: Element::Wt03,
        code: "WT03",
        description: "Thunder",
        storage_unit: "flag (1 = present)",
        imperial_unit: None,
    },
    ElementInfo {
        element: Element::Wt05,
        code: "WT05",
        description: "Hail",
        storage_unit: "flag (1 = present)",
        imperial_unit: None,
    },
];

/// Looks up an element by its GHCN code (case-insensitive).
pub fn find_element(code: &str) -> Option<&'static ElementInfo> {
    let code = code.trim();
    ELEMENT_REGISTRY
        .iter()
        .find(|info| info.code.eq_ignore_ascii_case(code))
}

/// Registry entry for an element.
pub fn info(element: Element) -> Option<&'static ElementInfo> {
    ELEMENT_REGISTRY.iter().find(|info| info.element == element)
}

/// Whether the element has a metric/imperial conversion.
pub fn is_convertible(element: Element) -> bool {
    info(element).is_some_and(|info| info.imperial_unit.is_some())
}

/// One line per code for tool schemas, e.g.
/// `TMAX (Maximum temperature, stored as tenths of degrees Celsius)`.
pub fn describe_codes() -> String {
    ELEMENT_REGISTRY
        .iter()
        .map(|info| format!("{} ({}, stored as {})", info.code, info.description, info.storage_unit))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parses a list of codes, rejecting unknown ones and dropping duplicates
/// while keeping first-seen order.
pub fn parse_element_list<S: AsRef<str>>(codes: &[S]) -> Result<Vec<Element>, WeatherError> {
    let mut elements = Vec::with_capacity(codes.len());
    for code in codes {
        let element: Element = code.as_ref().parse()?;
        if !elements.contains(&element) {
            elements.push(element);
        }
    }
    Ok(elements)
}

impl FromStr for Element {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        find_element(s).map(|info| info.element).ok_or_else(|| {
            WeatherError::InvalidArgument(format!(
                "unknown element code '{}'; expected one of {}",
                s,
                ELEMENT_REGISTRY
                    .iter()
                    .map(|info| info.code)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
