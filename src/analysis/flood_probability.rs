/// Empirical flood probability from daily rainfall exceedances.
///
/// probability = exceedance_count / total_observations × 100, banded into a
/// qualitative risk level. With no observations at all the result is
/// `InsufficientData` and carries no band.

use serde::Serialize;
use std::fmt;

use crate::model::{Element, ExceedanceCounts, Observation, ToolStatus};
use crate::units::{self, Inches};

/// Qualitative risk levels, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RiskBand {
    #[serde(rename = "Very low risk")]
    VeryLow,
    #[serde(rename = "Low risk")]
    Low,
    #[serde(rename = "Moderate risk")]
    Moderate,
    #[serde(rename = "High risk")]
    High,
    #[serde(rename = "Very high risk")]
    VeryHigh,
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskBand::VeryLow => "Very low risk",
            RiskBand::Low => "Low risk",
            RiskBand::Moderate => "Moderate risk",
            RiskBand::High => "High risk",
            RiskBand::VeryHigh => "Very high risk",
        };
        f.write_str(label)
    }
}

/// Band a probability given in percent. Upper bounds are exclusive.
pub fn interpret(probability_percent: f64) -> RiskBand {
    if probability_percent < 1.0 {
        RiskBand::VeryLow
    } else if probability_percent < 5.0 {
        RiskBand::Low
    } else if probability_percent < 10.0 {
        RiskBand::Moderate
    } else if probability_percent < 20.0 {
        RiskBand::High
    } else {
        RiskBand::VeryHigh
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloodProbability {
    pub status: ToolStatus,
    pub counts: ExceedanceCounts,
    /// Unrounded, in [0, 100].
    pub probability_percent: f64,
    pub interpretation: Option<RiskBand>,
}

/// # Panics
/// If `exceedance_count > total_observations`; the fetch layer rejects such
/// counts as malformed before they get here.
pub fn estimate(counts: ExceedanceCounts) -> FloodProbability {
    assert!(
        counts.exceedance_count <= counts.total_observations,
        "exceedance_count {} > total_observations {}",
        counts.exceedance_count,
        counts.total_observations
    );

    if counts.total_observations == 0 {
        return FloodProbability {
            status: ToolStatus::InsufficientData,
            counts,
            probability_percent: 0.0,
            interpretation: None,
        };
    }

    let probability_percent =
        counts.exceedance_count as f64 / counts.total_observations as f64 * 100.0;
    FloodProbability {
        status: ToolStatus::Success,
        counts,
        probability_percent,
        interpretation: Some(interpret(probability_percent)),
    }
}

/// Count PRCP days at or above `threshold`. Other elements are ignored.
pub fn count_exceedances(observations: &[Observation], threshold: Inches) -> ExceedanceCounts {
    observations
        .iter()
        .filter(|obs| obs.element == Element::Prcp)
        .fold(ExceedanceCounts::default(), |mut counts, obs| {
            counts.total_observations += 1;
            if units::tenths_mm_to_inches(obs.raw_value).0 >= threshold.0 {
                counts.exceedance_count += 1;
            }
            counts
        })
}
