/// Heat event detection.
///
/// A heat event is a maximal run of calendar-consecutive days whose maximum
/// temperature is at or above a threshold, kept only if the run is at least
/// `min_consecutive_days` long. Detection is a single pass over the
/// qualifying days in ascending date order, so the input order does not
/// matter.
///
/// A date that appears twice (duplicate TMAX rows) is a gap: it ends the
/// current run, is logged, and never starts a new one, so no two events share
/// a date.

use chrono::NaiveDate;

use crate::logging::{self, DataSource};
use crate::model::{Element, HeatEvent, Observation};
use crate::units;

/// One day's maximum temperature in °F.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyMax {
    pub date: NaiveDate,
    pub temp_f: f64,
}

/// Detect heat events from raw GHCN observations. Non-TMAX rows are ignored.
///
/// # Panics
/// If `min_consecutive_days` is zero or `threshold_f` is not finite.
pub fn detect(observations: &[Observation], threshold_f: f64, min_consecutive_days: usize) -> Vec<HeatEvent> {
    let days: Vec<DailyMax> = observations
        .iter()
        .filter(|obs| obs.element == Element::Tmax)
        .map(|obs| DailyMax {
            date: obs.date,
            temp_f: units::tenths_celsius_to_fahrenheit(obs.raw_value).0,
        })
        .collect();
    detect_fahrenheit(&days, threshold_f, min_consecutive_days)
}

/// Detect heat events from daily maxima already in °F.
///
/// # Panics
/// If `min_consecutive_days` is zero or `threshold_f` is not finite.
pub fn detect_fahrenheit(days: &[DailyMax], threshold_f: f64, min_consecutive_days: usize) -> Vec<HeatEvent> {
    assert!(min_consecutive_days >= 1, "min_consecutive_days must be at least 1");
    assert!(threshold_f.is_finite(), "threshold_f must be finite, got {}", threshold_f);

    let mut hot: Vec<DailyMax> = days.iter().copied().filter(|d| d.temp_f >= threshold_f).collect();
    hot.sort_by_key(|d| d.date);

    let mut events = Vec::new();
    let mut run: Option<Run> = None;
    let mut previous: Option<NaiveDate> = None;

    for day in hot {
        let duplicate = previous == Some(day.date);
        previous = Some(day.date);

        if duplicate {
            logging::warn(
                DataSource::System,
                None,
                &format!("duplicate TMAX for {}; treating as a gap", day.date),
            );
        } else if let Some(current) = run.as_mut().filter(|r| r.extends_to(day.date)) {
            current.push(day);
            continue;
        }

        if let Some(finished) = run.take().and_then(|r| r.finish(min_consecutive_days)) {
            events.push(finished);
        }
        // A duplicated date belongs to no run; the next run starts after it.
        if !duplicate {
            run = Some(Run::start(day));
        }
    }

    if let Some(finished) = run.and_then(|r| r.finish(min_consecutive_days)) {
        events.push(finished);
    }
    events
}

/// A run under construction. Aggregates are kept incrementally.
struct Run {
    days: Vec<NaiveDate>,
    max_temp_f: f64,
    sum_temp_f: f64,
}

impl Run {
    fn start(day: DailyMax) -> Self {
        Self {
            days: vec![day.date],
            max_temp_f: day.temp_f,
            sum_temp_f: day.temp_f,
        }
    }

    fn last_date(&self) -> NaiveDate {
        // Never empty: a run is created with one day.
        self.days[self.days.len() - 1]
    }

    fn extends_to(&self, date: NaiveDate) -> bool {
        self.last_date().succ_opt() == Some(date)
    }

    fn push(&mut self, day: DailyMax) {
        self.days.push(day.date);
        self.max_temp_f = self.max_temp_f.max(day.temp_f);
        self.sum_temp_f += day.temp_f;
    }

    fn finish(self, min_consecutive_days: usize) -> Option<HeatEvent> {
        if self.days.len() < min_consecutive_days {
            return None;
        }
        let duration_days = self.days.len();
        Some(HeatEvent {
            start_date: self.days[0],
            end_date: self.days[duration_days - 1],
            max_temp_f: self.max_temp_f,
            avg_temp_f: self.sum_temp_f / duration_days as f64,
            duration_days,
            days: self.days,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
