/// Pure analysis over fetched observations.
///
/// Nothing here performs I/O; callers fetch rows through `ingest` and pass
/// them in.
///
/// Submodules:
/// - `heat_events`: runs of consecutive days with TMAX at or above a threshold.
/// - `flood_probability`: empirical daily rainfall exceedance and risk bands.

pub mod flood_probability;
pub mod heat_events;
