/// Weather readiness data service.
///
/// Finds GHCN-Daily stations, retrieves and converts their observations,
/// detects heat waves, estimates flood probability, and exposes all of it as
/// Model Context Protocol tools over stdio.

pub mod analysis;
pub mod config;
pub mod elements;
pub mod ingest;
pub mod logging;
pub mod mcp;
pub mod model;
pub mod service;
pub mod stations;
pub mod tools;
pub mod units;
