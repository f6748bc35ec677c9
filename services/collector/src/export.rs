//! Data model for the health-tracking export payload.
//!
//! The export arrives as one JSON document. Both top-level collections are
//! optional; an export with neither metrics nor workouts is valid and empty.
//! Metric datapoints are open-ended key/value maps, so they are kept as raw
//! JSON maps and interpreted by the transformer.

use serde::Deserialize;
use serde_json::Value;

/// Arbitrary key/value sample recorded for a metric.
///
/// Always carries a timestamp under `date` or `endDate`; every other key is a
/// candidate tag or field, decided per value by the transformer.
pub type Datapoint = serde_json::Map<String, Value>;

/// Top-level export document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportDocument {
    #[serde(default)]
    pub data: ExportData,
}

/// The `data` section of an export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportData {
    /// Recorded health metrics, in export order
    #[serde(default)]
    pub metrics: Vec<Metric>,

    /// Recorded workouts with GPS routes, in export order
    #[serde(default)]
    pub workouts: Vec<Workout>,
}

/// One named metric with its recorded samples.
#[derive(Debug, Clone, Deserialize)]
pub struct Metric {
    pub name: String,

    #[serde(default)]
    pub data: Vec<Datapoint>,
}

/// One workout with its recorded GPS route.
#[derive(Debug, Clone, Deserialize)]
pub struct Workout {
    pub name: String,

    /// Workout start time, as exported (opaque string, used for identity)
    pub start: String,

    /// Workout end time, as exported (opaque string, used for identity)
    pub end: String,

    #[serde(default)]
    pub route: Vec<RoutePoint>,
}

/// One GPS sample on a workout route.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lon: f64,

    /// Missing timestamps are rejected during transformation, not parsing
    #[serde(default)]
    pub timestamp: Option<String>,
}
