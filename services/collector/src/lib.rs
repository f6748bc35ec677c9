//! Vitalsink Collector - health export to InfluxDB time series
//!
//! This library receives health-tracking exports (metrics and workout GPS
//! routes) as JSON over HTTP and writes them to InfluxDB v2 as time-series
//! points. It handles:
//!
//! - Per-value tag/field classification of open-ended metric datapoints
//! - Measurement naming, including per-stage sleep analysis series
//! - Geohash encoding of workout route points
//! - Batched, session-scoped writes to the InfluxDB write API
//!
//! ```text
//! POST /collect -> ExportDocument -> transform -> WriteSession -> InfluxDB
//! ```

pub mod config;
pub mod export;
pub mod influx;
pub mod server;
pub mod sink;
pub mod transform;

// Re-export main types
pub use config::{CollectorConfig, ConfigValidationError, InfluxConfig, LoggingConfig};
pub use export::{Datapoint, ExportDocument, Metric, RoutePoint, Workout};
pub use influx::InfluxSink;
pub use server::{router, AppState};
pub use sink::{SinkError, WriteSession, WriteSink};
pub use transform::{classify, metric_points, workout_points, Classified, FieldValue, Point, TransformError};
