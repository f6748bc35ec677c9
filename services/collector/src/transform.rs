//! Payload transformer: export document to time-series points.
//!
//! This is the core of the collector. Everything here is a pure function over
//! the parsed export — no I/O, no shared state — so transformation is
//! testable in isolation and requests can be processed in parallel without
//! coordination. Points are emitted in source order: metrics first, then
//! workouts, each in export array order.

use crate::export::{Datapoint, Metric, RoutePoint, Workout};
use chrono::{DateTime, Utc};
use geohash::Coord;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Measurement name for all workout route points.
const WORKOUT_MEASUREMENT: &str = "workouts";

/// Geohash length for route points. Seven characters buckets to roughly
/// 150m x 150m cells, enough for range queries without a spatial index.
const GEOHASH_PRECISION: usize = 7;

/// Datapoint keys that carry timing rather than tag/field values.
const RESERVED_KEYS: [&str; 3] = ["date", "startDate", "endDate"];

/// Errors raised while transforming an export into points.
///
/// Any of these aborts the whole request before a single point is written;
/// the transformer stages the full batch first.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("datapoint for {measurement} has no date or endDate")]
    MissingTimestamp { measurement: String },

    #[error("route point in workout {id} has no timestamp")]
    MissingRouteTimestamp { id: String },

    #[error("unparseable timestamp {value:?}")]
    InvalidTimestamp { value: String },

    #[error("sleep_analysis datapoint has no string value for its stage")]
    MissingSleepStage,

    #[error("cannot geohash ({lat}, {lon}): {message}")]
    Geohash { lat: f64, lon: f64, message: String },
}

/// Value of a single field on a point.
///
/// Metric fields are always floats; workouts additionally carry the geohash
/// as a string-valued field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Text(String),
}

/// One time-series record ready for the write sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

/// Classification of one datapoint value.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Indexed string dimension
    Tag(String),
    /// Measured numeric value
    Field(f64),
}

/// Classify a raw JSON value as a tag or a field.
///
/// The decision is per value, not per key: the same key may classify
/// differently across datapoints depending on what was recorded. Numbers
/// become float fields; everything else becomes a tag in its string form
/// (strings verbatim, other values in their JSON rendering).
pub fn classify(value: &Value) -> Classified {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => Classified::Field(f),
            None => Classified::Tag(n.to_string()),
        },
        Value::String(s) => Classified::Tag(s.clone()),
        other => Classified::Tag(other.to_string()),
    }
}

/// Transform every metric datapoint into a point, in export order.
pub fn metric_points(metrics: &[Metric]) -> Result<Vec<Point>, TransformError> {
    let mut points = Vec::new();

    for metric in metrics {
        for datapoint in &metric.data {
            points.push(metric_point(metric, datapoint)?);
        }
    }

    Ok(points)
}

fn metric_point(metric: &Metric, datapoint: &Datapoint) -> Result<Point, TransformError> {
    let measurement = measurement_name(&metric.name, datapoint)?;
    let timestamp = resolve_timestamp(datapoint, &measurement)?;

    let mut tags = BTreeMap::new();
    let mut fields = BTreeMap::new();

    for (key, value) in datapoint {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        match classify(value) {
            Classified::Tag(s) => {
                tags.insert(key.clone(), s);
            }
            Classified::Field(f) => {
                fields.insert(key.clone(), FieldValue::Float(f));
            }
        }
    }

    Ok(Point {
        measurement,
        tags,
        fields,
        timestamp,
    })
}

/// Derive the measurement name for one datapoint.
///
/// Sleep analysis exports one datapoint per sleep stage; the stage name is
/// folded into the measurement so each stage becomes its own series
/// (e.g. `sleep_analysis_asleep`).
fn measurement_name(metric_name: &str, datapoint: &Datapoint) -> Result<String, TransformError> {
    if metric_name != "sleep_analysis" {
        return Ok(metric_name.to_string());
    }

    let stage = datapoint
        .get("value")
        .and_then(Value::as_str)
        .ok_or(TransformError::MissingSleepStage)?;

    Ok(format!("{}_{}", metric_name, stage.to_lowercase()))
}

/// Resolve the timestamp of a datapoint: `date`, falling back to `endDate`.
fn resolve_timestamp(
    datapoint: &Datapoint,
    measurement: &str,
) -> Result<DateTime<Utc>, TransformError> {
    let raw = datapoint
        .get("date")
        .or_else(|| datapoint.get("endDate"))
        .ok_or_else(|| TransformError::MissingTimestamp {
            measurement: measurement.to_string(),
        })?;

    let raw = raw.as_str().ok_or_else(|| TransformError::InvalidTimestamp {
        value: raw.to_string(),
    })?;

    parse_timestamp(raw)
}

/// Parse an export timestamp.
///
/// Exports use either RFC 3339 or `2024-01-01 00:00:00 +0000`.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TransformError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TransformError::InvalidTimestamp {
            value: raw.to_string(),
        })
}

/// Transform every workout route point into a point, in export order.
///
/// All route points of one workout share an `id` tag built from the workout
/// name and its start/end times, so one workout is one series even when
/// workout names repeat across days.
pub fn workout_points(workouts: &[Workout]) -> Result<Vec<Point>, TransformError> {
    let mut points = Vec::new();

    for workout in workouts {
        let id = format!("{}-{}-{}", workout.name, workout.start, workout.end);
        for route_point in &workout.route {
            points.push(route_point_point(&id, route_point)?);
        }
    }

    Ok(points)
}

fn route_point_point(id: &str, route_point: &RoutePoint) -> Result<Point, TransformError> {
    let raw = route_point
        .timestamp
        .as_deref()
        .ok_or_else(|| TransformError::MissingRouteTimestamp { id: id.to_string() })?;
    let timestamp = parse_timestamp(raw)?;

    let hash = geohash::encode(
        Coord {
            x: route_point.lon,
            y: route_point.lat,
        },
        GEOHASH_PRECISION,
    )
    .map_err(|e| TransformError::Geohash {
        lat: route_point.lat,
        lon: route_point.lon,
        message: e.to_string(),
    })?;

    let mut tags = BTreeMap::new();
    tags.insert("id".to_string(), id.to_string());

    let mut fields = BTreeMap::new();
    fields.insert("lat".to_string(), FieldValue::Float(route_point.lat));
    fields.insert("lng".to_string(), FieldValue::Float(route_point.lon));
    fields.insert("geohash".to_string(), FieldValue::Text(hash));

    Ok(Point {
        measurement: WORKOUT_MEASUREMENT.to_string(),
        tags,
        fields,
        timestamp,
    })
}
