//! Ingestion endpoint.
//!
//! One handler on `/collect` (POST, plus GET for convenience): parse the body
//! as an export document, transform it into points, write them through the
//! sink. The transformer runs to completion before the write session opens,
//! so a malformed datapoint anywhere in the payload fails the request before
//! a single point reaches the sink.

use crate::export::ExportDocument;
use crate::sink::{SinkError, WriteSink};
use crate::transform::{self, TransformError};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::get,
    Router,
};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<dyn WriteSink>,
    pub debug_payloads: bool,
}

/// Failures past the parse boundary; all map to a 500.
#[derive(Error, Debug)]
enum IngestError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Create the collector router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/collect", get(collect).post(collect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle one export payload.
async fn collect(State(state): State<AppState>, body: Bytes) -> (StatusCode, &'static str) {
    info!("Request received");

    let document: ExportDocument = match serde_json::from_slice(&body) {
        Ok(document) => document,
        Err(e) => {
            warn!(error = %e, "Rejecting request body that is not a valid export");
            return (StatusCode::BAD_REQUEST, "Invalid JSON Received");
        }
    };

    if state.debug_payloads {
        debug!(payload = %String::from_utf8_lossy(&body), "Received export payload");
    }

    match ingest(&state, &document).await {
        Ok(written) => {
            info!(points = written, "Ingestion complete");
            (StatusCode::OK, "Success")
        }
        Err(e) => {
            error!(error = %e, "Ingestion failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Server Error")
        }
    }
}

/// Transform the document and write every point through one session.
async fn ingest(state: &AppState, document: &ExportDocument) -> Result<usize, IngestError> {
    info!(metrics = document.data.metrics.len(), "Ingesting metrics");
    let mut points = transform::metric_points(&document.data.metrics)?;
    info!(points = points.len(), "Done ingesting metrics");

    info!(workouts = document.data.workouts.len(), "Ingesting workouts");
    let route_points = transform::workout_points(&document.data.workouts)?;
    info!(points = route_points.len(), "Done ingesting workouts");
    points.extend(route_points);

    // Every point is staged before the session opens: a malformed datapoint
    // can never leave a partially written batch behind.
    let mut session = state.sink.open_session().await?;
    let written = points.len();
    for point in &points {
        session.submit(point).await?;
    }
    session.close().await?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::WriteSession;
    use crate::transform::{FieldValue, Point};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{DateTime, Utc};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Sink that records submitted points in memory.
    #[derive(Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<Point>>>,
        reject_flush: bool,
    }

    struct RecordingSession {
        written: Arc<Mutex<Vec<Point>>>,
        reject_flush: bool,
    }

    #[async_trait]
    impl WriteSink for RecordingSink {
        async fn open_session(&self) -> Result<Box<dyn WriteSession>, SinkError> {
            Ok(Box::new(RecordingSession {
                written: self.written.clone(),
                reject_flush: self.reject_flush,
            }))
        }
    }

    #[async_trait]
    impl WriteSession for RecordingSession {
        async fn submit(&mut self, point: &Point) -> Result<(), SinkError> {
            self.written.lock().unwrap().push(point.clone());
            Ok(())
        }

        async fn close(self: Box<Self>) -> Result<(), SinkError> {
            if self.reject_flush {
                return Err(SinkError::Rejected {
                    status: 503,
                    body: "backend unavailable".to_string(),
                });
            }
            Ok(())
        }
    }

    fn app(sink: RecordingSink) -> (Router, Arc<Mutex<Vec<Point>>>) {
        let written = sink.written.clone();
        let state = AppState {
            sink: Arc::new(sink),
            debug_payloads: false,
        };
        (router(state), written)
    }

    async fn send(app: Router, method: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/collect")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn single_metric_payload_yields_one_point() {
        let (app, written) = app(RecordingSink::default());
        let (status, body) = send(
            app,
            "POST",
            r#"{"data":{"metrics":[{"name":"heart_rate","data":[{"date":"2024-01-01T00:00:00Z","qty":72}]}]}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Success");

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].measurement, "heart_rate");
        assert!(written[0].tags.is_empty());
        assert_eq!(written[0].fields.get("qty"), Some(&FieldValue::Float(72.0)));
        assert_eq!(
            written[0].timestamp,
            "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn invalid_json_gets_400_and_writes_nothing() {
        let (app, written) = app(RecordingSink::default());
        let (status, body) = send(app, "POST", "not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Invalid JSON Received");
        assert!(written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_datapoint_aborts_the_whole_batch() {
        let (app, written) = app(RecordingSink::default());
        // First datapoint is fine, second has no date or endDate
        let (status, body) = send(
            app,
            "POST",
            r#"{"data":{"metrics":[{"name":"heart_rate","data":[
                {"date":"2024-01-01T00:00:00Z","qty":72},
                {"qty":73}
            ]}]}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Server Error");
        // All-or-nothing: the valid point was staged but never written
        assert!(written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_rejection_gets_500() {
        let (app, _written) = app(RecordingSink {
            reject_flush: true,
            ..Default::default()
        });
        let (status, body) = send(
            app,
            "POST",
            r#"{"data":{"metrics":[{"name":"heart_rate","data":[{"date":"2024-01-01T00:00:00Z","qty":72}]}]}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Server Error");
    }

    #[tokio::test]
    async fn get_is_accepted_too() {
        let (app, _written) = app(RecordingSink::default());
        let (status, body) = send(app, "GET", "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Success");
    }

    #[tokio::test]
    async fn metrics_are_written_before_workouts() {
        let (app, written) = app(RecordingSink::default());
        let (status, _) = send(
            app,
            "POST",
            r#"{"data":{
                "metrics":[{"name":"heart_rate","data":[{"date":"2024-01-01T00:00:10Z","qty":72}]}],
                "workouts":[{"name":"Run","start":"t0","end":"t1","route":[
                    {"lat":57.64911,"lon":10.40744,"timestamp":"2024-01-01T00:00:00Z"}
                ]}]
            }}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let written = written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].measurement, "heart_rate");
        assert_eq!(written[1].measurement, "workouts");
    }
}
