//! InfluxDB v2 write sink.
//!
//! Points are rendered to line protocol and buffered per session; a session
//! flushes to the `/api/v2/write` endpoint when the buffer reaches the
//! configured batch size or the flush interval has elapsed, and always on
//! close. No retries: a rejected flush fails the request that owns the
//! session.

use crate::config::{InfluxConfig, WriteConfig};
use crate::sink::{SinkError, WriteSession, WriteSink};
use crate::transform::{FieldValue, Point};
use async_trait::async_trait;
use reqwest::header;
use std::time::{Duration, Instant};
use tracing::debug;

/// InfluxDB v2 sink. Cheap to clone; sessions carry their own buffer.
#[derive(Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    org: String,
    bucket: String,
    token: String,
    batch_size: usize,
    flush_interval: Duration,
}

impl InfluxSink {
    pub fn new(influx: &InfluxConfig, write: &WriteConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            write_url: influx.write_url(),
            org: influx.org.clone(),
            bucket: influx.bucket.clone(),
            token: influx.token.clone(),
            batch_size: write.batch_size,
            flush_interval: write.flush_interval(),
        }
    }

    fn session(&self) -> InfluxSession {
        InfluxSession {
            sink: self.clone(),
            lines: Vec::new(),
            last_flush: Instant::now(),
        }
    }
}

#[async_trait]
impl WriteSink for InfluxSink {
    async fn open_session(&self) -> Result<Box<dyn WriteSession>, SinkError> {
        Ok(Box::new(self.session()))
    }
}

/// One buffered write session against the InfluxDB write API.
struct InfluxSession {
    sink: InfluxSink,
    lines: Vec<String>,
    last_flush: Instant,
}

impl InfluxSession {
    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.lines.len()
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.last_flush = Instant::now();
        if self.lines.is_empty() {
            return Ok(());
        }

        let body = self.lines.join("\n");
        let count = self.lines.len();

        let response = self
            .sink
            .client
            .post(&self.sink.write_url)
            .query(&[
                ("org", self.sink.org.as_str()),
                ("bucket", self.sink.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(
                header::AUTHORIZATION,
                format!("Token {}", self.sink.token),
            )
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }

        self.lines.clear();
        debug!(points = count, "Flushed write batch");
        Ok(())
    }
}

#[async_trait]
impl WriteSession for InfluxSession {
    async fn submit(&mut self, point: &Point) -> Result<(), SinkError> {
        match encode_point(point)? {
            Some(line) => self.lines.push(line),
            None => {
                // Line protocol cannot represent a point without fields
                debug!(measurement = %point.measurement, "Skipping point with no fields");
                return Ok(());
            }
        }

        if self.lines.len() >= self.sink.batch_size
            || self.last_flush.elapsed() >= self.sink.flush_interval
        {
            self.flush().await?;
        }

        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), SinkError> {
        self.flush().await
    }
}

/// Render one point as a line-protocol line.
///
/// Returns `None` for points with no fields. Timestamps are emitted in
/// nanoseconds.
pub fn encode_point(point: &Point) -> Result<Option<String>, SinkError> {
    if point.fields.is_empty() {
        return Ok(None);
    }

    let nanos = point
        .timestamp
        .timestamp_nanos_opt()
        .ok_or_else(|| SinkError::TimestampRange {
            measurement: point.measurement.clone(),
        })?;

    let mut line = escape_measurement(&point.measurement);

    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    let mut first = true;
    for (key, value) in &point.fields {
        if !first {
            line.push(',');
        }
        first = false;
        line.push_str(&escape_key(key));
        line.push('=');
        match value {
            FieldValue::Float(f) => line.push_str(&f.to_string()),
            FieldValue::Text(s) => {
                line.push('"');
                line.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                line.push('"');
            }
        }
    }

    line.push(' ');
    line.push_str(&nanos.to_string());

    Ok(Some(line))
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key, tag value, or field key.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}
