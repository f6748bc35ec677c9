//! Write sink contract for transformed points.
//!
//! The collector only depends on this narrow interface: open a batched write
//! session, submit points, close it. The InfluxDB implementation lives in
//! `influx.rs`; tests substitute a recording sink.

use crate::transform::Point;
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a write sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("write request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("write rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("timestamp out of range for {measurement}")]
    TimestampRange { measurement: String },
}

/// A batched time-series write target.
#[async_trait]
pub trait WriteSink: Send + Sync {
    /// Open a write session scoped to one request.
    async fn open_session(&self) -> Result<Box<dyn WriteSession>, SinkError>;
}

/// One buffered write session.
///
/// Implementations flush on their own size/time triggers; `close` flushes
/// whatever remains. A session must be closed on every success path so no
/// buffered points are silently dropped; a failed request abandons the
/// session and its buffer with it.
#[async_trait]
pub trait WriteSession: Send {
    /// Buffer one point for write, flushing if a trigger fires.
    async fn submit(&mut self, point: &Point) -> Result<(), SinkError>;

    /// Flush remaining points and end the session.
    async fn close(self: Box<Self>) -> Result<(), SinkError>;
}
