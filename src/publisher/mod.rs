//! Downstream event sinks
//!
//! The ingestion pipeline only relies on the contract below: a connector that
//! opens a sink, and a sink that accepts events and can be closed. Retrying a
//! failed publish is the sink's business, never the pipeline's.

use crate::protocol::Event;

pub mod json_lines;

pub use json_lines::{JsonLinesConnector, JsonLinesSink, SinkError};

/// A connected event sink
#[async_trait::async_trait]
pub trait EventSink: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish a single event
    async fn publish(&mut self, event: Event) -> Result<(), Self::Error>;

    /// Flush and release the sink; no publish follows
    async fn close(&mut self) -> Result<(), Self::Error>;
}

/// Opens a sink once the broker side is up
#[async_trait::async_trait]
pub trait SinkConnector: Send + Sync {
    type Sink: EventSink;

    async fn connect(&self) -> Result<Self::Sink, <Self::Sink as EventSink>::Error>;
}
