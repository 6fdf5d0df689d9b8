//! Observability for the beat
//!
//! Structured logging with span macros and an in-process metrics collector.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_logging, LogFormat, LogSettings};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{ingest_span, lifecycle_span, mqtt_span};
