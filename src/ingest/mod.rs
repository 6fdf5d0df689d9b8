//! Ingestion pipeline: payload decoding and the single event consumer

pub mod decoder;
pub mod handler;

pub use decoder::decode_payload;
pub use handler::{run_ingest_loop, IngestionHandler};
