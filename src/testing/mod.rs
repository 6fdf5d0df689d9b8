//! Testing utilities and mock implementations
//!
//! Mock broker sessions and sinks for exercising the pipeline without an
//! MQTT broker or a downstream store.

pub mod mocks;

pub use mocks::*;
