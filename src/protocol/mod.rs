//! Data types shared by the transport and ingestion layers
//!
//! Topic subscription parsing and the event model that flows from broker to
//! sink.

pub mod event;
pub mod topics;

pub use event::*;
pub use topics::*;
