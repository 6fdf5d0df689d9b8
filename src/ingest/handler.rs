//! Message ingestion: decode, wrap, publish
//!
//! A single consumer drains the inbound channel, so events reach the sink in
//! arrival order. A failed publish is logged and counted; the message is not
//! retried and the next one is handled normally.

use super::decoder::decode_payload;
use crate::ingest_span;
use crate::observability::metrics::metrics;
use crate::protocol::{Event, InboundMessage};
use crate::publisher::EventSink;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, Instrument};

/// Turns inbound messages into events and hands them to the sink
pub struct IngestionHandler<S: EventSink> {
    sink: S,
    handled: u64,
    failed: u64,
}

impl<S: EventSink> IngestionHandler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            handled: 0,
            failed: 0,
        }
    }

    /// Build the event for `message` and publish it once
    pub async fn handle(&mut self, message: InboundMessage) -> Result<(), S::Error> {
        self.handled += 1;
        let (fields, decoded) = decode_payload(&message.topic, &message.payload);
        metrics().record_event_decoded(decoded);

        let event = Event::captured_now(fields);
        let started = Instant::now();
        match self.sink.publish(event).await {
            Ok(()) => {
                metrics().record_event_published(started.elapsed());
                debug!(topic = %message.topic, decoded, "Event published");
                Ok(())
            }
            Err(e) => {
                self.failed += 1;
                metrics().record_publish_failure();
                Err(e)
            }
        }
    }

    /// Messages handled so far, failed publishes included
    pub fn handled(&self) -> u64 {
        self.handled
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Consume `messages` until every sender is gone, then return the sink
///
/// The sink is returned unclosed; closing it is part of the caller's
/// teardown order.
pub async fn run_ingest_loop<S: EventSink>(
    mut messages: mpsc::Receiver<InboundMessage>,
    sink: S,
) -> S {
    let mut handler = IngestionHandler::new(sink);

    async {
        info!("Ingestion loop started");
        while let Some(message) = messages.recv().await {
            let topic = message.topic.clone();
            if let Err(e) = handler.handle(message).await {
                error!(topic = %topic, error = %e, "Failed to publish event");
            }
        }
        info!(
            handled = handler.handled(),
            failed = handler.failed(),
            "Ingestion loop finished"
        );
    }
    .instrument(ingest_span!(stage = "consume"))
    .await;

    handler.into_sink()
}
