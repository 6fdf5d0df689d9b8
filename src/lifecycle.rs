//! Beat lifecycle: start, run, stop
//!
//! Startup order is broker connection (with subscription), then the sink,
//! then the connection driver and the ingestion consumer. Stopping reverses
//! it: the broker session is disconnected first, the consumer drains what
//! was already received, and the sink is closed last.

use crate::config::MqttSection;
use crate::error::{BeatError, BeatResult};
use crate::ingest::run_ingest_loop;
use crate::observability::metrics::metrics;
use crate::protocol::InboundMessage;
use crate::publisher::{EventSink, SinkConnector};
use crate::transport::manager::wait_for_shutdown;
use crate::transport::mqtt::{ConnectionState, ReconnectPolicy};
use crate::transport::{BrokerSession, ConnectionManager};
use crate::{lifecycle_span, mqtt_span};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, Instrument};

/// Requests a running beat to stop; cheap to clone, safe to call repeatedly
#[derive(Debug, Clone)]
pub struct StopHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// The beat: one broker session feeding one sink
pub struct Beater<B: BrokerSession, C: SinkConnector> {
    broker_url: String,
    grace: Duration,
    manager: ConnectionManager<B>,
    messages: mpsc::Receiver<InboundMessage>,
    connector: C,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl<B: BrokerSession, C: SinkConnector> Beater<B, C> {
    /// Build the beat; fails only when the topic configuration is invalid
    pub fn new(config: &MqttSection, session: B, connector: C) -> BeatResult<Self> {
        let subscriptions = config.subscriptions()?;
        let (message_tx, messages) = mpsc::channel(config.channel_capacity.max(1));
        let policy = ReconnectPolicy::from_config(config);
        match policy.max_total_backoff() {
            Some(total) => info!(
                "Reconnecting every {}s, giving up after {}s of retries",
                policy.delay.as_secs(),
                total.as_secs()
            ),
            None => info!("Reconnecting every {}s until stopped", policy.delay.as_secs()),
        }

        let manager = ConnectionManager::new(session, subscriptions, policy, message_tx);
        let (shutdown_tx, _) = watch::channel(false);

        metrics().set_beat_state("initialized");
        Ok(Self {
            broker_url: config.broker_url.clone(),
            grace: config.disconnect_grace(),
            manager,
            messages,
            connector,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Observe the broker connection state
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_receiver()
    }

    /// Run until stopped or a fatal error occurs
    pub async fn run(self) -> BeatResult<()> {
        let span = lifecycle_span!(broker = %self.broker_url);
        self.run_until_stopped().instrument(span).await
    }

    async fn run_until_stopped(self) -> BeatResult<()> {
        let Self {
            broker_url,
            grace,
            mut manager,
            messages,
            connector,
            shutdown_tx,
        } = self;
        let mut stop_rx = shutdown_tx.subscribe();
        metrics().set_beat_state("connecting");

        let mut connect_rx = shutdown_tx.subscribe();
        let connected = tokio::select! {
            result = manager.connect_until_shutdown(&mut connect_rx) => result?,
            _ = wait_for_shutdown(&mut stop_rx) => false,
        };
        if !connected {
            info!("Stopped before the subscription was confirmed");
            if manager.connection_state() == ConnectionState::Connected {
                manager.disconnect(grace).await;
            }
            metrics().set_beat_state("stopped");
            return Ok(());
        }

        let sink = match connector.connect().await {
            Ok(sink) => sink,
            Err(e) => {
                error!("Failed to open event sink: {}", e);
                manager.disconnect(grace).await;
                metrics().set_beat_state("failed");
                return Err(BeatError::sink(e));
            }
        };

        let backlog = manager.backlog_len();
        if backlog > 0 {
            info!(messages = backlog, "Delivering messages received while subscribing");
        }

        let consumer = tokio::spawn(run_ingest_loop(messages, sink));
        let mut driver = tokio::spawn(
            manager
                .run(shutdown_tx.subscribe(), grace)
                .instrument(mqtt_span!(broker = %broker_url)),
        );

        metrics().set_beat_state("running");
        info!("mqttbeat is running! Hit CTRL-C to stop it.");

        let driver_result = tokio::select! {
            joined = &mut driver => joined,
            _ = wait_for_shutdown(&mut stop_rx) => {
                metrics().set_beat_state("stopping");
                driver.await
            }
        };
        let result = driver_result.unwrap_or_else(|e| {
            Err(BeatError::internal(format!(
                "Connection driver task failed: {e}"
            )))
        });

        // Driver has dropped its sender, so the consumer ends after draining
        let mut sink = consumer
            .await
            .map_err(|e| BeatError::internal(format!("Ingestion task failed: {e}")))?;
        if let Err(e) = sink.close().await {
            error!("Failed to close event sink: {}", e);
        }

        metrics().set_beat_state(if result.is_ok() { "stopped" } else { "failed" });
        info!("mqttbeat stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallRecorder, MockBrokerSession, RecordingConnector, SessionScript};
    use crate::transport::mqtt::MqttError;

    fn config(topics: &[&str]) -> MqttSection {
        let mut config = MqttSection::new(
            "mqtt://localhost:1883",
            topics.iter().map(|t| t.to_string()).collect(),
        );
        config.reconnect_delay_secs = 0;
        config.disconnect_grace_ms = 20;
        config
    }

    #[test]
    fn test_new_rejects_invalid_topics() {
        let result = Beater::new(
            &config(&["a/b"]),
            MockBrokerSession::connected(),
            RecordingConnector::default(),
        );
        assert!(matches!(result, Err(BeatError::TopicSpec(_))));
    }

    #[tokio::test]
    async fn test_stop_handle_is_idempotent() {
        let beater = Beater::new(
            &config(&["a?0"]),
            MockBrokerSession::connected(),
            RecordingConnector::default(),
        )
        .unwrap();

        let handle = beater.stop_handle();
        assert!(!handle.is_stopped());
        handle.stop();
        handle.clone().stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_before_run_returns_immediately() {
        let recorder = CallRecorder::new();
        let session = MockBrokerSession::new(vec![]).with_recorder(recorder.clone());
        let beater = Beater::new(
            &config(&["a?0"]),
            session,
            RecordingConnector::new(recorder.clone()),
        )
        .unwrap();

        beater.stop_handle().stop();
        beater.run().await.unwrap();

        // Sink never opened
        assert!(recorder.position("sink_connect").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_after_connack_disconnects_broker() {
        let recorder = CallRecorder::new();
        // Broker acknowledges the connection but never answers the subscribe
        let session =
            MockBrokerSession::new(vec![SessionScript::ConnAck]).with_recorder(recorder.clone());
        let beater = Beater::new(
            &config(&["a?0"]),
            session,
            RecordingConnector::new(recorder.clone()),
        )
        .unwrap();
        let handle = beater.stop_handle();
        let mut states = beater.connection_state();
        let running = tokio::spawn(beater.run());

        states
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .unwrap();
        handle.stop();
        running.await.unwrap().unwrap();

        assert_eq!(recorder.calls().await, vec!["subscribe", "disconnect"]);
    }

    #[tokio::test]
    async fn test_teardown_order() {
        let recorder = CallRecorder::new();
        let session = MockBrokerSession::new(vec![
            SessionScript::ConnAck,
            SessionScript::SubAck(vec![0]),
            SessionScript::Message(InboundMessage::new("a", r#"{"n":1}"#)),
        ])
        .with_recorder(recorder.clone());
        let connector = RecordingConnector::new(recorder.clone());
        let beater = Beater::new(&config(&["a?0"]), session, connector.clone()).unwrap();
        let handle = beater.stop_handle();

        let running = tokio::spawn(beater.run());
        while connector.get_events().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.stop();
        running.await.unwrap().unwrap();

        assert_eq!(
            recorder.calls().await,
            vec!["subscribe", "sink_connect", "disconnect", "sink_close"]
        );
    }

    #[tokio::test]
    async fn test_sink_failure_disconnects_broker() {
        let recorder = CallRecorder::new();
        let session = MockBrokerSession::connected().with_recorder(recorder.clone());
        let connector = RecordingConnector::new(recorder.clone()).failing_connect();
        let beater = Beater::new(&config(&["a?0"]), session, connector).unwrap();

        let result = beater.run().await;

        assert!(matches!(result, Err(BeatError::Sink(_))));
        assert!(recorder.disconnected().await);
    }

    #[tokio::test]
    async fn test_fatal_subscription_error_ends_run() {
        let recorder = CallRecorder::new();
        let session = MockBrokerSession::new(vec![
            SessionScript::ConnAck,
            SessionScript::SubAck(vec![0]),
            SessionScript::Fail("network down".to_string()),
            SessionScript::ConnAck,
            SessionScript::SubAck(vec![0x80]),
        ])
        .with_recorder(recorder.clone());
        let connector = RecordingConnector::new(recorder.clone());
        let beater = Beater::new(&config(&["a?0"]), session, connector).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), beater.run())
            .await
            .unwrap();

        assert!(matches!(
            result,
            Err(BeatError::Mqtt(MqttError::SubscriptionRejected(_)))
        ));
        let calls = recorder.calls().await;
        assert_eq!(calls.last().map(String::as_str), Some("sink_close"));
        assert!(calls.iter().any(|c| c == "disconnect"));
    }
}
