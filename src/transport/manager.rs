//! Connection manager: connect, detect loss, reconnect, resubscribe
//!
//! The manager owns the broker session. It is the only code that polls it,
//! so every state transition happens on one task. Received messages leave
//! through a bounded channel to the single ingestion consumer.
//!
//! Every connection acknowledgement triggers exactly one multi-topic
//! subscribe request. A failed or rejected subscription is fatal; only the
//! connect step is retried, after a fixed delay.
//!
//! Until [`run`](ConnectionManager::run) starts, nobody consumes the channel.
//! Messages that do not fit are held in a backlog so the connect phase keeps
//! polling for its SUBACK; `run` flushes the backlog first.

use super::mqtt::{
    ConnectionEvent, ConnectionState, HealthMonitor, MessageHandler, MqttError, ReconnectPolicy,
    ReconnectionDecision,
};
use super::{BrokerSession, SessionEvent};
use crate::error::{BeatError, BeatResult};
use crate::observability::metrics::metrics;
use crate::protocol::{InboundMessage, TopicSubscription};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// What handling a single session event led to
#[derive(Debug)]
enum EventOutcome {
    Continue,
    Subscribed,
    ConnectionLost(ConnectionEvent),
    ConsumerGone,
}

/// Owns a broker session and drives its connection state machine
pub struct ConnectionManager<B: BrokerSession> {
    session: B,
    subscriptions: TopicSubscription,
    policy: ReconnectPolicy,
    message_tx: mpsc::Sender<InboundMessage>,
    state_tx: watch::Sender<ConnectionState>,
    failed_attempts: u32,
    reconnect_count: u32,
    subscribe_requests: u32,
    awaiting_suback: bool,
    backlog: VecDeque<InboundMessage>,
    consumer_running: bool,
}

impl<B: BrokerSession> ConnectionManager<B> {
    pub fn new(
        session: B,
        subscriptions: TopicSubscription,
        policy: ReconnectPolicy,
        message_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected(
            "Not connected".to_string(),
        ));

        Self {
            session,
            subscriptions,
            policy,
            message_tx,
            state_tx,
            failed_attempts: 0,
            reconnect_count: 0,
            subscribe_requests: 0,
            awaiting_suback: false,
            backlog: VecDeque::new(),
            consumer_running: false,
        }
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver observing every state transition
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Number of backoff waits performed so far
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    /// Number of subscribe requests issued so far
    pub fn subscribe_requests(&self) -> u32 {
        self.subscribe_requests
    }

    /// Messages received before the consumer started that are still waiting
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Connect and subscribe, retrying the connection until it succeeds
    ///
    /// Returns once the broker confirmed the subscription. Fails only on a
    /// fatal condition: subscription failure or an exhausted retry cap.
    pub async fn connect(&mut self) -> BeatResult<()> {
        // Nobody can request shutdown during the initial connect
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.connect_until_shutdown(&mut shutdown_rx).await?;
        Ok(())
    }

    /// Like [`connect`](Self::connect), but gives up when `shutdown` fires.
    /// Returns `false` when interrupted.
    pub async fn connect_until_shutdown(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BeatResult<bool> {
        self.start_attempt();

        loop {
            let outcome = match self.session.poll().await {
                Ok(event) => self.handle_event(event).await?,
                Err(e) => {
                    EventOutcome::ConnectionLost(ConnectionEvent::NetworkError(e.to_string()))
                }
            };

            match outcome {
                EventOutcome::Subscribed => return Ok(true),
                EventOutcome::ConnectionLost(cause) => {
                    if !self.handle_connection_loss(cause, shutdown).await? {
                        return Ok(false);
                    }
                }
                EventOutcome::ConsumerGone => return Ok(false),
                EventOutcome::Continue => {}
            }
        }
    }

    /// Drive the session until `shutdown` fires or a fatal error occurs
    ///
    /// The session is disconnected on every exit path, allowing `grace` for
    /// in-flight messages to drain into the channel.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        grace: Duration,
    ) -> BeatResult<()> {
        info!("Connection manager running");

        let result = self.drive(&mut shutdown).await;
        if let Err(e) = &result {
            error!("Connection manager stopped on fatal error: {}", e);
        }

        self.disconnect(grace).await;
        result
    }

    async fn drive(&mut self, shutdown: &mut watch::Receiver<bool>) -> BeatResult<()> {
        self.consumer_running = true;
        if !self.flush_backlog().await {
            warn!("Ingestion consumer stopped, stopping connection manager");
            return Ok(());
        }

        loop {
            let outcome = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    info!("Shutdown signal received, stopping connection manager");
                    return Ok(());
                }
                polled = self.session.poll() => match polled {
                    Ok(event) => self.handle_event(event).await?,
                    Err(e) => {
                        EventOutcome::ConnectionLost(ConnectionEvent::NetworkError(e.to_string()))
                    }
                }
            };

            match outcome {
                EventOutcome::ConnectionLost(cause) => {
                    if !self.handle_connection_loss(cause, shutdown).await? {
                        return Ok(());
                    }
                }
                EventOutcome::ConsumerGone => {
                    warn!("Ingestion consumer stopped, stopping connection manager");
                    return Ok(());
                }
                EventOutcome::Subscribed | EventOutcome::Continue => {}
            }
        }
    }

    /// Send DISCONNECT and drain the session for at most `grace`
    pub async fn disconnect(&mut self, grace: Duration) {
        info!("Disconnecting from broker");
        if let Err(e) = self.session.disconnect().await {
            warn!("Failed to request disconnect: {}", e);
        }

        let session = &mut self.session;
        let message_tx = &self.message_tx;
        let consumer_running = self.consumer_running;
        let drain = async move {
            loop {
                match session.poll().await {
                    Ok(SessionEvent::MessageReceived(message)) => {
                        if !consumer_running {
                            continue;
                        }
                        if message_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            debug!(target: "mqtt_transport", "Disconnect grace period elapsed");
        }

        self.transition(ConnectionEvent::ClientDisconnected);
        info!("MQTT client disconnected");
    }

    async fn handle_event(&mut self, event: SessionEvent) -> BeatResult<EventOutcome> {
        match event {
            SessionEvent::ConnectionAcknowledged => {
                self.transition(ConnectionEvent::ConnAckReceived);
                self.failed_attempts = 0;
                metrics().record_connection_established();
                self.subscribe_on_connect().await?;
                Ok(EventOutcome::Continue)
            }
            SessionEvent::SubscriptionConfirmed { return_codes } => {
                if !self.awaiting_suback {
                    debug!(target: "mqtt_transport", "Unexpected SubAck: {:?}", return_codes);
                    return Ok(EventOutcome::Continue);
                }
                self.awaiting_suback = false;
                MessageHandler::validate_subscription_success(&return_codes)
                    .map_err(MqttError::SubscriptionRejected)?;
                info!("Subscribed to configured topics");
                Ok(EventOutcome::Subscribed)
            }
            SessionEvent::MessageReceived(message) => {
                debug!(
                    target: "mqtt_transport",
                    topic = %message.topic,
                    bytes = message.payload.len(),
                    "MQTT message received"
                );
                metrics().record_message_received();
                if !self.forward(message).await {
                    return Ok(EventOutcome::ConsumerGone);
                }
                Ok(EventOutcome::Continue)
            }
            SessionEvent::Disconnected => Ok(EventOutcome::ConnectionLost(
                ConnectionEvent::DisconnectedByBroker,
            )),
            SessionEvent::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                Ok(EventOutcome::Continue)
            }
            SessionEvent::OutgoingEvent => Ok(EventOutcome::Continue),
        }
    }

    /// Hand a message to the consumer; `false` once the consumer is gone
    ///
    /// Before the consumer runs, a full channel spills into the backlog and
    /// later messages queue behind it to keep arrival order.
    async fn forward(&mut self, message: InboundMessage) -> bool {
        if self.consumer_running {
            return self.message_tx.send(message).await.is_ok();
        }
        if !self.backlog.is_empty() {
            self.backlog.push_back(message);
            return true;
        }
        match self.message_tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                debug!(target: "mqtt_transport", "Channel full before consumer start, buffering");
                self.backlog.push_back(message);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    async fn flush_backlog(&mut self) -> bool {
        if !self.backlog.is_empty() {
            debug!(
                target: "mqtt_transport",
                messages = self.backlog.len(),
                "Flushing messages received during connect"
            );
        }
        while let Some(message) = self.backlog.pop_front() {
            if self.message_tx.send(message).await.is_err() {
                return false;
            }
        }
        true
    }

    /// On-connect hook: one subscribe request for the whole subscription set
    async fn subscribe_on_connect(&mut self) -> BeatResult<()> {
        let state = self.connection_state();
        if !HealthMonitor::can_subscribe(&state) {
            return Err(MqttError::SubscriptionFailed(
                format!("cannot subscribe in state {state:?}").into(),
            )
            .into());
        }

        self.subscribe_requests += 1;
        self.session
            .subscribe(&self.subscriptions)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;
        self.awaiting_suback = true;

        debug!(
            target: "mqtt_transport",
            topics = self.subscriptions.len(),
            "Subscribe request sent"
        );
        Ok(())
    }

    /// Record the loss and wait out the backoff
    ///
    /// Returns `false` when shutdown was requested during the wait.
    async fn handle_connection_loss(
        &mut self,
        cause: ConnectionEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BeatResult<bool> {
        self.awaiting_suback = false;
        if self.connection_state() == ConnectionState::Connected {
            metrics().record_connection_lost();
        } else {
            metrics().record_connection_failure();
        }
        self.transition(cause);

        let decision = HealthMonitor::should_attempt_reconnection(
            self.failed_attempts,
            &self.policy,
            *shutdown.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay } => {
                self.failed_attempts = attempt;
                self.reconnect_count += 1;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));
                info!(
                    "Waiting {}ms before reconnection attempt {}",
                    delay.as_millis(),
                    attempt
                );

                if !interruptible_sleep(shutdown, delay).await {
                    info!("Shutdown signal received during reconnection delay");
                    return Ok(false);
                }
                self.start_attempt();
                Ok(true)
            }
            ReconnectionDecision::AbortShutdownRequested => Ok(false),
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let max_attempts = self.policy.max_attempts.unwrap_or(self.failed_attempts);
                let reason = format!("Max reconnection attempts ({max_attempts}) exceeded");
                self.transition(ConnectionEvent::PermanentFailure(reason));
                Err(BeatError::from(MqttError::ReconnectExhausted(max_attempts)))
            }
        }
    }

    fn start_attempt(&self) {
        metrics().record_connection_attempt();
        self.transition(ConnectionEvent::AttemptStarted);
    }

    fn transition(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = self.state_tx.send_replace(next.clone());
        HealthMonitor::log_state_transition(&previous, &next);
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `delay` unless shutdown is requested first.
/// Returns true if the sleep completed.
async fn interruptible_sleep(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = wait_for_shutdown(shutdown) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
