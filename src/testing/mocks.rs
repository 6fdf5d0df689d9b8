//! Mock implementations for testing
//!
//! Provides a scripted broker session and a recording sink so the connection
//! manager and the lifecycle can be exercised without a broker.

use crate::protocol::{Event, InboundMessage, TopicSubscription};
use crate::publisher::{EventSink, SinkConnector};
use crate::transport::{BrokerSession, SessionEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Error returned by the mocks
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Mock failure: {0}")]
pub struct MockError(pub String);

/// One scripted step of a [`MockBrokerSession`]
#[derive(Debug, Clone)]
pub enum SessionScript {
    ConnAck,
    SubAck(Vec<u8>),
    Message(InboundMessage),
    BrokerDisconnect,
    /// Poll fails with this reason
    Fail(String),
}

/// Shared log of calls made against the mocks, in call order
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<String>>>,
    subscriptions: Arc<Mutex<Vec<TopicSubscription>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, call: &str) {
        self.calls.lock().await.push(call.to_string());
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<TopicSubscription> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn subscribe_calls(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn disconnected(&self) -> bool {
        self.calls.lock().await.iter().any(|call| call == "disconnect")
    }

    /// Position of the first occurrence of `call`
    pub async fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().await.iter().position(|c| c == call)
    }
}

/// Broker session replaying a fixed script
///
/// Once the script is exhausted, polling waits forever like an idle broker.
/// After `disconnect` every poll fails, which ends the manager's drain.
#[derive(Debug)]
pub struct MockBrokerSession {
    script: VecDeque<SessionScript>,
    recorder: CallRecorder,
    fail_subscribe: bool,
    disconnected: bool,
}

impl MockBrokerSession {
    pub fn new(script: Vec<SessionScript>) -> Self {
        Self {
            script: script.into(),
            recorder: CallRecorder::new(),
            fail_subscribe: false,
            disconnected: false,
        }
    }

    /// Session that accepts the connection and every subscription
    pub fn connected() -> Self {
        Self::new(vec![SessionScript::ConnAck, SessionScript::SubAck(vec![0])])
    }

    pub fn with_recorder(mut self, recorder: CallRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn recorder(&self) -> CallRecorder {
        self.recorder.clone()
    }
}

#[async_trait]
impl BrokerSession for MockBrokerSession {
    type Error = MockError;

    async fn poll(&mut self) -> Result<SessionEvent, Self::Error> {
        if self.disconnected {
            return Err(MockError("session closed".to_string()));
        }

        match self.script.pop_front() {
            Some(SessionScript::ConnAck) => Ok(SessionEvent::ConnectionAcknowledged),
            Some(SessionScript::SubAck(return_codes)) => {
                Ok(SessionEvent::SubscriptionConfirmed { return_codes })
            }
            Some(SessionScript::Message(message)) => Ok(SessionEvent::MessageReceived(message)),
            Some(SessionScript::BrokerDisconnect) => Ok(SessionEvent::Disconnected),
            Some(SessionScript::Fail(reason)) => Err(MockError(reason)),
            None => std::future::pending().await,
        }
    }

    async fn subscribe(&mut self, subscriptions: &TopicSubscription) -> Result<(), Self::Error> {
        self.recorder.record("subscribe").await;
        if self.fail_subscribe {
            return Err(MockError("subscribe refused".to_string()));
        }
        self.recorder
            .subscriptions
            .lock()
            .await
            .push(subscriptions.clone());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.recorder.record("disconnect").await;
        self.disconnected = true;
        Ok(())
    }
}

/// Sink keeping every published event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub recorder: CallRecorder,
    pub should_fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn get_events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    type Error = MockError;

    async fn publish(&mut self, event: Event) -> Result<(), Self::Error> {
        if self.should_fail {
            return Err(MockError("publish refused".to_string()));
        }
        self.events.lock().await.push(event);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.recorder.record("sink_close").await;
        Ok(())
    }
}

/// Connector handing out a [`RecordingSink`] that shares its event store
#[derive(Debug, Clone, Default)]
pub struct RecordingConnector {
    pub sink: RecordingSink,
    pub fail_connect: bool,
}

impl RecordingConnector {
    pub fn new(recorder: CallRecorder) -> Self {
        Self {
            sink: RecordingSink {
                recorder,
                ..Default::default()
            },
            fail_connect: false,
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_publish(mut self) -> Self {
        self.sink.should_fail = true;
        self
    }

    pub async fn get_events(&self) -> Vec<Event> {
        self.sink.get_events().await
    }
}

#[async_trait]
impl SinkConnector for RecordingConnector {
    type Sink = RecordingSink;

    async fn connect(&self) -> Result<Self::Sink, MockError> {
        self.sink.recorder.record("sink_connect").await;
        if self.fail_connect {
            return Err(MockError("sink unavailable".to_string()));
        }
        Ok(self.sink.clone())
    }
}
