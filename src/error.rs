//! Error types for mqttbeat
//!
//! Every fatal condition (bad configuration, rejected subscription, exhausted
//! reconnection) ends up as a [`BeatError`] returned to the lifecycle, which
//! decides whether the process exits.

use crate::config::ConfigError;
use crate::protocol::TopicSpecError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for mqttbeat operations
#[derive(Debug, Error)]
pub enum BeatError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Topic configuration error: {0}")]
    TopicSpec(#[from] TopicSpecError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Sink error: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BeatError {
    /// Wrap a sink error
    pub fn sink<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Sink(Box::new(error))
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for mqttbeat operations
pub type BeatResult<T> = Result<T, BeatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_spec_error_converts() {
        let error: BeatError = TopicSpecError::MissingSeparator("a/b".to_string()).into();
        assert!(matches!(error, BeatError::TopicSpec(_)));
        assert!(error.to_string().contains("a/b"));
    }

    #[test]
    fn test_sink_wrapper_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let error = BeatError::sink(io);

        assert_eq!(error.to_string(), "Sink error: pipe closed");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_internal_error_constructor() {
        let error = BeatError::internal("unexpected state");
        assert!(matches!(error, BeatError::Internal { .. }));
        assert_eq!(error.to_string(), "Internal error: unexpected state");
    }

    #[test]
    fn test_subscription_failure_converts() {
        let error: BeatError = MqttError::SubscriptionFailed("rejected".into()).into();
        assert!(matches!(error, BeatError::Mqtt(_)));
        assert!(error.to_string().contains("Subscription failed"));
    }
}
