//! Topic subscription parsing
//!
//! Subscriptions are configured as `"<topic>?<qos>"` strings. A malformed
//! entry is a configuration error: the whole list is rejected, nothing is
//! skipped and no default QoS is substituted.

use std::collections::BTreeMap;
use thiserror::Error;

/// Separator between topic filter and QoS in a topic spec
pub const TOPIC_QOS_SEPARATOR: char = '?';

/// Highest QoS level an MQTT broker accepts
pub const MAX_QOS: u8 = 2;

/// Errors raised while parsing `topic?qos` entries
#[derive(Debug, Error, PartialEq)]
pub enum TopicSpecError {
    #[error("Topic spec '{0}' is missing the '?' separator")]
    MissingSeparator(String),
    #[error("Topic spec '{0}' contains more than one '?' separator")]
    TooManySegments(String),
    #[error("Topic spec '{0}' has an empty topic")]
    EmptyTopic(String),
    #[error("Topic spec '{0}' has an empty QoS")]
    EmptyQos(String),
    #[error("Topic spec '{spec}' has invalid QoS '{qos}' (expected 0, 1 or 2)")]
    InvalidQos { spec: String, qos: String },
}

/// Mapping from topic filter to requested QoS level
///
/// Keys are unique and iterate in sorted order, so the subscribe request built
/// from a given config is always the same.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSubscription {
    topics: BTreeMap<String, u8>,
}

impl TopicSubscription {
    /// Parse an ordered list of `topic?qos` entries. Later duplicates win.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, TopicSpecError> {
        let mut topics = BTreeMap::new();
        for spec in specs {
            let (topic, qos) = parse_topic_spec(spec.as_ref())?;
            topics.insert(topic.to_string(), qos);
        }
        Ok(Self { topics })
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// QoS requested for `topic`, if subscribed
    pub fn qos(&self, topic: &str) -> Option<u8> {
        self.topics.get(topic).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.topics.iter().map(|(topic, qos)| (topic.as_str(), *qos))
    }

    pub fn as_map(&self) -> &BTreeMap<String, u8> {
        &self.topics
    }
}

/// Split a single `topic?qos` entry
pub fn parse_topic_spec(spec: &str) -> Result<(&str, u8), TopicSpecError> {
    let mut parts = spec.split(TOPIC_QOS_SEPARATOR);
    let topic = parts.next().unwrap_or_default();
    let qos = parts
        .next()
        .ok_or_else(|| TopicSpecError::MissingSeparator(spec.to_string()))?;

    if parts.next().is_some() {
        return Err(TopicSpecError::TooManySegments(spec.to_string()));
    }
    if topic.is_empty() {
        return Err(TopicSpecError::EmptyTopic(spec.to_string()));
    }
    if qos.is_empty() {
        return Err(TopicSpecError::EmptyQos(spec.to_string()));
    }

    let invalid = || TopicSpecError::InvalidQos {
        spec: spec.to_string(),
        qos: qos.to_string(),
    };
    // u8 parsing accepts a leading '+', which is not a QoS
    if !qos.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let level: u8 = qos.parse().map_err(|_| invalid())?;
    if level > MAX_QOS {
        return Err(invalid());
    }

    Ok((topic, level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_two_topics() {
        let subs = TopicSubscription::parse(&["a/b?1", "c/d?0"]).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs.qos("a/b"), Some(1));
        assert_eq!(subs.qos("c/d"), Some(0));
    }

    #[test]
    fn test_duplicate_topic_last_wins() {
        let subs = TopicSubscription::parse(&["sensors/#?0", "sensors/#?2"]).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs.qos("sensors/#"), Some(2));
    }

    #[test]
    fn test_empty_list_is_empty_subscription() {
        let subs = TopicSubscription::parse::<&str>(&[]).unwrap();
        assert!(subs.is_empty());
    }

    #[test]
    fn test_wildcards_are_kept_verbatim() {
        let subs = TopicSubscription::parse(&["home/+/temp?1", "#?0"]).unwrap();
        assert_eq!(subs.qos("home/+/temp"), Some(1));
        assert_eq!(subs.qos("#"), Some(0));
    }

    #[test]
    fn test_missing_separator() {
        let err = TopicSubscription::parse(&["a/b?1", "c/d"]).unwrap_err();
        assert_eq!(err, TopicSpecError::MissingSeparator("c/d".to_string()));
    }

    #[test]
    fn test_too_many_segments() {
        let err = parse_topic_spec("a?b?1").unwrap_err();
        assert_eq!(err, TopicSpecError::TooManySegments("a?b?1".to_string()));
    }

    #[test]
    fn test_empty_parts() {
        assert_eq!(
            parse_topic_spec("?1").unwrap_err(),
            TopicSpecError::EmptyTopic("?1".to_string())
        );
        assert_eq!(
            parse_topic_spec("a/b?").unwrap_err(),
            TopicSpecError::EmptyQos("a/b?".to_string())
        );
    }

    #[test]
    fn test_invalid_qos_values() {
        for spec in ["t?x", "t?-1", "t?+1", "t?3", "t?256", "t? 1"] {
            let result = parse_topic_spec(spec);
            assert!(
                matches!(result, Err(TopicSpecError::InvalidQos { .. })),
                "expected InvalidQos for {spec}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_error_names_offending_entry() {
        let err = TopicSubscription::parse(&["ok?0", "bad?q"]).unwrap_err();
        assert!(err.to_string().contains("bad?q"));
    }

    proptest! {
        #[test]
        fn parse_keeps_last_qos_per_unique_topic(
            entries in proptest::collection::vec(("[a-z/#+]{1,12}", 0u8..=2), 0..20)
        ) {
            let specs: Vec<String> = entries
                .iter()
                .map(|(topic, qos)| format!("{topic}?{qos}"))
                .collect();

            let mut expected = HashMap::new();
            for (topic, qos) in &entries {
                expected.insert(topic.clone(), *qos);
            }

            let subs = TopicSubscription::parse(specs.as_slice()).unwrap();
            prop_assert_eq!(subs.len(), expected.len());
            for (topic, qos) in expected {
                prop_assert_eq!(subs.qos(&topic), Some(qos));
            }
        }

        #[test]
        fn parse_rejects_entries_without_separator(topic in "[a-z/]{1,12}") {
            let specs = vec!["valid?1".to_string(), topic.clone()];
            prop_assert_eq!(
                TopicSubscription::parse(specs.as_slice()),
                Err(TopicSpecError::MissingSeparator(topic))
            );
        }

        #[test]
        fn parse_rejects_non_numeric_qos(topic in "[a-z/]{1,12}", qos in "[a-z]{1,3}") {
            let spec = format!("{topic}?{qos}");
            let is_invalid_qos = matches!(
                TopicSubscription::parse(&[spec]),
                Err(TopicSpecError::InvalidQos { .. })
            );
            prop_assert!(is_invalid_qos);
        }
    }
}
