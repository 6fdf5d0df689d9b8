//! Thread-safe metrics collection system
//!
//! Atomic counters for the broker connection and the ingestion pipeline,
//! plus a bounded window of publish latencies.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Publish latencies kept for percentile calculation
const LATENCY_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Broker connection
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,

    // Ingestion pipeline
    messages_received: AtomicU64,
    events_decoded: AtomicU64,
    events_undecoded: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    publish_times: Mutex<Vec<u64>>, // microseconds

    // Lifecycle
    beat_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            events_decoded: AtomicU64::new(0),
            events_undecoded: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publish_times: Mutex::new(Vec::new()),
            beat_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Broker connection metrics
    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn record_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    // Ingestion metrics
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_decoded(&self, decoded: bool) {
        if decoded {
            self.events_decoded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_undecoded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_event_published(&self, duration: Duration) {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.publish_times.lock() {
            times.push(duration.as_micros() as u64);
            if times.len() > LATENCY_WINDOW {
                times.remove(0);
            }
        }
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_beat_state(&self, state: &str) {
        if let Ok(mut current_state) = self.beat_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.connection_start_time,
            &self.messages_received,
            &self.events_decoded,
            &self.events_undecoded,
            &self.events_published,
            &self.publish_failures,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut times) = self.publish_times.lock() {
            times.clear();
        }
        if let Ok(mut state) = self.beat_state.lock() {
            *state = "initializing".to_string();
        }
    }

    /// Average, p50 and p99 publish latency in milliseconds (pure function)
    fn publish_latency_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.publish_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg / 1000.0,
            percentile(&sorted_times, 50.0) / 1000.0,
            percentile(&sorted_times, 99.0) / 1000.0,
        )
    }

    fn connection_duration(&self, now: u64) -> u64 {
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if self.mqtt_connected.load(Ordering::Relaxed) && start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_publish_time_ms, publish_time_p50_ms, publish_time_p99_ms) =
            self.publish_latency_statistics();

        MetricsSnapshot {
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            ingest: IngestMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                events_decoded: self.events_decoded.load(Ordering::Relaxed),
                events_undecoded: self.events_undecoded.load(Ordering::Relaxed),
                events_published: self.events_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                avg_publish_time_ms,
                publish_time_p50_ms,
                publish_time_p99_ms,
            },
            lifecycle: LifecycleMetrics {
                current_state: self
                    .beat_state
                    .lock()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "unknown".to_string()),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub mqtt: MqttMetrics,
    pub ingest: IngestMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestMetrics {
    pub messages_received: u64,
    pub events_decoded: u64,
    pub events_undecoded: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub avg_publish_time_ms: f64,
    pub publish_time_p50_ms: f64,
    pub publish_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub state_transitions: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_metrics() {
        let collector = MetricsCollector::new();

        collector.record_connection_attempt();
        collector.record_connection_failure();
        collector.record_connection_attempt();
        collector.record_connection_established();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.mqtt.connection_attempts, 2);
        assert_eq!(metrics.mqtt.connection_failures, 1);
        assert_eq!(metrics.mqtt.connections_established, 1);
        assert!(metrics.mqtt.connected);

        collector.record_connection_lost();
        let metrics = collector.get_metrics();
        assert_eq!(metrics.mqtt.connections_lost, 1);
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.mqtt.connection_duration_seconds, 0);
    }

    #[test]
    fn test_ingest_metrics() {
        let collector = MetricsCollector::new();

        collector.record_message_received();
        collector.record_message_received();
        collector.record_event_decoded(true);
        collector.record_event_decoded(false);
        collector.record_event_published(Duration::from_millis(2));
        collector.record_publish_failure();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.ingest.messages_received, 2);
        assert_eq!(metrics.ingest.events_decoded, 1);
        assert_eq!(metrics.ingest.events_undecoded, 1);
        assert_eq!(metrics.ingest.events_published, 1);
        assert_eq!(metrics.ingest.publish_failures, 1);
        assert!((metrics.ingest.avg_publish_time_ms - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_state_transitions_ignore_repeats() {
        let collector = MetricsCollector::new();

        collector.set_beat_state("running");
        collector.set_beat_state("running");
        collector.set_beat_state("stopped");

        let metrics = collector.get_metrics();
        assert_eq!(metrics.lifecycle.current_state, "stopped");
        assert_eq!(metrics.lifecycle.state_transitions, 2);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.record_message_received();
                        collector.record_event_published(Duration::from_micros(10));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.ingest.messages_received, 1000);
        assert_eq!(metrics.ingest.events_published, 1000);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let collector = MetricsCollector::new();

        for i in 0..1500 {
            collector.record_event_published(Duration::from_micros(i));
        }

        assert_eq!(collector.publish_times.lock().unwrap().len(), LATENCY_WINDOW);
        // Oldest samples were evicted
        assert!(collector.get_metrics().ingest.publish_time_p50_ms > 0.5);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.1);
        assert!((percentile(&data, 0.0) - 1.0).abs() < 0.1);
        assert!((percentile(&data, 100.0) - 10.0).abs() < 0.1);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.record_message_received();
        collector.record_connection_established();
        collector.set_beat_state("running");

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.ingest.messages_received, 0);
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.lifecycle.current_state, "initializing");
        assert_eq!(metrics.ingest.avg_publish_time_ms, 0.0);
    }
}
