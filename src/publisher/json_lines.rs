//! JSON-lines sink: one serialized event per line, to stdout or a file

use super::{EventSink, SinkConnector};
use crate::config::OutputSection;
use crate::protocol::Event;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Errors raised by the JSON-lines sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to open sink output {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write event: {0}")]
    Write(#[from] std::io::Error),
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Sink is closed")]
    Closed,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Sink writing newline-delimited JSON events
pub struct JsonLinesSink {
    writer: Option<BufWriter<BoxedWriter>>,
    published: u64,
}

impl JsonLinesSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Some(BufWriter::new(Box::new(writer) as BoxedWriter)),
            published: 0,
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Open `path` for appending, creating it if needed
    pub async fn append_to(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self::new(file))
    }

    /// Number of events written so far
    pub fn published(&self) -> u64 {
        self.published
    }
}

#[async_trait::async_trait]
impl EventSink for JsonLinesSink {
    type Error = SinkError;

    async fn publish(&mut self, event: Event) -> Result<(), Self::Error> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        // Keep lines visible to tailing readers
        writer.flush().await?;

        self.published += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
            writer.shutdown().await?;
            debug!(published = self.published, "JSON-lines sink closed");
        }
        Ok(())
    }
}

/// Connector choosing stdout or a file from the `[output]` section
#[derive(Debug, Clone, Default)]
pub struct JsonLinesConnector {
    path: Option<PathBuf>,
}

impl JsonLinesConnector {
    pub fn new(output: &OutputSection) -> Self {
        Self {
            path: output.path.clone(),
        }
    }
}

#[async_trait::async_trait]
impl SinkConnector for JsonLinesConnector {
    type Sink = JsonLinesSink;

    async fn connect(&self) -> Result<Self::Sink, SinkError> {
        match &self.path {
            Some(path) => {
                info!("Writing events to {}", path.display());
                JsonLinesSink::append_to(path.clone()).await
            }
            None => {
                info!("Writing events to stdout");
                Ok(JsonLinesSink::stdout())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventFields;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn undecoded(topic: &str, raw: &str) -> Event {
        Event::captured_now(EventFields::undecoded(topic, raw.to_string()))
    }

    #[tokio::test]
    async fn test_file_sink_writes_one_line_per_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.ndjson");
        let connector = JsonLinesConnector::new(&OutputSection {
            path: Some(path.clone()),
        });

        let mut sink = connector.connect().await.unwrap();
        sink.publish(undecoded("a", "one")).await.unwrap();
        sink.publish(undecoded("b", "two")).await.unwrap();
        assert_eq!(sink.published(), 2);
        sink.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["topic"], json!("a"));
        assert_eq!(lines[1]["msg_raw"], json!("two"));
        assert_eq!(lines[1]["decoded"], json!(false));
    }

    #[tokio::test]
    async fn test_file_sink_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.ndjson");
        std::fs::write(&path, "existing\n").unwrap();

        let mut sink = JsonLinesSink::append_to(&path).await.unwrap();
        sink.publish(undecoded("a", "x")).await.unwrap();
        sink.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("existing\n"));
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let mut sink = JsonLinesSink::new(tokio::io::sink());
        sink.close().await.unwrap();

        let result = sink.publish(undecoded("a", "x")).await;
        assert!(matches!(result, Err(SinkError::Closed)));
        // Closing twice is harmless
        assert!(sink.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_error_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("events.ndjson");

        let result = JsonLinesSink::append_to(&path).await;
        match result {
            Err(err @ SinkError::Open { .. }) => {
                assert!(err.to_string().contains("missing-dir"));
            }
            Err(other) => panic!("expected open error, got {other}"),
            Ok(_) => panic!("expected open error"),
        }
    }
}
