//! Message sinks standing in for the topic producers.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use relgen_core::Record;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Default buffer size for JSONL writing.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sink state poisoned")]
    Poisoned,
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),
}

/// Destination for produced records.
///
/// Calls block until the record is accepted; errors propagate unchanged.
pub trait Sink: Send {
    fn produce(&mut self, topic: &str, key: Option<&str>, value: &Record) -> Result<(), SinkError>;

    /// Flush buffered messages, returning how many are still pending.
    fn flush(&mut self, timeout: Duration) -> Result<usize, SinkError>;
}

/// Builds one sink per worker.
pub trait SinkFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Sink>, SinkError>;
}

impl<S> SinkFactory for S
where
    S: Sink + Clone + Sync + 'static,
{
    fn create(&self) -> Result<Box<dyn Sink>, SinkError> {
        Ok(Box::new(self.clone()))
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    key: Option<&'a str>,
    value: &'a Record,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, SinkError> {
    mutex.lock().map_err(|_| SinkError::Poisoned)
}

/// Message captured by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedMessage {
    pub topic: String,
    pub key: Option<String>,
    pub value: Record,
}

/// Keeps every message in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<ProducedMessage>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ProducedMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn topic(&self, topic: &str) -> Vec<ProducedMessage> {
        self.messages()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|messages| messages.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for MemorySink {
    fn produce(&mut self, topic: &str, key: Option<&str>, value: &Record) -> Result<(), SinkError> {
        lock(&self.messages)?.push(ProducedMessage {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            value: value.clone(),
        });
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) -> Result<usize, SinkError> {
        Ok(0)
    }
}

/// One `<topic>.jsonl` file per topic under `dir`, shared by all clones.
///
/// Each line is `{"key": ..., "value": {...}}`.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
    files: Arc<Mutex<HashMap<String, BufWriter<File>>>>,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn topic_path(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{topic}.jsonl"))
    }
}

impl Sink for JsonlSink {
    fn produce(&mut self, topic: &str, key: Option<&str>, value: &Record) -> Result<(), SinkError> {
        if topic.is_empty() || topic.contains(['/', '\\']) || topic.starts_with('.') {
            return Err(SinkError::InvalidTopic(topic.to_string()));
        }
        let mut files = lock(&self.files)?;
        if !files.contains_key(topic) {
            let path = self.topic_path(topic);
            debug!(topic = %topic, path = %path.display(), "opening jsonl topic file");
            let file = File::create(&path)?;
            files.insert(
                topic.to_string(),
                BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file),
            );
        }
        let Some(writer) = files.get_mut(topic) else {
            return Err(SinkError::InvalidTopic(topic.to_string()));
        };
        serde_json::to_writer(&mut *writer, &Envelope { key, value })?;
        writeln!(writer)?;
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) -> Result<usize, SinkError> {
        let mut files = lock(&self.files)?;
        for writer in files.values_mut() {
            writer.flush()?;
        }
        Ok(0)
    }
}

/// Writes `<topic>\t<json line>` to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn produce(&mut self, topic: &str, key: Option<&str>, value: &Record) -> Result<(), SinkError> {
        let line = serde_json::to_string(&Envelope { key, value })?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{topic}\t{line}")?;
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) -> Result<usize, SinkError> {
        std::io::stdout().flush()?;
        Ok(0)
    }
}

/// Discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn produce(&mut self, _topic: &str, _key: Option<&str>, _value: &Record) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&mut self, _timeout: Duration) -> Result<usize, SinkError> {
        Ok(0)
    }
}
