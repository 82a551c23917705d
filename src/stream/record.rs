//! Log record types shared by the splitter, multiplexer and wire transport

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamSource::Stdout => "stdout",
            StreamSource::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One complete line of output tagged with the stream it came from.
///
/// `sequence_time` is monotonic and reflects arrival at the multiplexer, so
/// records from different streams are ordered by arrival rather than by
/// when the remote side emitted them. `timestamp` is the wall-clock time of
/// the same instant and is what goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    stream: StreamSource,
    text: String,
    sequence_time: Instant,
    timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(stream: StreamSource, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
            sequence_time: Instant::now(),
            timestamp: Utc::now(),
        }
    }

    pub fn stream(&self) -> StreamSource {
        self.stream
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sequence_time(&self) -> Instant {
        self.sequence_time
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `[stdout] text` / `[stderr] text`
    pub fn formatted(&self) -> String {
        format!("[{}] {}", self.stream, self.text)
    }

    pub fn to_wire(&self) -> WireRecord {
        WireRecord {
            data: self.formatted(),
            stream: self.stream,
            timestamp: self.timestamp.timestamp_millis(),
        }
    }
}

/// Self-describing record emitted once per log line on the NDJSON stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub data: String,
    pub stream: StreamSource,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl WireRecord {
    /// Serialize as a single NDJSON line, including the trailing newline
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl From<&LogRecord> for WireRecord {
    fn from(record: &LogRecord) -> Self {
        record.to_wire()
    }
}
