//! Line-oriented log multiplexing for remote command output
//!
//! Two independently arriving chunk streams (stdout and stderr) are split into
//! complete lines and merged into one ordered sequence that a single consumer
//! pulls lazily. The producers are push-style callbacks; the consumer is a
//! `Stream` of [`LogRecord`]s that ends once the command's output has ended.

pub mod multiplexer;
pub mod record;
pub mod splitter;

#[cfg(test)]
mod tests;

pub use multiplexer::{OutputSink, StreamMultiplexer};
pub use record::{LogRecord, StreamSource, WireRecord};
pub use splitter::LineSplitter;
