//! Push-to-pull bridge between output callbacks and a single consumer

use super::record::{LogRecord, StreamSource};
use super::splitter::LineSplitter;
use futures::stream::Stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Receiver of raw output chunks from a running command.
///
/// Implementations must not block: callbacks run on the transport's reader
/// tasks and may be invoked concurrently for the two streams.
pub trait OutputSink: Send + Sync {
    fn on_stdout(&self, chunk: &str);
    fn on_stderr(&self, chunk: &str);
}

struct MultiplexerState {
    stdout: LineSplitter,
    stderr: LineSplitter,
    queue: VecDeque<LogRecord>,
    finished: bool,
    waiter: Option<oneshot::Sender<()>>,
}

impl MultiplexerState {
    fn splitter_mut(&mut self, source: StreamSource) -> &mut LineSplitter {
        match source {
            StreamSource::Stdout => &mut self.stdout,
            StreamSource::Stderr => &mut self.stderr,
        }
    }

    fn wake(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            // The consumer may have been dropped while suspended
            let _ = waiter.send(());
        }
    }
}

/// Merges stdout and stderr chunks into one ordered sequence of log lines.
///
/// Producers call [`push_chunk`](Self::push_chunk) (or the [`OutputSink`]
/// methods) and [`mark_finished`](Self::mark_finished); a single consumer
/// pulls with [`next_record`](Self::next_record). Records come out in the
/// order they were appended, and once the multiplexer is finished and drained
/// every further pull returns `None` without suspending.
pub struct StreamMultiplexer {
    state: Mutex<MultiplexerState>,
}

impl StreamMultiplexer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MultiplexerState {
                stdout: LineSplitter::new(StreamSource::Stdout),
                stderr: LineSplitter::new(StreamSource::Stderr),
                queue: VecDeque::new(),
                finished: false,
                waiter: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MultiplexerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a chunk to its stream's splitter and queue any completed lines
    pub fn push_chunk(&self, source: StreamSource, chunk: &str) {
        let mut state = self.lock();
        if state.finished {
            tracing::debug!(
                "Dropping {} byte {} chunk received after finish",
                chunk.len(),
                source
            );
            return;
        }

        let records = state.splitter_mut(source).feed(chunk);
        if records.is_empty() {
            return;
        }
        state.queue.extend(records);
        state.wake();
    }

    /// Flush both pending fragments (stdout first) and end the sequence.
    ///
    /// Calling this more than once has no further effect.
    pub fn mark_finished(&self) {
        let mut state = self.lock();
        if state.finished {
            return;
        }

        if let Some(record) = state.stdout.flush() {
            state.queue.push_back(record);
        }
        if let Some(record) = state.stderr.flush() {
            state.queue.push_back(record);
        }
        state.finished = true;
        tracing::trace!("Multiplexer finished with {} queued records", state.queue.len());
        state.wake();
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Records appended but not yet pulled
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Pull the next record, suspending while the queue is empty.
    ///
    /// Returns `None` once the multiplexer is finished and drained.
    pub async fn next_record(&self) -> Option<LogRecord> {
        loop {
            let woken = {
                let mut state = self.lock();
                if let Some(record) = state.queue.pop_front() {
                    return Some(record);
                }
                if state.finished {
                    return None;
                }
                let (tx, rx) = oneshot::channel();
                state.waiter = Some(tx);
                rx
            };
            // A closed channel means another pull replaced our registration; retry either way
            let _ = woken.await;
        }
    }

    /// Pull every remaining record until the end of the sequence
    pub async fn drain(&self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await {
            records.push(record);
        }
        records
    }

    /// Expose the pull side as a lazily consumed stream
    pub fn into_stream(self: Arc<Self>) -> impl Stream<Item = LogRecord> + Send + 'static {
        futures::stream::unfold(self, |mux| async move {
            let record = mux.next_record().await?;
            Some((record, mux))
        })
    }
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for StreamMultiplexer {
    fn on_stdout(&self, chunk: &str) {
        self.push_chunk(StreamSource::Stdout, chunk);
    }

    fn on_stderr(&self, chunk: &str) {
        self.push_chunk(StreamSource::Stderr, chunk);
    }
}
