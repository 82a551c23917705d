use super::record::{LogRecord, StreamSource};

/// Turns arbitrarily sized chunks from one stream into complete lines.
///
/// The trailing fragment after the last newline is held back until more
/// output arrives or the stream ends. `pending` never contains a newline.
#[derive(Debug)]
pub struct LineSplitter {
    source: StreamSource,
    pending: String,
}

impl LineSplitter {
    pub fn new(source: StreamSource) -> Self {
        Self {
            source,
            pending: String::new(),
        }
    }

    pub fn source(&self) -> StreamSource {
        self.source
    }

    /// Bytes received but not yet terminated by a newline
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Append a chunk and return every line it completes, skipping empty lines
    pub fn feed(&mut self, chunk: &str) -> Vec<LogRecord> {
        let Some(last_newline) = chunk.rfind('\n') else {
            self.pending.push_str(chunk);
            return Vec::new();
        };

        let mut complete = std::mem::take(&mut self.pending);
        complete.push_str(&chunk[..last_newline]);
        self.pending.push_str(&chunk[last_newline + 1..]);

        complete
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(|line| LogRecord::new(self.source, line))
            .collect()
    }

    /// Emit the held-back fragment as a final record, if there is one
    pub fn flush(&mut self) -> Option<LogRecord> {
        if self.pending.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        Some(LogRecord::new(self.source, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(records: &[LogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.text()).collect()
    }

    #[test]
    fn test_feed_complete_lines() {
        let mut splitter = LineSplitter::new(StreamSource::Stdout);
        let records = splitter.feed("one\ntwo\n");
        assert_eq!(texts(&records), vec!["one", "two"]);
        assert_eq!(splitter.pending(), "");
        assert!(records.iter().all(|r| r.stream() == StreamSource::Stdout));
    }

    #[test]
    fn test_feed_holds_back_fragment() {
        let mut splitter = LineSplitter::new(StreamSource::Stderr);
        assert!(splitter.feed("par").is_empty());
        assert!(splitter.feed("tial").is_empty());
        assert_eq!(splitter.pending(), "partial");

        let records = splitter.feed(" line\nnext");
        assert_eq!(texts(&records), vec!["partial line"]);
        assert_eq!(splitter.pending(), "next");
    }

    #[test]
    fn test_feed_skips_empty_lines() {
        let mut splitter = LineSplitter::new(StreamSource::Stdout);
        let records = splitter.feed("\n\na\n\nb\n");
        assert_eq!(texts(&records), vec!["a", "b"]);
    }

    #[test]
    fn test_carriage_returns_are_kept() {
        let mut splitter = LineSplitter::new(StreamSource::Stdout);
        let records = splitter.feed("dos\r\n");
        assert_eq!(texts(&records), vec!["dos\r"]);
    }

    #[test]
    fn test_flush_emits_fragment_once() {
        let mut splitter = LineSplitter::new(StreamSource::Stdout);
        splitter.feed("done\nno newline");

        let record = splitter.flush().expect("fragment should flush");
        assert_eq!(record.text(), "no newline");
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn test_flush_empty() {
        let mut splitter = LineSplitter::new(StreamSource::Stdout);
        assert!(splitter.flush().is_none());
        splitter.feed("line\n");
        assert!(splitter.flush().is_none());
    }
}
