//! Tests for the log multiplexer

use super::*;
use proptest::prelude::*;
use std::sync::Arc;
use tokio_test::{assert_pending, assert_ready};

fn formatted(records: &[LogRecord]) -> Vec<String> {
    records.iter().map(LogRecord::formatted).collect()
}

/// Split `input` at the given byte offsets (ASCII input only)
fn chunk_at(input: &str, cuts: &[usize]) -> Vec<String> {
    let mut cuts: Vec<usize> = cuts.iter().map(|c| (*c).min(input.len())).collect();
    cuts.sort_unstable();
    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(input[start..cut].to_string());
        start = cut;
    }
    chunks.push(input[start..].to_string());
    chunks
}

#[tokio::test]
async fn test_records_in_append_order() {
    let mux = StreamMultiplexer::new();
    mux.on_stdout("out1\n");
    mux.on_stderr("err1\n");
    mux.on_stdout("out2\nout3\n");
    mux.mark_finished();

    let records = mux.drain().await;
    assert_eq!(
        formatted(&records),
        vec!["[stdout] out1", "[stderr] err1", "[stdout] out2", "[stdout] out3"]
    );
}

#[tokio::test]
async fn test_partial_final_line_flushed_at_finish() {
    let mux = StreamMultiplexer::new();
    mux.on_stdout("complete\ntrailing");
    mux.on_stderr("warn");
    assert_eq!(mux.queued(), 1);

    mux.mark_finished();
    let records = mux.drain().await;
    assert_eq!(
        formatted(&records),
        vec!["[stdout] complete", "[stdout] trailing", "[stderr] warn"]
    );
}

#[test]
fn test_next_record_suspends_until_chunk() {
    let mux = StreamMultiplexer::new();
    let mut pull = tokio_test::task::spawn(mux.next_record());
    assert_pending!(pull.poll());

    // A fragment without a newline produces no record and no wake
    mux.on_stdout("hel");
    assert!(!pull.is_woken());

    mux.on_stdout("lo\n");
    assert!(pull.is_woken());
    let record = assert_ready!(pull.poll()).expect("record expected");
    assert_eq!(record.text(), "hello");
}

#[test]
fn test_mark_finished_wakes_waiting_consumer() {
    let mux = StreamMultiplexer::new();
    let mut pull = tokio_test::task::spawn(mux.next_record());
    assert_pending!(pull.poll());

    mux.mark_finished();
    assert!(pull.is_woken());
    assert!(assert_ready!(pull.poll()).is_none());
}

#[tokio::test]
async fn test_end_of_sequence_is_idempotent() {
    let mux = StreamMultiplexer::new();
    mux.on_stdout("only\n");
    mux.mark_finished();
    mux.mark_finished();

    assert_eq!(mux.next_record().await.map(|r| r.formatted()), Some("[stdout] only".to_string()));
    for _ in 0..3 {
        assert!(mux.next_record().await.is_none());
    }
    assert!(mux.is_finished());
    assert_eq!(mux.queued(), 0);
}

#[tokio::test]
async fn test_chunks_after_finish_are_dropped() {
    let mux = StreamMultiplexer::new();
    mux.mark_finished();
    mux.on_stdout("late\n");
    assert!(mux.next_record().await.is_none());
}

#[tokio::test]
async fn test_into_stream_yields_until_finished() {
    use futures::StreamExt;

    let mux = Arc::new(StreamMultiplexer::new());
    let consumer = tokio::spawn(Arc::clone(&mux).into_stream().collect::<Vec<_>>());

    mux.on_stdout("a\n");
    tokio::task::yield_now().await;
    mux.on_stderr("b\n");
    mux.on_stdout("c");
    mux.mark_finished();

    let records = consumer.await.unwrap();
    assert_eq!(
        formatted(&records),
        vec!["[stdout] a", "[stderr] b", "[stdout] c"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_keep_per_stream_order() {
    const LINES: usize = 500;

    let mux = Arc::new(StreamMultiplexer::new());
    let consumer = {
        let mux = Arc::clone(&mux);
        tokio::spawn(async move { mux.drain().await })
    };

    let stdout = {
        let mux = Arc::clone(&mux);
        std::thread::spawn(move || {
            for i in 0..LINES {
                // Split each line across two chunks to exercise fragment carry-over
                mux.on_stdout(&format!("out-{}", i));
                mux.on_stdout("\n");
            }
        })
    };
    let stderr = {
        let mux = Arc::clone(&mux);
        std::thread::spawn(move || {
            for i in 0..LINES {
                mux.on_stderr(&format!("err-{}\n", i));
            }
        })
    };
    stdout.join().unwrap();
    stderr.join().unwrap();
    mux.mark_finished();

    let records = consumer.await.unwrap();
    assert_eq!(records.len(), LINES * 2);

    let stdout_lines: Vec<&str> = records
        .iter()
        .filter(|r| r.stream() == StreamSource::Stdout)
        .map(|r| r.text())
        .collect();
    let stderr_lines: Vec<&str> = records
        .iter()
        .filter(|r| r.stream() == StreamSource::Stderr)
        .map(|r| r.text())
        .collect();

    let expected_out: Vec<String> = (0..LINES).map(|i| format!("out-{}", i)).collect();
    let expected_err: Vec<String> = (0..LINES).map(|i| format!("err-{}", i)).collect();
    assert_eq!(stdout_lines, expected_out);
    assert_eq!(stderr_lines, expected_err);

    // Arrival order is also monotonic in sequence time
    assert!(records
        .windows(2)
        .all(|pair| pair[0].sequence_time() <= pair[1].sequence_time()));
}

#[tokio::test]
async fn test_dropped_consumer_does_not_disturb_producers() {
    let mux = Arc::new(StreamMultiplexer::new());
    {
        let mut pull = tokio_test::task::spawn(mux.next_record());
        assert_pending!(pull.poll());
    }

    mux.on_stdout("still\nappending\n");
    mux.mark_finished();
    assert_eq!(mux.queued(), 2);
}

#[test]
fn test_wire_record_shape() {
    let record = LogRecord::new(StreamSource::Stderr, "oops");
    let wire = record.to_wire();
    assert_eq!(wire.data, "[stderr] oops");
    assert_eq!(wire.stream, StreamSource::Stderr);
    assert_eq!(wire.timestamp, record.timestamp().timestamp_millis());

    let line = wire.to_ndjson_line().unwrap();
    assert!(line.ends_with('\n'));
    let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(value["data"], "[stderr] oops");
    assert_eq!(value["stream"], "stderr");
    assert!(value["timestamp"].is_i64());
}

proptest! {
    #[test]
    fn prop_splitter_preserves_lines_under_any_chunking(
        input in "[a-c\\n]{0,120}",
        cuts in prop::collection::vec(0usize..120, 0..12),
    ) {
        let mut splitter = LineSplitter::new(StreamSource::Stdout);
        let mut texts = Vec::new();
        for chunk in chunk_at(&input, &cuts) {
            texts.extend(splitter.feed(&chunk).into_iter().map(|r| r.text().to_string()));
        }
        if let Some(last) = splitter.flush() {
            texts.push(last.text().to_string());
        }

        let expected: Vec<String> = input
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        prop_assert_eq!(texts, expected);
    }

    #[test]
    fn prop_multiplexer_keeps_each_stream_intact(
        out in "[a-c\\n]{0,80}",
        err in "[x-z\\n]{0,80}",
        out_cuts in prop::collection::vec(0usize..80, 0..8),
        err_cuts in prop::collection::vec(0usize..80, 0..8),
    ) {
        let mux = StreamMultiplexer::new();
        let out_chunks = chunk_at(&out, &out_cuts);
        let err_chunks = chunk_at(&err, &err_cuts);

        // Interleave the two producers chunk by chunk
        for i in 0..out_chunks.len().max(err_chunks.len()) {
            if let Some(chunk) = out_chunks.get(i) {
                mux.on_stdout(chunk);
            }
            if let Some(chunk) = err_chunks.get(i) {
                mux.on_stderr(chunk);
            }
        }
        mux.mark_finished();

        let records = futures::executor::block_on(mux.drain());
        let by_stream = |source: StreamSource| -> Vec<String> {
            records
                .iter()
                .filter(|r| r.stream() == source)
                .map(|r| r.text().to_string())
                .collect()
        };
        let lines = |s: &str| -> Vec<String> {
            s.split('\n').filter(|l| !l.is_empty()).map(String::from).collect()
        };

        prop_assert_eq!(by_stream(StreamSource::Stdout), lines(&out));
        prop_assert_eq!(by_stream(StreamSource::Stderr), lines(&err));
    }
}
