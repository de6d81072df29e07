#![cfg(unix)]

use speedbench_core::error::{BenchError, ErrorKind};
use speedbench_core::stream::{LineFormat, ProcessStreamReader, StreamOptions};
use speedbench_test_utils::{at_ms, fake_benchmark, iso_ms, record_script};
use std::time::Duration;

fn spawn(script: &str) -> ProcessStreamReader {
    ProcessStreamReader::spawn(
        &fake_benchmark(script),
        Duration::from_secs(1),
        Duration::ZERO,
        StreamOptions::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_records_arrive_in_stdout_order() {
    let mut reader = spawn(&record_script(20, 50));
    let records = reader.collect_records().await.unwrap();

    assert_eq!(records.len(), 20);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.start_time, at_ms(i as i64 * 50));
        assert_eq!(record.core_id, Some(i % 4));
    }
    assert_eq!(reader.stderr(), Some(""));
}

#[tokio::test]
async fn test_final_line_without_newline_is_kept() {
    let mut reader = spawn("printf '1,2024-01-01T00:00:00Z,2024-01-01T00:00:01Z'");
    let records = reader.collect_records().await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].core_id, Some(1));
    assert_eq!(records[0].duration(), chrono::Duration::seconds(1));
}

#[tokio::test]
async fn test_records_before_failure_are_yielded_then_stderr_surfaces() {
    let script = format!(
        "echo '0,{},{}'; echo 'model not found: foo' >&2; exit 1",
        iso_ms(0),
        iso_ms(10)
    );
    let mut reader = spawn(&script);

    let first = reader.next_record().await.unwrap();
    assert!(first.is_some());

    let err = reader.next_record().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BenchmarkProcess);
    match err {
        BenchError::ProcessFailed { code, stderr, .. } => {
            assert_eq!(code, Some(1));
            assert_eq!(stderr, "model not found: foo\n");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_malformed_line_is_reported_with_its_number() {
    let script = format!("echo '0,{},{}'; echo 'not,a-record'", iso_ms(0), iso_ms(5));
    let mut reader = spawn(&script);

    assert!(reader.next_record().await.unwrap().is_some());
    match reader.next_record().await.unwrap_err() {
        BenchError::MalformedLine { line_number, line, .. } => {
            assert_eq!(line_number, 2);
            assert_eq!(line, "not,a-record");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_start_end_format_has_no_core() {
    let script = format!("echo '{},{}'", iso_ms(0), iso_ms(5));
    let mut reader = ProcessStreamReader::spawn(
        &fake_benchmark(&script),
        Duration::from_secs(1),
        Duration::ZERO,
        StreamOptions {
            format: LineFormat::StartEnd,
            ..StreamOptions::default()
        },
    )
    .unwrap();

    let records = reader.collect_records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].core_id, None);
}

#[tokio::test]
async fn test_records_stream_before_exit_and_ticks_fire() {
    let script = format!("echo '0,{},{}'; sleep 0.5", iso_ms(0), iso_ms(5));
    let mut reader = spawn(&script);

    let first = tokio::time::timeout(Duration::from_millis(400), reader.next_record())
        .await
        .expect("record should arrive while the process is still running")
        .unwrap();
    assert!(first.is_some());

    let mut ticks = 0;
    let rest = reader.next_record_with_tick(&mut || ticks += 1).await.unwrap();
    assert!(rest.is_none());
    assert!(ticks >= 2, "expected poll ticks while idle, got {ticks}");
}

#[tokio::test]
async fn test_ticks_keep_firing_while_output_is_steady() {
    let script = (0..30)
        .map(|i| format!("echo '0,{},{}'; sleep 0.05", iso_ms(i * 50), iso_ms(i * 50 + 50)))
        .collect::<Vec<_>>()
        .join("; ");
    let mut reader = spawn(&script);

    let started = std::time::Instant::now();
    let mut ticks = 0;
    let mut records = 0;
    while reader
        .next_record_with_tick(&mut || ticks += 1)
        .await
        .unwrap()
        .is_some()
    {
        records += 1;
    }
    let elapsed = started.elapsed();

    assert_eq!(records, 30);
    let expected = (elapsed.as_millis() / 100) as usize;
    assert!(
        ticks + 3 >= expected,
        "expected about {expected} ticks over {elapsed:?}, got {ticks}"
    );
}

#[tokio::test]
async fn test_duration_and_warmup_are_appended() {
    let mut reader = spawn("echo \"$@\" >&2");
    assert!(reader.collect_records().await.unwrap().is_empty());
    assert_eq!(reader.stderr(), Some("-d 1 -w 0\n"));
}

#[tokio::test]
async fn test_missing_program_is_a_spawn_error() {
    let spec = speedbench_core::CommandSpec::new("/nonexistent/speedbench-bench");
    let err = ProcessStreamReader::spawn(
        &spec,
        Duration::from_secs(1),
        Duration::ZERO,
        StreamOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, BenchError::Spawn { .. }));
}
