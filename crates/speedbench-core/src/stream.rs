//! Streaming reader for benchmark stdout
//!
//! Launches the benchmark with `-d <duration> -w <warmup>` appended and yields
//! one [`RawRecord`] per stdout line as soon as the line is complete. Reads are
//! bounded by the next tick deadline so the caller gets a callback every poll
//! interval, busy or quiet.
//!
//! # Line format
//! `core_id,start,end` or `start,end`, ISO-8601 timestamps with a trailing `Z`.

use crate::error::{BenchError, Result};
use crate::process::CommandSpec;
use crate::types::RawRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const READ_CHUNK: usize = 8 * 1024;

/// Field layout of a stdout line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineFormat {
    /// `core_id,start,end`
    #[default]
    CoreStartEnd,
    /// `start,end`
    StartEnd,
}

impl LineFormat {
    /// Expected number of comma-separated fields
    #[inline]
    #[must_use]
    pub fn field_count(self) -> usize {
        match self {
            LineFormat::CoreStartEnd => 3,
            LineFormat::StartEnd => 2,
        }
    }
}

/// Reader tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Field layout of stdout lines
    pub format: LineFormat,
    /// Upper bound on a single read before the tick callback runs
    pub poll_interval: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            format: LineFormat::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Parse an ISO-8601 timestamp, rewriting a literal `Z` to `+00:00`
///
/// Timestamps without an offset are read as UTC.
pub fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    let trimmed = raw.trim();
    let normalized = match trimmed.strip_suffix('Z') {
        Some(body) => format!("{body}+00:00"),
        None => trimmed.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp `{trimmed}`: {e}"))
}

/// Parse one trimmed, non-empty stdout line
pub fn parse_line(line: &str, format: LineFormat, line_number: usize) -> Result<RawRecord> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != format.field_count() {
        return Err(BenchError::malformed(
            line_number,
            line,
            format!(
                "expected {} fields, got {}",
                format.field_count(),
                fields.len()
            ),
        ));
    }

    let (core_id, start, end) = match format {
        LineFormat::CoreStartEnd => {
            let core = fields[0].trim().parse::<usize>().map_err(|e| {
                BenchError::malformed(line_number, line, format!("invalid core id: {e}"))
            })?;
            (Some(core), fields[1], fields[2])
        }
        LineFormat::StartEnd => (None, fields[0], fields[1]),
    };

    let start_time =
        parse_timestamp(start).map_err(|e| BenchError::malformed(line_number, line, e))?;
    let end_time =
        parse_timestamp(end).map_err(|e| BenchError::malformed(line_number, line, e))?;
    if end_time < start_time {
        return Err(BenchError::malformed(line_number, line, "end before start"));
    }

    Ok(RawRecord {
        core_id,
        start_time,
        end_time,
    })
}

/// Byte buffer that splits on `\n` and keeps the trailing partial line
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every newly completed line (without `\n`)
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    /// Take whatever is left (a final line without a newline)
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Streaming reader over a running benchmark process
#[derive(Debug)]
pub struct ProcessStreamReader {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<std::io::Result<String>>>,
    stderr: Option<String>,
    buffer: LineBuffer,
    chunk: Vec<u8>,
    ready: VecDeque<RawRecord>,
    deferred_error: Option<BenchError>,
    options: StreamOptions,
    last_tick: Instant,
    lines_seen: usize,
    finished: bool,
}

impl ProcessStreamReader {
    /// Launch `command -d <duration> -w <warmup>`
    ///
    /// # Errors
    /// - `BenchError::Spawn` if the program cannot be started
    pub fn spawn(
        command: &CommandSpec,
        duration: Duration,
        warmup: Duration,
        options: StreamOptions,
    ) -> Result<Self> {
        let mut cmd = command.to_command();
        cmd.arg("-d")
            .arg(duration.as_secs_f64().to_string())
            .arg("-w")
            .arg(warmup.as_secs_f64().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            command = %command.display(),
            duration_s = duration.as_secs_f64(),
            warmup_s = warmup.as_secs_f64(),
            "spawning benchmark"
        );

        let mut child = cmd.spawn().map_err(|e| BenchError::Spawn {
            program: command.program.clone(),
            source: e,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BenchError::io("capturing stdout", std::io::Error::other("no pipe")))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let mut bytes = Vec::new();
                stderr.read_to_end(&mut bytes).await?;
                text.push_str(&String::from_utf8_lossy(&bytes));
                Ok(text)
            })
        });

        Ok(Self {
            child,
            stdout,
            stderr_task,
            stderr: None,
            buffer: LineBuffer::new(),
            chunk: vec![0; READ_CHUNK],
            ready: VecDeque::new(),
            deferred_error: None,
            options,
            last_tick: Instant::now(),
            lines_seen: 0,
            finished: false,
        })
    }

    /// Next record, or `None` once the process has exited cleanly
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>> {
        self.next_record_with_tick(&mut || {}).await
    }

    /// Next record, calling `on_tick` once per elapsed poll interval
    ///
    /// Ticks fire on schedule whether or not the child is producing output.
    ///
    /// Records already read are always yielded before a process failure is
    /// reported.
    ///
    /// # Errors
    /// - `BenchError::MalformedLine` on the first line that does not parse
    /// - `BenchError::ProcessFailed` with captured stderr on non-zero exit
    pub async fn next_record_with_tick<F>(&mut self, on_tick: &mut F) -> Result<Option<RawRecord>>
    where
        F: FnMut() + ?Sized,
    {
        loop {
            if self.last_tick.elapsed() >= self.options.poll_interval {
                self.last_tick = Instant::now();
                on_tick();
            }
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if let Some(err) = self.deferred_error.take() {
                return Err(err);
            }
            if self.finished {
                return Ok(None);
            }

            let deadline = self.last_tick + self.options.poll_interval;
            let read = tokio::time::timeout_at(deadline, self.stdout.read(&mut self.chunk)).await;

            match read {
                // due tick fires at the top of the loop
                Err(_elapsed) => {}
                Ok(Ok(0)) => {
                    self.last_tick = Instant::now();
                    on_tick();
                    self.finish().await?;
                }
                Ok(Ok(n)) => {
                    for line in self.buffer.push(&self.chunk[..n]) {
                        // Records parsed earlier in this chunk still come first.
                        if let Err(e) = self.ingest(&line) {
                            self.deferred_error = Some(e);
                            self.finished = true;
                            break;
                        }
                    }
                }
                Ok(Err(e)) => return Err(BenchError::io("reading benchmark stdout", e)),
            }
        }
    }

    /// Drain every remaining record
    pub async fn collect_records(&mut self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Captured stderr, available after a clean finish
    #[must_use]
    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    fn ingest(&mut self, line: &[u8]) -> Result<()> {
        self.lines_seen += 1;
        let text = std::str::from_utf8(line).map_err(|e| {
            BenchError::malformed(
                self.lines_seen,
                String::from_utf8_lossy(line),
                format!("invalid utf-8: {e}"),
            )
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let record = parse_line(text, self.options.format, self.lines_seen)?;
        tracing::trace!(line = self.lines_seen, ?record.core_id, "record");
        self.ready.push_back(record);
        Ok(())
    }

    /// Stdout closed: flush the partial line, reap the child, check its status
    async fn finish(&mut self) -> Result<()> {
        self.finished = true;

        if let Some(rest) = self.buffer.finish() {
            self.ingest(&rest)?;
        }

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| BenchError::io("waiting for benchmark", e))?;

        let stderr = match self.stderr_task.take() {
            Some(task) => match task.await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => return Err(BenchError::io("reading benchmark stderr", e)),
                Err(e) => return Err(BenchError::io("joining stderr reader", std::io::Error::other(e))),
            },
            None => String::new(),
        };

        if status.success() {
            tracing::debug!(lines = self.lines_seen, "benchmark exited cleanly");
            self.stderr = Some(stderr);
        } else {
            tracing::debug!(%status, "benchmark exited with failure");
            self.deferred_error = Some(BenchError::ProcessFailed {
                status: status.to_string(),
                code: status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn z_suffix_matches_explicit_offset() {
        let z = parse_timestamp("2024-01-01T12:00:00.000000Z").unwrap();
        let offset = parse_timestamp("2024-01-01T12:00:00.000000+00:00").unwrap();
        assert_eq!(z, offset);
        assert_eq!(z, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn non_utc_offsets_convert() {
        let ts = parse_timestamp("2024-01-01T14:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn naive_timestamp_is_utc() {
        let ts = parse_timestamp("2024-01-01T12:00:00.5").unwrap();
        assert_eq!(
            ts,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(500)
        );
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn parse_core_line() {
        let rec = parse_line(
            "3,2024-01-01T00:00:00Z,2024-01-01T00:00:01Z",
            LineFormat::CoreStartEnd,
            1,
        )
        .unwrap();
        assert_eq!(rec.core_id, Some(3));
        assert_eq!(rec.duration(), chrono::Duration::seconds(1));
    }

    #[test]
    fn parse_start_end_line() {
        let rec = parse_line(
            "2024-01-01T00:00:00Z,2024-01-01T00:00:00.250Z",
            LineFormat::StartEnd,
            1,
        )
        .unwrap();
        assert_eq!(rec.core_id, None);
        assert_eq!(rec.duration(), chrono::Duration::milliseconds(250));
    }

    #[test]
    fn wrong_field_count_is_fatal() {
        let err = parse_line(
            "2024-01-01T00:00:00Z,2024-01-01T00:00:01Z",
            LineFormat::CoreStartEnd,
            7,
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::MalformedLine { line_number: 7, .. }));
    }

    #[test]
    fn end_before_start_is_fatal() {
        let err = parse_line(
            "0,2024-01-01T00:00:01Z,2024-01-01T00:00:00Z",
            LineFormat::CoreStartEnd,
            1,
        )
        .unwrap_err();
        assert!(err.to_string().contains("end before start"));
    }

    #[test]
    fn line_buffer_keeps_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"abc").is_empty());
        let lines = buf.push(b"def\ngh");
        assert_eq!(lines, vec![b"abcdef".to_vec()]);
        assert_eq!(buf.pending, b"gh".to_vec());
        let lines = buf.push(b"\n\nij");
        assert_eq!(lines, vec![b"gh".to_vec(), Vec::new()]);
        assert_eq!(buf.finish(), Some(b"ij".to_vec()));
        assert_eq!(buf.finish(), None);
    }
}
