//! Workload stream results and their aggregation.
//!
//! A stream is a strict sequence of benchmark invocations. Item failures are
//! recorded in the stream's [`StreamReport`] and the stream moves on to the
//! next item. Once every stream has been joined, [`aggregate`] turns the
//! reports into either the full list of invocation records or one
//! [`AggregateWorkloadError`] naming every failed stream and message.

use harness_types::ContainerLabel;
use std::time::Duration;
use thiserror::Error;

/// Final status of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// Every item succeeded.
    Ok,
    /// At least one item failed, or the stream did not finish.
    Failed,
}

/// Per-stream summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadResult {
    /// Stream index.
    pub stream_index: usize,
    /// Ok or Failed.
    pub status: StreamStatus,
    /// Wall time of the whole stream.
    pub elapsed: Duration,
    /// Failure messages joined by newlines, if any.
    pub error_message: Option<String>,
}

/// One benchmark invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    /// Stream that ran it.
    pub stream: usize,
    /// Position in the stream.
    pub item: usize,
    /// Container the invocation targeted.
    pub label: ContainerLabel,
    /// Wall time of the invocation.
    pub elapsed: Duration,
    /// True if the invocation succeeded.
    pub succeeded: bool,
    /// Tool output (or error text on failure).
    pub output: String,
}

/// Everything one stream produced. Written only by that stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    /// Stream index.
    pub stream_index: usize,
    /// Every invocation, successful or not, in order.
    pub records: Vec<InvocationRecord>,
    /// Failure messages in order.
    pub failures: Vec<String>,
    /// Wall time of the stream.
    pub elapsed: Duration,
}

impl StreamReport {
    /// Empty report for `stream_index`.
    pub fn new(stream_index: usize) -> Self {
        Self {
            stream_index,
            records: Vec::new(),
            failures: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// A stream that produced nothing and is counted as failed (panic,
    /// join timeout).
    pub fn lost(stream_index: usize, elapsed: Duration, message: impl Into<String>) -> Self {
        Self {
            stream_index,
            records: Vec::new(),
            failures: vec![message.into()],
            elapsed,
        }
    }

    /// Record a successful invocation.
    pub fn record_success(
        &mut self,
        item: usize,
        label: ContainerLabel,
        elapsed: Duration,
        output: impl Into<String>,
    ) {
        self.records.push(InvocationRecord {
            stream: self.stream_index,
            item,
            label,
            elapsed,
            succeeded: true,
            output: output.into(),
        });
    }

    /// Record a failed invocation with its descriptive message.
    pub fn record_failure(
        &mut self,
        item: usize,
        label: ContainerLabel,
        elapsed: Duration,
        message: impl Into<String>,
    ) {
        let message = message.into();
        self.records.push(InvocationRecord {
            stream: self.stream_index,
            item,
            label,
            elapsed,
            succeeded: false,
            output: message.clone(),
        });
        self.failures.push(message);
    }

    /// True if nothing failed.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Summarize as a [`WorkloadResult`].
    pub fn result(&self) -> WorkloadResult {
        WorkloadResult {
            stream_index: self.stream_index,
            status: if self.is_ok() {
                StreamStatus::Ok
            } else {
                StreamStatus::Failed
            },
            elapsed: self.elapsed,
            error_message: if self.is_ok() {
                None
            } else {
                Some(self.failures.join("\n"))
            },
        }
    }
}

/// One or more streams recorded failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{failed_streams}/{total_streams} loops failed:{}", indented(.messages))]
pub struct AggregateWorkloadError {
    /// Streams with at least one failure.
    pub failed_streams: usize,
    /// Streams launched.
    pub total_streams: usize,
    /// Every failure message, prefixed with its stream id.
    pub messages: Vec<String>,
    /// Per-stream summaries.
    pub results: Vec<WorkloadResult>,
    /// Every invocation record, including those of healthy streams.
    pub records: Vec<InvocationRecord>,
}

fn indented(messages: &[String]) -> String {
    messages.iter().map(|m| format!("\n  {}", m)).collect()
}

/// Combine joined stream reports.
///
/// Reports are ordered by stream index. Returns every invocation record if
/// no stream failed.
pub fn aggregate(
    mut reports: Vec<StreamReport>,
) -> Result<Vec<InvocationRecord>, AggregateWorkloadError> {
    reports.sort_by_key(|r| r.stream_index);

    let total_streams = reports.len();
    let results: Vec<WorkloadResult> = reports.iter().map(StreamReport::result).collect();
    let failed_streams = results
        .iter()
        .filter(|r| r.status == StreamStatus::Failed)
        .count();

    let messages: Vec<String> = reports
        .iter()
        .flat_map(|r| {
            r.failures
                .iter()
                .map(move |m| format!("stream {}: {}", r.stream_index, m))
        })
        .collect();

    let records: Vec<InvocationRecord> = reports.into_iter().flat_map(|r| r.records).collect();

    if failed_streams == 0 {
        return Ok(records);
    }

    Err(AggregateWorkloadError {
        failed_streams,
        total_streams,
        messages,
        results,
        records,
    })
}
