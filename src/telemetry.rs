//! Operational telemetry events and sinks.
//!
//! The engine records a handful of structured events alongside its `tracing`
//! output: schema upgrades, optimistic-locking retries, sequence numbers
//! consumed without a matching row, and lifecycle transitions.

use std::io;

use serde::{Deserialize, Serialize};

/// Which counter a sequencing event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceScope {
    /// A pull request's top-level activity counter.
    PullRequest,
    /// A parent activity's reply counter.
    Reply,
}

/// A structured telemetry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Records the current database schema version after migrations apply.
    SchemaVersionRecorded {
        /// Diesel migration version string (e.g. `20250301000000`).
        schema_version: String,
    },

    /// A conditional write lost the race and is being retried.
    SequenceConflictRetried {
        /// Counter that conflicted.
        scope: SequenceScope,
        /// Identifier of the row holding the counter.
        record_id: i64,
        /// Zero-based attempt that conflicted.
        attempt: u32,
    },

    /// The retry budget ran out; the caller receives a conflict.
    SequenceBudgetExhausted {
        /// Counter that conflicted.
        scope: SequenceScope,
        /// Identifier of the row holding the counter.
        record_id: i64,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// A sequence number was consumed but the activity row was not written.
    SequenceGapRecorded {
        /// Counter that advanced.
        scope: SequenceScope,
        /// Owning pull request.
        pull_req_id: i64,
        /// Order that will never be used.
        order: i64,
        /// Sub-order that will never be used (zero for top-level).
        sub_order: i64,
    },

    /// A pull request changed lifecycle state.
    PullRequestStateChanged {
        /// Pull request identifier.
        pull_req_id: i64,
        /// Previous state.
        old_state: String,
        /// New state.
        new_state: String,
    },
}

/// A sink that can record telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Records a telemetry event.
    fn record(&self, event: TelemetryEvent);
}

/// Telemetry sink that drops all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Records telemetry events to stderr as JSON lines (JSONL).
#[derive(Debug, Default)]
pub struct StderrJsonlTelemetrySink;

impl TelemetrySink for StderrJsonlTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        let Ok(serialised) = serde_json::to_string(&event) else {
            return;
        };

        let _ignored = writeln_stderr(&serialised);
    }
}

fn writeln_stderr(message: &str) -> io::Result<()> {
    use io::Write;

    let mut stderr = io::stderr().lock();
    writeln!(stderr, "{message}")
}

/// Test helpers for asserting on recorded telemetry.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use std::sync::Mutex;

    use super::{TelemetryEvent, TelemetrySink};

    /// Sink that keeps every event in memory.
    #[derive(Debug, Default)]
    pub struct RecordingTelemetrySink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl RecordingTelemetrySink {
        /// Drains and returns the recorded events.
        ///
        /// # Panics
        ///
        /// Panics if the internal mutex is poisoned.
        #[must_use]
        pub fn take(&self) -> Vec<TelemetryEvent> {
            self.events
                .lock()
                .unwrap_or_else(|error| panic!("events mutex should be available: {error}"))
                .drain(..)
                .collect()
        }
    }

    impl TelemetrySink for RecordingTelemetrySink {
        fn record(&self, event: TelemetryEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingTelemetrySink;
    use super::{SequenceScope, TelemetryEvent, TelemetrySink};

    #[test]
    fn recording_sink_captures_events() {
        let sink = RecordingTelemetrySink::default();
        sink.record(TelemetryEvent::SequenceConflictRetried {
            scope: SequenceScope::PullRequest,
            record_id: 4,
            attempt: 0,
        });

        assert_eq!(
            sink.take(),
            vec![TelemetryEvent::SequenceConflictRetried {
                scope: SequenceScope::PullRequest,
                record_id: 4,
                attempt: 0,
            }]
        );
        assert!(sink.take().is_empty());
    }

    #[test]
    fn events_serialise_with_type_tag() {
        let event = TelemetryEvent::SequenceGapRecorded {
            scope: SequenceScope::Reply,
            pull_req_id: 1,
            order: 3,
            sub_order: 2,
        };

        let json = serde_json::to_string(&event)
            .unwrap_or_else(|error| panic!("event should serialise: {error}"));

        assert_eq!(
            json,
            r#"{"type":"sequence_gap_recorded","scope":"reply","pull_req_id":1,"order":3,"sub_order":2}"#
        );
    }
}
