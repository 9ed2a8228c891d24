//! Structured event stream.
//!
//! Discrete, typed events emitted while a scenario replays. Events are
//! serialized as newline-delimited JSON (JSONL) and include a monotonically
//! increasing sequence number for ordering guarantees.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::{ContractStatus, Notification};
use crate::state::{ParameterState, Timestamp};
use crate::unit::UnitId;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Summary statistics emitted when a scenario run ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Scripted steps applied.
    pub steps_applied: usize,
    /// Engine notifications observed.
    pub notifications: usize,
    /// Contracts that completed.
    pub completed: usize,
    /// Contracts that failed.
    pub failed: usize,
    /// Contracts still active.
    pub active: usize,
    /// Simulation time at the end of the run.
    pub sim_time: Timestamp,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "steps={} notifications={} completed={} failed={} active={} time={:.1}s",
            self.steps_applied,
            self.notifications,
            self.completed,
            self.failed,
            self.active,
            self.sim_time,
        )
    }
}

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during a scenario run.
///
/// Each variant is tagged with `"type"` when serialized to JSON so consumers
/// can dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Replay is about to start.
    ScenarioStarted {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Scenario name.
        scenario: String,
        /// Number of contracts tracked.
        contracts: usize,
        /// Number of scripted steps.
        steps: usize,
    },

    /// One scripted step was applied.
    StepApplied {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Zero-based step index.
        index: usize,
        /// Simulation time of the step.
        at: Timestamp,
        /// Action name (`dock`, `tick`, ...).
        action: String,
    },

    /// A condition node changed state.
    NodeStateChanged {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Contract id.
        contract: String,
        /// Node key.
        node: String,
        /// Previous state.
        from: ParameterState,
        /// New state.
        to: ParameterState,
    },

    /// A group switched the unit it tracks.
    TrackingChanged {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Contract id.
        contract: String,
        /// Group key.
        group: String,
        /// Newly tracked unit, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<UnitId>,
    },

    /// A contract reached a final status.
    ContractFinished {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Contract id.
        contract: String,
        /// Final status.
        status: ContractStatus,
    },

    /// Replay ended.
    ScenarioFinished {
        /// Wall-clock time.
        timestamp: DateTime<Utc>,
        /// Run statistics.
        summary: RunSummary,
    },
}

impl Event {
    /// Converts an engine notification into an event stamped with `timestamp`.
    #[must_use]
    pub fn from_notification(notification: &Notification, timestamp: DateTime<Utc>) -> Self {
        match notification.clone() {
            Notification::StateChanged {
                contract,
                node,
                from,
                to,
            } => Self::NodeStateChanged {
                timestamp,
                contract,
                node,
                from,
                to,
            },
            Notification::TrackingChanged {
                contract,
                group,
                unit,
            } => Self::TrackingChanged {
                timestamp,
                contract,
                group,
                unit,
            },
            Notification::ContractFinished { contract, status } => Self::ContractFinished {
                timestamp,
                contract,
                status,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) increments the sequence counter,
/// serializes the event as a single JSON line, and flushes the underlying
/// writer. Serialization or I/O failures are dropped; the event stream never
/// aborts a run.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that appends to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) {
        if let Ok(mut w) = self.writer.lock() {
            let _ = w.flush();
        }
    }
}
