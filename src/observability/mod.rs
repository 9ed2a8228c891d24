//! Observability module
//!
//! Logging, metrics, and the structured event stream emitted while
//! contracts are tracked.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Event, EventEmitter, RunSummary};
pub use logging::{LogFormat, init_logging};
pub use metrics::{init_metrics, render_metrics};
