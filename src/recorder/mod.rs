//! Recording system module
//!
//! This module implements per-stream recording sessions:
//! - SessionManager to start, stop and report on sessions
//! - CapturePipeline pairing one capture with one durable sink
//! - DurableSink for writing media to disk

pub mod error;
pub mod manager;
pub mod naming;
pub mod pipeline;
pub mod sink;
pub mod state;

#[cfg(test)]
pub mod testing;

pub use error::{RecorderError, RecorderResult};
pub use manager::{ManagerOptions, SessionEvent, SessionManager};
pub use pipeline::{CapturePipeline, TeardownFailure, TeardownStep};
pub use sink::{DurableSink, FileSink, FileSinkOpener, SinkOpener};
pub use state::{RecordingSession, SessionSnapshot, SessionState, StopOutcome};
