//! Media capture backends
//!
//! This module provides the capture traits and the process-backed
//! implementation used in production.

pub mod process;
pub mod traits;

pub use process::ProcessCapture;
pub use traits::{
    CaptureError, CaptureHandle, CaptureResult, FaultReceiver, FaultSender, MediaCapture,
};
