#![forbid(unsafe_code)]

//! Capture of `tracing` event names for assertions.

pub use propbind_runtime::testing::{MessageCapture, capture};
