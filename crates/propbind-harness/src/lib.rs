#![forbid(unsafe_code)]

//! Test harness and reference fixtures for propbind.
//!
//! - [`recorder`]: hooks that log every call, with JSONL evidence output.
//! - [`scripted`]: a stream driven by the test that counts subscribes and
//!   disposals and can be told to ignore disposal.
//! - [`fixtures`]: JSON-valued host classes and snapshots.
//! - [`trace`]: capture of `tracing` event names.

pub mod fixtures;
pub mod recorder;
pub mod scripted;
pub mod trace;
