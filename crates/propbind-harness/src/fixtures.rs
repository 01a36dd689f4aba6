#![forbid(unsafe_code)]

//! JSON-valued fixtures.
//!
//! End-to-end scenarios bind properties to `serde_json::Value` payloads,
//! the shape most hosts receive from their data sources.

use std::cell::Cell;
use std::rc::Rc;

use propbind_core::{InputSnapshot, StreamRef};
use propbind_runtime::host::Instance;
use serde_json::Value;

use crate::scripted::ScriptedStream;

/// Value type used throughout the end-to-end suites.
pub type Json = Value;

/// Snapshot from `(name, value)` pairs.
#[must_use]
pub fn snapshot<const N: usize>(pairs: [(&str, Json); N]) -> InputSnapshot<Json> {
    pairs.into_iter().collect()
}

/// Stream function that counts its invocations.
///
/// Every call returns a new handle to `stream`, so each call is one load.
pub fn counting(
    stream: &ScriptedStream<Json>,
) -> (Rc<Cell<usize>>, impl Fn(&Instance<Json>) -> StreamRef<Json> + 'static) {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let stream = stream.clone();
    (calls, move |_: &Instance<Json>| {
        counter.set(counter.get() + 1);
        stream.stream()
    })
}

/// Stream function that picks the stream named by input `key`.
///
/// Unknown or missing keys resolve to the `fallback` stream.
pub fn keyed_by_prop(
    key: &'static str,
    streams: Vec<(&'static str, ScriptedStream<Json>)>,
    fallback: ScriptedStream<Json>,
) -> impl Fn(&Instance<Json>) -> StreamRef<Json> + 'static {
    move |instance: &Instance<Json>| {
        let wanted = instance.prop(key);
        streams
            .iter()
            .find(|(name, _)| wanted.as_ref().and_then(Value::as_str) == Some(*name))
            .map_or_else(|| fallback.stream(), |(_, s)| s.stream())
    }
}
