#![forbid(unsafe_code)]

//! Recording host hooks.
//!
//! [`HookRecorder::hooks`] returns a [`Hooks`] set whose every callback
//! appends a [`HookCall`] to a shared log. The log can be exported as JSONL
//! (one object per call) for postmortem inspection of failing scenarios.

use std::cell::RefCell;
use std::rc::Rc;

use propbind_core::InstanceId;
use propbind_runtime::host::{Hooks, Instance};

/// One hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCall {
    ClearError,
    StartLoading,
    StopLoading,
    SetError(String),
}

impl HookCall {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClearError => "clear_error",
            Self::StartLoading => "start_loading",
            Self::StopLoading => "stop_loading",
            Self::SetError(_) => "set_error",
        }
    }
}

/// Shared log of hook calls across every instance using the hooks.
#[derive(Debug, Clone, Default)]
pub struct HookRecorder {
    calls: Rc<RefCell<Vec<(InstanceId, HookCall)>>>,
}

impl HookRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks that record into this recorder.
    #[must_use]
    pub fn hooks<V: Clone + PartialEq + 'static>(&self) -> Hooks<V> {
        let clear = Rc::clone(&self.calls);
        let start = Rc::clone(&self.calls);
        let stop = Rc::clone(&self.calls);
        let error = Rc::clone(&self.calls);
        Hooks::new()
            .on_clear_error(move |i: &Instance<V>| {
                clear.borrow_mut().push((i.id(), HookCall::ClearError));
            })
            .on_start_loading(move |i: &Instance<V>| {
                start.borrow_mut().push((i.id(), HookCall::StartLoading));
            })
            .on_stop_loading(move |i: &Instance<V>| {
                stop.borrow_mut().push((i.id(), HookCall::StopLoading));
            })
            .on_set_error(move |i: &Instance<V>, e| {
                error
                    .borrow_mut()
                    .push((i.id(), HookCall::SetError(e.message().to_string())));
            })
    }

    /// Every call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.borrow().iter().map(|(_, c)| c.clone()).collect()
    }

    /// Calls made for one instance, in order.
    #[must_use]
    pub fn calls_for(&self, id: InstanceId) -> Vec<HookCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    #[must_use]
    pub fn count(&self, call: &HookCall) -> usize {
        self.calls.borrow().iter().filter(|(_, c)| c == call).count()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    /// One JSON object per call: `{"seq", "instance", "hook", "error"?}`.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        let mut out = String::new();
        for (seq, (id, call)) in self.calls.borrow().iter().enumerate() {
            let mut line = serde_json::json!({
                "seq": seq,
                "instance": id.raw(),
                "hook": call.name(),
            });
            if let HookCall::SetError(message) = call {
                line["error"] = serde_json::Value::String(message.clone());
            }
            out.push_str(&line.to_string());
            out.push('\n');
        }
        out
    }
}
