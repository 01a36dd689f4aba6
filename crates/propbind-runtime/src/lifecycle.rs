#![forbid(unsafe_code)]

//! Lifecycle adapter: ordered handler chains per host class.
//!
//! Every lifecycle event (mount, update, unmount) and every named method of
//! a [`HostClass`] owns a list of handlers. Host authors and bindings
//! append to these lists; nothing is ever replaced. Dispatch walks the list
//! in registration order, so two bindings declared on one class both run,
//! in declaration order.
//!
//! # Failure Modes
//!
//! - **Handler panics**: with [`LifecycleConfig::isolate_panics`] (the
//!   default) the panic is caught, counted and logged at `error`, and the
//!   remaining handlers of the chain still run. With isolation disabled the
//!   panic propagates to the caller of the lifecycle operation.
//!
//! [`HostClass`]: crate::host::HostClass

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::controller;
use crate::declaration::Binding;
use crate::diagnostics;
use crate::host::Instance;
use crate::trigger::UpdateNotice;
use crate::watcher;

/// Handler for mount, unmount and named methods.
pub type Handler<V> = Rc<dyn Fn(&Instance<V>)>;
/// Handler for update notifications.
pub type UpdateHandler<V> = Rc<dyn Fn(&Instance<V>, &UpdateNotice<V>)>;

/// Lifecycle behavior shared by every instance of a host class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Catch panics per handler so sibling handlers still run.
    pub isolate_panics: bool,
    /// Name of the manual re-load method every binding chains onto.
    pub reload_method: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            isolate_panics: true,
            reload_method: "reload".to_string(),
        }
    }
}

/// Lifecycle event being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Mount,
    Update,
    Unmount,
    Method,
}

impl LifecycleEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Update => "update",
            Self::Unmount => "unmount",
            Self::Method => "method",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

pub(crate) struct Chains<V> {
    mount: Vec<Handler<V>>,
    update: Vec<UpdateHandler<V>>,
    unmount: Vec<Handler<V>>,
    methods: BTreeMap<String, Vec<Handler<V>>>,
}

impl<V> Default for Chains<V> {
    fn default() -> Self {
        Self {
            mount: Vec::new(),
            update: Vec::new(),
            unmount: Vec::new(),
            methods: BTreeMap::new(),
        }
    }
}

impl<V> fmt::Debug for Chains<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chains")
            .field("mount", &self.mount.len())
            .field("update", &self.update.len())
            .field("unmount", &self.unmount.len())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<V> Chains<V> {
    pub(crate) fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub(crate) fn len(&self, event: LifecycleEvent) -> usize {
        match event {
            LifecycleEvent::Mount => self.mount.len(),
            LifecycleEvent::Update => self.update.len(),
            LifecycleEvent::Unmount => self.unmount.len(),
            LifecycleEvent::Method => self.methods.values().map(Vec::len).sum(),
        }
    }
}

impl<V: Clone + PartialEq + 'static> Chains<V> {
    pub(crate) fn push_mount(&mut self, handler: Handler<V>) {
        self.mount.push(handler);
    }

    pub(crate) fn push_update(&mut self, handler: UpdateHandler<V>) {
        self.update.push(handler);
    }

    pub(crate) fn push_unmount(&mut self, handler: Handler<V>) {
        self.unmount.push(handler);
    }

    pub(crate) fn push_method(&mut self, name: impl Into<String>, handler: Handler<V>) {
        self.methods.entry(name.into()).or_default().push(handler);
    }

    /// Append the binding's actions to every chain.
    pub(crate) fn attach(&mut self, binding: &Binding<V>, config: &LifecycleConfig) {
        let b = binding.clone();
        self.push_mount(Rc::new(move |instance| {
            if b.loads_on_mount() {
                controller::load(&b, instance);
            }
            watcher::arm(&b, instance);
        }));

        let b = binding.clone();
        self.push_update(Rc::new(move |instance, notice| {
            if b.trigger().should_rebind(instance, notice) {
                controller::load(&b, instance);
                watcher::arm(&b, instance);
            }
        }));

        let b = binding.clone();
        self.push_unmount(Rc::new(move |instance| controller::release(&b, instance)));

        let b = binding.clone();
        self.push_method(
            config.reload_method.clone(),
            Rc::new(move |instance| controller::load(&b, instance)),
        );
    }

    pub(crate) fn run_mount(&self, instance: &Instance<V>, config: &LifecycleConfig) {
        for (position, handler) in self.mount.iter().enumerate() {
            guarded(config, instance, LifecycleEvent::Mount, position, || handler(instance));
        }
    }

    pub(crate) fn run_unmount(&self, instance: &Instance<V>, config: &LifecycleConfig) {
        for (position, handler) in self.unmount.iter().enumerate() {
            guarded(config, instance, LifecycleEvent::Unmount, position, || {
                handler(instance);
            });
        }
    }

    pub(crate) fn run_update(
        &self,
        instance: &Instance<V>,
        notice: &UpdateNotice<V>,
        config: &LifecycleConfig,
    ) {
        for (position, handler) in self.update.iter().enumerate() {
            guarded(config, instance, LifecycleEvent::Update, position, || {
                handler(instance, notice);
            });
        }
    }

    /// Run the chain for `name`. Returns `false` when no handler exists.
    pub(crate) fn run_method(
        &self,
        name: &str,
        instance: &Instance<V>,
        config: &LifecycleConfig,
    ) -> bool {
        let Some(chain) = self.methods.get(name) else {
            return false;
        };
        for (position, handler) in chain.iter().enumerate() {
            guarded(config, instance, LifecycleEvent::Method, position, || {
                handler(instance);
            });
        }
        true
    }
}

fn guarded<V: Clone + PartialEq + 'static>(
    config: &LifecycleConfig,
    instance: &Instance<V>,
    event: LifecycleEvent,
    position: usize,
    f: impl FnOnce(),
) {
    if !config.isolate_panics {
        f();
        return;
    }
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        diagnostics::record_handler_panic();
        tracing::error!(
            message = "lifecycle.panic",
            class = %instance.class().name(),
            instance = %instance.id(),
            event = %event,
            position,
            panic = %panic_message(payload.as_ref()),
        );
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
