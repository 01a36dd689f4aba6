#![forbid(unsafe_code)]

//! Host classes and their instances.
//!
//! A [`HostClass`] is declared once: extra state, optional loading/error
//! hooks, handler chains and bindings. [`HostClass::instantiate`] creates an
//! [`Instance`], the owning object a binding keeps in sync. The host drives
//! the instance through its lifecycle:
//!
//! ```text
//! Created ──mount()──► Mounted ──unmount()──► Unmounted
//!                        │  ▲
//!                        └──┘ set_props() / update() / call()
//! ```
//!
//! # Invariants
//!
//! 1. `mount` and `unmount` each run their chain at most once.
//! 2. Update notifications are only delivered while mounted.
//! 3. After `unmount` (or after the last handle is dropped) no subscription
//!    of the instance remains registered and no watch remains armed.
//!
//! # Example
//!
//! ```
//! use propbind_core::{InputSnapshot, Subject};
//! use propbind_runtime::declaration::Binding;
//! use propbind_runtime::host::HostClass;
//!
//! let feed: Subject<i32> = Subject::new();
//! let class = HostClass::new("Counter")
//!     .bind(Binding::builder("count", feed.stream()).build()?)?
//!     .finish();
//!
//! let counter = class.instantiate(InputSnapshot::new());
//! counter.mount();
//! feed.next(3);
//! assert_eq!(counter.get("count"), Some(3));
//! counter.unmount();
//! # Ok::<(), propbind_core::DeclarationError>(())
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use propbind_core::{DeclarationError, InputSnapshot, InstanceId, StreamError};

use crate::controller::{self, CycleState};
use crate::declaration::Binding;
use crate::lifecycle::{Chains, LifecycleConfig, LifecycleEvent};
use crate::reactive::{Observable, Subscription, batch};
use crate::registry;
use crate::state::{StateStore, Transaction};
use crate::trigger::UpdateNotice;

type Hook<V> = Rc<dyn Fn(&Instance<V>)>;
type ErrorHook<V> = Rc<dyn Fn(&Instance<V>, &StreamError)>;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Optional loading/error callbacks. Every hook is optional; a missing
/// hook is skipped.
pub struct Hooks<V> {
    clear_error: Option<Hook<V>>,
    start_loading: Option<Hook<V>>,
    stop_loading: Option<Hook<V>>,
    set_error: Option<ErrorHook<V>>,
}

impl<V> Default for Hooks<V> {
    fn default() -> Self {
        Self {
            clear_error: None,
            start_loading: None,
            stop_loading: None,
            set_error: None,
        }
    }
}

impl<V> fmt::Debug for Hooks<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("clear_error", &self.clear_error.is_some())
            .field("start_loading", &self.start_loading.is_some())
            .field("stop_loading", &self.stop_loading.is_some())
            .field("set_error", &self.set_error.is_some())
            .finish()
    }
}

impl<V> Hooks<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_clear_error(mut self, f: impl Fn(&Instance<V>) + 'static) -> Self {
        self.clear_error = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_start_loading(mut self, f: impl Fn(&Instance<V>) + 'static) -> Self {
        self.start_loading = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_stop_loading(mut self, f: impl Fn(&Instance<V>) + 'static) -> Self {
        self.stop_loading = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_set_error(mut self, f: impl Fn(&Instance<V>, &StreamError) + 'static) -> Self {
        self.set_error = Some(Rc::new(f));
        self
    }

    pub(crate) fn clear_error(&self, instance: &Instance<V>) {
        if let Some(f) = &self.clear_error {
            f(instance);
        }
    }

    pub(crate) fn start_loading(&self, instance: &Instance<V>) {
        if let Some(f) = &self.start_loading {
            f(instance);
        }
    }

    pub(crate) fn stop_loading(&self, instance: &Instance<V>) {
        if let Some(f) = &self.stop_loading {
            f(instance);
        }
    }

    pub(crate) fn set_error(&self, instance: &Instance<V>, error: &StreamError) {
        if let Some(f) = &self.set_error {
            f(instance, error);
        }
    }
}

// ---------------------------------------------------------------------------
// HostClass
// ---------------------------------------------------------------------------

/// A host type: declared state, hooks, handler chains and bindings.
///
/// Built by value and frozen with [`finish`](Self::finish). The lifecycle
/// configuration applies to bindings added after it, so call
/// [`with_config`](Self::with_config) first.
pub struct HostClass<V> {
    name: String,
    config: LifecycleConfig,
    state: BTreeMap<String, Option<V>>,
    hooks: Hooks<V>,
    chains: Chains<V>,
    bindings: Vec<Binding<V>>,
}

impl<V: fmt::Debug> fmt::Debug for HostClass<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClass")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("hooks", &self.hooks)
            .field("chains", &self.chains)
            .field(
                "bindings",
                &self.bindings.iter().map(Binding::property).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<V: Clone + PartialEq + 'static> HostClass<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: LifecycleConfig::default(),
            state: BTreeMap::new(),
            hooks: Hooks::default(),
            chains: Chains::default(),
            bindings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = config;
        self
    }

    /// Declare a state property with an initial value.
    #[must_use]
    pub fn state(mut self, name: impl Into<String>, initial: Option<V>) -> Self {
        self.state.insert(name.into(), initial);
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks<V>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn on_mount(mut self, f: impl Fn(&Instance<V>) + 'static) -> Self {
        self.chains.push_mount(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_update(mut self, f: impl Fn(&Instance<V>, &UpdateNotice<V>) + 'static) -> Self {
        self.chains.push_update(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_unmount(mut self, f: impl Fn(&Instance<V>) + 'static) -> Self {
        self.chains.push_unmount(Rc::new(f));
        self
    }

    /// Append `f` to the chain of the method called `name`.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, f: impl Fn(&Instance<V>) + 'static) -> Self {
        self.chains.push_method(name, Rc::new(f));
        self
    }

    /// Attach a binding: declares its property and appends its mount,
    /// update, unmount and reload handlers.
    ///
    /// # Errors
    ///
    /// [`DeclarationError::DuplicateProperty`] if the property is already
    /// bound on this class.
    pub fn bind(mut self, binding: Binding<V>) -> Result<Self, DeclarationError> {
        if self.binding(binding.property()).is_some() {
            return Err(DeclarationError::DuplicateProperty {
                property: binding.property().to_string(),
            });
        }
        self.state.entry(binding.property().to_string()).or_insert(None);
        self.chains.attach(&binding, &self.config);
        self.bindings.push(binding);
        Ok(self)
    }

    #[must_use]
    pub fn finish(self) -> Rc<Self> {
        Rc::new(self)
    }

    /// Create a new instance with the given external inputs.
    pub fn instantiate(self: &Rc<Self>, props: InputSnapshot<V>) -> Instance<V> {
        let state = StateStore::new(self.state.iter().map(|(k, v)| (k.clone(), v.clone())));
        Instance {
            inner: Rc::new(InstanceInner {
                id: InstanceId::next(),
                class: Rc::clone(self),
                state,
                props: Observable::new(props),
                phase: Cell::new(Phase::Created),
                cycles: RefCell::new(AHashMap::new()),
            }),
        }
    }
}

impl<V> HostClass<V> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[must_use]
    pub fn hooks(&self) -> &Hooks<V> {
        &self.hooks
    }

    /// The binding for `property`, if one is attached.
    #[must_use]
    pub fn binding(&self, property: &str) -> Option<&Binding<V>> {
        self.bindings.iter().find(|b| b.property() == property)
    }

    /// Attached bindings, in declaration order.
    #[must_use]
    pub fn bindings(&self) -> &[Binding<V>] {
        &self.bindings
    }

    /// Whether instances respond to [`Instance::call`] with `name`.
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.chains.has_method(name)
    }

    /// Handlers registered for `event`; for methods, across all names.
    #[must_use]
    pub fn handler_count(&self, event: LifecycleEvent) -> usize {
        self.chains.len(event)
    }

    pub(crate) fn chains(&self) -> &Chains<V> {
        &self.chains
    }
}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

/// Lifecycle phase of an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Mounted,
    Unmounted,
}

struct InstanceInner<V> {
    id: InstanceId,
    class: Rc<HostClass<V>>,
    state: StateStore<V>,
    props: Observable<InputSnapshot<V>>,
    phase: Cell<Phase>,
    cycles: RefCell<AHashMap<String, Rc<CycleState>>>,
}

impl<V> Drop for InstanceInner<V> {
    fn drop(&mut self) {
        let purged = registry::purge(self.id);
        if purged > 0 {
            tracing::debug!(
                message = "binding.dispose",
                instance = %self.id,
                purged,
                reason = "dropped",
            );
        }
    }
}

/// An owning object of a host class.
///
/// Cloning an `Instance` creates a new handle to the **same** object.
pub struct Instance<V> {
    inner: Rc<InstanceInner<V>>,
}

impl<V> Clone for Instance<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Instance<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("class", &self.inner.class.name)
            .field("phase", &self.inner.phase.get())
            .finish()
    }
}

impl<V: Clone + PartialEq + 'static> Instance<V> {
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    #[must_use]
    pub fn class(&self) -> &Rc<HostClass<V>> {
        &self.inner.class
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    #[must_use]
    pub fn state(&self) -> &StateStore<V> {
        &self.inner.state
    }

    /// Current value of a state property. Tracked inside derivations.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<V> {
        self.inner.state.get(name)
    }

    /// Current external inputs. Tracked inside derivations.
    #[must_use]
    pub fn props(&self) -> InputSnapshot<V> {
        self.inner.props.get()
    }

    /// One external input. Tracked inside derivations.
    #[must_use]
    pub fn prop(&self, name: &str) -> Option<V> {
        self.inner.props.with(|props| props.get(name).cloned())
    }

    /// Call `callback` after each committed change to state property `name`.
    pub fn observe(
        &self,
        name: &str,
        callback: impl Fn(Option<&V>) + 'static,
    ) -> Option<Subscription> {
        self.inner.state.observe(name, callback)
    }

    /// Write state as one update. Host code uses this for its own state;
    /// bound properties are normally written by their bindings only.
    pub fn commit<R>(&self, f: impl FnOnce(&mut Transaction<'_, V>) -> R) -> R {
        self.inner.state.commit(f)
    }

    /// Run the mount chain. Ignored unless the instance was just created.
    pub fn mount(&self) {
        if self.phase() != Phase::Created {
            self.ignored(LifecycleEvent::Mount);
            return;
        }
        self.inner.phase.set(Phase::Mounted);
        let class = self.class();
        class.chains().run_mount(self, class.config());
    }

    /// Replace the external inputs and deliver the update notification.
    pub fn set_props(&self, props: InputSnapshot<V>) {
        let notice =
            UpdateNotice::new(self.props(), props).with_prev_state(self.state().snapshot());
        self.update(notice);
    }

    /// Deliver a raw update notification. The instance's inputs become
    /// `notice.props`.
    pub fn update(&self, notice: UpdateNotice<V>) {
        if self.phase() != Phase::Mounted {
            self.ignored(LifecycleEvent::Update);
            return;
        }
        // One batch: a computed watch that read the old inputs is notified
        // only after the update chain had its chance to re-load and re-arm.
        batch(|| {
            self.inner.props.set(notice.props.clone());
            let class = self.class();
            class.chains().run_update(self, &notice, class.config());
        });
    }

    /// Run the chain of method `name`. Returns `false` when the class has
    /// no such method or the instance is unmounted.
    pub fn call(&self, name: &str) -> bool {
        if self.phase() == Phase::Unmounted {
            self.ignored(LifecycleEvent::Method);
            return false;
        }
        let class = self.class();
        class.chains().run_method(name, self, class.config())
    }

    /// Re-load every binding through the configured reload method.
    pub fn reload(&self) -> bool {
        let name = self.class().config().reload_method.clone();
        self.call(&name)
    }

    /// Dispose one binding's subscription and watch without unmounting.
    /// Returns `false` when `property` is not bound.
    pub fn release(&self, property: &str) -> bool {
        let Some(binding) = self.class().binding(property).cloned() else {
            return false;
        };
        controller::release(&binding, self);
        true
    }

    /// Run the unmount chain, then dispose anything still registered.
    pub fn unmount(&self) {
        match self.phase() {
            Phase::Unmounted => {
                self.ignored(LifecycleEvent::Unmount);
                return;
            }
            Phase::Mounted => {
                self.inner.phase.set(Phase::Unmounted);
                let class = self.class();
                class.chains().run_unmount(self, class.config());
            }
            Phase::Created => self.inner.phase.set(Phase::Unmounted),
        }
        self.teardown_remaining();
    }

    /// Whether `property`'s current load cycle still accepts emissions
    /// (subscribed and neither completed nor failed).
    #[must_use]
    pub fn is_receiving(&self, property: &str) -> bool {
        self.existing_cycle(property)
            .is_some_and(|cycle| cycle.is_live())
    }

    /// Whether `property` has an armed computed watch.
    #[must_use]
    pub fn is_watching(&self, property: &str) -> bool {
        self.existing_cycle(property)
            .is_some_and(|cycle| cycle.has_watch())
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakInstance<V> {
        WeakInstance {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Runtime state for `property`, created on first use.
    pub(crate) fn cycle(&self, property: &str) -> Rc<CycleState> {
        let mut cycles = self.inner.cycles.borrow_mut();
        Rc::clone(cycles.entry(property.to_string()).or_default())
    }

    pub(crate) fn existing_cycle(&self, property: &str) -> Option<Rc<CycleState>> {
        self.inner.cycles.borrow().get(property).cloned()
    }

    fn teardown_remaining(&self) {
        let purged = registry::purge(self.id());
        let cycles: Vec<Rc<CycleState>> = self.inner.cycles.borrow().values().cloned().collect();
        let watches: Vec<_> = cycles
            .iter()
            .map(|cycle| {
                cycle.retire();
                cycle.replace_watch(None)
            })
            .collect();
        drop(watches);
        if purged > 0 {
            tracing::debug!(
                message = "binding.dispose",
                instance = %self.id(),
                purged,
                reason = "unmount",
            );
        }
    }

    fn ignored(&self, event: LifecycleEvent) {
        tracing::debug!(
            message = "lifecycle.ignored",
            instance = %self.id(),
            event = %event,
            phase = ?self.phase(),
        );
    }
}

/// Non-owning handle to an [`Instance`].
pub struct WeakInstance<V> {
    inner: Weak<InstanceInner<V>>,
}

impl<V> Clone for WeakInstance<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for WeakInstance<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakInstance")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<V> WeakInstance<V> {
    #[must_use]
    pub fn upgrade(&self) -> Option<Instance<V>> {
        self.inner.upgrade().map(|inner| Instance { inner })
    }
}
