#![forbid(unsafe_code)]

//! Binding declarations.
//!
//! A [`Binding`] ties one property of a host class to a stream, plus the
//! policies that decide when to re-subscribe, which emissions to accept,
//! and which other properties to update on every emission. Declarations
//! are immutable once built and shared by every instance of the class.
//!
//! # Example
//!
//! ```
//! use propbind_core::Subject;
//! use propbind_runtime::declaration::{Binding, Selection};
//!
//! let feed: Subject<i64> = Subject::new();
//! let binding = Binding::builder("latest", feed.stream())
//!     .select(|value: &i64, _index| Selection::from(*value > 0))
//!     .build()
//!     .expect("valid declaration");
//! assert!(!binding.is_computed());
//! ```

use std::fmt;
use std::rc::Rc;

use propbind_core::{DeclarationError, InputSnapshot, StreamRef};

use crate::host::Instance;
use crate::trigger::{RebindTrigger, UpdateNotice};

/// Side-effect key that is never assigned.
pub const RESERVED_SIDE_EFFECT_KEY: &str = "__proto__";

/// Produces a stream for one instance.
pub type DeriveStream<V> = Rc<dyn Fn(&Instance<V>) -> StreamRef<V>>;
/// Derivation whose change re-subscribes a computed binding.
pub type DeriveDependencies<V> = Rc<dyn Fn(&Instance<V>) -> V>;
/// Explicit re-bind predicate over an update notification.
pub type RebindPredicate<V> = Rc<dyn Fn(&Instance<V>, &UpdateNotice<V>) -> bool>;
/// Acceptance filter over `(value, index within the load cycle)`.
pub type SelectFn<V> = Rc<dyn Fn(&V, usize) -> Selection<V>>;
/// Property assignments to apply alongside an emission.
pub type SideEffectFn<V> = Rc<dyn Fn(&V) -> InputSnapshot<V>>;

/// Where a binding's stream comes from.
pub enum StreamSource<V> {
    /// The same stream for every instance.
    Static(StreamRef<V>),
    /// A stream produced per instance, on every load.
    Derived(DeriveStream<V>),
}

impl<V> Clone for StreamSource<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Static(stream) => Self::Static(stream.clone()),
            Self::Derived(f) => Self::Derived(Rc::clone(f)),
        }
    }
}

impl<V> fmt::Debug for StreamSource<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(stream) => f.debug_tuple("Static").field(stream).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl<V> From<StreamRef<V>> for StreamSource<V> {
    fn from(stream: StreamRef<V>) -> Self {
        Self::Static(stream)
    }
}

/// Verdict of an acceptance filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<V> {
    /// Do not commit this emission.
    Reject,
    /// Commit the emitted value.
    Accept,
    /// Commit this value instead of the emitted one.
    AcceptAs(V),
}

impl<V> From<bool> for Selection<V> {
    fn from(select: bool) -> Self {
        if select { Self::Accept } else { Self::Reject }
    }
}

/// Validated, shareable binding declaration.
///
/// Cloning a `Binding` creates a new handle to the **same** declaration.
pub struct Binding<V> {
    inner: Rc<BindingDecl<V>>,
}

pub(crate) struct BindingDecl<V> {
    pub(crate) property: String,
    pub(crate) source: StreamSource<V>,
    pub(crate) explicit_computed: bool,
    pub(crate) dependencies: Option<DeriveDependencies<V>>,
    pub(crate) trigger: RebindTrigger<V>,
    pub(crate) select: Option<SelectFn<V>>,
    pub(crate) side_effects: Option<SideEffectFn<V>>,
    pub(crate) load_on_mount: bool,
}

impl<V> Clone for Binding<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Binding<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.inner;
        f.debug_struct("Binding")
            .field("property", &d.property)
            .field("source", &d.source)
            .field("computed", &self.is_computed())
            .field("trigger", &d.trigger)
            .field("select", &d.select.is_some())
            .field("side_effects", &d.side_effects.is_some())
            .field("load_on_mount", &d.load_on_mount)
            .finish()
    }
}

impl<V: Clone + PartialEq + 'static> Binding<V> {
    /// Start a declaration for `property` bound to `source`.
    pub fn builder(
        property: impl Into<String>,
        source: impl Into<StreamSource<V>>,
    ) -> BindingBuilder<V> {
        BindingBuilder::new(property, source.into())
    }

    /// Start a declaration whose stream is produced per instance.
    pub fn derived(
        property: impl Into<String>,
        f: impl Fn(&Instance<V>) -> StreamRef<V> + 'static,
    ) -> BindingBuilder<V> {
        BindingBuilder::new(property, StreamSource::Derived(Rc::new(f)))
    }

    /// Resolve this binding's stream for `instance`.
    pub(crate) fn resolve(&self, instance: &Instance<V>) -> StreamRef<V> {
        match &self.inner.source {
            StreamSource::Static(stream) => stream.clone(),
            StreamSource::Derived(f) => f(instance),
        }
    }
}

impl<V> Binding<V> {
    #[must_use]
    pub fn property(&self) -> &str {
        &self.inner.property
    }

    /// Explicit computed flag OR a declared dependency derivation.
    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.inner.explicit_computed || self.inner.dependencies.is_some()
    }

    #[must_use]
    pub fn loads_on_mount(&self) -> bool {
        self.inner.load_on_mount
    }

    #[must_use]
    pub fn trigger(&self) -> &RebindTrigger<V> {
        &self.inner.trigger
    }

    pub(crate) fn decl(&self) -> &BindingDecl<V> {
        &self.inner
    }
}

/// Builder for [`Binding`].
pub struct BindingBuilder<V> {
    property: String,
    source: StreamSource<V>,
    explicit_computed: bool,
    dependencies: Option<DeriveDependencies<V>>,
    rebind: Option<RebindPredicate<V>>,
    watched: Option<Vec<String>>,
    select: Option<SelectFn<V>>,
    side_effects: Option<SideEffectFn<V>>,
    load_on_mount: bool,
}

impl<V: Clone + PartialEq + 'static> BindingBuilder<V> {
    fn new(property: impl Into<String>, source: StreamSource<V>) -> Self {
        Self {
            property: property.into(),
            source,
            explicit_computed: false,
            dependencies: None,
            rebind: None,
            watched: None,
            select: None,
            side_effects: None,
            load_on_mount: true,
        }
    }

    /// Re-subscribe whenever the reactive values read by the stream
    /// function change.
    #[must_use]
    pub fn computed(mut self) -> Self {
        self.explicit_computed = true;
        self
    }

    /// Re-subscribe whenever `f`'s result changes. Implies computed.
    #[must_use]
    pub fn resubscribe_on(mut self, f: impl Fn(&Instance<V>) -> V + 'static) -> Self {
        self.dependencies = Some(Rc::new(f));
        self
    }

    /// Re-subscribe on an update notification when `predicate` returns true.
    /// Takes precedence over watched inputs.
    #[must_use]
    pub fn rebind_when(
        mut self,
        predicate: impl Fn(&Instance<V>, &UpdateNotice<V>) -> bool + 'static,
    ) -> Self {
        self.rebind = Some(Rc::new(predicate));
        self
    }

    /// Re-subscribe when any of the named external inputs changes.
    #[must_use]
    pub fn on_props_change<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watched = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Single-name form of [`on_props_change`](Self::on_props_change).
    #[must_use]
    pub fn on_prop_change(self, name: impl Into<String>) -> Self {
        self.on_props_change([name.into()])
    }

    /// Accept at most one emission per load cycle, chosen by `f`.
    #[must_use]
    pub fn select(mut self, f: impl Fn(&V, usize) -> Selection<V> + 'static) -> Self {
        self.select = Some(Rc::new(f));
        self
    }

    /// Assign the returned properties on every emission.
    #[must_use]
    pub fn side_effects(mut self, f: impl Fn(&V) -> InputSnapshot<V> + 'static) -> Self {
        self.side_effects = Some(Rc::new(f));
        self
    }

    /// Whether mounting loads immediately. Defaults to `true`.
    #[must_use]
    pub fn load_on_mount(mut self, load: bool) -> Self {
        self.load_on_mount = load;
        self
    }

    /// Validate and freeze the declaration.
    ///
    /// # Errors
    ///
    /// - [`DeclarationError::ComputedWithoutDerivation`] when the binding is
    ///   computed but has neither a stream function nor a dependency
    ///   derivation to track.
    /// - [`DeclarationError::EmptyWatchList`] when `on_props_change` was
    ///   given no names.
    pub fn build(self) -> Result<Binding<V>, DeclarationError> {
        let computed = self.explicit_computed || self.dependencies.is_some();
        if computed
            && self.dependencies.is_none()
            && matches!(self.source, StreamSource::Static(_))
        {
            return Err(DeclarationError::ComputedWithoutDerivation {
                property: self.property,
            });
        }
        if self.watched.as_ref().is_some_and(Vec::is_empty) {
            return Err(DeclarationError::EmptyWatchList {
                property: self.property,
            });
        }

        let trigger = RebindTrigger::resolve(self.rebind, self.watched);
        Ok(Binding {
            inner: Rc::new(BindingDecl {
                property: self.property,
                source: self.source,
                explicit_computed: self.explicit_computed,
                dependencies: self.dependencies,
                trigger,
                select: self.select,
                side_effects: self.side_effects,
                load_on_mount: self.load_on_mount,
            }),
        })
    }
}
