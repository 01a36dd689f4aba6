#![forbid(unsafe_code)]

//! Binding engine: keeps host properties in sync with value streams across
//! the host's mount, update and unmount notifications.
//!
//! # Role in propbind
//! `propbind-runtime` owns everything between a declared [`Binding`] and the
//! reactive state an [`Instance`] exposes: the subscription registry, the
//! per-emission pipeline, load/release, re-bind decisions, computed
//! re-subscription and the handler chains that wire it into hosts.
//!
//! # How it fits in the system
//! Streams and errors come from `propbind-core`. Hosts build a
//! [`HostClass`], attach bindings and drive instances through
//! [`Instance::mount`], [`Instance::set_props`] and [`Instance::unmount`].
//! The engine logs through `tracing` and never installs a subscriber.

pub mod controller;
pub mod declaration;
pub mod diagnostics;
pub mod host;
pub mod lifecycle;
pub mod pipeline;
pub mod reactive;
pub mod registry;
pub mod state;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod trigger;
pub mod watcher;

pub use controller::{load, release};
pub use declaration::{Binding, BindingBuilder, RESERVED_SIDE_EFFECT_KEY, Selection, StreamSource};
pub use host::{Hooks, HostClass, Instance, Phase, WeakInstance};
pub use lifecycle::{LifecycleConfig, LifecycleEvent};
pub use pipeline::EmissionOutcome;
pub use reactive::{BatchScope, Computed, Observable, Subscription, Watch, batch, untracked};
pub use state::{StateStore, Transaction};
pub use trigger::{RebindTrigger, UpdateNotice};
