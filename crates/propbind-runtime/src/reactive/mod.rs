#![forbid(unsafe_code)]

//! Reactive state primitives used by the binding engine.
//!
//! - [`Observable`]: A shared, version-tracked value wrapper with change
//!   notification via subscriber callbacks.
//! - [`Subscription`]: RAII guard that automatically unsubscribes on drop.
//! - [`BatchScope`]: RAII guard that defers all `Observable` notifications
//!   until the scope exits, so several writes land as one update.
//! - [`Computed`]: A memoized derivation whose dependencies are discovered
//!   by tracking the reads it performs.
//! - [`Watch`]: Handle returned by [`Computed::observe`]; notifies when the
//!   derived value actually changes.
//!
//! # Architecture
//!
//! `Observable<T>` uses `Rc<RefCell<..>>` for single-threaded shared ownership.
//! Subscribers are stored as `Weak` function pointers and cleaned up lazily
//! during notification.
//!
//! Reads performed inside [`tracking`] frames register the read value as a
//! dependency of the frame's owner. `Computed<T>` re-tracks on every
//! recomputation, so dependencies that appear or disappear conditionally are
//! followed.
//!
//! `BatchScope` uses a thread-local context to defer notifications. Nested
//! scopes are supported; only the outermost scope triggers flush.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current value is a no-op (no version bump,
//!    no notifications).
//! 4. A dropped [`Subscription`] or [`Watch`] receives no further callbacks,
//!    even within a notification cycle that is already running.
//! 5. Within a `BatchScope`, values are updated immediately but notifications
//!    are deferred until the outermost scope exits.
//! 6. A `Watch` fires only when the recomputed value differs from the
//!    previous one.

pub mod batch;
pub mod computed;
pub mod observable;
pub mod tracking;

pub use batch::{BatchScope, batch};
pub use computed::{Computed, Watch};
pub use observable::{Observable, Subscription};
pub use tracking::untracked;
