#![forbid(unsafe_code)]

//! propbind public facade crate.
//!
//! Binds properties of host components to value streams and ties the
//! subscriptions to the host's lifecycle.

pub use propbind_core::{
    DeclarationError, InputSnapshot, InstanceId, Observer, Sequence, StreamError, StreamRef, Subject,
    SubscriptionHandle, ValueStream,
};

#[cfg(feature = "runtime")]
pub use propbind_runtime::{
    Binding, BindingBuilder, HostClass, Hooks, Instance, LifecycleConfig, Phase, Selection,
};

pub mod prelude {
    pub use propbind_core as core;
    #[cfg(feature = "runtime")]
    pub use propbind_runtime as runtime;
}
