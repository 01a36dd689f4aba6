#![forbid(unsafe_code)]

//! Core: stream contract, instance identity, input snapshots, and errors.

pub mod error;
pub mod identity;
pub mod snapshot;
pub mod stream;

pub use error::{DeclarationError, StreamError};
pub use identity::InstanceId;
pub use snapshot::InputSnapshot;
pub use stream::{Observer, Sequence, StreamRef, Subject, SubscriptionHandle, ValueStream};
