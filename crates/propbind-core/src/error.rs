#![forbid(unsafe_code)]

//! Error types shared by every propbind layer.
//!
//! Stream failures are data: they travel from a stream to the host's
//! `set_error` hook and never escape a load as a `Result`. Declaration
//! errors are reported once, when a binding is built.

use thiserror::Error;

/// A failure reported by a stream through its error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The stream produced an error while running.
    #[error("stream failed: {0}")]
    Failed(String),

    /// The stream could not be produced or reached.
    #[error("stream source unavailable: {0}")]
    Unavailable(String),
}

impl StreamError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// The message without the variant prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(message) | Self::Unavailable(message) => message,
        }
    }
}

/// An invalid binding declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error(
        "binding `{property}` is computed but its source is a static stream with no dependency derivation"
    )]
    ComputedWithoutDerivation { property: String },

    #[error("binding `{property}` watches an empty list of inputs")]
    EmptyWatchList { property: String },

    #[error("binding `{property}` is declared twice on the same host class")]
    DuplicateProperty { property: String },
}
