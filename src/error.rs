//! Crate-wide error taxonomy.
//!
//! Mirrors the distinctions the spec draws in its error-handling design: producer-contract
//! errors that the actor reacts to by transitioning state (`IllegalState`, `Fenced`,
//! `Authorization`, `Transport`), and facade-level errors that are surfaced to callers
//! verbatim (`Timeout`, `Terminated`).

use thiserror::Error;

/// Errors raised by a [`crate::producer::TransactionalProducer`].
///
/// `Fenced` is the only fatal variant: it is a one-way terminal signal that stops the
/// owning actor. Every other variant is either retryable (`Authorization`, `Transport`) or
/// triggers a bounded recovery cycle (`IllegalState`).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ProducerError {
    /// The producer is not authorized to use its configured transactional id.
    #[error("not authorized to initialize transactions: {0}")]
    Authorization(String),

    /// A non-fatal protocol-level error on a transaction boundary call
    /// (`begin`/`commit`/`abort`). Recoverable by aborting, closing, and reinitializing.
    #[error("illegal producer state: {0}")]
    IllegalState(String),

    /// Another producer instance has claimed this transactional id. Terminal.
    #[error("producer fenced by a newer transactional instance: {0}")]
    Fenced(String),

    /// A transport-level failure (connection reset, broker unreachable, etc).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProducerError {
    /// Whether this error is the fatal, one-way fencing signal.
    pub fn is_fenced(&self) -> bool {
        matches!(self, Self::Fenced(_))
    }
}

/// Errors surfaced across the [`crate::facade`] boundary.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum PublisherError {
    /// The ask-style call did not receive a reply within its caller-supplied timeout.
    /// The underlying request may still be queued or in flight.
    #[error("timed out waiting for a reply from the publisher actor")]
    Timeout,

    /// The publisher actor has stopped (most commonly after being fenced) and will not
    /// process any further messages.
    #[error("publisher actor has terminated")]
    Terminated,

    /// The publish failed because its enclosing transaction could not be committed.
    #[error("publish failed: {0}")]
    PublishFailed(#[from] ProducerError),
}

pub type Result<T, E = PublisherError> = std::result::Result<T, E>;
