//! The transactional producer contract (spec §4.1).
//!
//! This is the thin boundary between the publisher actor and whatever Kafka-like client
//! library is actually dialing a broker. The actor only ever sees this trait; concrete
//! implementations (and the wire protocol, connection pooling, SASL/TLS transport that
//! back them) live outside this crate.
//!
//! Grounded on the split between `TransactionalProducer`/`KafkaTransaction` in
//! `PostHog-posthog`'s `rust-common-kafka/src/transaction.rs` (begin/commit/abort as
//! explicit transaction-boundary calls) and on the teacher's `trait ProducerClient`
//! pattern in `client/producer.rs` (a narrow `dyn`-safe trait wrapping the real client, so
//! tests can swap in a scripted mock).

use async_trait::async_trait;

use crate::error::ProducerError;
use crate::record::{OutgoingRecord, RecordAck};

pub type Result<T, E = ProducerError> = std::result::Result<T, E>;

/// A transactional producer bound to one partition's transactional identity.
///
/// `begin`, `commit`, and `abort` are transaction-boundary calls and are synchronous per
/// the spec; `init_transactions`, `put_records`, and `close` cross the network and are
/// asynchronous.
#[async_trait]
pub trait TransactionalProducer: std::fmt::Debug + Send + Sync {
    /// Acquire (or re-acquire) the transactional producer identity. Retryable: callers
    /// should keep calling this with backoff until it succeeds.
    async fn init_transactions(&self) -> Result<()>;

    /// Open a new transaction. May fail with [`ProducerError::IllegalState`] (non-fatal,
    /// triggers recovery) or [`ProducerError::Fenced`] (fatal).
    fn begin(&self) -> Result<()>;

    /// Produce a batch of records within the currently open transaction.
    ///
    /// Returns one result per input record, **in input order**, so batch failures can be
    /// pinpointed without a separate correlation id.
    async fn put_records(&self, records: Vec<OutgoingRecord>) -> Vec<Result<RecordAck>>;

    /// Commit the currently open transaction. May fail with
    /// [`ProducerError::IllegalState`] or [`ProducerError::Fenced`].
    fn commit(&self) -> Result<()>;

    /// Abort the currently open transaction. Errors are expected to be swallowed by
    /// callers attempting a best-effort abort; the method still reports them so a caller
    /// that cares (e.g. to decide whether to retry the abort) can inspect them.
    fn abort(&self) -> Result<()>;

    /// Release any held transactional identity. Idempotent.
    async fn close(&self);
}
