//! Wire-level value types shared by the producer contract, the KTable contract, and the
//! publisher state machine.

use bytes::Bytes;

/// A topic name paired with a partition index.
///
/// Used uniformly wherever the spec names a `(topic, partition)` pair, instead of loose
/// tuples, so the owned partition can't be confused with an unrelated one at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A single record to be produced, independent of which topic or partition it lands on.
///
/// Key and value are owned by the record. Headers preserve caller order: they are a
/// `Vec`, not a `BTreeMap`, because the spec's data model calls out header order as an
/// invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageToPublish {
    pub key: String,
    pub value: Bytes,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl MessageToPublish {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, Vec<u8>)>) -> Self {
        self.headers = headers;
        self
    }
}

/// A request to atomically publish an aggregate's new state snapshot together with the
/// domain events that produced it.
///
/// `state.key` must equal `aggregate_id`; `events` may be empty (the state write alone is
/// still a valid request) but the request as a whole always carries a state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub aggregate_id: String,
    pub state: MessageToPublish,
    pub events: Vec<MessageToPublish>,
}

impl PublishRequest {
    pub fn new(aggregate_id: impl Into<String>, state: MessageToPublish, events: Vec<MessageToPublish>) -> Self {
        let aggregate_id = aggregate_id.into();
        debug_assert_eq!(
            state.key, aggregate_id,
            "state.key must equal aggregate_id"
        );
        Self {
            aggregate_id,
            state,
            events,
        }
    }
}

/// An acknowledgement of a single record write, as returned by
/// [`crate::producer::TransactionalProducer::put_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAck {
    /// `Some` for state-topic records (which carry the aggregate id they describe);
    /// `None` for event records, whose aggregate is not tracked per-ack.
    pub aggregate_id: Option<String>,
    pub topic_partition: TopicPartition,
    pub offset: i64,
}

impl RecordAck {
    pub fn new(aggregate_id: Option<String>, topic_partition: TopicPartition, offset: i64) -> Self {
        Self {
            aggregate_id,
            topic_partition,
            offset,
        }
    }
}

/// A physical record about to be handed to [`crate::producer::TransactionalProducer::put_records`].
///
/// `partition` is `None` for event records (broker default partitioner decides) and
/// `Some` for state records (explicitly pinned to the owned partition).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub aggregate_id: Option<String>,
    pub message: MessageToPublish,
}

/// A snapshot of a downstream KTable's materialization progress for one topic-partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KTableProgress {
    pub current_offset: i64,
    pub end_offset: i64,
}

impl KTableProgress {
    pub fn new(current_offset: i64, end_offset: i64) -> Self {
        debug_assert!(current_offset <= end_offset);
        Self {
            current_offset,
            end_offset,
        }
    }

    pub fn is_caught_up(&self) -> bool {
        self.current_offset >= self.end_offset
    }
}
