//! Publisher configuration.
//!
//! A builder in the spirit of the teacher's `BatchProducerBuilder`: sensible defaults for
//! every cadence named in the spec's configuration table (§6), overridable one field at a
//! time.

use std::time::Duration;

use crate::record::TopicPartition;

/// Static configuration for one partition's publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// The state topic-partition this publisher owns. Every state record it writes is
    /// pinned to this partition; the same partition index is used to pick the owned entry
    /// out of a [`crate::ktable::KTableLagSource`] snapshot.
    pub state_partition: TopicPartition,

    /// The topic that domain events are produced to. Partition is left unset per record
    /// (broker default partitioner).
    pub events_topic: String,

    /// The KTable state-store name whose lag this publisher tracks.
    pub state_store_name: String,

    /// Cadence of the `FlushMessages` self-tick that drains pending writes into a
    /// transaction.
    pub flush_interval: Duration,

    /// Default ask timeout for facade operations.
    pub ask_timeout: Duration,

    /// Upper bound on the backoff delay between `init_transactions` retries.
    pub init_backoff_ceiling: Duration,

    /// Cadence of KTable lag polling.
    pub lag_poll_interval: Duration,

    /// Soft cap on pending-writes drained per flush. Additional pending writes remain
    /// queued for the next flush tick.
    pub transaction_max_records: usize,
}

impl PublisherConfig {
    /// Construct a config with the design-default cadences from the spec, for the given
    /// owned state partition, events topic, and KTable store name.
    pub fn new(
        state_partition: TopicPartition,
        events_topic: impl Into<String>,
        state_store_name: impl Into<String>,
    ) -> Self {
        Self {
            state_partition,
            events_topic: events_topic.into(),
            state_store_name: state_store_name.into(),
            flush_interval: Duration::from_millis(250),
            ask_timeout: Duration::from_secs(5),
            init_backoff_ceiling: Duration::from_secs(30),
            lag_poll_interval: Duration::from_secs(2),
            transaction_max_records: 500,
        }
    }

    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_ask_timeout(mut self, ask_timeout: Duration) -> Self {
        self.ask_timeout = ask_timeout;
        self
    }

    pub fn with_init_backoff_ceiling(mut self, init_backoff_ceiling: Duration) -> Self {
        self.init_backoff_ceiling = init_backoff_ceiling;
        self
    }

    pub fn with_lag_poll_interval(mut self, lag_poll_interval: Duration) -> Self {
        self.lag_poll_interval = lag_poll_interval;
        self
    }

    pub fn with_transaction_max_records(mut self, transaction_max_records: usize) -> Self {
        self.transaction_max_records = transaction_max_records;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_design_cadences() {
        let config = PublisherConfig::new(TopicPartition::new("t", 0), "events", "store");
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.lag_poll_interval, Duration::from_secs(2));
        assert!(config.transaction_max_records > 0);
    }

    #[test]
    fn builder_methods_override_individual_fields() {
        let config = PublisherConfig::new(TopicPartition::new("t", 0), "events", "store")
            .with_flush_interval(Duration::from_millis(10))
            .with_transaction_max_records(3);
        assert_eq!(config.flush_interval, Duration::from_millis(10));
        assert_eq!(config.transaction_max_records, 3);
        assert_eq!(config.lag_poll_interval, Duration::from_secs(2));
    }
}
