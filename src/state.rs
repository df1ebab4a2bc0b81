//! The pure publisher state (spec §3/§4.2).
//!
//! Everything here is a plain data structure mutated through typed transitions; none of it
//! touches the network or the mailbox. The actor (`crate::actor`) is the only thing that
//! owns a `PublisherState`, and it is the sole place where these transitions are invoked
//! from message handling, per the "ambient single-threaded mutability -> explicit state
//! type" design note: each transition takes `&mut self` and returns whatever outbox the
//! caller needs to deliver.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::record::{KTableProgress, PublishRequest, RecordAck};

/// The reply delivered to a `publish` caller once its enclosing transaction resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Success {
        state_ack: RecordAck,
        event_acks: Vec<RecordAck>,
    },
    Failure {
        reason: String,
    },
}

/// One buffered `publish` call awaiting its turn in a future flush.
pub struct PendingWrite {
    pub reply: oneshot::Sender<PublishOutcome>,
    pub request: PublishRequest,
}

impl std::fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWrite")
            .field("request", &self.request)
            .finish()
    }
}

/// One outstanding "is this aggregate's state current?" query.
pub struct PendingInit {
    pub reply: oneshot::Sender<bool>,
    pub aggregate_id: String,
    pub expires_at: Instant,
}

impl std::fmt::Debug for PendingInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingInit")
            .field("aggregate_id", &self.aggregate_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The publisher's in-memory state: in-flight acks, pending writes, pending readiness
/// queries, and transaction timing. Born empty whenever the actor enters `Ready`.
#[derive(Debug, Default)]
pub struct PublisherState {
    in_flight: HashMap<String, RecordAck>,
    pending_writes: VecDeque<PendingWrite>,
    pending_inits: Vec<PendingInit>,
    txn_start: Option<Instant>,
}

impl PublisherState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly-acked records into the in-flight index.
    ///
    /// For each ack carrying an `aggregate_id`, the existing entry is replaced only if the
    /// new offset is strictly greater (§4.2: "replace that aggregate's entry only if the
    /// new offset is strictly greater"). Acks without an `aggregate_id` are not tracked
    /// here (per-partition progress is computed by the KTable side, not this index).
    pub fn add_in_flight(&mut self, acks: impl IntoIterator<Item = RecordAck>) {
        for ack in acks {
            let Some(aggregate_id) = ack.aggregate_id.clone() else {
                continue;
            };
            match self.in_flight.get(&aggregate_id) {
                Some(existing) if existing.offset >= ack.offset => {}
                _ => {
                    self.in_flight.insert(aggregate_id, ack);
                }
            }
        }
    }

    pub fn in_flight_for(&self, aggregate_id: &str) -> Option<&RecordAck> {
        self.in_flight.get(aggregate_id)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn add_pending_write(&mut self, reply: oneshot::Sender<PublishOutcome>, request: PublishRequest) {
        self.pending_writes.push_back(PendingWrite { reply, request });
    }

    pub fn pending_write_count(&self) -> usize {
        self.pending_writes.len()
    }

    /// Drain up to `max` pending writes, oldest first, leaving any remainder queued.
    ///
    /// Enforces the "transaction max records" soft cap (§6); with `max = usize::MAX` this
    /// drains everything, matching the literal round-trip law of §8
    /// (`add_pending_write(s, r).flush_writes()` returns `[(s, r)]` and leaves pending
    /// empty).
    pub fn flush_writes(&mut self, max: usize) -> Vec<PendingWrite> {
        let drain_count = self.pending_writes.len().min(max);
        self.pending_writes.drain(..drain_count).collect()
    }

    pub fn add_pending_init(&mut self, reply: oneshot::Sender<bool>, aggregate_id: String, expires_at: Instant) {
        self.pending_inits.push(PendingInit {
            reply,
            aggregate_id,
            expires_at,
        });
    }

    pub fn pending_init_count(&self) -> usize {
        self.pending_inits.len()
    }

    /// Resolve pending readiness queries against a fresh KTable progress snapshot for the
    /// owned partition (§4.2). Evaluated in insertion order, all against a single `now`
    /// sampled once at call entry. Returns the `(sender, decision)` pairs ready to deliver;
    /// unresolved queries remain queued.
    pub fn processed_up_to(
        &mut self,
        progress: KTableProgress,
        now: Instant,
    ) -> Vec<(oneshot::Sender<bool>, bool)> {
        let mut resolved = Vec::new();
        let mut still_pending = Vec::with_capacity(self.pending_inits.len());

        for pending in self.pending_inits.drain(..) {
            let decision = match self.in_flight.get(&pending.aggregate_id) {
                None => Some(true),
                Some(ack) if ack.offset <= progress.current_offset => {
                    self.in_flight.remove(&pending.aggregate_id);
                    Some(true)
                }
                Some(_) if now >= pending.expires_at => Some(false),
                Some(_) => None,
            };

            match decision {
                Some(decision) => resolved.push((pending.reply, decision)),
                None => still_pending.push(pending),
            }
        }

        self.pending_inits = still_pending;
        resolved
    }

    pub fn has_open_transaction(&self) -> bool {
        self.txn_start.is_some()
    }

    pub fn begin_transaction(&mut self, now: Instant) {
        debug_assert!(self.txn_start.is_none(), "at most one transaction open at a time");
        self.txn_start = Some(now);
    }

    pub fn clear_transaction(&mut self) {
        self.txn_start = None;
    }

    pub fn transaction_elapsed_ms(&self, now: Instant) -> u64 {
        match self.txn_start {
            Some(start) => now.saturating_duration_since(start).as_millis() as u64,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TopicPartition;
    use proptest::prelude::*;

    fn ack(aggregate_id: &str, offset: i64) -> RecordAck {
        RecordAck::new(Some(aggregate_id.to_owned()), TopicPartition::new("state", 1), offset)
    }

    #[tokio::test]
    async fn add_in_flight_keeps_only_the_max_offset_per_aggregate() {
        let mut state = PublisherState::new();
        state.add_in_flight([ack("a", 5), ack("a", 3), ack("b", 1)]);

        assert_eq!(state.in_flight_for("a").unwrap().offset, 5);
        assert_eq!(state.in_flight_for("b").unwrap().offset, 1);
        assert_eq!(state.in_flight_len(), 2);
    }

    #[tokio::test]
    async fn add_in_flight_ignores_acks_without_aggregate_id() {
        let mut state = PublisherState::new();
        state.add_in_flight([RecordAck::new(None, TopicPartition::new("events", 0), 99)]);
        assert_eq!(state.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn flush_writes_round_trip_law() {
        let mut state = PublisherState::new();
        let (tx, _rx) = oneshot::channel();
        let request = PublishRequest::new(
            "agg1",
            crate::record::MessageToPublish::new("agg1", vec![1]),
            vec![],
        );
        state.add_pending_write(tx, request.clone());

        let flushed = state.flush_writes(usize::MAX);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].request, request);
        assert_eq!(state.pending_write_count(), 0);
    }

    #[tokio::test]
    async fn flush_writes_respects_soft_cap_and_preserves_fifo_order() {
        let mut state = PublisherState::new();
        for i in 0..5 {
            let (tx, _rx) = oneshot::channel();
            let request = PublishRequest::new(
                format!("agg{i}"),
                crate::record::MessageToPublish::new(format!("agg{i}"), vec![]),
                vec![],
            );
            state.add_pending_write(tx, request);
        }

        let first_batch = state.flush_writes(3);
        assert_eq!(first_batch.len(), 3);
        assert_eq!(first_batch[0].request.aggregate_id, "agg0");
        assert_eq!(first_batch[2].request.aggregate_id, "agg2");
        assert_eq!(state.pending_write_count(), 2);

        let second_batch = state.flush_writes(usize::MAX);
        assert_eq!(second_batch.len(), 2);
        assert_eq!(second_batch[0].request.aggregate_id, "agg3");
    }

    #[tokio::test(start_paused = true)]
    async fn processed_up_to_round_trip_law_empties_in_flight_and_answers_true() {
        let mut state = PublisherState::new();
        state.add_in_flight([ack("a", 5), ack("b", 2)]);

        let now = Instant::now();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        state.add_pending_init(tx_a, "a".to_owned(), now + std::time::Duration::from_secs(10));
        state.add_pending_init(tx_b, "b".to_owned(), now + std::time::Duration::from_secs(10));

        let decisions = state.processed_up_to(KTableProgress::new(5, 5), now);
        for (sender, decision) in decisions {
            sender.send(decision).unwrap();
        }

        assert!(rx_a.await.unwrap());
        assert!(rx_b.await.unwrap());
        assert_eq!(state.in_flight_len(), 0);
        assert_eq!(state.pending_init_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn processed_up_to_expires_stale_queries() {
        let mut state = PublisherState::new();
        state.add_in_flight([ack("a", 5)]);

        let now = Instant::now();
        let (tx, rx) = oneshot::channel();
        state.add_pending_init(tx, "a".to_owned(), now - std::time::Duration::from_secs(1));

        let decisions = state.processed_up_to(KTableProgress::new(1, 1), now);
        assert_eq!(decisions.len(), 1);
        decisions.into_iter().for_each(|(s, d)| s.send(d).unwrap());
        assert!(!rx.await.unwrap());
        // the ack is still in-flight: expiry does not imply catch-up.
        assert_eq!(state.in_flight_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn processed_up_to_leaves_not_yet_caught_up_queries_pending() {
        let mut state = PublisherState::new();
        state.add_in_flight([ack("a", 5)]);

        let now = Instant::now();
        let (tx, _rx) = oneshot::channel();
        state.add_pending_init(tx, "a".to_owned(), now + std::time::Duration::from_secs(10));

        let decisions = state.processed_up_to(KTableProgress::new(1, 5), now);
        assert!(decisions.is_empty());
        assert_eq!(state.pending_init_count(), 1);
    }

    #[tokio::test]
    async fn transaction_elapsed_ms_is_zero_with_no_open_transaction() {
        let state = PublisherState::new();
        assert_eq!(state.transaction_elapsed_ms(Instant::now()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transaction_elapsed_ms_tracks_start_instant() {
        let mut state = PublisherState::new();
        let start = Instant::now();
        state.begin_transaction(start);
        tokio::time::advance(std::time::Duration::from_millis(150)).await;
        assert_eq!(state.transaction_elapsed_ms(Instant::now()), 150);
        state.clear_transaction();
        assert_eq!(state.transaction_elapsed_ms(Instant::now()), 0);
    }

    /// §8 round-trip law, property-checked: however many offsets land for however many
    /// aggregates, `add_in_flight` keeps exactly one entry per aggregate at the maximum
    /// offset seen, and a progress snapshot covering all of them resolves every query
    /// `true` while leaving the in-flight index empty.
    fn check_add_in_flight_then_processed_up_to_covering_all(
        offsets_by_aggregate: Vec<(u32, i64)>,
    ) -> Result<(), TestCaseError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let mut state = PublisherState::new();
            let mut max_offset_by_aggregate: HashMap<String, i64> = HashMap::new();
            for &(aggregate, offset) in &offsets_by_aggregate {
                let aggregate_id = format!("agg{aggregate}");
                let entry = max_offset_by_aggregate.entry(aggregate_id.clone()).or_insert(offset);
                *entry = (*entry).max(offset);
                state.add_in_flight([ack(&aggregate_id, offset)]);
            }

            for (aggregate_id, max_offset) in &max_offset_by_aggregate {
                let tracked = state.in_flight_for(aggregate_id).unwrap();
                prop_assert_eq!(tracked.offset, *max_offset);
            }

            let max_offset_overall = max_offset_by_aggregate.values().copied().max().unwrap_or(0);
            let now = Instant::now();
            let mut receivers = Vec::new();
            for aggregate_id in max_offset_by_aggregate.keys() {
                let (tx, rx) = oneshot::channel();
                state.add_pending_init(tx, aggregate_id.clone(), now + std::time::Duration::from_secs(10));
                receivers.push(rx);
            }

            let decisions = state.processed_up_to(KTableProgress::new(max_offset_overall, max_offset_overall), now);
            prop_assert_eq!(decisions.len(), receivers.len());
            for (sender, decision) in decisions {
                prop_assert!(decision);
                sender.send(decision).unwrap();
            }
            prop_assert_eq!(state.in_flight_len(), 0);
            Ok(())
        })
    }

    proptest! {
        #[test]
        fn add_in_flight_then_processed_up_to_covering_all_empties_in_flight(
            offsets_by_aggregate in proptest::collection::vec((0..8u32, 0i64..1000), 1..30),
        ) {
            check_add_in_flight_then_processed_up_to_covering_all(offsets_by_aggregate)?;
        }
    }
}
