//! The publisher state machine (spec §4.3): a single-threaded, mailbox-driven actor that
//! owns one partition's transactional producer identity and drives
//! `Uninitialized -> Ready -> (transient flush) -> (Ready | Recovering | Fenced)`.
//!
//! Grounded on the teacher's `BatchProducer` (a `tokio::sync::Mutex`-guarded single writer
//! that flushes an aggregator on linger/capacity, in `client/producer.rs`) for the overall
//! "accumulate then flush under one owner" shape, and on the `durable-streams` producer's
//! `oneshot`-per-waiter bookkeeping (`other_examples/fb240e3e_...producer.rs.rs`) for the
//! ask/reply plumbing. Unlike the teacher, this actor is message-driven rather than
//! lock-guarded: there is exactly one task per partition and it never shares `PublisherState`
//! with anyone, so no lock is needed (spec §5).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

use crate::backoff::{Backoff, BackoffConfig};
use crate::config::PublisherConfig;
use crate::health::{HealthCounters, HealthStatus};
use crate::producer::TransactionalProducer;
use crate::record::{KTableProgress, OutgoingRecord, PublishRequest, RecordAck};
use crate::state::{PendingWrite, PublishOutcome, PublisherState};

/// Messages the actor's mailbox accepts. `Publish` and `IsAggregateStateCurrent` mirror
/// the spec's caller-facing requests; the rest are internal/control messages.
#[derive(Debug)]
pub(crate) enum Command {
    Publish {
        request: PublishRequest,
        reply: oneshot::Sender<PublishOutcome>,
    },
    IsAggregateStateCurrent {
        aggregate_id: String,
        expires_at: Instant,
        reply: oneshot::Sender<bool>,
    },
    KTableProgress(KTableProgress),
    LagPollFailed,
    HealthCheck {
        reply: oneshot::Sender<HealthStatus>,
    },
    Terminate {
        reply: oneshot::Sender<()>,
    },
}

/// Reported on the actor's termination watch channel so external supervisors (and
/// [`crate::facade::PublisherHandle`]) can observe why the actor stopped without relying
/// solely on a failed ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    Running,
    /// Stopped gracefully via `terminate()`.
    Terminated,
    /// Stopped because the producer was fenced by a newer transactional instance.
    Fenced,
}

enum UninitOutcome {
    Ready,
    Terminated,
}

enum ReadyOutcome {
    Recovering,
    Fenced,
    Terminated,
}

enum FlushOutcome {
    Continue,
    Recovering,
    Fenced,
}

pub(crate) struct PublisherActor {
    config: PublisherConfig,
    producer: Arc<dyn TransactionalProducer>,
    mailbox: mpsc::UnboundedReceiver<Command>,
    state: PublisherState,
    counters: HealthCounters,
    termination_tx: watch::Sender<TerminationState>,
    /// Set when a `Terminate` arrives while a flush's `put_records`/`commit` is in
    /// flight (§4.3 state 3): the ask is acknowledged immediately, but the actual stop
    /// is deferred until the in-progress flush resolves.
    terminate_requested: bool,
}

impl PublisherActor {
    pub(crate) fn new(
        config: PublisherConfig,
        producer: Arc<dyn TransactionalProducer>,
        mailbox: mpsc::UnboundedReceiver<Command>,
        termination_tx: watch::Sender<TerminationState>,
    ) -> Self {
        Self {
            config,
            producer,
            mailbox,
            state: PublisherState::new(),
            counters: HealthCounters::default(),
            termination_tx,
            terminate_requested: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            match self.run_uninitialized().await {
                UninitOutcome::Ready => {}
                UninitOutcome::Terminated => {
                    self.producer.close().await;
                    let _ = self.termination_tx.send(TerminationState::Terminated);
                    return;
                }
            }

            match self.run_ready().await {
                ReadyOutcome::Recovering => {
                    self.recover().await;
                }
                ReadyOutcome::Fenced => {
                    self.producer.close().await;
                    self.counters.mark_fenced();
                    let _ = self.termination_tx.send(TerminationState::Fenced);
                    return;
                }
                ReadyOutcome::Terminated => {
                    self.producer.close().await;
                    let _ = self.termination_tx.send(TerminationState::Terminated);
                    return;
                }
            }
        }
    }

    /// Retry `init_transactions` forever with a bounded, jittered backoff. Publishes and
    /// readiness queries arriving during this phase are stashed directly into
    /// `PublisherState` (§4.3: "All incoming `Publish` and `IsAggregateStateCurrent`
    /// messages are stashed"); every other command is processed normally.
    async fn run_uninitialized(&mut self) -> UninitOutcome {
        let mut backoff = Backoff::new(BackoffConfig::new(self.config.init_backoff_ceiling));

        loop {
            match self.producer.init_transactions().await {
                Ok(()) => return UninitOutcome::Ready,
                Err(error) => {
                    warn!(error = %error, "init_transactions failed, will retry after backoff");
                }
            }

            let delay = backoff.next_delay();
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);

            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    maybe_cmd = self.mailbox.recv() => {
                        match maybe_cmd {
                            Some(cmd) => {
                                if self.handle_uninitialized_command(cmd) {
                                    return UninitOutcome::Terminated;
                                }
                            }
                            None => return UninitOutcome::Terminated,
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` if the actor should terminate.
    fn handle_uninitialized_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Publish { request, reply } => {
                self.state.add_pending_write(reply, request);
                false
            }
            Command::IsAggregateStateCurrent {
                aggregate_id,
                expires_at,
                reply,
            } => {
                self.state.add_pending_init(reply, aggregate_id, expires_at);
                false
            }
            Command::KTableProgress(progress) => {
                self.apply_progress(progress);
                false
            }
            Command::LagPollFailed => {
                self.counters.record_lag_poll_failure();
                false
            }
            Command::HealthCheck { reply } => {
                let _ = reply.send(self.health_status("uninitialized", false));
                false
            }
            Command::Terminate { reply } => {
                let _ = reply.send(());
                true
            }
        }
    }

    async fn run_ready(&mut self) -> ReadyOutcome {
        let mut flush_ticker = tokio::time::interval(self.config.flush_interval);
        flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = flush_ticker.tick() => {
                    if self.state.pending_write_count() > 0 && !self.state.has_open_transaction() {
                        match self.do_flush().await {
                            FlushOutcome::Continue => {
                                if self.terminate_requested {
                                    return ReadyOutcome::Terminated;
                                }
                            }
                            FlushOutcome::Recovering => return ReadyOutcome::Recovering,
                            FlushOutcome::Fenced => return ReadyOutcome::Fenced,
                        }
                    }
                }
                maybe_cmd = self.mailbox.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            if let Some(outcome) = self.handle_ready_command(cmd) {
                                return outcome;
                            }
                        }
                        None => return ReadyOutcome::Terminated,
                    }
                }
            }
        }
    }

    fn handle_ready_command(&mut self, cmd: Command) -> Option<ReadyOutcome> {
        match cmd {
            Command::Publish { request, reply } => {
                self.state.add_pending_write(reply, request);
                None
            }
            Command::IsAggregateStateCurrent {
                aggregate_id,
                expires_at,
                reply,
            } => {
                if self.state.in_flight_for(&aggregate_id).is_none() {
                    let _ = reply.send(true);
                } else {
                    self.state.add_pending_init(reply, aggregate_id, expires_at);
                }
                None
            }
            Command::KTableProgress(progress) => {
                self.apply_progress(progress);
                None
            }
            Command::LagPollFailed => {
                self.counters.record_lag_poll_failure();
                None
            }
            Command::HealthCheck { reply } => {
                let _ = reply.send(self.health_status("ready", true));
                None
            }
            Command::Terminate { reply } => {
                let _ = reply.send(());
                Some(ReadyOutcome::Terminated)
            }
        }
    }

    /// Handle a command that arrives while a flush's `put_records`/`commit` call is in
    /// flight (§4.3 state 3, "Publishing"). `IsAggregateStateCurrent` must be "answered
    /// immediately against the current in-flight index and progress" rather than
    /// deferred until the flush resolves, so it gets the same immediate treatment as in
    /// `Ready`; `Terminate` is acknowledged immediately but the actual stop waits for the
    /// flush to finish.
    fn handle_flush_command(&mut self, cmd: Command) {
        match cmd {
            Command::Publish { request, reply } => {
                self.state.add_pending_write(reply, request);
            }
            Command::IsAggregateStateCurrent {
                aggregate_id,
                expires_at,
                reply,
            } => {
                if self.state.in_flight_for(&aggregate_id).is_none() {
                    let _ = reply.send(true);
                } else {
                    self.state.add_pending_init(reply, aggregate_id, expires_at);
                }
            }
            Command::KTableProgress(progress) => {
                self.apply_progress(progress);
            }
            Command::LagPollFailed => {
                self.counters.record_lag_poll_failure();
            }
            Command::HealthCheck { reply } => {
                let _ = reply.send(self.health_status("publishing", true));
            }
            Command::Terminate { reply } => {
                let _ = reply.send(());
                self.terminate_requested = true;
            }
        }
    }

    /// Await `put_records` while still servicing mailbox commands (`handle_flush_command`)
    /// instead of leaving them unread until the call resolves. The future is built over a
    /// cloned producer handle rather than `&self.producer` so it doesn't hold a borrow of
    /// `self` across the loop, which would otherwise make `&mut self.mailbox` and
    /// `&mut self` (for `handle_flush_command`) conflict.
    async fn await_put_records(
        &mut self,
        records: Vec<OutgoingRecord>,
    ) -> Vec<crate::producer::Result<RecordAck>> {
        let producer = Arc::clone(&self.producer);
        let put_records = producer.put_records(records);
        tokio::pin!(put_records);

        let mut mailbox_open = true;
        loop {
            tokio::select! {
                acks = &mut put_records => return acks,
                maybe_cmd = self.mailbox.recv(), if mailbox_open => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_flush_command(cmd),
                        None => mailbox_open = false,
                    }
                }
            }
        }
    }

    fn apply_progress(&mut self, progress: KTableProgress) {
        let now = Instant::now();
        for (sender, decision) in self.state.processed_up_to(progress, now) {
            let _ = sender.send(decision);
        }
    }

    fn health_status(&self, state: &'static str, up: bool) -> HealthStatus {
        HealthStatus {
            up,
            state,
            counters: self.counters.snapshot(),
        }
    }

    /// Drains pending writes into one transaction and drives it through
    /// `begin -> put_records -> commit`, per the §4.3 flush algorithm.
    async fn do_flush(&mut self) -> FlushOutcome {
        self.state.begin_transaction(Instant::now());

        if let Err(error) = self.producer.begin() {
            self.state.clear_transaction();
            if error.is_fenced() {
                return FlushOutcome::Fenced;
            }
            warn!(error = %error, "begin() failed, entering recovery");
            return FlushOutcome::Recovering;
        }

        let batch = self.state.flush_writes(self.config.transaction_max_records);
        if batch.is_empty() {
            let _ = self.producer.abort();
            self.state.clear_transaction();
            return FlushOutcome::Continue;
        }

        let (records, spans) = build_outgoing_records(&self.config, &batch);
        let acks = self.await_put_records(records).await;

        let fenced_ack = acks.iter().find_map(|ack| match ack {
            Err(error) if error.is_fenced() => Some(error.clone()),
            _ => None,
        });
        if let Some(error) = fenced_ack {
            self.state.clear_transaction();
            warn!(error = %error, "put_records fenced mid-transaction");
            // `batch`'s senders are dropped here, same as the commit-fenced branch below:
            // callers observe failure via monitored termination or their own ask timeout (§7).
            return FlushOutcome::Fenced;
        }

        if let Some(error) = acks.iter().find_map(|ack| ack.as_ref().err()) {
            let reason = format!("one or more records in the transaction failed to ack: {error}");
            let _ = self.producer.abort();
            self.counters.record_abort();
            for pending in batch {
                let _ = pending.reply.send(PublishOutcome::Failure { reason: reason.clone() });
            }
            self.state.clear_transaction();
            return FlushOutcome::Continue;
        }

        match self.producer.commit() {
            Ok(()) => {
                let mut acked_state_records = Vec::with_capacity(batch.len());
                for (pending, (event_start, event_end, state_idx)) in batch.into_iter().zip(spans) {
                    let event_acks: Vec<RecordAck> = acks[event_start..event_end]
                        .iter()
                        .map(|r| r.clone().expect("checked above: no ack failed"))
                        .collect();
                    let state_ack = acks[state_idx].clone().expect("checked above: no ack failed");
                    acked_state_records.push(state_ack.clone());
                    let _ = pending.reply.send(PublishOutcome::Success { state_ack, event_acks });
                }
                self.counters.record_commit(acks.len() as u64);
                self.state.add_in_flight(acked_state_records);
                self.state.clear_transaction();
                FlushOutcome::Continue
            }
            Err(error) if error.is_fenced() => {
                self.state.clear_transaction();
                // `batch`'s senders are dropped here; their callers observe failure via
                // the termination watch channel or their own ask timeout (§7).
                FlushOutcome::Fenced
            }
            Err(error) => {
                warn!(error = %error, "commit() failed, entering recovery");
                let _ = self.producer.abort();
                self.counters.record_abort();
                for pending in batch {
                    let _ = pending.reply.send(PublishOutcome::Failure {
                        reason: format!("commit failed: {error}"),
                    });
                }
                self.state.clear_transaction();
                FlushOutcome::Recovering
            }
        }
    }

    /// Close and (conceptually) rebuild the producer, then fall back to `Uninitialized`.
    ///
    /// The producer contract (§4.1) has no separate constructor, so "rebuild" here is
    /// `close()` followed by the next `Uninitialized` phase's `init_transactions()` retry
    /// loop on the same handle — consistent with `close()` being documented as idempotent
    /// and safe to call before re-acquiring the transactional identity.
    async fn recover(&mut self) {
        self.producer.close().await;
        self.counters.record_recovery();
        info!("producer closed, returning to uninitialized for re-acquisition");
    }
}

/// Build the physical record list for one flush: one record per event (unset partition)
/// followed by exactly one state record (pinned to the owned partition), per request, in
/// FIFO order. Returns the spans `(event_start, event_end, state_idx)` needed to map acks
/// back to their originating request.
fn build_outgoing_records(
    config: &PublisherConfig,
    batch: &[PendingWrite],
) -> (Vec<OutgoingRecord>, Vec<(usize, usize, usize)>) {
    let mut records = Vec::new();
    let mut spans = Vec::with_capacity(batch.len());

    for pending in batch {
        let event_start = records.len();
        for event in &pending.request.events {
            records.push(OutgoingRecord {
                topic: config.events_topic.clone(),
                partition: None,
                aggregate_id: None,
                message: event.clone(),
            });
        }
        let event_end = records.len();
        let state_idx = records.len();
        records.push(OutgoingRecord {
            topic: config.state_partition.topic.clone(),
            partition: Some(config.state_partition.partition),
            aggregate_id: Some(pending.request.aggregate_id.clone()),
            message: pending.request.state.clone(),
        });
        spans.push((event_start, event_end, state_idx));
    }

    (records, spans)
}

/// Spawn the actor task, instrumented with a span tagged by the owned partition so logs
/// from concurrently-running publishers are distinguishable (§10 ambient logging).
pub(crate) fn spawn(actor: PublisherActor, partition: String) {
    let span = tracing::info_span!("publisher_actor", partition = %partition);
    tokio::spawn(actor.run().instrument(span));
}
