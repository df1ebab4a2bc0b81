//! The publisher facade (spec §4.4): the handle callers actually hold.
//!
//! Every operation here is an ask against the actor's mailbox with a caller-visible
//! timeout, grounded on the teacher's `handle.rs`-style pattern of a cheap `Clone`-able
//! front wrapping an `mpsc::UnboundedSender` plus a `oneshot` per call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::actor::{spawn, Command, PublisherActor, TerminationState};
use crate::config::PublisherConfig;
use crate::health::HealthStatus;
use crate::ktable::{run_lag_poller, KTableLagSource};
use crate::producer::TransactionalProducer;
use crate::record::{KTableProgress, MessageToPublish, PublishRequest};
use crate::state::PublishOutcome;

/// A cheap, `Clone`-able front end for one partition's publisher actor.
///
/// All operations are ask-with-timeout: they send a command into the actor's mailbox and
/// wait for a reply, bounded by `ask_timeout` (§6). A dropped mailbox (actor terminated)
/// and a timed-out ask are both reported distinctly, per §7's error taxonomy.
#[derive(Debug, Clone)]
pub struct PublisherHandle {
    mailbox: mpsc::UnboundedSender<Command>,
    ask_timeout: Duration,
    termination_rx: watch::Receiver<TerminationState>,
}

impl PublisherHandle {
    /// Atomically publish `state` together with `events` for one aggregate.
    ///
    /// Resolves once the enclosing transaction commits or the transaction carrying this
    /// request is aborted; never resolves with a partial/ack-only result (§8 invariant:
    /// "a publish either fully commits or is reported as a failure").
    pub async fn publish(
        &self,
        aggregate_id: impl Into<String>,
        state: MessageToPublish,
        events: Vec<MessageToPublish>,
    ) -> Result<PublishOutcome, crate::error::PublisherError> {
        let request = PublishRequest::new(aggregate_id, state, events);
        let (reply, reply_rx) = oneshot::channel();

        if self.mailbox.send(Command::Publish { request, reply }).is_err() {
            return Err(crate::error::PublisherError::Terminated);
        }

        self.await_reply(reply_rx).await
    }

    /// Ask whether `aggregate_id`'s most recently published state has been observed by the
    /// downstream KTable, within `within` of now.
    ///
    /// `within` bounds the query's own wall-clock patience independently of `ask_timeout`
    /// (§5's design note: "`PendingInit` carries its own wall-clock expiration independent
    /// of the caller's ask timeout").
    pub async fn is_aggregate_state_current(
        &self,
        aggregate_id: impl Into<String>,
        within: Duration,
    ) -> Result<bool, crate::error::PublisherError> {
        let expires_at = Instant::now() + within;
        let (reply, reply_rx) = oneshot::channel();

        if self
            .mailbox
            .send(Command::IsAggregateStateCurrent {
                aggregate_id: aggregate_id.into(),
                expires_at,
                reply,
            })
            .is_err()
        {
            return Err(crate::error::PublisherError::Terminated);
        }

        self.await_reply(reply_rx).await
    }

    /// Report the actor's current health. Never returns an error: any failure to reach the
    /// actor (terminated, timed out) is folded into [`HealthStatus::down`] (§4.4: "any
    /// error yields a `DOWN` result rather than a failed future").
    pub async fn health_check(&self) -> HealthStatus {
        let (reply, reply_rx) = oneshot::channel();
        if self.mailbox.send(Command::HealthCheck { reply }).is_err() {
            return HealthStatus::down();
        }
        match tokio::time::timeout(self.ask_timeout, reply_rx).await {
            Ok(Ok(status)) => status,
            _ => HealthStatus::down(),
        }
    }

    /// Ask the actor to stop gracefully: it closes its producer and exits after
    /// acknowledging this call. Idempotent; a second call against an already-terminated
    /// actor is a no-op.
    pub async fn terminate(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.mailbox.send(Command::Terminate { reply }).is_ok() {
            let _ = tokio::time::timeout(self.ask_timeout, reply_rx).await;
        }
    }

    /// Feed one KTable progress snapshot for the owned partition into the actor. Intended
    /// to be wired to a [`KTableLagSource`] poller; see [`spawn_lag_poller`].
    pub fn report_ktable_progress(&self, progress: KTableProgress) {
        let _ = self.mailbox.send(Command::KTableProgress(progress));
    }

    /// Record a failed KTable lag poll without advancing any readiness query. Per §7,
    /// lag-source failure alone never transitions the state machine out of `Ready`.
    pub fn report_lag_poll_failure(&self) {
        let _ = self.mailbox.send(Command::LagPollFailed);
    }

    /// A fresh watch receiver reporting why the actor eventually stops, equivalent to the
    /// one returned alongside the handle by [`spawn_publisher`] but obtainable from the
    /// handle itself, so a supervisor that only holds a cloned `PublisherHandle` can still
    /// observe termination instead of relying solely on a failed ask.
    pub fn watch_termination(&self) -> watch::Receiver<TerminationState> {
        self.termination_rx.clone()
    }

    async fn await_reply<T>(&self, reply_rx: oneshot::Receiver<T>) -> Result<T, crate::error::PublisherError> {
        match tokio::time::timeout(self.ask_timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_recv_error)) => Err(crate::error::PublisherError::Terminated),
            Err(_elapsed) => Err(crate::error::PublisherError::Timeout),
        }
    }
}

/// Spawn a publisher actor for one partition and return the handle callers use, plus a
/// watch receiver that reports why the actor eventually stops (§4.3's terminal states).
pub fn spawn_publisher(
    config: PublisherConfig,
    producer: Arc<dyn TransactionalProducer>,
) -> (PublisherHandle, watch::Receiver<TerminationState>) {
    let ask_timeout = config.ask_timeout;
    let partition = config.state_partition.to_string();

    let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
    let (termination_tx, termination_rx) = watch::channel(TerminationState::Running);

    let actor = PublisherActor::new(config, producer, mailbox_rx, termination_tx);
    spawn(actor, partition);

    let handle = PublisherHandle {
        mailbox: mailbox_tx,
        ask_timeout,
        termination_rx: termination_rx.clone(),
    };
    (handle, termination_rx)
}

/// Wire a [`KTableLagSource`] to `handle`, spawning a background task that polls it on
/// `config.lag_poll_interval` and feeds progress for `config.state_partition` into the
/// actor. Returns the task's `JoinHandle` so callers can abort it alongside `terminate()`.
pub fn spawn_lag_poller(
    handle: &PublisherHandle,
    config: &PublisherConfig,
    source: Arc<dyn KTableLagSource>,
) -> tokio::task::JoinHandle<()> {
    let progress_handle = handle.clone();
    let failure_handle = handle.clone();
    tokio::spawn(run_lag_poller(
        source,
        config.state_store_name.clone(),
        config.state_partition.partition,
        config.lag_poll_interval,
        move |progress| progress_handle.report_ktable_progress(progress),
        move || failure_handle.report_lag_poll_failure(),
    ))
}
