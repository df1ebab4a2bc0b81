//! The KTable lag contract (spec §4.5) and its poller.
//!
//! The core only ever reads a snapshot; it never drives materialization itself. Poller
//! shape (spawn a background loop on an interval, swallow errors by retaining the
//! previous value and bumping a counter) is grounded on the `durable-streams` producer's
//! `linger_task` background loop (`other_examples/fb240e3e_...producer.rs.rs`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::record::KTableProgress;

/// Per-partition lag, keyed by state-store name then partition index, as returned by one
/// poll of the KTable materializer.
pub type LagSnapshot = HashMap<String, HashMap<i32, KTableProgress>>;

/// A pollable provider of KTable materialization progress.
///
/// The core consumes snapshots from this trait; it does not implement or drive the
/// materializer itself (§1 out-of-scope: "the KTable materializer itself").
#[async_trait]
pub trait KTableLagSource: std::fmt::Debug + Send + Sync {
    /// Fetch one snapshot of lag across all tracked state stores and partitions.
    async fn poll_lag(&self) -> Result<LagSnapshot, String>;
}

/// Poll `source` on `interval`, extracting the owned `(state_store_name, partition)` entry
/// from every successful snapshot and handing it to `on_progress`.
///
/// On a failed poll, the previous snapshot is implicitly retained (we simply skip
/// delivering an update) and `on_failure` is invoked instead; per spec §4.5/§7,
/// "lag-source failure alone never transitions the state machine out of `Ready`", so this
/// function never terminates on error — it just logs and keeps polling.
pub async fn run_lag_poller<F, G>(
    source: std::sync::Arc<dyn KTableLagSource>,
    state_store_name: String,
    partition: i32,
    interval: Duration,
    on_progress: F,
    mut on_failure: G,
) where
    F: Fn(KTableProgress) + Send + Sync + 'static,
    G: FnMut() + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match source.poll_lag().await {
            Ok(snapshot) => {
                if let Some(progress) = snapshot
                    .get(&state_store_name)
                    .and_then(|by_partition| by_partition.get(&partition))
                {
                    on_progress(*progress);
                }
            }
            Err(error) => {
                warn!(error = %error, state_store_name, partition, "KTable lag poll failed, retaining previous snapshot");
                on_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct ScriptedSource {
        responses: parking_lot::Mutex<Vec<Result<LagSnapshot, String>>>,
    }

    #[async_trait]
    impl KTableLagSource for ScriptedSource {
        async fn poll_lag(&self) -> Result<LagSnapshot, String> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(LagSnapshot::new())
            } else {
                responses.remove(0)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn owned_partition_is_extracted_and_others_ignored() {
        let mut snapshot = LagSnapshot::new();
        snapshot.insert(
            "store".to_owned(),
            HashMap::from([
                (0, KTableProgress::new(3, 3)),
                (1, KTableProgress::new(1, 10)),
            ]),
        );

        let source = Arc::new(ScriptedSource {
            responses: parking_lot::Mutex::new(vec![Ok(snapshot), Err("boom".to_owned())]),
        });

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let failures = Arc::new(AtomicUsize::new(0));
        let failures_clone = Arc::clone(&failures);

        let poller = tokio::spawn(run_lag_poller(
            source,
            "store".to_owned(),
            1,
            Duration::from_millis(10),
            move |progress| seen_clone.lock().push(progress),
            move || {
                failures_clone.fetch_add(1, Ordering::SeqCst);
            },
        ));

        tokio::time::advance(Duration::from_millis(11)).await;
        tokio::time::advance(Duration::from_millis(11)).await;
        tokio::task::yield_now().await;

        assert_eq!(seen.lock().as_slice(), &[KTableProgress::new(1, 10)]);
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        poller.abort();
    }
}
