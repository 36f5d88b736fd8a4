//! Per-kind watch loop feeding a reflector store

use super::backoff::WatchBackoff;
use super::kind::{KindState, ResourceKind};
use crate::kubernetes::connection::WatchStream;
use fleetdeck_common::ClusterId;
use futures::StreamExt;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher;
use kube::Resource;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning shared by every watch of a cache
#[derive(Debug, Clone)]
pub struct WatchTuning {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
    pub backoff_jitter: f64,
    pub failure_threshold: u32,
}

impl WatchTuning {
    fn backoff(&self) -> WatchBackoff {
        WatchBackoff::new(
            self.backoff_initial,
            self.backoff_max,
            self.backoff_multiplier,
            self.backoff_jitter,
        )
    }
}

/// One kind's watch: the writer half of its store and its state channel
pub struct KindWatch<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub cluster_id: ClusterId,
    pub kind: ResourceKind,
    pub writer: Writer<K>,
    pub state: watch::Sender<KindState>,
}

impl<K> KindWatch<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    /// Drive the watch until `cancel` fires
    ///
    /// `open` is called for the first stream and again whenever a stream
    /// ends. Errors never end the loop: they are counted, backed off, and the
    /// kind is flagged `Failed` once `failure_threshold` consecutive errors
    /// hit before the initial sync. The sender always ends on `Stopped`.
    pub async fn run<F>(mut self, mut open: F, tuning: WatchTuning, cancel: CancellationToken)
    where
        F: FnMut() -> WatchStream<K> + Send,
    {
        let mut backoff = tuning.backoff();
        let mut consecutive_errors: u32 = 0;
        let mut synced = false;

        self.state.send_replace(KindState::Syncing);
        debug!(cluster_id = %self.cluster_id, kind = %self.kind, "Starting watch");

        'watch: loop {
            let mut stream = open();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'watch,
                    item = stream.next() => item,
                };

                match next {
                    Some(Ok(event)) => {
                        self.writer.apply_watcher_event(&event);
                        consecutive_errors = 0;

                        if matches!(event, watcher::Event::InitDone) {
                            backoff.reset();
                            if !synced {
                                synced = true;
                                self.state.send_replace(KindState::Ready);
                                info!(
                                    cluster_id = %self.cluster_id,
                                    kind = %self.kind,
                                    "Initial sync complete"
                                );
                            }
                        }
                    }
                    Some(Err(e)) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        warn!(
                            cluster_id = %self.cluster_id,
                            kind = %self.kind,
                            attempt = consecutive_errors,
                            error = %e,
                            "Watch error"
                        );

                        if !synced
                            && consecutive_errors >= tuning.failure_threshold
                            && *self.state.borrow() != KindState::Failed
                        {
                            self.state.send_replace(KindState::Failed);
                            warn!(
                                cluster_id = %self.cluster_id,
                                kind = %self.kind,
                                "Watch failing before initial sync, still retrying"
                            );
                        }

                        if !sleep_or_cancel(backoff.next_delay(), &cancel).await {
                            break 'watch;
                        }
                    }
                    None => {
                        debug!(
                            cluster_id = %self.cluster_id,
                            kind = %self.kind,
                            "Watch stream ended, reopening"
                        );
                        if !sleep_or_cancel(backoff.next_delay(), &cancel).await {
                            break 'watch;
                        }
                        continue 'watch;
                    }
                }
            }
        }

        self.state.send_replace(KindState::Stopped);
        debug!(cluster_id = %self.cluster_id, kind = %self.kind, "Watch stopped");
    }
}

/// Returns false when cancelled before the delay elapsed
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
