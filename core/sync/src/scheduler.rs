//! Background drain loop for the offline queue.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::connectivity::Connectivity;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries confirmed by the remote during this pass.
    pub drained: usize,
    /// Entries still pending.
    pub remaining: usize,
    /// Back-off before the next attempt, set when a delivery failed.
    pub retry_after: Option<Duration>,
}

/// Timing of the drain loop.
///
/// Drains on every offline to online transition (resetting back-off) and
/// on every tick once the back-off of the last failure has elapsed.
pub struct DrainScheduler {
    drain_interval: Duration,
    poll_interval: Option<Duration>,
    connectivity: Connectivity,
}

impl DrainScheduler {
    /// Create a scheduler; `poll_interval` of `None` disables remote polling.
    pub fn new(
        drain_interval: Duration,
        poll_interval: Option<Duration>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            drain_interval,
            poll_interval,
            connectivity,
        }
    }

    /// Spawn the loop.
    ///
    /// `drain_fn` runs one drain pass and returns `None` once its target is
    /// gone, which stops the loop. `poll_fn` checks the remote for changes
    /// and returns `false` for the same reason.
    pub fn spawn<D, DF, P, PF>(self, drain_fn: D, poll_fn: P) -> DrainLoopHandle
    where
        D: Fn() -> DF + Send + Sync + 'static,
        DF: Future<Output = Option<DrainReport>> + Send + 'static,
        P: Fn() -> PF + Send + Sync + 'static,
        PF: Future<Output = bool> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(shutdown_rx, drain_fn, poll_fn));
        DrainLoopHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }

    async fn run<D, DF, P, PF>(self, mut shutdown_rx: oneshot::Receiver<()>, drain_fn: D, poll_fn: P)
    where
        D: Fn() -> DF + Send + Sync + 'static,
        DF: Future<Output = Option<DrainReport>> + Send + 'static,
        P: Fn() -> PF + Send + Sync + 'static,
        PF: Future<Output = bool> + Send + 'static,
    {
        let mut online_rx = self.connectivity.subscribe();
        let mut drain_ticker = interval(self.drain_interval);
        drain_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        drain_ticker.tick().await;
        let mut poll_ticker = self.poll_interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        let mut retry_at: Option<Instant> = None;

        info!(interval = ?self.drain_interval, "Drain loop started");

        if self.connectivity.is_online() {
            match drain_fn().await {
                Some(report) => retry_at = Self::next_retry(&report),
                None => return,
            }
        }

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Drain loop shutting down");
                    break;
                }

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        debug!("Back online, draining queue");
                        match drain_fn().await {
                            Some(report) => retry_at = Self::next_retry(&report),
                            None => break,
                        }
                    }
                }

                _ = drain_ticker.tick() => {
                    let due = retry_at.map_or(true, |at| Instant::now() >= at);
                    if self.connectivity.is_online() && due {
                        match drain_fn().await {
                            Some(report) => retry_at = Self::next_retry(&report),
                            None => break,
                        }
                    }
                }

                _ = Self::wait_for_poll(&mut poll_ticker) => {
                    if self.connectivity.is_online() && !poll_fn().await {
                        break;
                    }
                }
            }
        }
    }

    fn next_retry(report: &DrainReport) -> Option<Instant> {
        if report.drained > 0 || report.remaining > 0 {
            debug!(
                drained = report.drained,
                remaining = report.remaining,
                retry_after = ?report.retry_after,
                "Drain pass finished"
            );
        }
        report.retry_after.map(|delay| Instant::now() + delay)
    }

    async fn wait_for_poll(ticker: &mut Option<Interval>) {
        match ticker {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Handle of a running drain loop.
pub struct DrainLoopHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl DrainLoopHandle {
    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.join).await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn counting_drain(
        count: Arc<AtomicU32>,
    ) -> impl Fn() -> std::future::Ready<Option<DrainReport>> + Send + Sync + 'static {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Some(DrainReport::default()))
        }
    }

    async fn wait_for(count: &AtomicU32, at_least: u32) {
        for _ in 0..100 {
            if count.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected at least {} drains", at_least);
    }

    #[tokio::test]
    async fn test_drains_on_reconnect() {
        let connectivity = Connectivity::offline();
        let drains = Arc::new(AtomicU32::new(0));

        let handle = DrainScheduler::new(Duration::from_secs(3600), None, connectivity.clone())
            .spawn(counting_drain(drains.clone()), || std::future::ready(true));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(drains.load(Ordering::SeqCst), 0);

        connectivity.set_online(true);
        wait_for(&drains, 1).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_ticks_drain_while_online() {
        let connectivity = Connectivity::online();
        let drains = Arc::new(AtomicU32::new(0));

        let handle = DrainScheduler::new(Duration::from_millis(20), None, connectivity)
            .spawn(counting_drain(drains.clone()), || std::future::ready(true));

        // Startup drain plus ticks.
        wait_for(&drains, 3).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stops_when_target_is_gone() {
        let handle = DrainScheduler::new(Duration::from_millis(10), None, Connectivity::online())
            .spawn(|| std::future::ready(None), || std::future::ready(true));

        for _ in 0..100 {
            if handle.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("drain loop did not stop");
    }

    #[tokio::test]
    async fn test_polls_remote() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();

        let handle = DrainScheduler::new(
            Duration::from_secs(3600),
            Some(Duration::from_millis(20)),
            Connectivity::online(),
        )
        .spawn(
            || std::future::ready(Some(DrainReport::default())),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(true)
            },
        );

        wait_for(&polls, 2).await;
        handle.shutdown().await;
    }
}
