use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::ingestion::{Aggregator, CycleReport};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;
/// One day
pub const MAX_INTERVAL_MINUTES: u64 = 1440;

/// Snapshot returned by [`AutoFetcher::status`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetcherStatus {
    pub is_running: bool,
    /// "active" while a timer exists, "inactive" otherwise
    pub interval: &'static str,
    pub interval_minutes: Option<u64>,
    pub last_cycle: Option<CycleReport>,
}

struct Timer {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
    interval_minutes: u64,
}

struct Shared {
    aggregator: Arc<Aggregator>,
    cycle_lock: tokio::sync::Mutex<()>,
    last_cycle: RwLock<Option<CycleReport>>,
}

impl Shared {
    async fn run(&self) -> CycleReport {
        let report = self.aggregator.run_cycle().await;
        *self.last_cycle.write() = Some(report.clone());
        report
    }

    /// Timer path: skip if a cycle is already in flight.
    async fn run_tick(&self) {
        match self.cycle_lock.try_lock() {
            Ok(_guard) => {
                self.run().await;
            }
            Err(_) => info!("auto-fetch: previous cycle still running, skipping tick"),
        }
    }

    /// On-demand path: wait for any in-flight cycle, then run.
    async fn run_now(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        self.run().await
    }
}

/// Owns the recurring fetch timer. At most one timer exists at a time.
pub struct AutoFetcher {
    shared: Arc<Shared>,
    timer: Mutex<Option<Timer>>,
}

impl AutoFetcher {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            shared: Arc::new(Shared {
                aggregator,
                cycle_lock: tokio::sync::Mutex::new(()),
                last_cycle: RwLock::new(None),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Start a timer that runs a cycle now and then every `interval_minutes`, clamped to
    /// `1..=MAX_INTERVAL_MINUTES`.
    /// Returns `false` without doing anything when a timer is already active.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, interval_minutes: u64) -> bool {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            info!("auto-fetch: already running");
            return false;
        }

        let interval_minutes = interval_minutes.clamp(1, MAX_INTERVAL_MINUTES);
        let stop = Arc::new(Notify::new());
        let shared = Arc::clone(&self.shared);
        let stop_signal = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_signal.notified() => break,
                    _ = ticker.tick() => shared.run_tick().await,
                }
            }
            info!("auto-fetch: timer loop exited");
        });

        info!("auto-fetch: started with {} minute interval", interval_minutes);
        *timer = Some(Timer {
            handle,
            stop,
            interval_minutes,
        });
        true
    }

    /// Cancel the timer. A cycle already running completes first. Returns `false` when idle.
    pub fn stop(&self) -> bool {
        match self.timer.lock().take() {
            Some(timer) => {
                timer.stop.notify_one();
                info!("auto-fetch: stopped");
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> FetcherStatus {
        let timer = self.timer.lock();
        let interval_minutes = timer.as_ref().map(|t| t.interval_minutes);
        let is_running = timer.as_ref().map_or(false, |t| !t.handle.is_finished());
        FetcherStatus {
            is_running,
            interval: if timer.is_some() { "active" } else { "inactive" },
            interval_minutes,
            last_cycle: self.shared.last_cycle.read().clone(),
        }
    }

    /// Run one cycle now and wait for it.
    pub async fn fetch_now(&self) -> CycleReport {
        self.shared.run_now().await
    }
}

impl Drop for AutoFetcher {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.stop.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ingestion::ContentSource;
    use crate::models::{NewContentUpdate, Source};
    use crate::storage::MemoryStore;

    fn fetcher_with(sources: Vec<Arc<dyn ContentSource>>) -> AutoFetcher {
        let aggregator = Aggregator::new(Arc::new(MemoryStore::new()), sources, reqwest::Client::new());
        AutoFetcher::new(Arc::new(aggregator))
    }

    fn fetcher() -> AutoFetcher {
        fetcher_with(Vec::new())
    }

    /// Live fetch that parks until released, counting how often it was entered.
    #[derive(Default)]
    struct GatedSource {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl ContentSource for GatedSource {
        fn source(&self) -> Source {
            Source::Blog
        }

        async fn fetch_live(&self, _client: &reqwest::Client) -> anyhow::Result<Vec<NewContentUpdate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }

        fn fallback(&self) -> Vec<NewContentUpdate> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn start_twice_keeps_one_timer() {
        let fetcher = fetcher();
        assert!(fetcher.start(30));
        assert!(!fetcher.start(5));

        let status = fetcher.status();
        assert!(status.is_running);
        assert_eq!(status.interval, "active");
        assert_eq!(status.interval_minutes, Some(30));

        assert!(fetcher.stop());
    }

    #[tokio::test]
    async fn stop_without_timer_is_a_noop() {
        let fetcher = fetcher();
        assert!(!fetcher.stop());

        let status = fetcher.status();
        assert!(!status.is_running);
        assert_eq!(status.interval, "inactive");
        assert_eq!(status.interval_minutes, None);
    }

    #[tokio::test]
    async fn fetch_now_records_last_cycle() {
        let fetcher = fetcher();
        assert!(fetcher.status().last_cycle.is_none());

        let report = fetcher.fetch_now().await;
        assert_eq!(report.inserted, 0);
        assert!(fetcher.status().last_cycle.is_some());
    }

    #[tokio::test]
    async fn restart_after_stop_is_allowed() {
        let fetcher = fetcher();
        assert!(fetcher.start(1));
        assert!(fetcher.stop());
        assert!(fetcher.start(2));
        assert_eq!(fetcher.status().interval_minutes, Some(2));
        fetcher.stop();
    }

    #[tokio::test]
    async fn oversized_interval_is_clamped() {
        let fetcher = fetcher();
        assert!(fetcher.start(u64::MAX));
        assert_eq!(fetcher.status().interval_minutes, Some(MAX_INTERVAL_MINUTES));
        fetcher.stop();

        assert!(fetcher.start(0));
        assert_eq!(fetcher.status().interval_minutes, Some(1));
        fetcher.stop();
    }

    #[tokio::test]
    async fn tick_skips_while_cycle_in_flight_and_fetch_now_waits() {
        let gate = Arc::new(GatedSource::default());
        let fetcher = Arc::new(fetcher_with(vec![gate.clone() as Arc<dyn ContentSource>]));

        let first = tokio::spawn({
            let fetcher = Arc::clone(&fetcher);
            async move { fetcher.fetch_now().await }
        });
        gate.entered.notified().await;

        // the timer path gives up immediately instead of queueing
        fetcher.shared.run_tick().await;
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);

        let mut manual = tokio::spawn({
            let fetcher = Arc::clone(&fetcher);
            async move { fetcher.fetch_now().await }
        });
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut manual).await.is_err());
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);

        gate.release.notify_one();
        first.await.unwrap();

        gate.entered.notified().await;
        assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
        gate.release.notify_one();
        manual.await.unwrap();
        assert!(fetcher.status().last_cycle.is_some());
    }
}
