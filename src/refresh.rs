// Out-of-band redirect refresh
// Rebuilds the redirect index on an interval and on SIGHUP, off the request path

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::redirects::{RebuildReport, RedirectService};

/// How often the scheduler thread wakes up to check its triggers
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the scheduler should do on a wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// SIGHUP or an explicit request
    Forced,
    /// Interval elapsed
    Scheduled,
}

/// RefreshScheduler runs redirect rebuilds on a background thread with its
/// own Tokio runtime
pub struct RefreshScheduler {
    service: Arc<RedirectService>,
    interval: Option<Duration>,
    refresh_requested: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl RefreshScheduler {
    /// `interval_secs` of 0 disables the periodic refresh; SIGHUP still works
    pub fn new(service: Arc<RedirectService>, interval_secs: u64) -> Self {
        let interval = (interval_secs > 0).then(|| Duration::from_secs(interval_secs));
        Self {
            service,
            interval,
            refresh_requested: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Register SIGHUP signal handler that requests a forced refresh
    #[cfg(unix)]
    pub fn register_signal_handler(&self) -> Result<(), String> {
        use signal_hook::consts::SIGHUP;
        use signal_hook::flag;

        flag::register(SIGHUP, Arc::clone(&self.refresh_requested))
            .map_err(|e| format!("Failed to register SIGHUP handler: {}", e))?;

        Ok(())
    }

    /// Request a forced refresh on the next wake-up
    pub fn request_refresh(&self) {
        self.refresh_requested.store(true, Ordering::Relaxed);
    }

    pub fn is_refresh_requested(&self) -> bool {
        self.refresh_requested.load(Ordering::Relaxed)
    }

    /// Decide whether a rebuild is due, consuming a pending SIGHUP request.
    ///
    /// A forced request wins over a due interval; both reset the interval.
    pub fn next_trigger(&self, last_run: Instant, now: Instant) -> Option<RefreshTrigger> {
        if self.refresh_requested.swap(false, Ordering::Relaxed) {
            return Some(RefreshTrigger::Forced);
        }
        match self.interval {
            Some(interval) if now.saturating_duration_since(last_run) >= interval => {
                Some(RefreshTrigger::Scheduled)
            }
            _ => None,
        }
    }

    /// Run one rebuild for `trigger`.
    ///
    /// Both triggers bypass the persisted `isUpToDate` flag; the CMS `since`
    /// cursor decides whether anything changed.
    pub async fn run_trigger(&self, trigger: RefreshTrigger) -> RebuildReport {
        tracing::info!(trigger = ?trigger, "Refreshing redirects");
        self.service.rebuild(true).await
    }

    /// Start the scheduler thread.
    pub fn start(self) -> Result<RefreshHandle, String> {
        let shutdown = Arc::clone(&self.shutdown);
        let refresh_requested = Arc::clone(&self.refresh_requested);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name("redirect-refresh")
            .build()
            .map_err(|e| format!("Failed to build refresh runtime: {}", e))?;

        let thread = std::thread::Builder::new()
            .name("redirect-refresh".to_string())
            .spawn(move || {
                runtime.block_on(self.run());
            })
            .map_err(|e| format!("Failed to spawn refresh thread: {}", e))?;

        Ok(RefreshHandle {
            shutdown,
            refresh_requested,
            thread: Some(thread),
        })
    }

    async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.map(|i| i.as_secs()).unwrap_or(0),
            "Redirect refresh scheduler started"
        );

        let mut last_run = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Some(trigger) = self.next_trigger(last_run, Instant::now()) {
                self.run_trigger(trigger).await;
                last_run = Instant::now();
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tracing::info!("Redirect refresh scheduler stopped");
    }
}

/// Handle to a running scheduler thread
pub struct RefreshHandle {
    shutdown: Arc<AtomicBool>,
    refresh_requested: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    pub fn request_refresh(&self) {
        self.refresh_requested.store(true, Ordering::Relaxed);
    }

    /// Stop the scheduler and wait for an in-flight rebuild to finish
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Redirect refresh thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedirectsConfig;
    use crate::metrics::Metrics;
    use crate::redirects::source::{MockRedirectSource, RawRedirect, RedirectFeed};
    use crate::redirects::{MemoryStorage, RebuildOutcome};

    fn scheduler(source: MockRedirectSource, interval_secs: u64) -> RefreshScheduler {
        let service = RedirectService::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(source),
            &RedirectsConfig::default(),
            Arc::new(Metrics::new()),
        );
        RefreshScheduler::new(Arc::new(service), interval_secs)
    }

    #[test]
    fn test_zero_interval_disables_schedule() {
        let scheduler = scheduler(MockRedirectSource::new(), 0);
        assert_eq!(scheduler.interval(), None);

        let start = Instant::now();
        let later = start + Duration::from_secs(3600);
        assert_eq!(scheduler.next_trigger(start, later), None);
    }

    #[test]
    fn test_interval_trigger() {
        let scheduler = scheduler(MockRedirectSource::new(), 60);
        let start = Instant::now();

        assert_eq!(
            scheduler.next_trigger(start, start + Duration::from_secs(30)),
            None
        );
        assert_eq!(
            scheduler.next_trigger(start, start + Duration::from_secs(60)),
            Some(RefreshTrigger::Scheduled)
        );
    }

    #[test]
    fn test_refresh_request_is_forced_and_consumed() {
        let scheduler = scheduler(MockRedirectSource::new(), 60);
        let start = Instant::now();

        scheduler.request_refresh();
        assert!(scheduler.is_refresh_requested());
        assert_eq!(
            scheduler.next_trigger(start, start),
            Some(RefreshTrigger::Forced)
        );
        assert!(!scheduler.is_refresh_requested());
        assert_eq!(scheduler.next_trigger(start, start), None);
    }

    #[tokio::test]
    async fn test_trigger_fetches_from_cms() {
        let mut source = MockRedirectSource::new();
        source
            .expect_fetch_redirects()
            .times(1)
            .returning(|_| {
                Ok(RedirectFeed {
                    is_up_to_date: false,
                    redirects: vec![RawRedirect {
                        id: 1,
                        origin_url: "/old".to_string(),
                        destination_url: "/new".to_string(),
                        status_code: 301,
                    }],
                    server_time: None,
                })
            });

        let scheduler = scheduler(source, 60);
        let report = scheduler.run_trigger(RefreshTrigger::Scheduled).await;
        assert_eq!(report.outcome, RebuildOutcome::Refreshed);
        assert_eq!(report.items, 1);
    }

    #[test]
    fn test_scheduler_thread_starts_and_stops() {
        let scheduler = scheduler(MockRedirectSource::new(), 0);
        let handle = scheduler.start().unwrap();
        handle.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_register_signal_handler() {
        let scheduler = scheduler(MockRedirectSource::new(), 0);
        assert!(scheduler.register_signal_handler().is_ok());
    }
}
