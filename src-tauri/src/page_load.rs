use std::time::Duration;

use url::Url;

use crate::{
    load_controller::{LoadEvent, LoadFailure, LoadTarget},
    origin_policy,
};

/// Chromium's `ERR_TIMED_OUT`, reused for navigations that never finish.
pub const PAGE_LOAD_TIMEOUT_CODE: i32 = -7;
/// Chromium's generic `ERR_FAILED`, used when navigation cannot even start.
pub const NAVIGATION_FAILED_CODE: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingNavigation {
    generation: u64,
    target: LoadTarget,
}

/// Turns "page finished" notifications plus a per-navigation watchdog into
/// load outcomes for webviews that never report failures themselves.
#[derive(Debug)]
pub struct PageLoadTracker {
    backend_url: Url,
    timeout: Duration,
    generation: u64,
    pending: Option<PendingNavigation>,
}

impl PageLoadTracker {
    pub fn new(backend_url: Url, timeout: Duration) -> Self {
        Self {
            backend_url,
            timeout,
            generation: 0,
            pending: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts tracking a navigation; any earlier watchdog becomes stale.
    pub fn begin(&mut self, target: LoadTarget) -> u64 {
        self.generation += 1;
        self.pending = Some(PendingNavigation {
            generation: self.generation,
            target,
        });
        self.generation
    }

    pub fn finished(&mut self, page_url: &Url) -> Option<LoadEvent> {
        let target = origin_policy::classify_page(&self.backend_url, page_url)?;
        if self.pending.is_some_and(|pending| pending.target == target) {
            self.pending = None;
        }
        Some(LoadEvent::Loaded(target))
    }

    /// Stops tracking `generation`. Returns false when a newer navigation
    /// already replaced it or it has been settled.
    pub fn cancel(&mut self, generation: u64) -> bool {
        match self.pending {
            Some(pending) if pending.generation == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Called when navigation `generation` could not be started at all. The
    /// watchdog for it is disarmed so only one failure is reported.
    pub fn failed_to_start(&mut self, generation: u64, description: String) -> Option<LoadEvent> {
        if !self.cancel(generation) {
            return None;
        }
        Some(LoadEvent::Failed(LoadFailure {
            code: NAVIGATION_FAILED_CODE,
            description,
            is_main_frame: true,
        }))
    }

    /// Called when the watchdog for `generation` fires.
    pub fn expired(&mut self, generation: u64) -> Option<LoadEvent> {
        if !self.cancel(generation) {
            return None;
        }
        Some(LoadEvent::Failed(LoadFailure {
            code: PAGE_LOAD_TIMEOUT_CODE,
            description: format!(
                "page load did not finish within {}ms",
                self.timeout.as_millis()
            ),
            is_main_frame: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PageLoadTracker {
        PageLoadTracker::new(
            Url::parse("http://127.0.0.1:8001/").expect("parse backend url"),
            Duration::from_secs(15),
        )
    }

    #[test]
    fn finished_navigation_disarms_watchdog() {
        let mut tracker = tracker();
        let generation = tracker.begin(LoadTarget::Backend);
        let page = Url::parse("http://127.0.0.1:8001/home").expect("parse page url");

        assert_eq!(
            tracker.finished(&page),
            Some(LoadEvent::Loaded(LoadTarget::Backend))
        );
        assert_eq!(tracker.expired(generation), None);
    }

    #[test]
    fn stalled_navigation_becomes_main_frame_failure() {
        let mut tracker = tracker();
        let generation = tracker.begin(LoadTarget::Backend);

        let Some(LoadEvent::Failed(failure)) = tracker.expired(generation) else {
            panic!("expected synthesized failure");
        };
        assert_eq!(failure.code, PAGE_LOAD_TIMEOUT_CODE);
        assert!(failure.is_main_frame);
        assert_eq!(tracker.expired(generation), None);
    }

    #[test]
    fn superseded_watchdog_is_stale() {
        let mut tracker = tracker();
        let first = tracker.begin(LoadTarget::Backend);
        let second = tracker.begin(LoadTarget::Placeholder);

        assert_eq!(tracker.expired(first), None);
        assert!(tracker.expired(second).is_some());
    }

    #[test]
    fn navigation_that_fails_to_start_reports_once() {
        let mut tracker = tracker();
        let generation = tracker.begin(LoadTarget::Backend);

        let Some(LoadEvent::Failed(failure)) =
            tracker.failed_to_start(generation, "webview is gone".to_string())
        else {
            panic!("expected start failure");
        };
        assert_eq!(failure.code, NAVIGATION_FAILED_CODE);
        assert_eq!(failure.description, "webview is gone");
        assert_eq!(tracker.expired(generation), None);
        assert_eq!(tracker.failed_to_start(generation, "again".to_string()), None);
    }

    #[test]
    fn cancel_leaves_newer_navigation_armed() {
        let mut tracker = tracker();
        let first = tracker.begin(LoadTarget::Backend);
        let second = tracker.begin(LoadTarget::Backend);

        assert!(!tracker.cancel(first));
        assert!(tracker.cancel(second));
        assert!(!tracker.cancel(second));
    }

    #[test]
    fn external_pages_are_not_reported() {
        let mut tracker = tracker();
        tracker.begin(LoadTarget::Backend);
        let page = Url::parse("https://example.com/").expect("parse page url");
        assert_eq!(tracker.finished(&page), None);
    }
}
