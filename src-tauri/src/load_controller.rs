use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time,
};
use url::Url;

use crate::{readiness::BackendProbe, LogFn, ShellError};

pub const WAITING_FOR_BACKEND: &str = "Waiting for the backend to become reachable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPolicy {
    /// Main-frame failures tolerated before the terminal fallback view.
    pub retry_limit: u32,
    pub retry_delay: Duration,
    /// Used by windows that have to synthesize failures for stalled navigations.
    pub page_load_timeout: Duration,
    /// How often the backend is rechecked while the terminal fallback is
    /// shown. Zero disables the watch.
    pub recovery_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    Backend,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub code: i32,
    pub description: String,
    pub is_main_frame: bool,
}

impl From<&LoadFailure> for ShellError {
    fn from(failure: &LoadFailure) -> Self {
        ShellError::LoadFailure {
            code: failure.code,
            description: failure.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    BackendReady,
    BackendUnavailable(ShellError),
    Loaded(LoadTarget),
    Failed(LoadFailure),
    RetryDue { generation: u64, reachable: bool },
    /// The backend answered again while the terminal fallback was shown.
    RecoveryDue { generation: u64 },
    Shutdown,
}

/// Commands the controller issues to whatever renders content. Outcomes come
/// back as `LoadEvent::Loaded` / `LoadEvent::Failed`.
pub trait ContentWindow {
    fn load_url(&mut self, url: &Url);
    /// Shows the placeholder view, optionally with a status message.
    fn load_fallback(&mut self, reason: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    ProbingOrRunning,
    Displayed,
    Retrying,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Ignored,
    ScheduleRetry(Duration),
    RetryAlreadyPending,
    Fallback,
}

/// Retry bookkeeping. At most one retry is pending at a time; reaching the
/// ceiling resets the counter so a later trigger can recover.
#[derive(Debug)]
pub struct LoadAttempt {
    failures: u32,
    retry_limit: u32,
    retry_delay: Duration,
    retry_in_progress: bool,
    generation: u64,
}

impl LoadAttempt {
    pub fn new(policy: &LoadPolicy) -> Self {
        Self {
            failures: 0,
            retry_limit: policy.retry_limit.max(1),
            retry_delay: policy.retry_delay,
            retry_in_progress: false,
            generation: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn retry_in_progress(&self) -> bool {
        self.retry_in_progress
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn on_failure(&mut self, is_main_frame: bool) -> FailureDecision {
        if !is_main_frame {
            return FailureDecision::Ignored;
        }
        self.failures += 1;
        if self.failures >= self.retry_limit {
            self.failures = 0;
            self.cancel_retry();
            return FailureDecision::Fallback;
        }
        if self.retry_in_progress {
            return FailureDecision::RetryAlreadyPending;
        }
        self.retry_in_progress = true;
        self.generation += 1;
        FailureDecision::ScheduleRetry(self.retry_delay)
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
        self.cancel_retry();
    }

    /// Drops any pending retry; its timer result becomes stale.
    pub fn cancel_retry(&mut self) {
        if self.retry_in_progress {
            self.retry_in_progress = false;
            self.generation += 1;
        }
    }

    /// Accepts a fired retry timer if it is the one currently pending.
    pub fn complete_retry(&mut self, generation: u64) -> bool {
        if !self.retry_in_progress || generation != self.generation {
            return false;
        }
        self.retry_in_progress = false;
        true
    }
}

pub struct ContentLoadController<W> {
    window: W,
    backend_url: Url,
    attempt: LoadAttempt,
    phase: LoadPhase,
    probe: Arc<dyn BackendProbe>,
    events_tx: UnboundedSender<LoadEvent>,
    retry_task: Option<JoinHandle<()>>,
    recovery_interval: Duration,
    recovery_generation: u64,
    recovery_task: Option<JoinHandle<()>>,
    log: LogFn,
}

impl<W> ContentLoadController<W>
where
    W: ContentWindow,
{
    pub fn new(
        window: W,
        backend_url: Url,
        policy: &LoadPolicy,
        probe: Arc<dyn BackendProbe>,
        events_tx: UnboundedSender<LoadEvent>,
        log: LogFn,
    ) -> Self {
        Self {
            window,
            backend_url,
            attempt: LoadAttempt::new(policy),
            phase: LoadPhase::Idle,
            probe,
            events_tx,
            retry_task: None,
            recovery_interval: policy.recovery_interval,
            recovery_generation: 0,
            recovery_task: None,
            log,
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// Shows the placeholder immediately, then reacts to events until
    /// `Shutdown` or until every sender is gone. Returns the window.
    pub async fn run(mut self, mut events: UnboundedReceiver<LoadEvent>) -> W {
        self.window.load_fallback(None);
        self.phase = LoadPhase::ProbingOrRunning;

        while let Some(event) = events.recv().await {
            if !self.handle(event) {
                break;
            }
        }

        self.abort_retry_timer();
        self.stop_recovery_watch();
        (self.log)("content load controller stopped");
        self.window
    }

    fn handle(&mut self, event: LoadEvent) -> bool {
        let log = self.log;
        match event {
            LoadEvent::BackendReady => {
                log(&format!("backend ready, loading {}", self.backend_url));
                self.stop_retrying();
                self.load_backend();
            }
            LoadEvent::BackendUnavailable(error) if error.is_user_visible() => {
                log(&format!("backend unavailable: {error}"));
                self.stop_retrying();
                self.show_fallback(&error.to_string());
            }
            LoadEvent::BackendUnavailable(error) => {
                // Not fatal: let the normal failure path retry the load.
                log(&format!("backend not confirmed ({error}), trying to load anyway"));
                self.load_backend();
            }
            LoadEvent::Loaded(LoadTarget::Backend) => {
                log("backend content displayed");
                self.stop_retrying();
                self.attempt.on_success();
                self.phase = LoadPhase::Displayed;
            }
            LoadEvent::Loaded(LoadTarget::Placeholder) => {
                log("placeholder displayed");
            }
            LoadEvent::Failed(failure) => self.on_load_failure(&failure),
            LoadEvent::RetryDue {
                generation,
                reachable,
            } => {
                self.retry_task = None;
                if !self.attempt.complete_retry(generation) {
                    log(&format!("ignoring stale retry timer: generation={generation}"));
                    return true;
                }
                if reachable {
                    log("retry: backend reachable, reloading");
                    self.load_backend();
                } else {
                    log("retry: backend still unreachable");
                    self.window.load_fallback(Some(WAITING_FOR_BACKEND));
                    self.on_load_failure(&LoadFailure {
                        code: -102,
                        description: "backend unreachable at retry".to_string(),
                        is_main_frame: true,
                    });
                }
            }
            LoadEvent::RecoveryDue { generation } => {
                if generation != self.recovery_generation || self.phase != LoadPhase::Fallback {
                    log(&format!("ignoring stale recovery check: generation={generation}"));
                    return true;
                }
                self.recovery_task = None;
                log("backend reachable again, reloading");
                self.load_backend();
            }
            LoadEvent::Shutdown => return false,
        }
        true
    }

    fn on_load_failure(&mut self, failure: &LoadFailure) {
        let log = self.log;
        match self.attempt.on_failure(failure.is_main_frame) {
            FailureDecision::Ignored => {
                log(&format!(
                    "ignoring sub-frame load failure ({}): {}",
                    failure.code, failure.description
                ));
            }
            FailureDecision::RetryAlreadyPending => {
                log(&format!(
                    "load failed ({}), retry already pending: failures={}",
                    failure.code,
                    self.attempt.failures()
                ));
            }
            FailureDecision::ScheduleRetry(delay) => {
                log(&format!(
                    "load failed ({}): {}, retrying in {}ms (failures={})",
                    failure.code,
                    failure.description,
                    delay.as_millis(),
                    self.attempt.failures()
                ));
                self.spawn_retry_timer(delay);
                self.phase = LoadPhase::Retrying;
            }
            FailureDecision::Fallback => {
                log(&format!(
                    "load failed ({}): {}, retry limit reached, showing fallback",
                    failure.code, failure.description
                ));
                self.abort_retry_timer();
                self.show_fallback(&ShellError::from(failure).to_string());
                self.start_recovery_watch();
            }
        }
    }

    fn load_backend(&mut self) {
        self.phase = LoadPhase::ProbingOrRunning;
        self.window.load_url(&self.backend_url);
    }

    fn show_fallback(&mut self, reason: &str) {
        self.phase = LoadPhase::Fallback;
        self.window.load_fallback(Some(reason));
    }

    fn stop_retrying(&mut self) {
        self.attempt.cancel_retry();
        self.abort_retry_timer();
        self.stop_recovery_watch();
    }

    fn stop_recovery_watch(&mut self) {
        self.recovery_generation += 1;
        if let Some(task) = self.recovery_task.take() {
            task.abort();
        }
    }

    /// Polls the backend at a low rate until it answers, then asks for a
    /// reload. Only the latest watch may trigger it.
    fn start_recovery_watch(&mut self) {
        self.stop_recovery_watch();
        if self.recovery_interval.is_zero() {
            return;
        }
        (self.log)(&format!(
            "watching for backend recovery every {}ms",
            self.recovery_interval.as_millis()
        ));
        let generation = self.recovery_generation;
        let interval = self.recovery_interval;
        let probe = self.probe.clone();
        let events_tx = self.events_tx.clone();
        self.recovery_task = Some(tokio::spawn(async move {
            loop {
                time::sleep(interval).await;
                if probe.probe().await {
                    let _ = events_tx.send(LoadEvent::RecoveryDue { generation });
                    return;
                }
            }
        }));
    }

    fn abort_retry_timer(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    fn spawn_retry_timer(&mut self, delay: Duration) {
        self.abort_retry_timer();
        let generation = self.attempt.generation();
        let probe = self.probe.clone();
        let events_tx = self.events_tx.clone();
        self.retry_task = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let reachable = probe.probe().await;
            let _ = events_tx.send(LoadEvent::RetryDue {
                generation,
                reachable,
            });
        }));
    }
}
