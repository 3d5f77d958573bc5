use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    exit_state::ExitStateMachine, platform_ops::PlatformOps, supervisor::SubprocessSupervisor,
    LogFn, ShellError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    WindowsClosed,
    QuitRequested,
    Signal(&'static str),
    FatalError,
    /// Runtime is exiting without a prior exit request.
    ExitFallback,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WindowsClosed => f.write_str("windows-closed"),
            Self::QuitRequested => f.write_str("quit-requested"),
            Self::Signal(name) => write!(f, "signal({name})"),
            Self::FatalError => f.write_str("fatal-error"),
            Self::ExitFallback => f.write_str("exit-fallback"),
        }
    }
}

/// Best-effort cleanup of backend processes this shell may have lost track
/// of. Failures are logged and returned, never raised.
pub fn reap_orphans<F>(
    platform: &dyn PlatformOps,
    port: u16,
    pattern: Option<&str>,
    log: F,
) -> Vec<ShellError>
where
    F: Fn(&str),
{
    let mut errors = Vec::new();
    if let Err(error) = platform.kill_processes_on_port(port) {
        errors.push(ShellError::ShutdownCleanup(format!("port {port}: {error}")));
    }
    if let Some(pattern) = pattern.filter(|pattern| !pattern.trim().is_empty()) {
        if let Err(error) = platform.kill_processes_matching(pattern) {
            errors.push(ShellError::ShutdownCleanup(format!(
                "pattern '{pattern}': {error}"
            )));
        }
    }
    for error in &errors {
        log(&format!("ignored: {error}"));
    }
    errors
}

pub struct ShutdownCoordinator {
    supervisor: Arc<SubprocessSupervisor>,
    platform: Arc<dyn PlatformOps>,
    port: u16,
    orphan_pattern: Option<String>,
    exit_state: Mutex<ExitStateMachine>,
    log: LogFn,
}

impl ShutdownCoordinator {
    pub fn new(
        supervisor: Arc<SubprocessSupervisor>,
        platform: Arc<dyn PlatformOps>,
        port: u16,
        orphan_pattern: Option<String>,
        log: LogFn,
    ) -> Self {
        Self {
            supervisor,
            platform,
            port,
            orphan_pattern,
            exit_state: Mutex::new(ExitStateMachine::default()),
            log,
        }
    }

    fn exit_state(&self, action: &str) -> MutexGuard<'_, ExitStateMachine> {
        self.exit_state.lock().unwrap_or_else(|error| {
            (self.log)(&format!(
                "exit state lock poisoned when {action}, recovering"
            ));
            error.into_inner()
        })
    }

    pub fn mark_quitting(&self) {
        self.exit_state("marking quitting").mark_quitting();
    }

    pub fn is_quitting(&self) -> bool {
        self.exit_state("reading quitting state").is_quitting()
    }

    pub fn is_cleanup_done(&self) -> bool {
        self.exit_state("reading cleanup state").is_cleanup_done()
    }

    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        self.exit_state("reading trigger").trigger()
    }

    pub fn allow_next_exit_request(&self) {
        self.exit_state("allowing next exit request")
            .allow_next_exit_request();
    }

    pub fn take_exit_request_allowance(&self) -> bool {
        self.exit_state("taking exit request allowance")
            .take_exit_request_allowance()
    }

    /// Stops the backend and reaps orphans. Only the first call does any
    /// work; later calls return `false` right away.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> bool {
        let log = self.log;
        if !self.exit_state("beginning cleanup").try_begin_cleanup(trigger) {
            log(&format!(
                "shutdown already handled, ignoring trigger {trigger}"
            ));
            return false;
        }

        log(&format!(
            "shutdown triggered by {trigger}: backend state={}",
            self.supervisor.state()
        ));
        self.supervisor.stop().await;

        let platform = self.platform.clone();
        let port = self.port;
        let pattern = self.orphan_pattern.clone();
        let reaper = tokio::task::spawn_blocking(move || {
            reap_orphans(platform.as_ref(), port, pattern.as_deref(), log).len()
        });
        match reaper.await {
            Ok(0) => log("orphan reaper finished"),
            Ok(count) => log(&format!("orphan reaper finished with {count} ignored error(s)")),
            Err(error) => log(&format!("orphan reaper task failed: {error}")),
        }

        self.exit_state("finishing cleanup").finish_cleanup();
        log(&format!("shutdown complete ({trigger})"));
        true
    }
}
