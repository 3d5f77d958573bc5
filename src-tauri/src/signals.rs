use crate::{shutdown::ShutdownTrigger, LogFn};

/// Termination sources the host can use: Ctrl-C everywhere, plus SIGTERM and
/// SIGHUP on Unix. Handlers are registered on `install`, so a signal that
/// arrives before anyone waits is not lost.
pub struct TerminationSignals {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
    #[cfg(unix)]
    hangup: Option<tokio::signal::unix::Signal>,
    log: LogFn,
}

impl TerminationSignals {
    #[cfg(unix)]
    pub fn install(log: LogFn) -> Self {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(error) => {
                log(&format!("failed to install SIGTERM handler: {error}"));
                None
            }
        };
        let hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => Some(stream),
            Err(error) => {
                log(&format!("failed to install SIGHUP handler: {error}"));
                None
            }
        };
        Self {
            terminate,
            hangup,
            log,
        }
    }

    #[cfg(not(unix))]
    pub fn install(log: LogFn) -> Self {
        Self { log }
    }

    /// Resolves with the first termination request.
    pub async fn wait(mut self) -> ShutdownTrigger {
        let trigger = self.next_trigger().await;
        (self.log)(&format!("received termination signal: {trigger}"));
        trigger
    }

    #[cfg(unix)]
    async fn next_trigger(&mut self) -> ShutdownTrigger {
        let log = self.log;
        tokio::select! {
            _ = ctrl_c(log) => ShutdownTrigger::Signal("SIGINT"),
            Some(_) = recv_optional(self.terminate.as_mut()) => ShutdownTrigger::Signal("SIGTERM"),
            Some(_) = recv_optional(self.hangup.as_mut()) => ShutdownTrigger::Signal("SIGHUP"),
        }
    }

    #[cfg(not(unix))]
    async fn next_trigger(&mut self) -> ShutdownTrigger {
        ctrl_c(self.log).await;
        ShutdownTrigger::Signal("CTRL_C")
    }
}

/// Resolves when the host asks the shell to terminate.
pub async fn wait_for_termination(log: LogFn) -> ShutdownTrigger {
    TerminationSignals::install(log).wait().await
}

#[cfg(unix)]
async fn recv_optional(stream: Option<&mut tokio::signal::unix::Signal>) -> Option<()> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

async fn ctrl_c(log: LogFn) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        log(&format!("failed to listen for Ctrl-C: {error}"));
        std::future::pending::<()>().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal};
    use std::time::Duration;

    #[tokio::test]
    async fn hangup_is_reported_as_termination() {
        let signals = TerminationSignals::install(|_| {});
        raise(Signal::SIGHUP).expect("raise SIGHUP");

        let trigger = tokio::time::timeout(Duration::from_secs(5), signals.wait())
            .await
            .expect("signal delivered");
        assert_eq!(trigger, ShutdownTrigger::Signal("SIGHUP"));
    }
}
