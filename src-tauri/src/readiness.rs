use std::{future::Future, pin::Pin, time::Duration};

use tokio::{net::TcpStream, time};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub poll_interval: Duration,
    /// Upper bound for a single connection attempt.
    pub probe_timeout: Duration,
}

/// Bookkeeping for one `wait_until_ready` call. Resolves exactly once: on the
/// first reachable probe or when the attempt ceiling is used up.
#[derive(Debug)]
pub struct ReadinessState {
    port: u16,
    attempts: u32,
    max_attempts: u32,
    resolved: Option<bool>,
}

impl ReadinessState {
    pub fn new(port: u16, max_attempts: u32) -> Self {
        Self {
            port,
            attempts: 0,
            max_attempts,
            resolved: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcome(&self) -> Option<bool> {
        self.resolved
    }

    /// Claims the next attempt number, or `None` once resolved. An exhausted
    /// budget resolves to unreachable here.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        if self.resolved.is_some() {
            return None;
        }
        if self.attempts >= self.max_attempts {
            self.resolved = Some(false);
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    /// Returns the resolution the first time it becomes known.
    pub fn record(&mut self, reachable: bool) -> Option<bool> {
        if self.resolved.is_some() {
            return None;
        }
        if reachable {
            self.resolved = Some(true);
        } else if self.attempts >= self.max_attempts {
            self.resolved = Some(false);
        }
        self.resolved
    }
}

/// One TCP connect to `host:port`. The connection is dropped immediately; any
/// connect error or timeout means "not reachable".
pub async fn probe_once(host: &str, port: u16, connect_timeout: Duration) -> bool {
    match time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(_)) | Err(_) => false,
    }
}

pub async fn wait_until_ready_with<P, Fut, F>(
    mut probe: P,
    port: u16,
    max_attempts: u32,
    interval: Duration,
    log: F,
) -> bool
where
    P: FnMut() -> Fut,
    Fut: Future<Output = bool>,
    F: Fn(&str),
{
    let mut state = ReadinessState::new(port, max_attempts);
    loop {
        let Some(attempt) = state.begin_attempt() else {
            return state.outcome().unwrap_or(false);
        };
        let reachable = probe().await;
        if let Some(outcome) = state.record(reachable) {
            if outcome {
                log(&format!("port {port} reachable after {attempt} attempt(s)"));
            } else {
                log(&format!(
                    "port {port} still unreachable after {attempt}/{max_attempts} attempts"
                ));
            }
            return outcome;
        }
        log(&format!("waiting for port {port}: attempt {attempt}/{max_attempts}"));
        time::sleep(interval).await;
    }
}

pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Seam used by the content load controller to re-check the backend before a
/// retry.
pub trait BackendProbe: Send + Sync {
    fn probe(&self) -> ProbeFuture<'_>;
}

#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    pub async fn probe_once(&self) -> bool {
        probe_once(&self.host, self.port, self.connect_timeout).await
    }

    pub async fn wait_until_ready<F>(&self, max_attempts: u32, interval: Duration, log: F) -> bool
    where
        F: Fn(&str),
    {
        wait_until_ready_with(
            || self.probe_once(),
            self.port,
            max_attempts,
            interval,
            log,
        )
        .await
    }
}

impl BackendProbe for TcpProbe {
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin(self.probe_once())
    }
}
