use std::time::Duration;

use tokio::{sync::mpsc::UnboundedReceiver, time};

use crate::process_state::ProcessEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupPolicy {
    /// Output fragment the backend prints once it is about to serve.
    pub ready_marker: String,
    /// Grace period after the marker so the socket can actually bind.
    pub settle_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Marker seen and the process survived the settle delay.
    Confirmed,
    /// Hard timeout with neither marker nor failure; readiness probing decides.
    Unconfirmed,
    Failed(String),
}

impl StartupOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("backend exited with code {code}"),
        None => "backend terminated by signal".to_string(),
    }
}

fn failure_from_event(event: Option<ProcessEvent>) -> Option<StartupOutcome> {
    match event {
        Some(ProcessEvent::Exited(code)) => Some(StartupOutcome::Failed(describe_exit(code))),
        Some(ProcessEvent::Error(error)) => Some(StartupOutcome::Failed(error)),
        None => Some(StartupOutcome::Failed(
            "backend event stream closed before startup resolved".to_string(),
        )),
        Some(ProcessEvent::ReadyMarker(_)) => None,
    }
}

/// Races the process events against the startup timeout and resolves once.
///
/// Events are polled before the timer, so an exit or error that is already
/// queued when the timer fires still wins and resolves to `Failed`.
pub async fn resolve_startup<F>(
    events: &mut UnboundedReceiver<ProcessEvent>,
    policy: &StartupPolicy,
    log: F,
) -> StartupOutcome
where
    F: Fn(&str),
{
    let deadline = time::sleep(policy.timeout);
    tokio::pin!(deadline);

    let marker_stream = loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(ProcessEvent::ReadyMarker(stream)) => break stream,
                other => {
                    let outcome = failure_from_event(other)
                        .unwrap_or_else(|| StartupOutcome::Failed("unexpected startup event".into()));
                    log(&format!("backend startup failed: {outcome:?}"));
                    return outcome;
                }
            },
            _ = &mut deadline => {
                log(&format!(
                    "no startup marker within {}ms, continuing unconfirmed",
                    policy.timeout.as_millis()
                ));
                return StartupOutcome::Unconfirmed;
            }
        }
    };

    log(&format!(
        "startup marker seen on {}, settling for {}ms",
        marker_stream.as_label(),
        policy.settle_delay.as_millis()
    ));

    let settle = time::sleep(policy.settle_delay);
    tokio::pin!(settle);
    loop {
        tokio::select! {
            biased;
            event = events.recv() => {
                if let Some(outcome) = failure_from_event(event) {
                    log(&format!("backend failed while settling: {outcome:?}"));
                    return outcome;
                }
            }
            _ = &mut settle => return StartupOutcome::Confirmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_state::OutputStream;
    use tokio::sync::mpsc;

    fn policy() -> StartupPolicy {
        StartupPolicy {
            ready_marker: "Starting development server".into(),
            settle_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn error_before_timeout_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ProcessEvent::Error("bash: not found".into()))
            .expect("queue error");

        let outcome = resolve_startup(&mut rx, &policy(), |_| {}).await;
        assert_eq!(outcome, StartupOutcome::Failed("bash: not found".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn error_arriving_late_still_beats_the_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(9_999)).await;
            let _ = tx.send(ProcessEvent::Exited(Some(1)));
        });

        let outcome = resolve_startup(&mut rx, &policy(), |_| {}).await;
        assert_eq!(
            outcome,
            StartupOutcome::Failed("backend exited with code 1".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silence_resolves_unconfirmed_at_timeout() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let started = time::Instant::now();

        let outcome = resolve_startup(&mut rx, &policy(), |_| {}).await;
        assert_eq!(outcome, StartupOutcome::Unconfirmed);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn marker_confirms_after_settle_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ProcessEvent::ReadyMarker(OutputStream::Stdout))
            .expect("queue marker");
        let started = time::Instant::now();

        let outcome = resolve_startup(&mut rx, &policy(), |_| {}).await;
        assert_eq!(outcome, StartupOutcome::Confirmed);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn exit_during_settle_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ProcessEvent::ReadyMarker(OutputStream::Stderr))
            .expect("queue marker");
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(500)).await;
            let _ = tx.send(ProcessEvent::Exited(None));
        });

        let outcome = resolve_startup(&mut rx, &policy(), |_| {}).await;
        assert_eq!(
            outcome,
            StartupOutcome::Failed("backend terminated by signal".into())
        );
        assert!(outcome.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_event_stream_is_a_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProcessEvent>();
        drop(tx);

        let outcome = resolve_startup(&mut rx, &policy(), |_| {}).await;
        assert!(outcome.is_failure());
    }
}
