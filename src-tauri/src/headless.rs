use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
    time,
};
use url::Url;

use crate::{
    append_load_log, append_runtime_log, append_shutdown_log, append_startup_log,
    instance_guard::SingleInstanceGuard,
    launch_plan::{self, LaunchPlan},
    load_controller::{ContentLoadController, ContentWindow, LoadEvent, LoadFailure, LoadTarget},
    platform_ops,
    readiness::probe_once,
    shell::{Shell, ShellLogs},
    shell_config::ShellConfig,
    shutdown::ShutdownTrigger,
    signals::TerminationSignals,
    LogFn, ShellError,
};

/// Chromium's `ERR_CONNECTION_REFUSED`.
pub const CONNECTION_REFUSED_CODE: i32 = -102;
const CONTROLLER_STOP_WAIT: Duration = Duration::from_secs(2);

/// Window stand-in for machines without a display: a page "loads" when its
/// origin accepts a TCP connection.
pub struct HeadlessWindow {
    events_tx: UnboundedSender<LoadEvent>,
    connect_timeout: Duration,
    status: Option<String>,
    log: LogFn,
}

impl HeadlessWindow {
    pub fn new(events_tx: UnboundedSender<LoadEvent>, connect_timeout: Duration, log: LogFn) -> Self {
        Self {
            events_tx,
            connect_timeout,
            status: None,
            log,
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}

impl ContentWindow for HeadlessWindow {
    fn load_url(&mut self, url: &Url) {
        (self.log)(&format!("loading {url}"));
        let host = url.host_str().unwrap_or("127.0.0.1").to_string();
        let Some(port) = url.port_or_known_default() else {
            let _ = self.events_tx.send(LoadEvent::Failed(LoadFailure {
                code: CONNECTION_REFUSED_CODE,
                description: format!("{url} has no port"),
                is_main_frame: true,
            }));
            return;
        };
        let events_tx = self.events_tx.clone();
        let connect_timeout = self.connect_timeout;
        let url = url.to_string();
        tokio::spawn(async move {
            let event = if probe_once(&host, port, connect_timeout).await {
                LoadEvent::Loaded(LoadTarget::Backend)
            } else {
                LoadEvent::Failed(LoadFailure {
                    code: CONNECTION_REFUSED_CODE,
                    description: format!("connection to {url} refused"),
                    is_main_frame: true,
                })
            };
            let _ = events_tx.send(event);
        });
    }

    fn load_fallback(&mut self, reason: Option<&str>) {
        (self.log)(&format!(
            "showing placeholder: {}",
            reason.unwrap_or("starting backend")
        ));
        self.status = reason.map(str::to_string);
        let _ = self
            .events_tx
            .send(LoadEvent::Loaded(LoadTarget::Placeholder));
    }
}

async fn fatal_on_panic<T>(task: &mut JoinHandle<T>, name: &str, log: LogFn) -> ShutdownTrigger {
    match task.await {
        Err(error) if error.is_panic() => {
            log(&format!("{name} task panicked: {error}"));
            ShutdownTrigger::FatalError
        }
        _ => std::future::pending().await,
    }
}

/// Runs the shell without a window until a termination signal or a fatal
/// error. Returns the process exit code.
pub async fn run(config: ShellConfig) -> i32 {
    let (focus_tx, mut focus_rx) = mpsc::unbounded_channel();
    let mut guard = SingleInstanceGuard::new(config.instance_port, append_runtime_log);
    if !guard.acquire(focus_tx).await {
        return 0;
    }
    let focus_task = tokio::spawn(async move {
        while let Some(request) = focus_rx.recv().await {
            append_runtime_log(&format!(
                "focus requested by second instance (no window to raise): argv={:?}",
                request.argv
            ));
        }
    });

    let shell = Arc::new(Shell::new(
        config,
        platform_ops::current_platform(),
        ShellLogs::default(),
    ));
    let termination = TerminationSignals::install(append_shutdown_log);
    let code = run_until(shell, termination.wait(), || {
        launch_plan::resolve_launch_plan(append_startup_log)
    })
    .await;

    focus_task.abort();
    drop(guard);
    code
}

/// Drives `shell` until `termination` resolves or a shell task panics, then
/// shuts the backend down. Returns the process exit code.
pub async fn run_until<T, P>(shell: Arc<Shell>, termination: T, resolve_plan: P) -> i32
where
    T: Future<Output = ShutdownTrigger>,
    P: FnOnce() -> Result<LaunchPlan, ShellError> + Send + 'static,
{
    let config = shell.config().clone();
    let (load_tx, load_rx) = mpsc::unbounded_channel();
    let window = HeadlessWindow::new(
        load_tx.clone(),
        config.readiness.probe_timeout,
        append_load_log,
    );
    let controller = ContentLoadController::new(
        window,
        config.backend_url(),
        &config.load,
        shell.probe(),
        load_tx.clone(),
        append_load_log,
    );
    let mut controller_task = tokio::spawn(controller.run(load_rx));
    let mut startup_task = tokio::spawn(
        shell
            .clone()
            .run_startup_with(load_tx.clone(), resolve_plan),
    );

    let trigger = tokio::select! {
        trigger = termination => trigger,
        trigger = fatal_on_panic(&mut startup_task, "backend startup", append_shutdown_log) => trigger,
        trigger = fatal_on_panic(&mut controller_task, "content controller", append_shutdown_log) => trigger,
    };

    startup_task.abort();
    let _ = load_tx.send(LoadEvent::Shutdown);
    if !controller_task.is_finished()
        && time::timeout(CONTROLLER_STOP_WAIT, &mut controller_task)
            .await
            .is_err()
    {
        controller_task.abort();
    }

    shell.shutdown_coordinator().shutdown(trigger).await;

    match trigger {
        ShutdownTrigger::FatalError => 1,
        _ => 0,
    }
}
