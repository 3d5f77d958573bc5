use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    append_runtime_log, append_shutdown_log, append_startup_log,
    launch_plan::{self, LaunchPlan},
    load_controller::LoadEvent,
    platform_ops::PlatformOps,
    readiness::{BackendProbe, TcpProbe},
    shell_config::ShellConfig,
    shutdown::ShutdownCoordinator,
    startup_race::{self, StartupOutcome},
    supervisor::SubprocessSupervisor,
    LogFn, ShellError, BACKEND_AUTO_START_ENV,
};

/// Log sinks for the three phases the shell goes through.
#[derive(Debug, Clone, Copy)]
pub struct ShellLogs {
    pub startup: LogFn,
    pub runtime: LogFn,
    pub shutdown: LogFn,
}

impl Default for ShellLogs {
    fn default() -> Self {
        Self {
            startup: append_startup_log,
            runtime: append_runtime_log,
            shutdown: append_shutdown_log,
        }
    }
}

impl ShellLogs {
    pub fn all(log: LogFn) -> Self {
        Self {
            startup: log,
            runtime: log,
            shutdown: log,
        }
    }
}

/// Owns the supervisor, the readiness probe and the shutdown coordinator
/// for one backend.
pub struct Shell {
    config: ShellConfig,
    supervisor: Arc<SubprocessSupervisor>,
    probe: Arc<TcpProbe>,
    shutdown: Arc<ShutdownCoordinator>,
    logs: ShellLogs,
}

impl Shell {
    pub fn new(config: ShellConfig, platform: Arc<dyn PlatformOps>, logs: ShellLogs) -> Self {
        let supervisor = Arc::new(SubprocessSupervisor::new(
            config.startup.ready_marker.clone(),
            logs.runtime,
        ));
        let probe = Arc::new(TcpProbe::new(
            config.backend_host.clone(),
            config.backend_port,
            config.readiness.probe_timeout,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new(
            supervisor.clone(),
            platform,
            config.backend_port,
            config.orphan_pattern.clone(),
            logs.shutdown,
        ));
        Self {
            config,
            supervisor,
            probe,
            shutdown,
            logs,
        }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<SubprocessSupervisor> {
        &self.supervisor
    }

    pub fn probe(&self) -> Arc<dyn BackendProbe> {
        self.probe.clone()
    }

    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Makes sure something is serving on the backend port: reuses a
    /// backend that already answers, otherwise spawns one, waits for its
    /// startup to resolve and polls readiness.
    pub async fn ensure_backend_ready<P>(&self, resolve_plan: P) -> Result<(), ShellError>
    where
        P: FnOnce() -> Result<LaunchPlan, ShellError>,
    {
        let log = self.logs.startup;
        if self.probe.probe_once().await {
            log(&format!(
                "backend already reachable on port {}, skip spawn",
                self.config.backend_port
            ));
            return Ok(());
        }
        if !self.config.auto_start {
            return Err(ShellError::AutoStartDisabled {
                env: BACKEND_AUTO_START_ENV,
            });
        }

        let plan = resolve_plan()?;
        let mut started = self.supervisor.start(&plan)?;
        let outcome =
            startup_race::resolve_startup(&mut started.events, &self.config.startup, log).await;
        if let StartupOutcome::Failed(reason) = outcome {
            let tail = self.supervisor.output_tail();
            if !tail.is_empty() {
                log(&format!("backend output before failure:\n{tail}"));
            }
            self.supervisor.stop().await;
            return Err(ShellError::StartupFailed(reason));
        }
        self.supervisor.mark_running();

        let readiness = &self.config.readiness;
        if self
            .probe
            .wait_until_ready(readiness.max_attempts, readiness.poll_interval, log)
            .await
        {
            Ok(())
        } else {
            Err(ShellError::ReadinessTimeout {
                host: self.config.backend_host.clone(),
                port: self.config.backend_port,
                attempts: readiness.max_attempts,
            })
        }
    }

    /// Brings the backend up and tells the content controller how it went,
    /// then keeps watching for an unexpected backend exit.
    pub async fn run_startup(self: Arc<Self>, load_tx: UnboundedSender<LoadEvent>) {
        let log = self.logs.startup;
        self.run_startup_with(load_tx, move || launch_plan::resolve_launch_plan(log))
            .await;
    }

    /// `run_startup` with a caller-provided launch plan source.
    pub async fn run_startup_with<P>(
        self: Arc<Self>,
        load_tx: UnboundedSender<LoadEvent>,
        resolve_plan: P,
    ) where
        P: FnOnce() -> Result<LaunchPlan, ShellError>,
    {
        let log = self.logs.startup;
        let result = self.ensure_backend_ready(resolve_plan).await;
        let event = match result {
            Ok(()) => {
                log("backend ready");
                LoadEvent::BackendReady
            }
            Err(error) => {
                log(&format!("backend not ready: {error}"));
                LoadEvent::BackendUnavailable(error)
            }
        };
        if load_tx.send(event).is_err() {
            log("content controller gone before backend startup finished");
        }

        self.watch_backend_exit().await;
    }

    /// Resolves once a spawned backend reaches a terminal state.
    pub async fn watch_backend_exit(&self) {
        let mut state = self.supervisor.subscribe();
        let terminal = match state.wait_for(|state| state.is_terminal()).await {
            Ok(terminal) => terminal.clone(),
            Err(_) => return,
        };
        if self.shutdown.is_quitting() {
            return;
        }
        (self.logs.runtime)(&format!(
            "backend stopped unexpectedly: {terminal}\n{}",
            self.supervisor.output_tail()
        ));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{process_state::ProcessState, shutdown::ShutdownTrigger};
    use std::{net::TcpListener, path::Path, sync::Mutex, time::Duration};

    /// The backend stand-ins live in this test process, so the reaper must
    /// not touch real processes.
    struct InertPlatform;

    impl PlatformOps for InertPlatform {
        fn name(&self) -> &'static str {
            "inert"
        }

        fn kill_processes_on_port(&self, _port: u16) -> Result<(), String> {
            Ok(())
        }

        fn kill_processes_matching(&self, _pattern: &str) -> Result<(), String> {
            Ok(())
        }

        fn open_path(&self, _path: &Path) -> Result<(), String> {
            Ok(())
        }

        fn reveal_in_file_manager(&self, _path: &Path) -> Result<(), String> {
            Ok(())
        }
    }

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .expect("reserve ephemeral port")
    }

    fn test_config(port: u16) -> ShellConfig {
        let mut config = ShellConfig::default();
        config.backend_port = port;
        config.orphan_pattern = None;
        config.startup.settle_delay = Duration::from_millis(10);
        config.startup.timeout = Duration::from_secs(5);
        config.readiness.max_attempts = 2;
        config.readiness.poll_interval = Duration::from_millis(50);
        config.readiness.probe_timeout = Duration::from_millis(200);
        config
    }

    fn shell(config: ShellConfig) -> Shell {
        Shell::new(config, Arc::new(InertPlatform), ShellLogs::all(|_| {}))
    }

    fn sh_plan(script: &str) -> LaunchPlan {
        LaunchPlan {
            cmd: "sh".into(),
            args: vec!["-c".into(), script.into()],
            cwd: std::env::temp_dir(),
            env: Vec::new(),
            required_artifact: None,
        }
    }

    #[tokio::test]
    async fn reachable_backend_is_reused_without_spawning() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind backend stand-in");
        let port = listener.local_addr().expect("local addr").port();
        let shell = shell(test_config(port));

        let result = shell
            .ensure_backend_ready(|| Err(ShellError::Spawn("must not resolve a plan".into())))
            .await;
        assert_eq!(result, Ok(()));
        assert_eq!(shell.supervisor().state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn disabled_auto_start_never_spawns() {
        let mut config = test_config(free_port());
        config.auto_start = false;
        let shell = shell(config);

        let result = shell.ensure_backend_ready(|| Ok(sh_plan("exit 0"))).await;
        assert_eq!(
            result,
            Err(ShellError::AutoStartDisabled {
                env: BACKEND_AUTO_START_ENV
            })
        );
        assert_eq!(shell.supervisor().state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn backend_exiting_during_startup_is_a_startup_failure() {
        let shell = shell(test_config(free_port()));

        let result = shell
            .ensure_backend_ready(|| Ok(sh_plan("echo booting; exit 4")))
            .await;
        assert_eq!(
            result,
            Err(ShellError::StartupFailed("backend exited with code 4".into()))
        );
    }

    #[tokio::test]
    async fn marker_then_listener_resolves_ready() {
        let port = free_port();
        let shell = shell(test_config(port));
        let backend_socket: Arc<Mutex<Option<TcpListener>>> = Arc::new(Mutex::new(None));
        let socket_slot = backend_socket.clone();

        let result = shell
            .ensure_backend_ready(move || {
                // Bind after the reuse probe so the shell has to spawn.
                let listener =
                    TcpListener::bind(("127.0.0.1", port)).expect("bind backend stand-in");
                *socket_slot.lock().expect("lock socket slot") = Some(listener);
                Ok(sh_plan("echo 'Starting development server'; sleep 30"))
            })
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(shell.supervisor().state(), ProcessState::Running);
        assert!(
            shell
                .shutdown_coordinator()
                .shutdown(ShutdownTrigger::QuitRequested)
                .await
        );
        assert!(shell.supervisor().state().is_terminal());
    }

    #[tokio::test]
    async fn silent_port_after_marker_is_a_readiness_timeout() {
        let port = free_port();
        let shell = shell(test_config(port));

        let result = shell
            .ensure_backend_ready(|| Ok(sh_plan("echo 'Starting development server'; sleep 30")))
            .await;
        assert_eq!(
            result,
            Err(ShellError::ReadinessTimeout {
                host: "127.0.0.1".into(),
                port,
                attempts: 2,
            })
        );
        shell.supervisor().stop().await;
        assert!(shell.supervisor().state().is_terminal());
    }

    #[tokio::test]
    async fn unexpected_exit_is_observed() {
        let shell = shell(test_config(free_port()));
        shell
            .supervisor()
            .start(&sh_plan("sleep 0.1; exit 2"))
            .expect("sh should spawn");

        tokio::time::timeout(Duration::from_secs(10), shell.watch_backend_exit())
            .await
            .expect("exit observed");
        assert_eq!(shell.supervisor().state(), ProcessState::Exited(Some(2)));
    }
}
