use std::{
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time,
};

use crate::{
    launch_plan::LaunchPlan,
    process_control,
    process_state::{OutputStream, OutputTail, ProcessEvent, ProcessState},
    LogFn, ShellError, FORCE_STOP_WAIT, OUTPUT_TAIL_LINES,
};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
/// How long the exit report waits for the output readers to hit EOF. A
/// grandchild that inherited the pipes can keep them open indefinitely.
const OUTPUT_DRAIN_WAIT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct ProcessSlot {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    generation: u64,
}

/// A spawned backend. `events` yields the marker if it was printed, then
/// exactly one `Exited` or `Error`. Output the process wrote before exiting
/// is read before the exit is reported.
#[derive(Debug)]
pub struct StartedProcess {
    pub pid: Option<u32>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

pub struct SubprocessSupervisor {
    slot: Arc<Mutex<ProcessSlot>>,
    state: Arc<watch::Sender<ProcessState>>,
    tail: Arc<Mutex<OutputTail>>,
    ready_marker: String,
    log: LogFn,
}

fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str, log: LogFn) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log(&format!("{what} lock poisoned, recovering"));
        poisoned.into_inner()
    })
}

impl SubprocessSupervisor {
    pub fn new(ready_marker: impl Into<String>, log: LogFn) -> Self {
        let (state, _) = watch::channel(ProcessState::NotStarted);
        Self {
            slot: Arc::new(Mutex::new(ProcessSlot::default())),
            state: Arc::new(state),
            tail: Arc::new(Mutex::new(OutputTail::new(OUTPUT_TAIL_LINES))),
            ready_marker: ready_marker.into(),
            log,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    pub fn pid(&self) -> Option<u32> {
        lock_or_recover(&self.slot, "backend process slot", self.log).pid
    }

    pub fn output_tail(&self) -> String {
        lock_or_recover(&self.tail, "backend output tail", self.log).render()
    }

    /// Promotes `Starting` to `Running` once startup has resolved.
    pub fn mark_running(&self) {
        self.state.send_if_modified(|state| {
            if *state == ProcessState::Starting {
                *state = ProcessState::Running;
                true
            } else {
                false
            }
        });
    }

    fn check_preconditions(plan: &LaunchPlan) -> Result<(), ShellError> {
        if !plan.cwd.is_dir() {
            return Err(ShellError::LaunchPrecondition(format!(
                "working directory {} does not exist",
                plan.cwd.display()
            )));
        }
        if let Some(artifact) = &plan.required_artifact {
            let artifact_path = plan.cwd.join(artifact);
            if !artifact_path.is_file() {
                return Err(ShellError::LaunchPrecondition(format!(
                    "required launch artifact {} is missing",
                    artifact_path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn start(&self, plan: &LaunchPlan) -> Result<StartedProcess, ShellError> {
        let log = self.log;
        let mut slot = lock_or_recover(&self.slot, "backend process slot", log);
        if self.state.borrow().is_live() {
            log(&format!(
                "backend already running, rejecting spawn: pid={:?}",
                slot.pid
            ));
            return Err(ShellError::AlreadyRunning { pid: slot.pid });
        }

        Self::check_preconditions(plan)?;

        let mut command = Command::new(&plan.cmd);
        command
            .args(&plan.args)
            .current_dir(&plan.cwd)
            .envs(plan.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            // Own process group so stop can take wrapper shells down with it.
            command.process_group(0);
        }
        #[cfg(target_os = "windows")]
        {
            command.creation_flags(CREATE_NO_WINDOW);
        }

        lock_or_recover(&self.tail, "backend output tail", log).clear();
        self.state.send_replace(ProcessState::Starting);
        log(&format!(
            "spawning backend: cmd={:?}, cwd={}",
            plan.debug_command(),
            plan.cwd.display()
        ));

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                let message = format!("{}: {error}", plan.cmd);
                log(&format!("failed to spawn backend process: {message}"));
                self.state.send_replace(ProcessState::Failed(message.clone()));
                return Err(ShellError::Spawn(message));
            }
        };

        let pid = child.id();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        slot.generation += 1;
        slot.pid = pid;
        slot.kill_tx = Some(kill_tx);
        let generation = slot.generation;
        drop(slot);

        let marker_seen = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_output_reader(
                stdout,
                OutputStream::Stdout,
                &marker_seen,
                &events_tx,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_output_reader(
                stderr,
                OutputStream::Stderr,
                &marker_seen,
                &events_tx,
            ));
        }

        let slot = self.slot.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(error) = child.start_kill() {
                        log(&format!("failed to kill backend pid={pid:?}: {error}"));
                    }
                    child.wait().await
                }
            };

            let drained = time::timeout(OUTPUT_DRAIN_WAIT, async {
                for reader in readers {
                    let _ = reader.await;
                }
            })
            .await;
            if drained.is_err() {
                log("backend output still open after exit, reporting exit anyway");
            }

            {
                let mut slot = lock_or_recover(&slot, "backend process slot", log);
                if slot.generation == generation {
                    slot.pid = None;
                    slot.kill_tx = None;
                }
            }

            match status {
                Ok(status) => {
                    log(&format!("backend process exited: pid={pid:?}, status={status}"));
                    state.send_replace(ProcessState::Exited(status.code()));
                    let _ = events_tx.send(ProcessEvent::Exited(status.code()));
                }
                Err(error) => {
                    let message = format!("failed to wait for backend process: {error}");
                    log(&message);
                    state.send_replace(ProcessState::Failed(message.clone()));
                    let _ = events_tx.send(ProcessEvent::Error(message));
                }
            }
        });

        log(&format!("backend process spawned: pid={pid:?}"));
        Ok(StartedProcess {
            pid,
            events: events_rx,
        })
    }

    fn spawn_output_reader<R>(
        &self,
        reader: R,
        stream: OutputStream,
        marker_seen: &Arc<AtomicBool>,
        events_tx: &mpsc::UnboundedSender<ProcessEvent>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let log = self.log;
        let tail = self.tail.clone();
        let marker = self.ready_marker.clone();
        let marker_seen = marker_seen.clone();
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(error) => {
                        log(&format!("backend {} read failed: {error}", stream.as_label()));
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&buffer)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                log(&format!("[backend {}] {line}", stream.as_label()));

                if !marker.is_empty()
                    && line.contains(&marker)
                    && !marker_seen.swap(true, Ordering::SeqCst)
                {
                    let _ = events_tx.send(ProcessEvent::ReadyMarker(stream));
                }
                lock_or_recover(&tail, "backend output tail", log).push(stream, line);
            }
        })
    }

    /// Force-kills the backend and its process group. Calling this without a
    /// live process is a no-op.
    pub async fn stop(&self) {
        let log = self.log;
        let (pid, kill_tx) = {
            let mut slot = lock_or_recover(&self.slot, "backend process slot", log);
            (slot.pid, slot.kill_tx.take())
        };
        let Some(kill_tx) = kill_tx else {
            return;
        };

        log(&format!("force stopping backend process: pid={pid:?}"));
        if let Some(pid) = pid {
            let kill = tokio::task::spawn_blocking(move || {
                process_control::force_kill_process_tree(pid, log)
            });
            if let Err(error) = kill.await {
                log(&format!("backend process tree kill task failed: {error}"));
            }
        }
        let _ = kill_tx.send(());

        if !self.wait_for_exit(FORCE_STOP_WAIT).await {
            log(&format!(
                "backend did not report exit within {}ms after force stop",
                FORCE_STOP_WAIT.as_millis()
            ));
        }
    }

    /// Waits until the process is no longer live. Returns false on timeout.
    pub async fn wait_for_exit(&self, limit: Duration) -> bool {
        let mut receiver = self.state.subscribe();
        let exited = matches!(
            time::timeout(limit, receiver.wait_for(|state| !state.is_live())).await,
            Ok(Ok(_))
        );
        exited
    }
}
