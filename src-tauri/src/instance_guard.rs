use std::{env, io, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
    time,
};

use crate::LogFn;

const FOCUS_ACK: &str = "server-shell:focused";
const HANDOFF_TIMEOUT: Duration = Duration::from_millis(1_500);

/// What a second launch hands to the running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusRequest {
    pub kind: String,
    pub argv: Vec<String>,
    pub cwd: Option<String>,
}

impl FocusRequest {
    pub fn from_current_process() -> Self {
        Self {
            kind: "focus".to_string(),
            argv: env::args().collect(),
            cwd: env::current_dir()
                .ok()
                .map(|dir| dir.to_string_lossy().to_string()),
        }
    }
}

/// System-wide single instance lock: a loopback listener on a fixed port.
/// Held until the guard is dropped or the process exits.
pub struct SingleInstanceGuard {
    port: u16,
    local_port: Option<u16>,
    accept_task: Option<JoinHandle<()>>,
    log: LogFn,
}

impl SingleInstanceGuard {
    pub fn new(port: u16, log: LogFn) -> Self {
        Self {
            port,
            local_port: None,
            accept_task: None,
            log,
        }
    }

    pub fn is_held(&self) -> bool {
        self.accept_task.is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Returns `true` when this process may start. Otherwise the running
    /// instance has been asked to focus its window and the caller should exit.
    pub async fn acquire(&mut self, focus_tx: UnboundedSender<FocusRequest>) -> bool {
        if self.is_held() {
            return true;
        }
        let log = self.log;
        match TcpListener::bind(("127.0.0.1", self.port)).await {
            Ok(listener) => {
                self.local_port = listener.local_addr().ok().map(|addr| addr.port());
                log(&format!(
                    "single instance lock acquired on port {:?}",
                    self.local_port
                ));
                self.accept_task = Some(tokio::spawn(accept_focus_requests(
                    listener, focus_tx, log,
                )));
                true
            }
            Err(error) if error.kind() == io::ErrorKind::AddrInUse => {
                match notify_existing_instance(self.port, &FocusRequest::from_current_process())
                    .await
                {
                    Ok(()) => {
                        log("another instance is running, focus request delivered");
                        false
                    }
                    Err(error) => {
                        log(&format!(
                            "instance port {} is taken by something else ({error}), starting without lock",
                            self.port
                        ));
                        true
                    }
                }
            }
            Err(error) => {
                log(&format!(
                    "failed to bind instance port {}: {error}, starting without lock",
                    self.port
                ));
                true
            }
        }
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

async fn accept_focus_requests(
    listener: TcpListener,
    focus_tx: UnboundedSender<FocusRequest>,
    log: LogFn,
) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(error) => {
                log(&format!("instance listener accept failed: {error}"));
                time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let focus_tx = focus_tx.clone();
        tokio::spawn(async move {
            match time::timeout(HANDOFF_TIMEOUT, read_focus_request(stream)).await {
                Ok(Ok(request)) => {
                    log(&format!("focus request from second instance: argv={:?}", request.argv));
                    let _ = focus_tx.send(request);
                }
                Ok(Err(error)) => log(&format!("ignored instance connection: {error}")),
                Err(_) => log("instance connection timed out"),
            }
        });
    }
}

async fn read_focus_request(stream: TcpStream) -> io::Result<FocusRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let request = serde_json::from_str::<FocusRequest>(line.trim())
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    let mut stream = reader.into_inner();
    stream.write_all(format!("{FOCUS_ACK}\n").as_bytes()).await?;
    stream.flush().await?;
    Ok(request)
}

async fn notify_existing_instance(port: u16, request: &FocusRequest) -> io::Result<()> {
    let exchange = async {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let mut payload = serde_json::to_string(request)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        payload.push('\n');
        stream.write_all(payload.as_bytes()).await?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await?;
        if reply.trim() == FOCUS_ACK {
            Ok::<(), io::Error>(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected reply '{}'", reply.trim()),
            ))
        }
    };
    time::timeout(HANDOFF_TIMEOUT, exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "focus hand-off timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn first_acquire_holds_the_lock() {
        let (focus_tx, _focus_rx) = mpsc::unbounded_channel();
        let mut guard = SingleInstanceGuard::new(0, |_| {});

        assert!(guard.acquire(focus_tx.clone()).await);
        assert!(guard.is_held());
        assert!(guard.local_port().is_some());
        assert!(guard.acquire(focus_tx).await);
    }

    #[tokio::test]
    async fn second_acquire_is_refused_and_focuses_the_holder() {
        let (focus_tx, mut focus_rx) = mpsc::unbounded_channel();
        let mut holder = SingleInstanceGuard::new(0, |_| {});
        assert!(holder.acquire(focus_tx).await);
        let port = holder.local_port().expect("holder port");

        let (second_tx, _second_rx) = mpsc::unbounded_channel();
        let mut second = SingleInstanceGuard::new(port, |_| {});
        assert!(!second.acquire(second_tx).await);
        assert!(!second.is_held());

        let request = time::timeout(Duration::from_secs(5), focus_rx.recv())
            .await
            .expect("focus request in time")
            .expect("focus channel open");
        assert_eq!(request.kind, "focus");
        assert!(!request.argv.is_empty());
    }

    #[tokio::test]
    async fn foreign_listener_does_not_block_startup() {
        let foreign = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind foreign listener");
        let port = foreign.local_addr().expect("local addr").port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = foreign.accept().await {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            }
        });

        let (focus_tx, _focus_rx) = mpsc::unbounded_channel();
        let mut guard = SingleInstanceGuard::new(port, |_| {});
        assert!(guard.acquire(focus_tx).await);
        assert!(!guard.is_held());
    }

    #[test]
    fn focus_request_wire_format() {
        let request = FocusRequest {
            kind: "focus".into(),
            argv: vec!["server-shell".into()],
            cwd: Some("/srv".into()),
        };
        assert_eq!(
            serde_json::to_string(&request).expect("serialize focus request"),
            r#"{"kind":"focus","argv":["server-shell"],"cwd":"/srv"}"#
        );
    }
}
