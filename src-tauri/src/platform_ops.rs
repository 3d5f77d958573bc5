use std::{path::Path, sync::Arc};

use netstat2::{
    iterate_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState,
};
use sysinfo::System;

use crate::process_control;

/// Host-specific helpers the shell needs around the backend. Production uses
/// `HostOps`; tests swap in fakes.
pub trait PlatformOps: Send + Sync {
    fn name(&self) -> &'static str;
    /// Kills the processes listening on `port`. Clients connected to it are
    /// left alone.
    fn kill_processes_on_port(&self, port: u16) -> Result<(), String>;
    /// Kills processes whose command line contains `pattern`.
    fn kill_processes_matching(&self, pattern: &str) -> Result<(), String>;
    fn open_path(&self, path: &Path) -> Result<(), String>;
    fn reveal_in_file_manager(&self, path: &Path) -> Result<(), String>;
}

pub fn current_platform() -> Arc<dyn PlatformOps> {
    Arc::new(HostOps)
}

/// One TCP socket as seen by the OS socket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSocketEntry {
    pub local_port: u16,
    pub listening: bool,
    pub pids: Vec<u32>,
}

pub fn tcp_sockets() -> Result<Vec<TcpSocketEntry>, String> {
    let families = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
    let sockets = iterate_sockets_info(families, ProtocolFlags::TCP)
        .map_err(|error| format!("failed to read socket table: {error}"))?;

    let mut entries = Vec::new();
    for socket in sockets {
        let info = socket.map_err(|error| format!("failed to read socket entry: {error}"))?;
        if let ProtocolSocketInfo::Tcp(tcp) = &info.protocol_socket_info {
            entries.push(TcpSocketEntry {
                local_port: tcp.local_port,
                listening: matches!(tcp.state, TcpState::Listen),
                pids: info.associated_pids.clone(),
            });
        }
    }
    Ok(entries)
}

/// Owners of listening sockets on `port`, sorted and deduplicated.
pub fn listening_pids(sockets: &[TcpSocketEntry], port: u16) -> Vec<u32> {
    let mut pids: Vec<u32> = sockets
        .iter()
        .filter(|socket| socket.listening && socket.local_port == port)
        .flat_map(|socket| socket.pids.iter().copied())
        .filter(|pid| *pid != 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

pub fn command_line_matches<S: AsRef<std::ffi::OsStr>>(command: &[S], pattern: &str) -> bool {
    if pattern.is_empty() || command.is_empty() {
        return false;
    }
    let joined = command
        .iter()
        .map(|part| part.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    joined.contains(pattern)
}

/// Processes whose command line contains `pattern`, this one excluded.
pub fn matching_pids(system: &System, pattern: &str) -> Vec<u32> {
    let own_pid = std::process::id();
    let mut pids: Vec<u32> = system
        .processes()
        .iter()
        .filter(|(_, process)| process.thread_kind().is_none())
        .filter(|(_, process)| command_line_matches(process.cmd(), pattern))
        .map(|(pid, _)| pid.as_u32())
        .filter(|pid| *pid != own_pid)
        .collect();
    pids.sort_unstable();
    pids
}

/// Directory a file manager should show for `path`.
fn containing_folder(path: &Path) -> &Path {
    if path.is_dir() {
        path
    } else {
        path.parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(path)
    }
}

pub struct HostOps;

impl PlatformOps for HostOps {
    fn name(&self) -> &'static str {
        std::env::consts::OS
    }

    fn kill_processes_on_port(&self, port: u16) -> Result<(), String> {
        let pids = listening_pids(&tcp_sockets()?, port);
        process_control::kill_process_trees(&pids)
    }

    fn kill_processes_matching(&self, pattern: &str) -> Result<(), String> {
        if pattern.trim().is_empty() {
            return Err("refusing to match an empty command line pattern".to_string());
        }
        let system = System::new_all();
        process_control::kill_process_trees(&matching_pids(&system, pattern))
    }

    fn open_path(&self, path: &Path) -> Result<(), String> {
        open::that(path).map_err(|error| error.to_string())
    }

    fn reveal_in_file_manager(&self, path: &Path) -> Result<(), String> {
        open::that(containing_folder(path)).map_err(|error| error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        env,
        net::{TcpListener, TcpStream},
    };

    fn entry(local_port: u16, listening: bool, pids: &[u32]) -> TcpSocketEntry {
        TcpSocketEntry {
            local_port,
            listening,
            pids: pids.to_vec(),
        }
    }

    #[test]
    fn only_listening_owners_are_selected() {
        let sockets = vec![
            entry(8001, true, &[5120]),
            // The server side of an accepted connection.
            entry(8001, false, &[5120]),
            // A client whose ephemeral port happens to be checked.
            entry(53211, false, &[7788]),
            entry(8001, true, &[6000, 5120]),
            entry(18001, true, &[999]),
            entry(8001, true, &[0]),
        ];
        assert_eq!(listening_pids(&sockets, 8001), vec![5120, 6000]);
        assert!(listening_pids(&sockets, 53211).is_empty());
    }

    #[test]
    fn connected_client_is_not_a_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let server_port = listener.local_addr().expect("listener addr").port();
        let client = TcpStream::connect(("127.0.0.1", server_port)).expect("connect client");
        let (_accepted, _) = listener.accept().expect("accept client");
        let client_port = client.local_addr().expect("client addr").port();

        let sockets = tcp_sockets().expect("socket table");
        assert!(listening_pids(&sockets, client_port).is_empty());
        assert!(sockets
            .iter()
            .any(|socket| socket.local_port == client_port && !socket.listening));
        assert!(sockets
            .iter()
            .any(|socket| socket.local_port == server_port && socket.listening));
    }

    #[test]
    fn command_line_match_spans_arguments() {
        let command = ["python", "main.py", "--port", "6185"];
        assert!(command_line_matches(&command, "main.py --port"));
        assert!(command_line_matches(&command, "6185"));
        assert!(!command_line_matches(&command, "uvicorn"));
        assert!(!command_line_matches(&command, ""));
        assert!(!command_line_matches::<&str>(&[], "main.py"));
    }

    #[test]
    fn own_process_never_matches() {
        let system = System::new_all();
        let own_name = env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(|name| name.to_string_lossy().into_owned()))
            .expect("test binary name");
        assert!(!matching_pids(&system, &own_name).contains(&std::process::id()));
    }

    #[test]
    fn empty_pattern_is_refused() {
        assert!(HostOps.kill_processes_matching("  ").is_err());
    }

    #[test]
    fn reveal_targets_parent_of_file() {
        let dir = env::temp_dir();
        assert_eq!(containing_folder(&dir), dir.as_path());
        let file = dir.join("server-shell-missing.log");
        assert_eq!(containing_folder(&file), dir.as_path());
        assert_eq!(containing_folder(Path::new("bare.log")), Path::new("bare.log"));
    }

    #[test]
    fn current_platform_matches_target() {
        assert_eq!(current_platform().name(), env::consts::OS);
    }
}
