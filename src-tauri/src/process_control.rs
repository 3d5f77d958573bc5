#[cfg(unix)]
use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid as UnixPid,
};
use sysinfo::System;
#[cfg(target_os = "windows")]
use sysinfo::Pid;

/// `(pid, parent)` for every process in `system`, threads excluded.
pub fn parent_links(system: &System) -> Vec<(u32, Option<u32>)> {
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.thread_kind().is_none())
        .map(|(pid, process)| (pid.as_u32(), process.parent().map(|parent| parent.as_u32())))
        .collect()
}

/// `roots` followed by everything descended from them, parents first.
pub fn process_tree(links: &[(u32, Option<u32>)], roots: &[u32]) -> Vec<u32> {
    let mut tree = Vec::with_capacity(roots.len());
    for root in roots {
        if !tree.contains(root) {
            tree.push(*root);
        }
    }
    let mut index = 0;
    while index < tree.len() {
        let parent = tree[index];
        let children: Vec<u32> = links
            .iter()
            .filter(|(pid, link)| *link == Some(parent) && !tree.contains(pid))
            .map(|(pid, _)| *pid)
            .collect();
        tree.extend(children);
        index += 1;
    }
    tree
}

#[cfg(unix)]
fn kill_pid(_system: &System, pid: u32) -> Result<(), String> {
    let raw = i32::try_from(pid).map_err(|_| format!("pid {pid} is out of range"))?;
    match signal::kill(UnixPid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(error) => Err(format!("kill pid={pid}: {error}")),
    }
}

#[cfg(target_os = "windows")]
fn kill_pid(system: &System, pid: u32) -> Result<(), String> {
    match system.process(Pid::from_u32(pid)) {
        Some(process) if !process.kill() => Err(format!("failed to terminate pid={pid}")),
        _ => Ok(()),
    }
}

/// Force-kills `pids` and their descendants. Pid 0 and this process are
/// never targeted. Processes that are already gone count as killed.
pub fn kill_process_trees(pids: &[u32]) -> Result<(), String> {
    let own_pid = std::process::id();
    let roots: Vec<u32> = pids
        .iter()
        .copied()
        .filter(|pid| *pid != 0 && *pid != own_pid)
        .collect();
    if roots.is_empty() {
        return Ok(());
    }

    let system = System::new_all();
    let errors: Vec<String> = process_tree(&parent_links(&system), &roots)
        .into_iter()
        .filter(|pid| *pid != 0 && *pid != own_pid)
        .filter_map(|pid| kill_pid(&system, pid).err())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Forcefully kills `pid` together with its process group (Unix) and every
/// descendant. Best effort: failures are only logged.
pub fn force_kill_process_tree<F>(pid: u32, log: F)
where
    F: Fn(&str),
{
    #[cfg(unix)]
    {
        match i32::try_from(pid) {
            Ok(group) if group > 0 => {
                match signal::killpg(UnixPid::from_raw(group), Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(error) => log(&format!("killpg group={pid} failed: {error}")),
                }
            }
            _ => log(&format!("pid {pid} is not a valid process group")),
        }
    }

    if let Err(error) = kill_process_trees(&[pid]) {
        log(&format!("force kill of process tree pid={pid} failed: {error}"));
    }
}
