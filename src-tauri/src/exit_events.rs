use tauri::{AppHandle, Manager};

use crate::{append_shutdown_log, desktop_shell::DesktopState, shutdown::ShutdownTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitRequestedDecision {
    AllowImmediateExit,
    RunShutdownFirst,
}

fn decide_exit_requested_flow(has_exit_request_allowance: bool) -> ExitRequestedDecision {
    if has_exit_request_allowance {
        ExitRequestedDecision::AllowImmediateExit
    } else {
        ExitRequestedDecision::RunShutdownFirst
    }
}

/// Tauri reports `None` when the last window closed and `Some(code)` for an
/// explicit `exit` call.
fn trigger_for_exit_code(code: Option<i32>) -> ShutdownTrigger {
    match code {
        None => ShutdownTrigger::WindowsClosed,
        Some(_) => ShutdownTrigger::QuitRequested,
    }
}

pub fn handle_exit_requested(
    app_handle: &AppHandle,
    code: Option<i32>,
    api: &tauri::ExitRequestApi,
) {
    let state = app_handle.state::<DesktopState>();
    let coordinator = state.shell.shutdown_coordinator().clone();
    match decide_exit_requested_flow(coordinator.take_exit_request_allowance()) {
        ExitRequestedDecision::AllowImmediateExit => {
            append_shutdown_log("exit request allowed to pass through after shutdown");
            return;
        }
        ExitRequestedDecision::RunShutdownFirst => {}
    }
    // Hold the process until the backend is gone; we exit explicitly once
    // the coordinator finishes.
    api.prevent_exit();
    if coordinator.is_quitting() {
        append_shutdown_log("exit requested while shutdown is already running");
        return;
    }
    coordinator.mark_quitting();

    let trigger = trigger_for_exit_code(code);
    append_shutdown_log(&format!("exit requested ({trigger}), stopping backend asynchronously"));
    let app_handle_cloned = app_handle.clone();
    tauri::async_runtime::spawn(async move {
        coordinator.shutdown(trigger).await;
        coordinator.allow_next_exit_request();
        app_handle_cloned.exit(0);
    });
}

pub fn handle_exit_event(app_handle: &AppHandle) {
    let state = app_handle.state::<DesktopState>();
    let coordinator = state.shell.shutdown_coordinator().clone();
    if coordinator.is_cleanup_done() {
        return;
    }

    append_shutdown_log("exit event triggered fallback backend cleanup");
    tauri::async_runtime::block_on(coordinator.shutdown(ShutdownTrigger::ExitFallback));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decide_exit_requested_flow_allows_immediate_exit_when_allowance_exists() {
        assert_eq!(
            decide_exit_requested_flow(true),
            ExitRequestedDecision::AllowImmediateExit
        );
    }

    #[test]
    fn decide_exit_requested_flow_requires_shutdown_when_allowance_missing() {
        assert_eq!(
            decide_exit_requested_flow(false),
            ExitRequestedDecision::RunShutdownFirst
        );
    }

    #[test]
    fn closing_last_window_maps_to_windows_closed() {
        assert_eq!(trigger_for_exit_code(None), ShutdownTrigger::WindowsClosed);
        assert_eq!(trigger_for_exit_code(Some(0)), ShutdownTrigger::QuitRequested);
    }
}
