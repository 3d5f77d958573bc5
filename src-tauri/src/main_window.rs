use tauri::{plugin::TauriPlugin, AppHandle, Manager, Wry};
use tauri_plugin_global_shortcut::{Code, Modifiers, Shortcut, ShortcutState};
use url::Url;

use crate::append_runtime_log;

pub const MAIN_WINDOW_LABEL: &str = "main";

pub fn run_on_main_thread_dispatch<F>(
    app_handle: &AppHandle,
    task_name: &str,
    task: F,
) -> Result<(), String>
where
    F: FnOnce(&AppHandle) + Send + 'static,
{
    let app_handle_for_thread = app_handle.clone();
    app_handle
        .run_on_main_thread(move || {
            task(&app_handle_for_thread);
        })
        .map_err(|error| format!("Failed to dispatch '{task_name}' on main thread: {error}"))
}

pub fn show_main_window<F>(app_handle: &AppHandle, log: F)
where
    F: Fn(&str),
{
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        log("show_main_window skipped: main window not found");
        return;
    };

    if let Err(error) = window.unminimize() {
        log(&format!("failed to unminimize main window: {error}"));
    }
    if let Err(error) = window.show() {
        log(&format!("failed to show main window: {error}"));
    }
    if let Err(error) = window.set_focus() {
        log(&format!("failed to focus main window: {error}"));
    }
}

pub fn navigate_main_window(app_handle: &AppHandle, url: &Url) -> Result<(), String> {
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        return Err("Main window is unavailable.".to_string());
    };
    window
        .navigate(url.clone())
        .map_err(|error| format!("Failed to navigate main window to {url}: {error}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStep {
    Back,
    Forward,
}

impl HistoryStep {
    pub fn for_shortcut(shortcut: &Shortcut) -> Option<Self> {
        if shortcut.matches(Modifiers::ALT, Code::ArrowLeft) {
            Some(Self::Back)
        } else if shortcut.matches(Modifiers::ALT, Code::ArrowRight) {
            Some(Self::Forward)
        } else {
            None
        }
    }

    /// The browser ignores these when there is no entry in that direction.
    pub fn script(self) -> &'static str {
        match self {
            Self::Back => "window.history.back();",
            Self::Forward => "window.history.forward();",
        }
    }
}

pub fn history_shortcuts() -> [Shortcut; 2] {
    [
        Shortcut::new(Some(Modifiers::ALT), Code::ArrowLeft),
        Shortcut::new(Some(Modifiers::ALT), Code::ArrowRight),
    ]
}

pub fn step_main_window_history<F>(app_handle: &AppHandle, step: HistoryStep, log: F)
where
    F: Fn(&str),
{
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        log("history navigation skipped: main window not found");
        return;
    };
    if let Err(error) = window.eval(step.script()) {
        log(&format!("failed to step main window history {step:?}: {error}"));
    }
}

/// Alt+Left / Alt+Right walk the main window's history.
pub fn history_shortcut_plugin() -> Result<TauriPlugin<Wry>, String> {
    let builder = tauri_plugin_global_shortcut::Builder::new()
        .with_shortcuts(history_shortcuts())
        .map_err(|error| format!("failed to register history shortcuts: {error}"))?;
    Ok(builder
        .with_handler(|app_handle, shortcut, event| {
            if event.state != ShortcutState::Pressed {
                return;
            }
            if let Some(step) = HistoryStep::for_shortcut(shortcut) {
                step_main_window_history(app_handle, step, append_runtime_log);
            }
        })
        .build())
}

/// Script handing the placeholder page its status line.
pub fn status_script(status: Option<&str>) -> String {
    let status_json = serde_json::to_string(&status).unwrap_or_else(|_| "null".to_string());
    format!(
        "if (typeof window.__serverShellSetStatus === 'function') {{ window.__serverShellSetStatus({status_json}); }}"
    )
}

pub fn apply_placeholder_status<F>(app_handle: &AppHandle, status: Option<&str>, log: F)
where
    F: Fn(&str),
{
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        log("placeholder status skipped: main window not found");
        return;
    };
    if let Err(error) = window.eval(&status_script(status)) {
        log(&format!("failed to apply placeholder status: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_script_escapes_message() {
        let script = status_script(Some("port \"8001\" refused"));
        assert!(script.contains(r#"__serverShellSetStatus("port \"8001\" refused")"#));
    }

    #[test]
    fn alt_arrows_map_to_history_steps() {
        let [back, forward] = history_shortcuts();
        assert_eq!(HistoryStep::for_shortcut(&back), Some(HistoryStep::Back));
        assert_eq!(HistoryStep::for_shortcut(&forward), Some(HistoryStep::Forward));
        let plain_left = Shortcut::new(None, Code::ArrowLeft);
        assert_eq!(HistoryStep::for_shortcut(&plain_left), None);
        assert_eq!(HistoryStep::Back.script(), "window.history.back();");
    }

    #[test]
    fn status_script_clears_with_null() {
        assert!(status_script(None).contains("__serverShellSetStatus(null)"));
    }
}
