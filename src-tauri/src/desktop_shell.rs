use std::sync::Arc;

use tauri::{webview::PageLoadEvent, Manager, RunEvent};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::{
    append_load_log, append_runtime_log, append_shutdown_log, append_startup_log,
    desktop_bridge_commands::{
        desktop_bridge_is_desktop_runtime, desktop_bridge_open_path,
        desktop_bridge_reveal_in_file_manager,
    },
    desktop_window::{DesktopPages, TauriWindow},
    exit_events,
    instance_guard::SingleInstanceGuard,
    load_controller::{ContentLoadController, LoadEvent},
    main_window,
    page_load::PageLoadTracker,
    platform_ops,
    shell::{Shell, ShellLogs},
    shell_config::ShellConfig,
    signals,
};

/// Everything the Tauri callbacks need, registered as managed state.
pub struct DesktopState {
    pub shell: Arc<Shell>,
    pub pages: Arc<DesktopPages>,
    pub load_tx: UnboundedSender<LoadEvent>,
}

/// Runs the windowed shell. Returns the process exit code.
pub fn run(config: ShellConfig) -> i32 {
    let (focus_tx, mut focus_rx) = mpsc::unbounded_channel();
    let mut guard = SingleInstanceGuard::new(config.instance_port, append_runtime_log);
    if !tauri::async_runtime::block_on(guard.acquire(focus_tx)) {
        return 0;
    }

    let shell = Arc::new(Shell::new(
        config.clone(),
        platform_ops::current_platform(),
        ShellLogs::default(),
    ));
    let pages = Arc::new(DesktopPages::new(
        PageLoadTracker::new(config.backend_url(), config.load.page_load_timeout),
        append_load_log,
    ));
    let (load_tx, load_rx) = mpsc::unbounded_channel();
    let connect_timeout = config.readiness.probe_timeout;

    let mut builder = tauri::Builder::default();
    match main_window::history_shortcut_plugin() {
        Ok(plugin) => builder = builder.plugin(plugin),
        Err(error) => append_runtime_log(&error),
    }

    let app = builder
        .manage(DesktopState {
            shell: shell.clone(),
            pages: pages.clone(),
            load_tx: load_tx.clone(),
        })
        .invoke_handler(tauri::generate_handler![
            desktop_bridge_is_desktop_runtime,
            desktop_bridge_open_path,
            desktop_bridge_reveal_in_file_manager
        ])
        .on_page_load(move |webview, payload| match payload.event() {
            PageLoadEvent::Started => {
                append_load_log(&format!("page-load started: {}", payload.url()));
            }
            PageLoadEvent::Finished => {
                append_load_log(&format!("page-load finished: {}", payload.url()));
                let app_handle = webview.app_handle();
                let state = app_handle.state::<DesktopState>();
                state.pages.on_page_finished(
                    app_handle,
                    &state.load_tx,
                    payload.url(),
                    connect_timeout,
                );
            }
        })
        .setup(move |app| {
            let app_handle = app.handle().clone();

            let window = TauriWindow::new(
                app_handle.clone(),
                pages.clone(),
                load_tx.clone(),
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
            tauri::async_runtime::spawn(controller.run(load_rx));
            tauri::async_runtime::spawn(shell.clone().run_startup(load_tx.clone()));

            let focus_app_handle = app_handle.clone();
            tauri::async_runtime::spawn(async move {
                while let Some(request) = focus_rx.recv().await {
                    append_runtime_log(&format!(
                        "focus requested by second instance: argv={:?}",
                        request.argv
                    ));
                    if let Err(error) = main_window::run_on_main_thread_dispatch(
                        &focus_app_handle,
                        "show main window",
                        |main_app| main_window::show_main_window(main_app, append_runtime_log),
                    ) {
                        append_runtime_log(&error);
                    }
                }
            });

            let signal_app_handle = app_handle.clone();
            let coordinator = shell.shutdown_coordinator().clone();
            tauri::async_runtime::spawn(async move {
                let trigger = signals::wait_for_termination(append_shutdown_log).await;
                coordinator.mark_quitting();
                if coordinator.shutdown(trigger).await {
                    coordinator.allow_next_exit_request();
                    signal_app_handle.exit(0);
                }
            });
            Ok(())
        })
        .build(tauri::generate_context!());

    let app = match app {
        Ok(app) => app,
        Err(error) => {
            append_startup_log(&format!("failed to build tauri application: {error}"));
            return 1;
        }
    };

    app.run(|app_handle, event| match event {
        RunEvent::ExitRequested { code, api, .. } => {
            exit_events::handle_exit_requested(app_handle, code, &api);
        }
        RunEvent::Exit => {
            exit_events::handle_exit_event(app_handle);
            let state = app_handle.state::<DesktopState>();
            let _ = state.load_tx.send(LoadEvent::Shutdown);
        }
        _ => {}
    });
    drop(guard);
    0
}
