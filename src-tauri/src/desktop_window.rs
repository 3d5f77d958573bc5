use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tauri::AppHandle;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::{
    headless::CONNECTION_REFUSED_CODE,
    load_controller::{ContentWindow, LoadEvent, LoadFailure, LoadTarget},
    main_window,
    page_load::PageLoadTracker,
    readiness::probe_once,
    LogFn,
};

pub fn placeholder_url() -> Url {
    let raw = if cfg!(target_os = "windows") {
        "http://tauri.localhost/index.html"
    } else {
        "tauri://localhost/index.html"
    };
    Url::parse(raw).expect("static placeholder url parses")
}

/// Navigation bookkeeping shared by the window and the page-load hook.
pub struct DesktopPages {
    tracker: Mutex<PageLoadTracker>,
    placeholder_status: Mutex<Option<String>>,
    log: LogFn,
}

impl DesktopPages {
    pub fn new(tracker: PageLoadTracker, log: LogFn) -> Self {
        Self {
            tracker: Mutex::new(tracker),
            placeholder_status: Mutex::new(None),
            log,
        }
    }

    fn tracker(&self) -> MutexGuard<'_, PageLoadTracker> {
        self.tracker.lock().unwrap_or_else(|error| {
            (self.log)("page load tracker lock poisoned, recovering");
            error.into_inner()
        })
    }

    fn placeholder_status(&self) -> MutexGuard<'_, Option<String>> {
        self.placeholder_status.lock().unwrap_or_else(|error| {
            (self.log)("placeholder status lock poisoned, recovering");
            error.into_inner()
        })
    }

    fn report_start_failure(
        &self,
        load_tx: &UnboundedSender<LoadEvent>,
        generation: u64,
        description: String,
    ) {
        let failure = self.tracker().failed_to_start(generation, description);
        if let Some(event) = failure {
            let _ = load_tx.send(event);
        }
    }

    /// Handles a "page finished" notification from the webview.
    pub fn on_page_finished(
        &self,
        app_handle: &AppHandle,
        load_tx: &UnboundedSender<LoadEvent>,
        page_url: &Url,
        connect_timeout: Duration,
    ) {
        let log = self.log;
        let Some(event) = self.tracker().finished(page_url) else {
            log(&format!("page finished outside shell control: {page_url}"));
            return;
        };

        match event {
            LoadEvent::Loaded(LoadTarget::Placeholder) => {
                let status = self.placeholder_status().clone();
                main_window::apply_placeholder_status(app_handle, status.as_deref(), log);
                let _ = load_tx.send(event);
            }
            LoadEvent::Loaded(LoadTarget::Backend) => {
                // Webviews also "finish" their own error pages; confirm the
                // backend actually answered.
                let host = page_url.host_str().unwrap_or("127.0.0.1").to_string();
                let port = page_url.port_or_known_default().unwrap_or(80);
                let load_tx = load_tx.clone();
                let page = page_url.to_string();
                tauri::async_runtime::spawn(async move {
                    let event = if probe_once(&host, port, connect_timeout).await {
                        LoadEvent::Loaded(LoadTarget::Backend)
                    } else {
                        LoadEvent::Failed(LoadFailure {
                            code: CONNECTION_REFUSED_CODE,
                            description: format!("{page} finished but backend is unreachable"),
                            is_main_frame: true,
                        })
                    };
                    let _ = load_tx.send(event);
                });
            }
            other => {
                let _ = load_tx.send(other);
            }
        }
    }
}

pub struct TauriWindow {
    app_handle: AppHandle,
    pages: Arc<DesktopPages>,
    load_tx: UnboundedSender<LoadEvent>,
    log: LogFn,
}

impl TauriWindow {
    pub fn new(
        app_handle: AppHandle,
        pages: Arc<DesktopPages>,
        load_tx: UnboundedSender<LoadEvent>,
        log: LogFn,
    ) -> Self {
        Self {
            app_handle,
            pages,
            load_tx,
            log,
        }
    }

    fn navigate(&self, url: Url, target: LoadTarget) {
        let log = self.log;
        let (generation, timeout) = {
            let mut tracker = self.pages.tracker();
            (tracker.begin(target), tracker.timeout())
        };
        log(&format!("navigating main window to {url} (generation {generation})"));

        let load_tx = self.load_tx.clone();
        let dispatch_tx = self.load_tx.clone();
        let dispatch_pages = self.pages.clone();
        let dispatch_url = url.clone();
        let dispatched = main_window::run_on_main_thread_dispatch(
            &self.app_handle,
            "navigate main window",
            move |app_handle| {
                if let Err(error) = main_window::navigate_main_window(app_handle, &dispatch_url) {
                    log(&error);
                    dispatch_pages.report_start_failure(&dispatch_tx, generation, error);
                }
            },
        );
        if let Err(error) = dispatched {
            log(&error);
            self.pages
                .report_start_failure(&self.load_tx, generation, error);
        }

        let pages = self.pages.clone();
        tauri::async_runtime::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = pages.tracker().expired(generation);
            if let Some(event) = expired {
                log(&format!("navigation to {url} timed out"));
                let _ = load_tx.send(event);
            }
        });
    }
}

impl ContentWindow for TauriWindow {
    fn load_url(&mut self, url: &Url) {
        self.navigate(url.clone(), LoadTarget::Backend);
    }

    fn load_fallback(&mut self, reason: Option<&str>) {
        *self.pages.placeholder_status() = reason.map(str::to_string);
        self.navigate(placeholder_url(), LoadTarget::Placeholder);
    }
}
