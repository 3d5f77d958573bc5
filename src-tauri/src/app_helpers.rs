use std::{
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use crate::{logging, runtime_paths, DESKTOP_LOG_FILE, DESKTOP_LOG_MAX_BYTES, LOG_BACKUP_COUNT};

/// Logging sink handed to every component; production code passes one of the
/// `append_*_log` functions below, tests pass capturing closures.
pub type LogFn = fn(&str);

static DESKTOP_LOG_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
static DESKTOP_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

pub fn desktop_log_path() -> &'static Path {
    DESKTOP_LOG_PATH.get_or_init(|| {
        logging::resolve_desktop_log_path(runtime_paths::default_root_dir(), DESKTOP_LOG_FILE)
    })
}

pub fn append_runtime_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Runtime, message);
}

pub fn append_startup_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Startup, message);
}

pub fn append_load_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Load, message);
}

pub fn append_shutdown_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Shutdown, message);
}

fn append_desktop_log_with_category(category: logging::DesktopLogCategory, message: &str) {
    logging::append_desktop_log(
        category,
        message,
        desktop_log_path(),
        DESKTOP_LOG_MAX_BYTES,
        LOG_BACKUP_COUNT,
        &DESKTOP_LOG_WRITE_LOCK,
    )
}
