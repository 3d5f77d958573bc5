pub mod app_helpers;
pub mod error;
pub mod exit_state;
pub mod headless;
pub mod helper_ops;
pub mod instance_guard;
pub mod launch_plan;
pub mod load_controller;
pub mod logging;
pub mod origin_policy;
pub mod page_load;
pub mod platform_ops;
pub mod process_control;
pub mod process_state;
pub mod readiness;
pub mod runtime_paths;
pub mod shell;
pub mod shell_config;
pub mod shutdown;
pub mod signals;
pub mod startup_race;
pub mod supervisor;

#[cfg(feature = "desktop")]
pub mod desktop_bridge_commands;
#[cfg(feature = "desktop")]
pub mod desktop_shell;
#[cfg(feature = "desktop")]
pub mod desktop_window;
#[cfg(feature = "desktop")]
pub mod exit_events;
#[cfg(feature = "desktop")]
pub mod main_window;

use std::time::Duration;

pub use app_helpers::{
    append_load_log, append_runtime_log, append_shutdown_log, append_startup_log, LogFn,
};
pub use error::ShellError;

pub const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_PORT: u16 = 8001;
pub const DEFAULT_LAUNCH_INTERPRETER: &str = "bash";
pub const DEFAULT_LAUNCH_SCRIPT: &str = "start_django.sh";
pub const DEFAULT_REQUIRED_ARTIFACT: &str = "manage.py";
pub const DEFAULT_READY_MARKER: &str = "Starting development server";
pub const DEFAULT_ORPHAN_PATTERN: &str = "manage.py runserver";
pub const DEFAULT_INSTANCE_PORT: u16 = 48_101;

pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 10_000;
pub const STARTUP_TIMEOUT_MIN_MS: u64 = 500;
pub const STARTUP_TIMEOUT_MAX_MS: u64 = 300_000;
pub const DEFAULT_STARTUP_SETTLE_MS: u64 = 2_000;
pub const STARTUP_SETTLE_MAX_MS: u64 = 30_000;
pub const DEFAULT_READY_MAX_ATTEMPTS: u64 = 20;
pub const READY_MAX_ATTEMPTS_MAX: u64 = 600;
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 1_000;
pub const READY_POLL_INTERVAL_MIN_MS: u64 = 50;
pub const READY_POLL_INTERVAL_MAX_MS: u64 = 10_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 800;
pub const PROBE_TIMEOUT_MIN_MS: u64 = 50;
pub const PROBE_TIMEOUT_MAX_MS: u64 = 30_000;
pub const DEFAULT_LOAD_RETRY_LIMIT: u64 = 3;
pub const LOAD_RETRY_LIMIT_MAX: u64 = 20;
pub const DEFAULT_LOAD_RETRY_DELAY_MS: u64 = 2_000;
pub const LOAD_RETRY_DELAY_MIN_MS: u64 = 100;
pub const LOAD_RETRY_DELAY_MAX_MS: u64 = 60_000;
pub const DEFAULT_PAGE_LOAD_TIMEOUT_MS: u64 = 15_000;
pub const PAGE_LOAD_TIMEOUT_MIN_MS: u64 = 1_000;
pub const PAGE_LOAD_TIMEOUT_MAX_MS: u64 = 120_000;
pub const DEFAULT_LOAD_RECOVERY_INTERVAL_MS: u64 = 30_000;
pub const LOAD_RECOVERY_INTERVAL_MAX_MS: u64 = 600_000;

pub const BACKEND_PORT_ENV: &str = "SERVER_SHELL_BACKEND_PORT";
pub const BACKEND_HOST_ENV: &str = "SERVER_SHELL_BACKEND_HOST";
pub const BACKEND_CMD_ENV: &str = "SERVER_SHELL_BACKEND_CMD";
pub const BACKEND_AUTO_START_ENV: &str = "SERVER_SHELL_BACKEND_AUTO_START";
pub const PROJECT_DIR_ENV: &str = "SERVER_SHELL_PROJECT_DIR";
pub const REQUIRED_ARTIFACT_ENV: &str = "SERVER_SHELL_REQUIRED_ARTIFACT";
pub const READY_MARKER_ENV: &str = "SERVER_SHELL_READY_MARKER";
pub const STARTUP_TIMEOUT_ENV: &str = "SERVER_SHELL_STARTUP_TIMEOUT_MS";
pub const STARTUP_SETTLE_ENV: &str = "SERVER_SHELL_STARTUP_SETTLE_MS";
pub const READY_MAX_ATTEMPTS_ENV: &str = "SERVER_SHELL_READY_MAX_ATTEMPTS";
pub const READY_POLL_INTERVAL_ENV: &str = "SERVER_SHELL_READY_POLL_INTERVAL_MS";
pub const PROBE_TIMEOUT_ENV: &str = "SERVER_SHELL_PROBE_TIMEOUT_MS";
pub const LOAD_RETRY_LIMIT_ENV: &str = "SERVER_SHELL_LOAD_RETRY_LIMIT";
pub const LOAD_RETRY_DELAY_ENV: &str = "SERVER_SHELL_LOAD_RETRY_DELAY_MS";
pub const PAGE_LOAD_TIMEOUT_ENV: &str = "SERVER_SHELL_PAGE_LOAD_TIMEOUT_MS";
pub const LOAD_RECOVERY_INTERVAL_ENV: &str = "SERVER_SHELL_LOAD_RECOVERY_INTERVAL_MS";
pub const ORPHAN_PATTERN_ENV: &str = "SERVER_SHELL_ORPHAN_PATTERN";
pub const INSTANCE_PORT_ENV: &str = "SERVER_SHELL_INSTANCE_PORT";
pub const ROOT_ENV: &str = "SERVER_SHELL_ROOT";
pub const DESKTOP_LOG_PATH_ENV: &str = "SERVER_SHELL_DESKTOP_LOG_PATH";

pub const FORCE_STOP_WAIT: Duration = Duration::from_millis(1_500);
pub const OUTPUT_TAIL_LINES: usize = 200;
pub const DESKTOP_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const LOG_BACKUP_COUNT: usize = 5;
pub const DESKTOP_LOG_FILE: &str = "desktop.log";
