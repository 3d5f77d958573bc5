#![cfg_attr(
    all(feature = "desktop", not(debug_assertions)),
    windows_subsystem = "windows"
)]

use std::{panic, process};

use server_shell::{
    app_helpers::desktop_log_path, append_runtime_log, append_startup_log,
    shell_config::ShellConfig,
};

fn install_panic_logger() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        append_runtime_log(&format!("panic: {info}"));
        default_hook(info);
    }));
}

#[cfg(not(feature = "desktop"))]
fn run(config: ShellConfig) -> i32 {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            append_startup_log(&format!("failed to build async runtime: {error}"));
            return 1;
        }
    };
    runtime.block_on(server_shell::headless::run(config))
}

#[cfg(feature = "desktop")]
fn run(config: ShellConfig) -> i32 {
    server_shell::desktop_shell::run(config)
}

fn main() {
    install_panic_logger();
    append_startup_log("shell process starting");
    append_startup_log(&format!(
        "desktop log path: {}",
        desktop_log_path().display()
    ));

    let config = ShellConfig::from_env(append_startup_log);
    append_startup_log(&format!(
        "backend url: {}, auto start: {}",
        config.backend_url(),
        config.auto_start
    ));

    let code = run(config);
    append_startup_log(&format!("shell process exiting with code {code}"));
    process::exit(code);
}
