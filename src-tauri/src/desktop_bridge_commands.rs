use crate::{
    append_runtime_log,
    helper_ops::{self, HelperResult},
    platform_ops,
};

fn join_failure(error: tauri::Error) -> HelperResult {
    HelperResult {
        ok: false,
        reason: Some(format!("Helper task failed: {error}")),
    }
}

#[tauri::command]
pub(crate) fn desktop_bridge_is_desktop_runtime() -> bool {
    true
}

#[tauri::command]
pub(crate) async fn desktop_bridge_open_path(path: String) -> HelperResult {
    tauri::async_runtime::spawn_blocking(move || {
        let platform = platform_ops::current_platform();
        helper_ops::open_path(platform.as_ref(), &path, append_runtime_log)
    })
    .await
    .unwrap_or_else(join_failure)
}

#[tauri::command]
pub(crate) async fn desktop_bridge_reveal_in_file_manager(path: String) -> HelperResult {
    tauri::async_runtime::spawn_blocking(move || {
        let platform = platform_ops::current_platform();
        helper_ops::reveal_in_file_manager(platform.as_ref(), &path, append_runtime_log)
    })
    .await
    .unwrap_or_else(join_failure)
}
