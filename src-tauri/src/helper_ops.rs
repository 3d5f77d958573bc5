use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::platform_ops::PlatformOps;

/// Response shape for helper requests coming from the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HelperResult {
    pub ok: bool,
    pub reason: Option<String>,
}

impl HelperResult {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                reason: None,
            },
            Err(reason) => Self {
                ok: false,
                reason: Some(reason),
            },
        }
    }
}

fn validate_path(raw: &str) -> Result<PathBuf, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Path is empty.".to_string());
    }
    let path = PathBuf::from(trimmed);
    if !path.exists() {
        return Err(format!("Path does not exist: {}", path.display()));
    }
    Ok(path)
}

fn run_helper<F, L>(kind: &str, raw: &str, op: F, log: L) -> HelperResult
where
    F: FnOnce(&Path) -> Result<(), String>,
    L: Fn(&str),
{
    let result = validate_path(raw).and_then(|path| op(&path));
    if let Err(error) = &result {
        log(&format!("{kind} failed for '{raw}': {error}"));
    }
    HelperResult::from_result(result)
}

pub fn open_path<L>(platform: &dyn PlatformOps, raw: &str, log: L) -> HelperResult
where
    L: Fn(&str),
{
    run_helper("open path", raw, |path| platform.open_path(path), log)
}

pub fn reveal_in_file_manager<L>(platform: &dyn PlatformOps, raw: &str, log: L) -> HelperResult
where
    L: Fn(&str),
{
    run_helper(
        "reveal in file manager",
        raw,
        |path| platform.reveal_in_file_manager(path),
        log,
    )
}
