use std::{
    env,
    ffi::OsString,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use crate::{DESKTOP_LOG_PATH_ENV, ROOT_ENV};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopLogCategory {
    Startup,
    Runtime,
    Load,
    Shutdown,
}

impl DesktopLogCategory {
    fn as_label(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Runtime => "runtime",
            Self::Load => "load",
            Self::Shutdown => "shutdown",
        }
    }
}

fn remove_if_present(path: &Path, what: &str) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != ErrorKind::NotFound {
            eprintln!(
                "[log rotation] failed to remove {what} {}: {error}",
                path.display()
            );
        }
    }
}

fn rotated_log_path(path: &Path, index: usize) -> PathBuf {
    let mut value = OsString::from(path.as_os_str());
    value.push(format!(".{index}"));
    PathBuf::from(value)
}

/// Shifts `desktop.log.N` backups up by one and moves the active file to
/// `.1` once it reaches `max_bytes`. The oldest backup is dropped.
pub fn rotate_log_if_needed(path: &Path, max_bytes: u64, backup_count: usize) {
    if max_bytes == 0 || backup_count == 0 {
        return;
    }

    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                eprintln!(
                    "[log rotation] failed to read metadata for {}: {error}",
                    path.display()
                );
            }
            return;
        }
    };
    if size < max_bytes {
        return;
    }

    remove_if_present(&rotated_log_path(path, backup_count), "oldest backup");
    for index in (1..backup_count).rev() {
        let source = rotated_log_path(path, index);
        if !source.exists() {
            continue;
        }
        let target = rotated_log_path(path, index + 1);
        remove_if_present(&target, "backup");
        if let Err(error) = fs::rename(&source, &target) {
            eprintln!(
                "[log rotation] failed to rename {} to {}: {error}",
                source.display(),
                target.display()
            );
        }
    }

    let first = rotated_log_path(path, 1);
    remove_if_present(&first, "first backup");
    if let Err(error) = fs::rename(path, &first) {
        eprintln!(
            "[log rotation] failed to rotate {} to {}: {error}",
            path.display(),
            first.display()
        );
    }
}

fn non_empty_env_path(name: &str) -> Option<PathBuf> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

pub fn resolve_desktop_log_path(default_root: Option<PathBuf>, desktop_log_file: &str) -> PathBuf {
    if let Some(custom) = non_empty_env_path(DESKTOP_LOG_PATH_ENV) {
        return custom;
    }
    if let Some(root) = non_empty_env_path(ROOT_ENV).or(default_root) {
        return root.join("logs").join(desktop_log_file);
    }

    env::temp_dir()
        .join("server-shell")
        .join("logs")
        .join(desktop_log_file)
}

fn format_line(category: DesktopLogCategory, message: &str) -> String {
    let timestamp = chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f %z")
        .to_string();
    format!("[{}] [{}] {}\n", timestamp, category.as_label(), message)
}

pub fn append_desktop_log(
    category: DesktopLogCategory,
    message: &str,
    path: &Path,
    max_bytes: u64,
    backup_count: usize,
    write_lock: &OnceLock<Mutex<()>>,
) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let _guard = match write_lock.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    rotate_log_if_needed(path, max_bytes, backup_count);
    let line = format_line(category, message);
    let _ = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
}
