use std::{env, path::PathBuf};

use crate::{
    runtime_paths, ShellError, BACKEND_CMD_ENV, DEFAULT_LAUNCH_INTERPRETER, DEFAULT_LAUNCH_SCRIPT,
    DEFAULT_REQUIRED_ARTIFACT, REQUIRED_ARTIFACT_ENV,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Overlay applied on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// File that must exist (relative to `cwd`) before spawning.
    pub required_artifact: Option<PathBuf>,
}

impl LaunchPlan {
    pub fn debug_command(&self) -> Vec<String> {
        let mut parts = vec![self.cmd.clone()];
        parts.extend(self.args.iter().cloned());
        parts
    }
}

pub fn unbuffered_env_overlay() -> Vec<(String, String)> {
    vec![
        ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
        (
            "PYTHONUTF8".to_string(),
            env::var("PYTHONUTF8").unwrap_or_else(|_| "1".to_string()),
        ),
        (
            "PYTHONIOENCODING".to_string(),
            env::var("PYTHONIOENCODING").unwrap_or_else(|_| "utf-8".to_string()),
        ),
    ]
}

fn required_artifact_override() -> Option<Option<PathBuf>> {
    let raw = env::var(REQUIRED_ARTIFACT_ENV).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Some(None)
    } else {
        Some(Some(PathBuf::from(trimmed)))
    }
}

pub fn resolve_launch_plan<F>(log: F) -> Result<LaunchPlan, ShellError>
where
    F: Fn(&str),
{
    let custom_cmd = env::var(BACKEND_CMD_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let artifact = match required_artifact_override() {
        Some(configured) => configured,
        None if custom_cmd.is_some() => None,
        None => Some(PathBuf::from(DEFAULT_REQUIRED_ARTIFACT)),
    };
    let marker = artifact
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REQUIRED_ARTIFACT));

    let project_root = runtime_paths::detect_project_root(&marker);
    let cwd = project_root.unwrap_or_else(|| {
        let fallback = env::current_dir().unwrap_or_else(|_| runtime_paths::workspace_root_dir());
        log(&format!(
            "backend project directory not detected, using {}",
            fallback.display()
        ));
        fallback
    });

    match custom_cmd {
        Some(custom_cmd) => resolve_custom_launch(&custom_cmd, cwd, artifact),
        None => Ok(default_launch(cwd, artifact)),
    }
}

pub fn resolve_custom_launch(
    custom_cmd: &str,
    cwd: PathBuf,
    required_artifact: Option<PathBuf>,
) -> Result<LaunchPlan, ShellError> {
    let mut pieces = shlex::split(custom_cmd).ok_or_else(|| {
        ShellError::LaunchPrecondition(format!("invalid {BACKEND_CMD_ENV}: {custom_cmd}"))
    })?;
    if pieces.is_empty() {
        return Err(ShellError::LaunchPrecondition(format!(
            "{BACKEND_CMD_ENV} is empty"
        )));
    }

    let cmd = pieces.remove(0);
    Ok(LaunchPlan {
        cmd,
        args: pieces,
        cwd,
        env: unbuffered_env_overlay(),
        required_artifact,
    })
}

/// `bash start_django.sh` inside the project directory.
pub fn default_launch(project_root: PathBuf, required_artifact: Option<PathBuf>) -> LaunchPlan {
    let script = project_root.join(DEFAULT_LAUNCH_SCRIPT);
    LaunchPlan {
        cmd: DEFAULT_LAUNCH_INTERPRETER.to_string(),
        args: vec![script.to_string_lossy().to_string()],
        cwd: project_root,
        env: unbuffered_env_overlay(),
        required_artifact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_launch_splits_quoted_arguments() {
        let plan = resolve_custom_launch(
            "python3 -m http.server 'with space'",
            PathBuf::from("/srv/app"),
            None,
        )
        .expect("custom command should parse");
        assert_eq!(plan.cmd, "python3");
        assert_eq!(plan.args, vec!["-m", "http.server", "with space"]);
        assert_eq!(plan.cwd, PathBuf::from("/srv/app"));
        assert!(plan
            .env
            .iter()
            .any(|(key, value)| key == "PYTHONUNBUFFERED" && value == "1"));
    }

    #[test]
    fn custom_launch_rejects_unbalanced_quotes() {
        let error = resolve_custom_launch("python3 'oops", PathBuf::from("."), None)
            .expect_err("unbalanced quote must fail");
        assert!(matches!(error, ShellError::LaunchPrecondition(_)));
    }

    #[test]
    fn custom_launch_rejects_blank_command() {
        let error = resolve_custom_launch("   ", PathBuf::from("."), None)
            .expect_err("blank command must fail");
        assert!(error.to_string().contains("is empty"));
    }

    #[test]
    fn default_launch_runs_script_through_interpreter() {
        let root = PathBuf::from("/srv/site");
        let plan = default_launch(root.clone(), Some(PathBuf::from("manage.py")));
        assert_eq!(plan.cmd, "bash");
        assert_eq!(
            plan.debug_command(),
            vec![
                "bash".to_string(),
                root.join("start_django.sh").to_string_lossy().to_string()
            ]
        );
        assert_eq!(plan.required_artifact, Some(PathBuf::from("manage.py")));
    }
}
