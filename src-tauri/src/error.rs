use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShellError {
    /// A launch artifact the backend needs is missing from its working directory.
    #[error("launch precondition failed: {0}")]
    LaunchPrecondition(String),
    /// The interpreter or executable used to run the backend could not be started.
    #[error("failed to spawn backend process: {0}")]
    Spawn(String),
    #[error("backend process is already running (pid={pid:?})")]
    AlreadyRunning { pid: Option<u32> },
    #[error("backend stopped before startup completed: {0}")]
    StartupFailed(String),
    #[error("backend auto-start is disabled ({env}=0)")]
    AutoStartDisabled { env: &'static str },
    #[error("backend at {host}:{port} not reachable after {attempts} probe attempts")]
    ReadinessTimeout {
        host: String,
        port: u16,
        attempts: u32,
    },
    #[error("content load failed ({code}): {description}")]
    LoadFailure { code: i32, description: String },
    #[error("orphan cleanup failed: {0}")]
    ShutdownCleanup(String),
}

impl ShellError {
    /// Errors that keep the backend from ever starting. They are rendered in
    /// the fallback view; everything else is retried or swallowed.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::LaunchPrecondition(_)
                | Self::Spawn(_)
                | Self::StartupFailed(_)
                | Self::AutoStartDisabled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_launch_errors_are_user_visible() {
        assert!(ShellError::LaunchPrecondition("manage.py missing".into()).is_user_visible());
        assert!(ShellError::Spawn("bash not found".into()).is_user_visible());
        assert!(!ShellError::ReadinessTimeout {
            host: "127.0.0.1".into(),
            port: 8001,
            attempts: 20,
        }
        .is_user_visible());
        assert!(!ShellError::LoadFailure {
            code: -102,
            description: "refused".into(),
        }
        .is_user_visible());
        assert!(!ShellError::ShutdownCleanup("socket table unavailable".into()).is_user_visible());
    }

    #[test]
    fn readiness_timeout_message_names_target() {
        let error = ShellError::ReadinessTimeout {
            host: "127.0.0.1".into(),
            port: 8001,
            attempts: 5,
        };
        assert_eq!(
            error.to_string(),
            "backend at 127.0.0.1:8001 not reachable after 5 probe attempts"
        );
    }
}
