use std::{
    env,
    path::{Path, PathBuf},
};

use crate::PROJECT_DIR_ENV;

pub fn default_root_dir() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".server-shell"))
}

pub fn workspace_root_dir() -> PathBuf {
    let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..");
    candidate
        .canonicalize()
        .unwrap_or_else(|_| candidate.to_path_buf())
}

/// Finds the backend project directory. An explicit override that exists is
/// used as is; otherwise the first of the current directory, the executable's
/// ancestors and the workspace root that contains `artifact` wins.
pub fn detect_project_root(artifact: &Path) -> Option<PathBuf> {
    let explicit = env::var(PROJECT_DIR_ENV)
        .ok()
        .map(|value| PathBuf::from(value.trim()))
        .filter(|path| !path.as_os_str().is_empty());

    let mut candidates = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd);
    }
    if let Ok(exe) = env::current_exe() {
        candidates.extend(exe.ancestors().skip(1).take(4).map(Path::to_path_buf));
    }
    candidates.push(workspace_root_dir());

    detect_project_root_with(explicit, candidates, artifact)
}

fn detect_project_root_with(
    explicit: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    artifact: &Path,
) -> Option<PathBuf> {
    // A missing artifact in an explicit directory is reported at launch.
    if let Some(candidate) = explicit.filter(|candidate| candidate.is_dir()) {
        return Some(candidate.canonicalize().unwrap_or(candidate));
    }

    candidates
        .into_iter()
        .find(|candidate| is_project_dir(candidate, artifact))
        .map(|candidate| candidate.canonicalize().unwrap_or(candidate))
}

fn is_project_dir(candidate: &Path, artifact: &Path) -> bool {
    candidate.join(artifact).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs,
        time::{SystemTime, UNIX_EPOCH},
    };

    fn create_temp_case_dir(name: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let dir = env::temp_dir().join(format!(
            "server-shell-runtime-paths-test-{}-{}-{}",
            std::process::id(),
            ts,
            name
        ));
        fs::create_dir_all(&dir).expect("create temp case dir");
        dir
    }

    fn manage_py() -> &'static Path {
        Path::new("manage.py")
    }

    #[test]
    fn is_project_dir_requires_artifact() {
        let dir = create_temp_case_dir("layout");
        assert!(!is_project_dir(&dir, manage_py()));
        fs::write(dir.join("manage.py"), b"print('ok')").expect("create manage.py");
        assert!(is_project_dir(&dir, manage_py()));
        fs::remove_dir_all(&dir).expect("cleanup temp case dir");
    }

    #[test]
    fn configured_artifact_identifies_project() {
        let flask = create_temp_case_dir("flask");
        let django = create_temp_case_dir("django");
        fs::write(flask.join("app.py"), b"").expect("create app.py");
        fs::write(django.join("manage.py"), b"").expect("create manage.py");

        let detected = detect_project_root_with(
            None,
            vec![django.clone(), flask.clone()],
            Path::new("app.py"),
        )
        .expect("expected flask project");
        assert_eq!(detected, flask.canonicalize().expect("canonicalize flask"));

        fs::remove_dir_all(&flask).expect("cleanup flask dir");
        fs::remove_dir_all(&django).expect("cleanup django dir");
    }

    #[test]
    fn existing_explicit_dir_is_used_without_artifact() {
        let explicit = create_temp_case_dir("explicit-bare");
        let fallback = create_temp_case_dir("fallback-full");
        fs::write(fallback.join("manage.py"), b"").expect("create fallback manage.py");

        let detected =
            detect_project_root_with(Some(explicit.clone()), vec![fallback.clone()], manage_py())
                .expect("expected explicit project dir");
        assert_eq!(detected, explicit.canonicalize().expect("canonicalize explicit"));

        let missing = explicit.join("not-there");
        let detected = detect_project_root_with(Some(missing), vec![fallback.clone()], manage_py())
            .expect("expected fallback project dir");
        assert_eq!(detected, fallback.canonicalize().expect("canonicalize fallback"));

        fs::remove_dir_all(&explicit).expect("cleanup explicit dir");
        fs::remove_dir_all(&fallback).expect("cleanup fallback dir");
    }

    #[test]
    fn detect_prefers_explicit_project_dir() {
        let explicit = create_temp_case_dir("explicit");
        let fallback = create_temp_case_dir("fallback");
        fs::write(explicit.join("manage.py"), b"").expect("create explicit manage.py");
        fs::write(fallback.join("manage.py"), b"").expect("create fallback manage.py");

        let detected =
            detect_project_root_with(Some(explicit.clone()), vec![fallback.clone()], manage_py())
            .expect("expected explicit project dir");
        assert_eq!(detected, explicit.canonicalize().expect("canonicalize explicit"));

        fs::remove_dir_all(&explicit).expect("cleanup explicit dir");
        fs::remove_dir_all(&fallback).expect("cleanup fallback dir");
    }

    #[test]
    fn detect_skips_candidates_without_artifact() {
        let empty = create_temp_case_dir("empty");
        let project = create_temp_case_dir("project");
        fs::write(project.join("manage.py"), b"").expect("create manage.py");

        let detected = detect_project_root_with(None, vec![empty.clone(), project.clone()], manage_py())
            .expect("expected second candidate");
        assert_eq!(detected, project.canonicalize().expect("canonicalize project"));
        assert!(detect_project_root_with(None, vec![empty.clone()], manage_py()).is_none());

        fs::remove_dir_all(&empty).expect("cleanup empty dir");
        fs::remove_dir_all(&project).expect("cleanup project dir");
    }
}
