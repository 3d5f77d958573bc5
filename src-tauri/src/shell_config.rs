use std::{env, time::Duration};

use url::Url;

use crate::{
    load_controller::LoadPolicy, readiness::ReadinessConfig, startup_race::StartupPolicy,
    BACKEND_AUTO_START_ENV, BACKEND_HOST_ENV, BACKEND_PORT_ENV, DEFAULT_BACKEND_HOST,
    DEFAULT_BACKEND_PORT, DEFAULT_INSTANCE_PORT, DEFAULT_LOAD_RECOVERY_INTERVAL_MS,
    DEFAULT_LOAD_RETRY_DELAY_MS,
    DEFAULT_LOAD_RETRY_LIMIT, DEFAULT_ORPHAN_PATTERN, DEFAULT_PAGE_LOAD_TIMEOUT_MS,
    DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_READY_MARKER, DEFAULT_READY_MAX_ATTEMPTS,
    DEFAULT_READY_POLL_INTERVAL_MS, DEFAULT_STARTUP_SETTLE_MS, DEFAULT_STARTUP_TIMEOUT_MS,
    INSTANCE_PORT_ENV, LOAD_RECOVERY_INTERVAL_ENV, LOAD_RECOVERY_INTERVAL_MAX_MS,
    LOAD_RETRY_DELAY_ENV, LOAD_RETRY_DELAY_MAX_MS, LOAD_RETRY_DELAY_MIN_MS,
    LOAD_RETRY_LIMIT_ENV, LOAD_RETRY_LIMIT_MAX, ORPHAN_PATTERN_ENV, PAGE_LOAD_TIMEOUT_ENV,
    PAGE_LOAD_TIMEOUT_MAX_MS, PAGE_LOAD_TIMEOUT_MIN_MS, PROBE_TIMEOUT_ENV, PROBE_TIMEOUT_MAX_MS,
    PROBE_TIMEOUT_MIN_MS, READY_MARKER_ENV, READY_MAX_ATTEMPTS_ENV, READY_MAX_ATTEMPTS_MAX,
    READY_POLL_INTERVAL_ENV, READY_POLL_INTERVAL_MAX_MS, READY_POLL_INTERVAL_MIN_MS,
    STARTUP_SETTLE_ENV, STARTUP_SETTLE_MAX_MS, STARTUP_TIMEOUT_ENV, STARTUP_TIMEOUT_MAX_MS,
    STARTUP_TIMEOUT_MIN_MS,
};

/// Parses an integer setting and clamps it into `[min, max]`. Garbage falls
/// back to `fallback`; zero is garbage unless `min` is zero.
pub fn parse_clamped_env<F>(
    raw: &str,
    env_name: &str,
    fallback: u64,
    min: u64,
    max: u64,
    mut log: F,
) -> u64
where
    F: FnMut(String),
{
    match raw.trim().parse::<u128>() {
        Ok(parsed) if parsed > 0 || min == 0 => {
            if parsed < min as u128 {
                log(format!(
                    "{env_name}='{raw}' is below minimum {min}, clamped to {min}"
                ));
                min
            } else if parsed > max as u128 {
                log(format!(
                    "{env_name}='{raw}' is above maximum {max}, clamped to {max}"
                ));
                max
            } else {
                parsed as u64
            }
        }
        _ => {
            log(format!("invalid {env_name}='{raw}', fallback to {fallback}"));
            fallback
        }
    }
}

pub fn resolve_clamped_env<F>(env_name: &str, fallback: u64, min: u64, max: u64, log: F) -> u64
where
    F: FnMut(String),
{
    match env::var(env_name) {
        Ok(raw) => parse_clamped_env(&raw, env_name, fallback, min, max, log),
        Err(_) => fallback,
    }
}

/// Reads a free-form text setting. Unset keeps the default; blank or
/// non-UTF-8 values fall back to it with a log line.
pub fn resolve_text_env<F>(env_name: &str, default_value: &str, mut log: F) -> String
where
    F: FnMut(String),
{
    match env::var_os(env_name) {
        Some(raw) => match raw.to_str() {
            Some(raw_utf8) if !raw_utf8.trim().is_empty() => raw_utf8.trim().to_string(),
            Some(_) => {
                log(format!(
                    "{env_name} is empty/whitespace, fallback to default '{default_value}'"
                ));
                default_value.to_string()
            }
            None => {
                log(format!(
                    "{env_name} contains non-UTF-8 value '{}', fallback to default '{default_value}'",
                    raw.to_string_lossy()
                ));
                default_value.to_string()
            }
        },
        None => default_value.to_string(),
    }
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_flag_env<F>(env_name: &str, default_value: bool, mut log: F) -> bool
where
    F: FnMut(String),
{
    let Ok(raw) = env::var(env_name) else {
        return default_value;
    };
    parse_flag(&raw).unwrap_or_else(|| {
        log(format!(
            "invalid {env_name}='{raw}', fallback to {}",
            if default_value { "1" } else { "0" }
        ));
        default_value
    })
}

fn resolve_port_env<F>(env_name: &str, fallback: u16, log: F) -> u16
where
    F: FnMut(String),
{
    resolve_clamped_env(env_name, fallback as u64, 1, u16::MAX as u64, log) as u16
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub backend_host: String,
    pub backend_port: u16,
    pub auto_start: bool,
    pub startup: StartupPolicy,
    pub readiness: ReadinessConfig,
    pub load: LoadPolicy,
    /// Command-line fragment the orphan reaper kills by; `None` disables it.
    pub orphan_pattern: Option<String>,
    pub instance_port: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            backend_host: DEFAULT_BACKEND_HOST.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
            auto_start: true,
            startup: StartupPolicy {
                ready_marker: DEFAULT_READY_MARKER.to_string(),
                settle_delay: Duration::from_millis(DEFAULT_STARTUP_SETTLE_MS),
                timeout: Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS),
            },
            readiness: ReadinessConfig {
                max_attempts: DEFAULT_READY_MAX_ATTEMPTS as u32,
                poll_interval: Duration::from_millis(DEFAULT_READY_POLL_INTERVAL_MS),
                probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            },
            load: LoadPolicy {
                retry_limit: DEFAULT_LOAD_RETRY_LIMIT as u32,
                retry_delay: Duration::from_millis(DEFAULT_LOAD_RETRY_DELAY_MS),
                page_load_timeout: Duration::from_millis(DEFAULT_PAGE_LOAD_TIMEOUT_MS),
                recovery_interval: Duration::from_millis(DEFAULT_LOAD_RECOVERY_INTERVAL_MS),
            },
            orphan_pattern: Some(DEFAULT_ORPHAN_PATTERN.to_string()),
            instance_port: DEFAULT_INSTANCE_PORT,
        }
    }
}

impl ShellConfig {
    pub fn from_env<F>(log: F) -> Self
    where
        F: Fn(&str) + Copy,
    {
        let sink = |message: String| log(&message);
        let defaults = Self::default();

        let orphan_pattern = match env::var(ORPHAN_PATTERN_ENV) {
            Ok(raw) if raw.trim().is_empty() => {
                log(&format!("{ORPHAN_PATTERN_ENV} is empty, orphan pattern kill disabled"));
                None
            }
            Ok(raw) => Some(raw.trim().to_string()),
            Err(_) => defaults.orphan_pattern.clone(),
        };

        Self {
            backend_host: resolve_text_env(BACKEND_HOST_ENV, DEFAULT_BACKEND_HOST, sink),
            backend_port: resolve_port_env(BACKEND_PORT_ENV, DEFAULT_BACKEND_PORT, sink),
            auto_start: resolve_flag_env(BACKEND_AUTO_START_ENV, true, sink),
            startup: StartupPolicy {
                ready_marker: resolve_text_env(READY_MARKER_ENV, DEFAULT_READY_MARKER, sink),
                settle_delay: Duration::from_millis(resolve_clamped_env(
                    STARTUP_SETTLE_ENV,
                    DEFAULT_STARTUP_SETTLE_MS,
                    0,
                    STARTUP_SETTLE_MAX_MS,
                    sink,
                )),
                timeout: Duration::from_millis(resolve_clamped_env(
                    STARTUP_TIMEOUT_ENV,
                    DEFAULT_STARTUP_TIMEOUT_MS,
                    STARTUP_TIMEOUT_MIN_MS,
                    STARTUP_TIMEOUT_MAX_MS,
                    sink,
                )),
            },
            readiness: ReadinessConfig {
                max_attempts: resolve_clamped_env(
                    READY_MAX_ATTEMPTS_ENV,
                    DEFAULT_READY_MAX_ATTEMPTS,
                    1,
                    READY_MAX_ATTEMPTS_MAX,
                    sink,
                ) as u32,
                poll_interval: Duration::from_millis(resolve_clamped_env(
                    READY_POLL_INTERVAL_ENV,
                    DEFAULT_READY_POLL_INTERVAL_MS,
                    READY_POLL_INTERVAL_MIN_MS,
                    READY_POLL_INTERVAL_MAX_MS,
                    sink,
                )),
                probe_timeout: Duration::from_millis(resolve_clamped_env(
                    PROBE_TIMEOUT_ENV,
                    DEFAULT_PROBE_TIMEOUT_MS,
                    PROBE_TIMEOUT_MIN_MS,
                    PROBE_TIMEOUT_MAX_MS,
                    sink,
                )),
            },
            load: LoadPolicy {
                retry_limit: resolve_clamped_env(
                    LOAD_RETRY_LIMIT_ENV,
                    DEFAULT_LOAD_RETRY_LIMIT,
                    1,
                    LOAD_RETRY_LIMIT_MAX,
                    sink,
                ) as u32,
                retry_delay: Duration::from_millis(resolve_clamped_env(
                    LOAD_RETRY_DELAY_ENV,
                    DEFAULT_LOAD_RETRY_DELAY_MS,
                    LOAD_RETRY_DELAY_MIN_MS,
                    LOAD_RETRY_DELAY_MAX_MS,
                    sink,
                )),
                page_load_timeout: Duration::from_millis(resolve_clamped_env(
                    PAGE_LOAD_TIMEOUT_ENV,
                    DEFAULT_PAGE_LOAD_TIMEOUT_MS,
                    PAGE_LOAD_TIMEOUT_MIN_MS,
                    PAGE_LOAD_TIMEOUT_MAX_MS,
                    sink,
                )),
                recovery_interval: Duration::from_millis(resolve_clamped_env(
                    LOAD_RECOVERY_INTERVAL_ENV,
                    DEFAULT_LOAD_RECOVERY_INTERVAL_MS,
                    0,
                    LOAD_RECOVERY_INTERVAL_MAX_MS,
                    sink,
                )),
            },
            orphan_pattern,
            instance_port: resolve_port_env(INSTANCE_PORT_ENV, DEFAULT_INSTANCE_PORT, sink),
        }
    }

    pub fn backend_url(&self) -> Url {
        let raw = format!("http://{}:{}/", self.backend_host, self.backend_port);
        Url::parse(&raw).unwrap_or_else(|_| {
            let mut url = Url::parse("http://127.0.0.1/").expect("static loopback url parses");
            let _ = url.set_port(Some(self.backend_port));
            url
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_clamped_returns_value_in_range() {
        let value = parse_clamped_env("1200", "TEST_ENV", 500, 100, 5_000, |_| {});
        assert_eq!(value, 1200);
    }

    #[test]
    fn parse_clamped_clamps_too_small_value() {
        let mut logs = Vec::new();
        let value = parse_clamped_env("20", "TEST_ENV", 500, 100, 5_000, |message| {
            logs.push(message)
        });
        assert_eq!(value, 100);
        assert!(logs.iter().any(|line| line.contains("below minimum")));
    }

    #[test]
    fn parse_clamped_clamps_too_large_value() {
        let value = parse_clamped_env("99999", "TEST_ENV", 500, 100, 3_000, |_| {});
        assert_eq!(value, 3_000);
    }

    #[test]
    fn parse_clamped_falls_back_on_invalid_value() {
        let mut logs = Vec::new();
        let value = parse_clamped_env("invalid", "TEST_ENV", 500, 100, 5_000, |message| {
            logs.push(message)
        });
        assert_eq!(value, 500);
        assert!(logs.iter().any(|line| line.contains("invalid TEST_ENV")));
    }

    #[test]
    fn parse_clamped_accepts_zero_only_when_minimum_is_zero() {
        assert_eq!(parse_clamped_env("0", "TEST_ENV", 2_000, 0, 30_000, |_| {}), 0);
        assert_eq!(parse_clamped_env("0", "TEST_ENV", 800, 50, 30_000, |_| {}), 800);
    }

    #[test]
    fn parse_flag_understands_common_spellings() {
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag(" Off "), Some(false));
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn resolve_text_env_falls_back_on_blank_value() {
        let env_name = "SERVER_SHELL_TEST_TEXT_BLANK";
        env::set_var(env_name, "   ");
        let mut logs = Vec::new();
        let value = resolve_text_env(env_name, "marker", |message| logs.push(message));
        env::remove_var(env_name);
        assert_eq!(value, "marker");
        assert_eq!(logs.len(), 1);
    }

    #[test]
    fn resolve_text_env_uses_missing_default() {
        let value = resolve_text_env("SERVER_SHELL_TEST_TEXT_MISSING", "marker", |_| {});
        assert_eq!(value, "marker");
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = ShellConfig::default();
        assert_eq!(config.backend_port, 8001);
        assert_eq!(config.load.retry_limit, 3);
        assert_eq!(config.load.recovery_interval, Duration::from_secs(30));
        assert_eq!(config.startup.timeout, Duration::from_secs(10));
        assert_eq!(config.backend_url().as_str(), "http://127.0.0.1:8001/");
    }
}
