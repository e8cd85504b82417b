//! On-disk TOML configuration: sync root, debounce window, poll interval,
//! retry ceilings, and ignore patterns. Follows the teacher's `config.rs`
//! shape directly — search paths, `shellexpand`+canonicalize, a raw
//! `Deserialize` struct validated into a typed `Config` — generalized from
//! "many repos mirrored into one output tree" to "one sync root mirroring
//! one remote project".

use std::path::{Path, PathBuf};
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git/",
    ".svn/",
    ".hg/",
    "node_modules/",
    ".DS_Store",
    "Thumbs.db",
    "*.swp",
    "*.tmp",
    "~$*",
];

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RETRY_CEILING_SECS: u64 = 300;
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

#[derive(Debug, Deserialize)]
struct RawConfig {
    version: Option<u64>,
    sync_root: Option<String>,
    remote_base_url: Option<String>,
    project_id: Option<String>,
    debounce_ms: Option<u64>,
    poll_interval_secs: Option<u64>,
    retry_ceiling_secs: Option<u64>,
    log_level: Option<String>,
    ignore: Option<Vec<String>>,
}

/// A fully validated configuration, ready to hand to `worker::BackgroundWorker`.
#[derive(Debug, Clone)]
pub struct Config {
    pub sync_root: PathBuf,
    pub remote_base_url: String,
    pub project_id: String,
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub retry_ceiling: Duration,
    pub log_level: String,
    pub ignore: Gitignore,
    pub config_path: Option<PathBuf>,
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("./syncore.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("syncore").join("config.toml"));
    }
    paths
}

pub fn find_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(p) = explicit {
        let expanded = expand_path(&p.to_string_lossy())?;
        return if expanded.is_file() {
            Ok(expanded)
        } else {
            Err(ConfigError::FileNotFound(expanded))
        };
    }

    for candidate in config_search_paths() {
        let expanded = expand_path(&candidate.to_string_lossy())?;
        if expanded.is_file() {
            return Ok(expanded);
        }
    }

    Err(ConfigError::NoConfigFound)
}

fn expand_path(p: &str) -> Result<PathBuf, ConfigError> {
    let expanded = shellexpand::full(p)
        .map_err(|e| ConfigError::Validation(format!("failed to expand path '{p}': {e}")))?;
    Ok(absolute_or_as_is(Path::new(expanded.as_ref())))
}

fn absolute_or_as_is(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        canonical
    } else if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    }
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    let resolved = find_config_path(config_path)?;
    let contents = std::fs::read_to_string(&resolved)?;
    let raw: RawConfig = toml::from_str(&contents)?;
    parse_config(raw, Some(resolved))
}

fn parse_config(raw: RawConfig, config_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    match raw.version {
        Some(1) => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "config version must be 1, got {other:?}"
            )))
        }
    }

    let sync_root_raw = raw
        .sync_root
        .as_deref()
        .ok_or_else(|| ConfigError::Validation("'sync_root' is required".into()))?;
    let sync_root = expand_path(sync_root_raw)?;
    std::fs::create_dir_all(&sync_root)?;
    let sync_root = std::fs::canonicalize(&sync_root).unwrap_or(sync_root);

    let remote_base_url = raw
        .remote_base_url
        .ok_or_else(|| ConfigError::Validation("'remote_base_url' is required".into()))?;
    let project_id = raw
        .project_id
        .ok_or_else(|| ConfigError::Validation("'project_id' is required".into()))?;

    let debounce_ms = raw.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS);
    if !(0..=30_000).contains(&debounce_ms) {
        return Err(ConfigError::Validation(format!(
            "'debounce_ms' must be between 0 and 30000, got {debounce_ms}"
        )));
    }

    let poll_interval_secs = raw.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    if poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "'poll_interval_secs' must be greater than 0".into(),
        ));
    }

    let retry_ceiling_secs = raw
        .retry_ceiling_secs
        .unwrap_or(DEFAULT_RETRY_CEILING_SECS);

    let log_level = raw.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.into());
    let valid_levels = ["TRACE", "DEBUG", "INFO", "WARNING", "ERROR"];
    if !valid_levels.contains(&log_level.as_str()) {
        return Err(ConfigError::Validation(format!(
            "'log_level' must be one of {valid_levels:?}, got '{log_level}'"
        )));
    }

    let ignore_patterns: Vec<String> = raw.ignore.unwrap_or_else(|| {
        DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect()
    });
    let ignore = compile_ignore(&ignore_patterns, &sync_root)?;

    Ok(Config {
        sync_root,
        remote_base_url,
        project_id,
        debounce: Duration::from_millis(debounce_ms),
        poll_interval: Duration::from_secs(poll_interval_secs),
        retry_ceiling: Duration::from_secs(retry_ceiling_secs),
        log_level,
        ignore,
        config_path,
    })
}

fn compile_ignore(patterns: &[String], sync_root: &Path) -> Result<Gitignore, ConfigError> {
    let mut builder = GitignoreBuilder::new(sync_root);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .map_err(|e| ConfigError::Validation(format!("invalid ignore pattern '{pattern}': {e}")))?;
    }
    builder
        .build()
        .map_err(|e| ConfigError::Validation(format!("failed to compile ignore patterns: {e}")))
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("syncore")
        .join("config.toml")
}

pub fn generate_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_CONTENT)?;
    Ok(())
}

const DEFAULT_CONFIG_CONTENT: &str = r#"# syncore configuration
version = 1

# Local directory mapped one-to-one to the remote project. Tilde and env
# vars are expanded.
sync_root = "~/sync"

# Base URL of the remote content-repository API.
remote_base_url = "https://api.example.org/v2"

# Identifier of the remote project to mirror.
project_id = "CHANGE-ME"

# Debounce window in milliseconds: how long the local watcher waits for
# the filesystem to go quiet before consolidating a batch.
debounce_ms = 500

# How often the remote poller re-fetches the project tree.
poll_interval_secs = 60

# Ceiling for the queue's exponential backoff on transient errors.
retry_ceiling_secs = 300

# Logging level: TRACE, DEBUG, INFO, WARNING, ERROR
log_level = "INFO"

# Ignore patterns (gitignore syntax), applied at watcher ingress.
# ignore = [".git/", "node_modules/", "*.tmp"]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("syncore.toml");
        fs::write(&path, content).unwrap();
        path
    }

    fn minimal(sync_root: &Path) -> String {
        format!(
            "version = 1\nsync_root = \"{}\"\nremote_base_url = \"https://api.example.org\"\nproject_id = \"abc123\"",
            sync_root.display()
        )
    }

    #[test]
    fn valid_minimal_config() {
        let tmp = TempDir::new().unwrap();
        let sync_root = tmp.path().join("root");
        let path = write_config(tmp.path(), &minimal(&sync_root));

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(cfg.log_level, "INFO");
        assert_eq!(cfg.project_id, "abc123");
    }

    #[test]
    fn missing_version_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(tmp.path(), "sync_root = \"/tmp/x\"");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("version must be 1"));
    }

    #[test]
    fn missing_sync_root_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(tmp.path(), "version = 1");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("sync_root"));
    }

    #[test]
    fn missing_remote_base_url_rejected() {
        let tmp = TempDir::new().unwrap();
        let sync_root = tmp.path().join("root");
        let content = format!(
            "version = 1\nsync_root = \"{}\"\nproject_id = \"x\"",
            sync_root.display()
        );
        let path = write_config(tmp.path(), &content);
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("remote_base_url"));
    }

    #[test]
    fn debounce_out_of_range_rejected() {
        let tmp = TempDir::new().unwrap();
        let sync_root = tmp.path().join("root");
        let content = format!("{}\ndebounce_ms = 999999", minimal(&sync_root));
        let path = write_config(tmp.path(), &content);
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("debounce_ms"));
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let tmp = TempDir::new().unwrap();
        let sync_root = tmp.path().join("root");
        let content = format!("{}\npoll_interval_secs = 0", minimal(&sync_root));
        let path = write_config(tmp.path(), &content);
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn invalid_log_level_rejected() {
        let tmp = TempDir::new().unwrap();
        let sync_root = tmp.path().join("root");
        let content = format!("{}\nlog_level = \"VERBOSE\"", minimal(&sync_root));
        let path = write_config(tmp.path(), &content);
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn default_ignore_patterns_exclude_git_dir() {
        let tmp = TempDir::new().unwrap();
        let sync_root = tmp.path().join("root");
        let path = write_config(tmp.path(), &minimal(&sync_root));
        let cfg = load_config(Some(&path)).unwrap();
        assert!(cfg
            .ignore
            .matched_path_or_any_parents(sync_root.join(".git").join("HEAD"), false)
            .is_ignore());
    }

    #[test]
    fn generate_default_config_is_loadable_after_filling_in_placeholders() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        generate_default_config(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("version = 1"));
        assert!(content.contains("sync_root"));
    }

    #[test]
    fn explicit_config_not_found() {
        let err = find_config_path(Some(Path::new("/nonexistent/config.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
