//! Configuration loading from files and environment
//!
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/agentsync/config.toml`
//! 3. Project config: `.agentsync/config.toml`
//! 4. Environment variables: `AGENTSYNC_*`
//!
//! File layers are merged as TOML tables before deserializing, so a project
//! file only needs to name the keys it overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::Config;
use crate::{Error, Result};

/// Load configuration relative to the current directory.
pub fn load_config() -> Result<Config> {
    let root = std::env::current_dir()
        .map_err(|e| Error::TransientIo(format!("Failed to get current directory: {e}")))?;
    load_config_from(&root)
}

/// Load configuration for a project rooted at `root`.
pub fn load_config_from(root: &Path) -> Result<Config> {
    let layers = [global_config_path(), Some(project_config_path(root))];

    let merged = layers
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .map(|path| load_toml_file(&path))
        .try_fold(toml::Table::new(), |acc, layer| {
            layer.map(|table| merge_tables(acc, table))
        })?;

    let config = Config::deserialize(toml::Value::Table(merged))
        .map_err(|e| Error::InvalidConfig(format!("Failed to apply config files: {e}")))?
        .apply_env_vars()?;

    config.validate()?;
    Ok(config)
}

pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "agentsync")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(".agentsync").join("config.toml")
}

/// Read one TOML layer.
pub fn load_toml_file(path: &Path) -> Result<toml::Table> {
    if path.is_dir() {
        return Err(Error::InvalidConfig(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidConfig(format!("Failed to read config file {}: {e}", path.display()))
    })?;

    content.parse::<toml::Table>().map_err(|e| {
        Error::InvalidConfig(format!("Failed to parse config file {}: {e}", path.display()))
    })
}

/// Deep merge: nested tables merge, everything else is replaced.
fn merge_tables(mut base: toml::Table, overlay: toml::Table) -> toml::Table {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(toml::Value::Table(lower)), toml::Value::Table(upper)) => {
                toml::Value::Table(merge_tables(lower, upper))
            }
            (_, value) => value,
        };
        base.insert(key, merged);
    }
    base
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(name).ok().map_or(Ok(None), |value| {
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("Invalid {name} value '{value}': {e}")))
    })
}

impl Config {
    /// Apply `AGENTSYNC_*` environment overrides.
    pub fn apply_env_vars(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("AGENTSYNC_DB_PATH") {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "AGENTSYNC_DB_PATH cannot be empty - unset the variable or provide a path"
                        .to_string(),
                ));
            }
            self.db_path = value;
        }

        if let Ok(value) = std::env::var("AGENTSYNC_LOG_LEVEL") {
            self.log_level = value;
        }

        if let Some(ttl) = parse_env("AGENTSYNC_DEFAULT_TTL")? {
            self.locks.default_ttl_secs = ttl;
        }

        if let Some(ms) = parse_env("AGENTSYNC_POLL_INTERVAL_MS")? {
            self.session.poll_interval_ms = ms;
        }

        if let Some(secs) = parse_env("AGENTSYNC_SESSION_STALE_AFTER_SECONDS")? {
            self.session.agent_stale_after_secs = secs;
        }

        if let Some(secs) = parse_env("AGENTSYNC_OVERLAP_WINDOW_SECS")? {
            self.overlap.window_secs = secs;
        }

        if let Ok(value) = std::env::var("AGENTSYNC_SUGGESTION_COMMAND") {
            let argv: Vec<String> = value.split_whitespace().map(String::from).collect();
            self.suggestions.command = (!argv.is_empty()).then_some(argv);
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serial_test::serial;

    use super::*;

    fn write(path: &Path, body: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, body)?;
        Ok(())
    }

    #[test]
    #[serial]
    fn project_file_overrides_only_named_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(
            &project_config_path(dir.path()),
            "[locks]\ndefault_ttl_secs = 600\n\n[overlap]\nbreadth_bump = 5\n",
        )?;

        let config = load_config_from(dir.path())?;
        assert_eq!(config.default_ttl(), Duration::from_secs(600));
        assert_eq!(config.overlap.breadth_bump, 5);
        assert_eq!(config.overlap.high_within_secs, 60);
        assert_eq!(config.locks.operation_timeout_ms, 5_000);
        Ok(())
    }

    #[test]
    fn malformed_toml_is_invalid_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.toml");
        write(&path, "locks = \n [[[")?;

        let result = load_toml_file(&path);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn directory_is_not_a_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(
            load_toml_file(dir.path()),
            Err(Error::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    #[serial]
    fn env_vars_override_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        write(
            &project_config_path(dir.path()),
            "db_path = \"from-file.db\"\n",
        )?;

        std::env::set_var("AGENTSYNC_DB_PATH", "from-env.db");
        std::env::set_var("AGENTSYNC_DEFAULT_TTL", "120");
        let result = load_config_from(dir.path());
        std::env::remove_var("AGENTSYNC_DB_PATH");
        std::env::remove_var("AGENTSYNC_DEFAULT_TTL");

        let config = result?;
        assert_eq!(config.db_path, "from-env.db");
        assert_eq!(config.locks.default_ttl_secs, 120);
        Ok(())
    }

    #[test]
    #[serial]
    fn unparsable_env_value_is_rejected() {
        std::env::set_var("AGENTSYNC_POLL_INTERVAL_MS", "soon");
        let result = Config::default().apply_env_vars();
        std::env::remove_var("AGENTSYNC_POLL_INTERVAL_MS");

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn nested_tables_merge_key_by_key() -> Result<()> {
        let lower: toml::Table = "[session]\npoll_interval_ms = 10\nmax_consecutive_failures = 2\n"
            .parse()
            .map_err(|e: toml::de::Error| Error::InvalidConfig(e.to_string()))?;
        let upper: toml::Table = "[session]\npoll_interval_ms = 20\n"
            .parse()
            .map_err(|e: toml::de::Error| Error::InvalidConfig(e.to_string()))?;

        let merged = merge_tables(lower, upper);
        let session = merged.get("session").and_then(toml::Value::as_table);
        assert_eq!(
            session.and_then(|s| s.get("poll_interval_ms")).and_then(toml::Value::as_integer),
            Some(20)
        );
        assert_eq!(
            session
                .and_then(|s| s.get("max_consecutive_failures"))
                .and_then(toml::Value::as_integer),
            Some(2)
        );
        Ok(())
    }
}
