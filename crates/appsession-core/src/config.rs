//! Configuration management for appsession.
//!
//! Loads configuration from a TOML file with sensible defaults and exposes
//! it to the session through the `OptionSource` snapshot contract.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configured values of one section, keyed by option name.
///
/// Only options that are set appear in the map.
pub type SectionOptions = BTreeMap<String, toml::Value>;

/// Snapshot provider for configuration sections.
///
/// The session reads options through this trait at the moment it builds a
/// message, so every new-session message reflects the current values.
pub trait OptionSource: Send + Sync {
    fn options_for_section(&self, section: &str) -> SectionOptions;
}

/// Fixed, in-memory option tables keyed by section name.
impl OptionSource for BTreeMap<String, SectionOptions> {
    fn options_for_section(&self, section: &str) -> SectionOptions {
        self.get(section).cloned().unwrap_or_default()
    }
}

pub mod paths {
    //! Path resolution for the config file.
    //!
    //! Resolution order:
    //! 1. An explicit path (e.g. `--config`)
    //! 2. `$APPSESSION_HOME/config.toml`
    //! 3. `.appsession/config.toml` under the working directory

    use std::path::{Path, PathBuf};

    pub const HOME_ENV: &str = "APPSESSION_HOME";

    /// Returns the appsession home directory.
    pub fn appsession_home() -> PathBuf {
        if let Ok(home) = std::env::var(HOME_ENV) {
            return PathBuf::from(home);
        }
        PathBuf::from(".appsession")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        appsession_home().join("config.toml")
    }

    /// Returns `explicit` if given, otherwise the default config path.
    pub fn resolve(explicit: Option<&Path>) -> PathBuf {
        explicit.map_or_else(config_path, Path::to_path_buf)
    }
}

/// Returns the default config template with comments.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Rerun automatically when the script source changes.
    pub run_on_save: bool,
    /// Whether clients may toggle run-on-save.
    pub allow_run_on_save: bool,
    /// How often the script file is polled for changes (0 disables).
    pub file_watcher_poll_ms: u64,
    /// Number of reruns a client keeps unchanged messages cached for.
    pub max_cached_message_age: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            run_on_save: false,
            allow_run_on_save: true,
            file_watcher_poll_ms: 1000,
            max_cached_message_age: 2,
        }
    }
}

impl ServerConfig {
    /// Poll interval for the source watcher, `None` when disabled.
    pub fn file_watcher_poll(&self) -> Option<Duration> {
        (self.file_watcher_poll_ms > 0).then(|| Duration::from_millis(self.file_watcher_poll_ms))
    }
}

/// `[theme]` section. Every option is optional; keys are camelCase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThemeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
}

/// `[runner]` section: how the process worker executes a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Program the script path is passed to.
    pub interpreter: String,
    /// Extra arguments placed before the script path.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: "sh".to_string(),
            args: Vec::new(),
        }
    }
}

/// `[client]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Email reported in the new-session user info.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write logs to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Default filter directive when `APPSESSION_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub theme: ThemeConfig,
    pub runner: RunnerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl OptionSource for Config {
    fn options_for_section(&self, section: &str) -> SectionOptions {
        let value = match section {
            "server" => toml::Value::try_from(&self.server),
            "theme" => toml::Value::try_from(&self.theme),
            "runner" => toml::Value::try_from(&self.runner),
            "client" => toml::Value::try_from(&self.client),
            "logging" => toml::Value::try_from(&self.logging),
            _ => return SectionOptions::new(),
        };

        match value {
            Ok(toml::Value::Table(table)) => table.into_iter().collect(),
            Ok(_) => SectionOptions::new(),
            Err(err) => {
                tracing::warn!(section, error = %err, "Failed to snapshot config section");
                SectionOptions::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert!(!config.server.run_on_save);
        assert!(config.server.allow_run_on_save);
        assert_eq!(config.runner.interpreter, "sh");
        assert!(config.theme.base.is_none());
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[server]\nrun_on_save = true\n\n[theme]\nprimaryColor = \"coral\"\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert!(config.server.run_on_save);
        assert_eq!(config.server.max_cached_message_age, 2);
        assert_eq!(config.theme.primary_color.as_deref(), Some("coral"));
        assert!(config.theme.font.is_none());
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[server\nrun_on_save = ").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        assert!(config_path.exists());
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("[server]"));
        assert!(contents.contains("# primaryColor ="));

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.runner.interpreter, "sh");
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_theme_section_only_lists_set_options() {
        let config = Config {
            theme: ThemeConfig {
                base: Some("dark".to_string()),
                text_color: Some("black".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let options = config.options_for_section("theme");
        assert_eq!(options.len(), 2);
        assert_eq!(options["base"].as_str(), Some("dark"));
        assert_eq!(options["textColor"].as_str(), Some("black"));
    }

    #[test]
    fn test_server_section_snapshot() {
        let config = Config::default();
        let options = config.options_for_section("server");
        assert_eq!(options["run_on_save"].as_bool(), Some(false));
        assert_eq!(options["allow_run_on_save"].as_bool(), Some(true));
    }

    #[test]
    fn test_unknown_section_is_empty() {
        assert!(Config::default().options_for_section("nope").is_empty());
    }

    #[test]
    fn test_file_watcher_poll_zero_disables() {
        let server = ServerConfig {
            file_watcher_poll_ms: 0,
            ..Default::default()
        };
        assert_eq!(server.file_watcher_poll(), None);
    }

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let explicit = Path::new("/etc/app/config.toml");
        assert_eq!(paths::resolve(Some(explicit)), explicit);
    }
}
