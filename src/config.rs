//! Configuration loading and defaults for screensaverd.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the saver shows while active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Blank screen, no theme (default).
    #[default]
    Blank,
    /// Always the first configured theme.
    Single,
    /// Random theme, cycled every `cycle_timeout_seconds`.
    Random,
}

/// Main configuration for screensaverd.
///
/// This is the preferences snapshot handed to the coordinator on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Whether locking is allowed at all (default: true).
    pub lock_enabled: bool,

    /// Lock the session once the saver has been active for `lock_timeout_seconds`.
    pub lock_with_saver_enabled: bool,

    /// Delay between saver activation and lock (default: 0).
    pub lock_timeout_seconds: u64,

    /// Offer a logout button in the unlock prompt.
    pub logout_enabled: bool,

    /// How long the session must be active before logout is offered (default: 7200).
    pub logout_timeout_seconds: u64,

    /// Command the unlock prompt runs to log out.
    pub logout_command: Option<String>,

    /// Offer an on-screen keyboard in the unlock prompt.
    pub keyboard_enabled: bool,

    /// Command that starts the on-screen keyboard.
    pub keyboard_command: Option<String>,

    /// Show messages sent through `ShowMessage` (default: true).
    pub status_message_enabled: bool,

    /// Offer user switching in the unlock prompt.
    pub user_switch_enabled: bool,

    /// Seconds between theme changes in random mode (default: 600).
    pub cycle_timeout_seconds: u64,

    /// Theme selection mode.
    pub mode: Mode,

    /// Show the saver on idle; when false idle goes straight to lock.
    pub saver_enabled: bool,

    /// Theme names available to the renderer.
    pub themes: Vec<String>,

    /// Activate on idle (default: true).
    pub idle_activation_enabled: bool,

    /// Lock before the system suspends (default: true).
    pub sleep_activation_enabled: bool,

    /// Idle time before activation in seconds (default: 600).
    pub idle_timeout_seconds: u64,

    /// Idle check interval in seconds (default: 5).
    pub idle_check_interval_seconds: u64,

    /// Delay before releasing the input grab after deactivation (default: 500).
    pub grab_release_delay_millis: u64,

    /// External authenticator spawned to unlock the session.
    /// Exit status 0 means the user authenticated.
    pub unlock_command: Option<String>,

    /// Dry run mode: log commands and skip the input grab.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_enabled: true,
            lock_with_saver_enabled: true,
            lock_timeout_seconds: 0,
            logout_enabled: false,
            logout_timeout_seconds: 7200,
            logout_command: None,
            keyboard_enabled: false,
            keyboard_command: None,
            status_message_enabled: true,
            user_switch_enabled: false,
            cycle_timeout_seconds: 600,
            mode: Mode::default(),
            saver_enabled: true,
            themes: Vec::new(),
            idle_activation_enabled: true,
            sleep_activation_enabled: true,
            idle_timeout_seconds: 600,
            idle_check_interval_seconds: 5,
            grab_release_delay_millis: 500,
            unlock_command: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the given path, the default path, or return defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(default_path) = default_path()
            && default_path.exists()
        {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_secs(self.logout_timeout_seconds)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn idle_check_interval(&self) -> Duration {
        // A zero interval would spin the poller.
        Duration::from_secs(self.idle_check_interval_seconds.max(1))
    }

    pub fn grab_release_delay(&self) -> Duration {
        Duration::from_millis(self.grab_release_delay_millis)
    }
}

/// Default config location: `$XDG_CONFIG_HOME/screensaverd/config.toml`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("screensaverd").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.lock_enabled);
        assert!(config.lock_with_saver_enabled);
        assert!(config.saver_enabled);
        assert_eq!(config.mode, Mode::Blank);
        assert_eq!(config.idle_timeout_seconds, 600);
        assert!(config.unlock_command.is_none());
        assert!(!config.dry_run);
    }

    #[test]
    fn test_durations() {
        let config = Config {
            lock_timeout_seconds: 30,
            idle_check_interval_seconds: 0,
            grab_release_delay_millis: 250,
            ..Config::default()
        };

        assert_eq!(config.lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.idle_check_interval(), Duration::from_secs(1));
        assert_eq!(config.grab_release_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            lock_enabled = false
            lock_timeout_seconds = 120
            mode = "random"
            themes = ["popsquares", "glmatrix"]
            logout_enabled = true
            logout_command = "loginctl terminate-session self"
            idle_timeout_seconds = 300
            unlock_command = "/usr/lib/screensaverd/unlock-dialog"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.lock_enabled);
        assert_eq!(config.lock_timeout_seconds, 120);
        assert_eq!(config.mode, Mode::Random);
        assert_eq!(
            config.themes,
            vec!["popsquares".to_string(), "glmatrix".to_string()]
        );
        assert!(config.logout_enabled);
        assert_eq!(
            config.logout_command.as_deref(),
            Some("loginctl terminate-session self")
        );
        assert_eq!(config.idle_timeout_seconds, 300);
        // Untouched fields keep their defaults
        assert!(config.saver_enabled);
        assert_eq!(config.cycle_timeout_seconds, 600);
    }

    #[test]
    fn test_parse_invalid_mode() {
        let result: Result<Config, _> = toml::from_str(r#"mode = "spinning""#);
        assert!(result.is_err());
    }
}
