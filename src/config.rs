//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section and key is optional; omitted values take the defaults
//! the agent has always run with. Credentials never live in the file,
//! they are resolved from the environment at startup.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::browser::Pacing;

/// Environment variable holding the brokerage username.
pub const USER_ENV: &str = "RH_USER";
/// Environment variable holding the brokerage password.
pub const PASSWORD_ENV: &str = "RH_PASSWORD";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub paths: PathsConfig,
    pub watcher: WatcherConfig,
    pub browser: BrowserConfig,
    pub site: SiteConfig,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    /// Period of the drain loop.
    pub drain_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "order-runner".to_string(),
            drain_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub watch_dir: PathBuf,
    pub done_dir: PathBuf,
    pub error_dir: PathBuf,
    pub session_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("new"),
            done_dir: PathBuf::from("done"),
            error_dir: PathBuf::from("error"),
            session_file: PathBuf::from(crate::storage::DEFAULT_SESSION_FILE),
        }
    }
}

impl PathsConfig {
    /// Create the watch, done and error folders if they are missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.watch_dir, &self.done_dir, &self.error_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Write-finish detection for newly created job files.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatcherConfig {
    pub stability_threshold_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stability_threshold_ms: 2000,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chrome/Chromium binary. Discovered when unset.
    pub executable: Option<PathBuf>,
    pub debug_port: u16,
    /// Applies to service mode only; auth-only mode always runs headed.
    pub headless: bool,
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            debug_port: 9222,
            headless: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub login_path: String,
    /// Prefix joined with the symbol to reach an instrument page.
    pub instrument_path: String,
    /// When set, an order only counts as placed once this appears.
    pub confirmation_selector: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://robinhood.com".to_string(),
            login_path: "/login".to_string(),
            instrument_path: "/stocks/".to_string(),
            confirmation_selector: None,
        }
    }
}

impl SiteConfig {
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.login_path)
    }

    pub fn instrument_url(&self, symbol: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            self.instrument_path,
            urlencoding::encode(symbol)
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub service_login_ms: u64,
    pub auth_only_login_ms: u64,
    /// Default bound on every selector wait.
    pub selector_ms: u64,
    pub type_delay_ms: u64,
    /// Pause after text entry and ordinary clicks.
    pub settle_ms: u64,
    /// Pause after submit and second-factor confirmation.
    pub submit_settle_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            service_login_ms: 30_000,
            auth_only_login_ms: 300_000,
            selector_ms: 30_000,
            type_delay_ms: 25,
            settle_ms: 500,
            submit_settle_ms: 2000,
        }
    }
}

impl TimeoutsConfig {
    pub fn selector(&self) -> Duration {
        Duration::from_millis(self.selector_ms)
    }

    pub fn type_delay(&self) -> Duration {
        Duration::from_millis(self.type_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn submit_settle(&self) -> Duration {
        Duration::from_millis(self.submit_settle_ms)
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            selector_timeout: self.selector(),
            type_delay: self.type_delay(),
            settle: self.settle(),
        }
    }
}

/// Brokerage login credentials.
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Read `RH_USER` / `RH_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        let username = AppConfig::resolve_env(USER_ENV)?;
        let password = AppConfig::resolve_env(PASSWORD_ENV)?;
        Ok(Self::new(username, password))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Resolve an environment variable name to its value.
    /// Read a required environment variable. Blank counts as unset.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        let value = std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))?;
        anyhow::ensure!(!value.trim().is_empty(), "Environment variable is empty: {env_name}");
        Ok(value)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.agent.drain_interval_ms.max(1))
    }
}
