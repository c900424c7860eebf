//! Chrome/Chromium process management.
//!
//! Starts the browser with remote debugging on a throwaway profile, then
//! discovers the page target over the DevTools HTTP endpoint and attaches
//! a `CdpPage` to it. The process is killed when `ChromeProcess` drops.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::cdp::{find_page_target, CdpPage, TargetInfo};
use crate::config::BrowserConfig;
use crate::types::AgentError;

/// Binaries tried on `PATH` when no executable is configured.
const CANDIDATE_BINARIES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// How long to wait for the DevTools endpoint to come up.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);
const STARTUP_POLL: Duration = Duration::from_millis(250);

/// A running browser process. Killed on drop.
pub struct ChromeProcess {
    child: Child,
    port: u16,
    _profile: TempDir,
}

impl ChromeProcess {
    /// Launch the browser and attach to its initial page.
    pub async fn launch(cfg: &BrowserConfig, headless: bool) -> Result<(Self, CdpPage), AgentError> {
        let executable = resolve_executable(cfg)?;
        let profile = tempfile::Builder::new()
            .prefix("order-runner-profile-")
            .tempdir()?;
        let args = launch_args(cfg, headless, profile.path());

        info!(
            executable = %executable.display(),
            port = cfg.debug_port,
            headless,
            "Launching browser"
        );

        let child = Command::new(&executable)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::Browser(format!("Failed to launch {}: {e}", executable.display()))
            })?;

        let process = Self {
            child,
            port: cfg.debug_port,
            _profile: profile,
        };
        let ws_url = process.wait_for_page_target().await?;
        let page = CdpPage::attach(&ws_url).await?;
        Ok((process, page))
    }

    async fn wait_for_page_target(&self) -> Result<String, AgentError> {
        let client = reqwest::Client::new();
        let list_url = format!("http://127.0.0.1:{}/json/list", self.port);
        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;

        loop {
            match client.get(&list_url).send().await {
                Ok(resp) => match resp.json::<Vec<TargetInfo>>().await {
                    Ok(targets) => {
                        if let Some(url) = find_page_target(&targets) {
                            debug!(url, "Found page target");
                            return Ok(url.to_string());
                        }
                        return self.open_page_target(&client).await;
                    }
                    Err(e) => warn!(error = %e, "Unreadable DevTools target list"),
                },
                Err(e) => debug!(error = %e, "DevTools endpoint not ready yet"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::Browser(format!(
                    "DevTools endpoint on port {} did not come up",
                    self.port
                )));
            }
            tokio::time::sleep(STARTUP_POLL).await;
        }
    }

    async fn open_page_target(&self, client: &reqwest::Client) -> Result<String, AgentError> {
        let new_url = format!("http://127.0.0.1:{}/json/new?about:blank", self.port);
        let target: TargetInfo = client
            .put(&new_url)
            .send()
            .await
            .map_err(|e| AgentError::Browser(format!("Failed to open page: {e}")))?
            .json()
            .await
            .map_err(|e| AgentError::Browser(format!("Failed to parse new page: {e}")))?;
        target
            .websocket_url
            .ok_or_else(|| AgentError::Browser("New page exposes no websocket".into()))
    }

    /// Kill the browser and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to stop browser");
        } else {
            info!("Browser closed");
        }
    }
}

/// Command-line flags for a debuggable browser on `profile`.
pub fn launch_args(cfg: &BrowserConfig, headless: bool, profile: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", cfg.debug_port),
        format!("--user-data-dir={}", profile.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--start-maximized".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.extend(cfg.extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

/// Configured path, then `CHROME_PATH`, then the first candidate on `PATH`.
fn resolve_executable(cfg: &BrowserConfig) -> Result<PathBuf, AgentError> {
    if let Some(path) = &cfg.executable {
        return Ok(path.clone());
    }
    if let Some(path) = std::env::var_os("CHROME_PATH") {
        return Ok(PathBuf::from(path));
    }
    let search = std::env::var_os("PATH").unwrap_or_default();
    find_on_path(&search, CANDIDATE_BINARIES).ok_or_else(|| {
        AgentError::Config(
            "No Chrome/Chromium found; set browser.executable or CHROME_PATH".to_string(),
        )
    })
}

fn find_on_path(search: &std::ffi::OsStr, names: &[&str]) -> Option<PathBuf> {
    std::env::split_paths(search)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}
