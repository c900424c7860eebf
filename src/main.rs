//! order-runner entry point.
//!
//! Loads configuration, initialises structured logging, launches the
//! browser, restores the saved session and logs in. `order-runner auth`
//! then logs out and exits; any other invocation watches the job folder
//! until Ctrl+C.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use order_runner::browser::launcher::ChromeProcess;
use order_runner::browser::BrowserPage;
use order_runner::config::{self, Credentials};
use order_runner::engine::agent::Agent;
use order_runner::engine::auth::Authenticator;
use order_runner::engine::watcher::JobWatcher;
use order_runner::storage;
use order_runner::types::RunMode;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let cfg = config::AppConfig::load_or_default("config.toml")?;
    let mode = RunMode::from_arg(std::env::args().nth(1).as_deref());
    let credentials = Credentials::from_env()?;

    info!(
        agent_name = %cfg.agent.name,
        run_id = %uuid::Uuid::new_v4(),
        mode = %mode,
        "order-runner starting up"
    );

    let headless = mode == RunMode::Service && cfg.browser.headless;
    let (browser, page) = ChromeProcess::launch(&cfg.browser, headless)
        .await
        .context("Failed to start browser")?;

    let session_file = &cfg.paths.session_file;
    if storage::restore_session(&page, session_file).await {
        info!("Restored saved session");
    }

    let authenticator = Authenticator::new(cfg.site.clone(), cfg.timeouts.clone());
    let login_timeout = Duration::from_millis(match mode {
        RunMode::AuthOnly => cfg.timeouts.auth_only_login_ms,
        RunMode::Service => cfg.timeouts.service_login_ms,
    });
    authenticator
        .login(&page, &credentials, login_timeout)
        .await
        .context("Login failed")?;
    storage::save_session(&page, session_file).await;

    match mode {
        RunMode::AuthOnly => {
            authenticator
                .logout_and_save(&page, session_file)
                .await
                .context("Logout failed")?;
        }
        RunMode::Service => {
            run_service(&cfg, &credentials, page).await?;
        }
    }

    browser.shutdown().await;
    info!("order-runner shut down cleanly.");
    Ok(())
}

async fn run_service<P: BrowserPage>(
    cfg: &config::AppConfig,
    credentials: &Credentials,
    page: P,
) -> Result<()> {
    cfg.paths.ensure_dirs()?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _watcher = JobWatcher::spawn(&cfg.paths.watch_dir, &cfg.watcher, tx)
        .context("Failed to watch job folder")?;

    let mut agent = Agent::new(page, credentials, cfg);

    info!(
        interval_ms = cfg.agent.drain_interval_ms,
        "Entering drain loop. Press Ctrl+C to stop."
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    agent.run_until(&mut rx, cfg.drain_interval(), shutdown).await;

    agent.shutdown().await;
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("order_runner=info"));

    let json_logging = std::env::var("ORDER_RUNNER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
