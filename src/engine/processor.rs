//! Job processor.
//!
//! Parses one job file, runs its order, and files it into the done or
//! error folder. The original is always removed from the watch folder:
//! a job is never retried and never left behind.

use chrono::Utc;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::executor::OrderExecutor;
use crate::browser::BrowserPage;
use crate::config::PathsConfig;
use crate::types::{AgentError, Job, JobOutcome};

pub struct JobProcessor {
    done_dir: PathBuf,
    error_dir: PathBuf,
    executor: OrderExecutor,
}

impl JobProcessor {
    pub fn new(paths: &PathsConfig, executor: OrderExecutor) -> Self {
        Self {
            done_dir: paths.done_dir.clone(),
            error_dir: paths.error_dir.clone(),
            executor,
        }
    }

    /// Process one job file end to end. Never fails: every error is
    /// contained and reported through the returned outcome.
    pub async fn process<P>(&self, page: &P, password: &SecretString, path: &Path) -> JobOutcome
    where
        P: BrowserPage + ?Sized,
    {
        let processed_at = Utc::now().timestamp_millis();
        let file_name = base_name(path);

        // The queue does not deduplicate; a repeat arrival finds nothing left.
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(file = %file_name, "Job file already consumed, skipping");
            return JobOutcome::Skipped;
        }

        info!(file = %file_name, "Processing file...");

        let outcome = match self.run(page, password, path, &file_name, processed_at).await {
            Ok(copy) => JobOutcome::Done { copy },
            Err(e) => {
                error!(file = %file_name, error = %e, "Error processing file");
                self.file_error(path, &file_name, processed_at, &e).await
            }
        };

        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(file = %file_name, "Deleted job file"),
            Err(e) => warn!(file = %file_name, error = %e, "Failed to delete job file"),
        }

        outcome
    }

    async fn run<P>(
        &self,
        page: &P,
        password: &SecretString,
        path: &Path,
        file_name: &str,
        processed_at: i64,
    ) -> Result<PathBuf, AgentError>
    where
        P: BrowserPage + ?Sized,
    {
        let contents = tokio::fs::read(path).await?;
        let job = Job::parse(&contents)?;
        let order = job.order();

        info!(
            symbol = %order.symbol,
            quantity = job.quantity,
            "{} {} share(s) of {}...",
            order.side.verb(),
            order.shares,
            order.symbol
        );

        self.executor.execute(page, password, &order).await?;

        info!(
            symbol = %order.symbol,
            quantity = job.quantity,
            "{} {} share(s) of {}",
            order.side.past(),
            order.shares,
            order.symbol
        );

        let copy = self
            .done_dir
            .join(format!("done-{processed_at}-{file_name}"));
        tokio::fs::copy(path, &copy).await?;
        info!(file = %file_name, dest = %copy.display(), "Copied file to 'done' folder");
        Ok(copy)
    }

    /// Best-effort: copy the job and write its error message. Failures here
    /// are logged and otherwise ignored.
    async fn file_error(
        &self,
        path: &Path,
        file_name: &str,
        processed_at: i64,
        err: &AgentError,
    ) -> JobOutcome {
        let reason = err.to_string();

        let copy_path = self
            .error_dir
            .join(format!("error-{processed_at}-{file_name}"));
        let copy = match tokio::fs::copy(path, &copy_path).await {
            Ok(_) => {
                info!(file = %file_name, "Copied file to 'error' folder");
                Some(copy_path)
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "Failed to copy file to 'error' folder");
                None
            }
        };

        let message_path = self
            .error_dir
            .join(format!("error-message-{processed_at}-{file_name}"));
        let message = match tokio::fs::write(&message_path, &reason).await {
            Ok(()) => {
                info!(file = %file_name, "Wrote error message to 'error' folder");
                Some(message_path)
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "Failed to write error message");
                None
            }
        };

        JobOutcome::Failed {
            reason,
            copy,
            message,
        }
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
