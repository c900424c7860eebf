//! The agent context.
//!
//! Owns the single browser page, the job queue, and the processor. The
//! drain loop is the only consumer: one tick pops at most one job, runs
//! it to completion, then persists the session.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::executor::OrderExecutor;
use super::processor::JobProcessor;
use super::queue::JobQueue;
use crate::browser::BrowserPage;
use crate::config::{AppConfig, Credentials};
use crate::storage;
use crate::types::JobOutcome;

/// Running totals, reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Done { .. } => self.succeeded += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
            JobOutcome::Skipped => return,
        }
        self.processed += 1;
    }
}

impl fmt::Display for JobStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} succeeded={} failed={}",
            self.processed, self.succeeded, self.failed
        )
    }
}

pub struct Agent<P: BrowserPage> {
    page: P,
    password: SecretString,
    processor: JobProcessor,
    queue: JobQueue,
    session_file: PathBuf,
    stats: JobStats,
}

impl<P: BrowserPage> Agent<P> {
    pub fn new(page: P, credentials: &Credentials, cfg: &AppConfig) -> Self {
        let executor = OrderExecutor::new(cfg.site.clone(), cfg.timeouts.clone());
        Self {
            page,
            password: SecretString::new(credentials.password.expose_secret().clone()),
            processor: JobProcessor::new(&cfg.paths, executor),
            queue: JobQueue::new(),
            session_file: cfg.paths.session_file.clone(),
            stats: JobStats::default(),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn stats(&self) -> JobStats {
        self.stats
    }

    pub fn enqueue(&mut self, path: PathBuf) {
        debug!(path = %path.display(), queued = self.queue.len() + 1, "Job queued");
        self.queue.push(path);
    }

    /// One drain step. No-op while busy or when nothing is queued.
    pub async fn tick(&mut self) -> Option<JobOutcome> {
        let path = self.queue.begin()?;

        let outcome = self.processor.process(&self.page, &self.password, &path).await;
        if outcome != JobOutcome::Skipped {
            storage::save_session(&self.page, &self.session_file).await;
        }

        self.stats.record(&outcome);
        self.queue.finish();
        Some(outcome)
    }

    /// Feed arrivals into the queue and drain it every `interval` until
    /// `shutdown` resolves. Arrivals that come in while a job is running
    /// wait in the channel. A job still in flight at shutdown is abandoned
    /// and its file stays in the watch folder.
    pub async fn run_until<F>(
        &mut self,
        arrivals: &mut UnboundedReceiver<PathBuf>,
        interval: Duration,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(path) = arrivals.recv() => self.enqueue(path),
                _ = ticker.tick() => {
                    let interrupted = tokio::select! {
                        _ = self.tick() => false,
                        _ = &mut shutdown => true,
                    };
                    if interrupted {
                        warn!(pending = self.queue.len(), "Shutdown signal received, abandoning job in flight.");
                        self.queue.finish();
                        break;
                    }
                }
                _ = &mut shutdown => {
                    info!(pending = self.queue.len(), "Shutdown signal received.");
                    break;
                }
            }
        }
    }

    /// Persist the session one last time and hand back the page.
    pub async fn shutdown(self) -> P {
        storage::save_session(&self.page, &self.session_file).await;
        info!(stats = %self.stats, "Agent stopped");
        self.page
    }
}
