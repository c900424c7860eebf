//! Browser driver seam.
//!
//! Defines the `BrowserPage` trait the authenticator and order executor
//! drive, and provides a Chrome DevTools Protocol implementation:
//! - `launcher` — starts a Chrome/Chromium process with remote debugging
//! - `cdp` — JSON-RPC over websocket to a single page target

pub mod cdp;
pub mod launcher;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{AgentError, Cookie};

/// A single browser page the agent owns.
///
/// Every interaction is serialized through one handle; implementors are
/// not expected to support concurrent navigation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the document to finish loading.
    async fn goto(&self, url: &str) -> Result<(), AgentError>;

    /// Wait until `selector` matches an element, failing with
    /// `AgentError::UiTimeout` once `timeout` elapses.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AgentError>;

    /// Whether `selector` currently matches anything. Does not wait.
    async fn probe(&self, selector: &str) -> Result<bool, AgentError>;

    /// Give keyboard focus to the first element matching `selector`.
    async fn focus(&self, selector: &str) -> Result<(), AgentError>;

    /// Select-all and delete in the focused field.
    async fn clear_focused(&self) -> Result<(), AgentError>;

    /// Type into the focused field one character at a time.
    async fn type_text(&self, text: &str, delay: Duration) -> Result<(), AgentError>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> Result<(), AgentError>;

    /// All cookies visible to the current page.
    async fn cookies(&self) -> Result<Vec<Cookie>, AgentError>;

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), AgentError>;
}

/// Timing knobs shared by every scripted UI step.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub selector_timeout: Duration,
    pub type_delay: Duration,
    pub settle: Duration,
}

/// Wait for a text field, focus it, wipe it and type `text`, then settle.
pub async fn fill_field<P>(page: &P, selector: &str, text: &str, pacing: Pacing) -> Result<(), AgentError>
where
    P: BrowserPage + ?Sized,
{
    page.wait_for_selector(selector, pacing.selector_timeout).await?;
    page.focus(selector).await?;
    page.clear_focused().await?;
    page.type_text(text, pacing.type_delay).await?;
    tokio::time::sleep(pacing.settle).await;
    Ok(())
}

/// Wait for a control to appear and click it.
pub async fn click_when_ready<P>(page: &P, selector: &str, timeout: Duration) -> Result<(), AgentError>
where
    P: BrowserPage + ?Sized,
{
    page.wait_for_selector(selector, timeout).await?;
    page.click(selector).await
}
