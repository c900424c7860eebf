//! Session persistence.
//!
//! Saves and restores the browser's cookies to/from a JSON file so a
//! restarted process resumes the last authenticated session. Every
//! operation here is best-effort: failures are logged, never propagated.

use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserPage;
use crate::types::{AgentError, Session};

/// Default session file path.
pub const DEFAULT_SESSION_FILE: &str = "cookies.json";

fn read_session(path: &Path) -> Result<Session, AgentError> {
    let json = std::fs::read(path)
        .map_err(|e| AgentError::SessionLoad(format!("read {}: {e}", path.display())))?;
    serde_json::from_slice(&json)
        .map_err(|e| AgentError::SessionLoad(format!("parse {}: {e}", path.display())))
}

/// Load a session from disk.
/// Returns None if the file is missing or unreadable (no prior session).
pub fn load_session(path: impl AsRef<Path>) -> Option<Session> {
    let path = path.as_ref();

    if !path.exists() {
        info!(path = %path.display(), "No saved session found, starting fresh");
        return None;
    }

    match read_session(path) {
        Ok(session) => {
            info!(path = %path.display(), cookies = session.cookies.len(), "Session loaded from disk");
            Some(session)
        }
        Err(e) => {
            warn!(error = %e, "Ignoring saved session");
            None
        }
    }
}

/// Load the saved session into the page. Returns whether cookies were applied.
pub async fn restore_session<P>(page: &P, path: impl AsRef<Path>) -> bool
where
    P: BrowserPage + ?Sized,
{
    let Some(session) = load_session(path) else {
        return false;
    };
    if session.is_empty() {
        return false;
    }
    match page.set_cookies(&session.cookies).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Failed to apply saved session");
            false
        }
    }
}

async fn write_session<P>(page: &P, path: &Path) -> Result<usize, AgentError>
where
    P: BrowserPage + ?Sized,
{
    let session = Session::new(page.cookies().await?);
    let json = serde_json::to_vec(&session)
        .map_err(|e| AgentError::Browser(format!("Failed to serialise cookies: {e}")))?;
    tokio::fs::write(path, json).await?;
    Ok(session.cookies.len())
}

/// Overwrite the session file with the page's current cookies.
pub async fn save_session<P>(page: &P, path: impl AsRef<Path>)
where
    P: BrowserPage + ?Sized,
{
    let path = path.as_ref();
    match write_session(page, path).await {
        Ok(count) => debug!(path = %path.display(), cookies = count, "Session saved"),
        Err(e) => error!(path = %path.display(), error = %e, "Failed to save session"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
