//! Shared types for the order runner.
//!
//! These types form the data model used across all modules: the job file
//! format, the order derived from it, the persisted session, and the error
//! taxonomy that decides how each failure is routed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A single buy/sell instruction as dropped into the watch folder.
///
/// The sign of `quantity` encodes direction: negative sells, positive buys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub symbol: String,
    pub quantity: i64,
}

impl Job {
    /// Parse a job file's contents.
    pub fn parse(contents: &[u8]) -> Result<Self, AgentError> {
        let job: Job = serde_json::from_slice(contents)
            .map_err(|e| AgentError::JobParse(e.to_string()))?;
        if job.symbol.trim().is_empty() {
            return Err(AgentError::JobParse("symbol must not be empty".into()));
        }
        if job.quantity == 0 {
            return Err(AgentError::JobParse("quantity must be non-zero".into()));
        }
        Ok(job)
    }

    pub fn order(&self) -> Order {
        Order {
            symbol: self.symbol.trim().to_uppercase(),
            side: if self.quantity < 0 { Side::Sell } else { Side::Buy },
            shares: self.quantity.unsigned_abs(),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x{}", self.symbol, self.quantity)
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Present participle for "about to" log lines.
    pub fn verb(&self) -> &'static str {
        match self {
            Side::Buy => "Buying",
            Side::Sell => "Selling",
        }
    }

    /// Past tense for "done" log lines.
    pub fn past(&self) -> &'static str {
        match self {
            Side::Buy => "Bought",
            Side::Sell => "Sold",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A normalized market order ready for the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Trimmed, upper-cased ticker.
    pub symbol: String,
    pub side: Side,
    /// Share count, always positive.
    pub shares: u64,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.side, self.shares, self.symbol)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Fields the DevTools cookie export emits but `Network.setCookies` rejects.
const OUTPUT_ONLY_COOKIE_FIELDS: &[&str] = &["size", "session"];

/// One browser cookie, kept as the opaque JSON object the driver exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cookie(pub Map<String, Value>);

impl Cookie {
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// The cookie in a shape the driver accepts for restore: output-only
    /// fields stripped and session cookies without an expiry.
    pub fn to_restorable(&self) -> Value {
        let mut obj = self.0.clone();
        for field in OUTPUT_ONLY_COOKIE_FIELDS {
            obj.remove(*field);
        }
        let non_positive_expiry = obj
            .get("expires")
            .and_then(Value::as_f64)
            .is_some_and(|e| e <= 0.0);
        if non_positive_expiry {
            obj.remove("expires");
        }
        Value::Object(obj)
    }
}

/// Persisted authentication state: the page's cookies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session {
    pub cookies: Vec<Cookie>,
}

impl Session {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Job outcome
// ---------------------------------------------------------------------------

/// Where a processed job ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Order executed; the job was copied into the done folder.
    Done { copy: PathBuf },
    /// Parse or execution failed; the job and its message went to the error
    /// folder. Either path is `None` when that best-effort write failed.
    Failed {
        reason: String,
        copy: Option<PathBuf>,
        message: Option<PathBuf>,
    },
    /// The file was gone when its turn came, e.g. a duplicate arrival of a
    /// job that was already filed. Nothing was written.
    Skipped,
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }
}

// ---------------------------------------------------------------------------
// Run mode
// ---------------------------------------------------------------------------

/// Process run mode, selected by the first positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Log in, log out and exit. Mints a fresh session interactively.
    AuthOnly,
    /// Log in, then watch for jobs until interrupted.
    Service,
}

impl RunMode {
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            Some("auth") => RunMode::AuthOnly,
            _ => RunMode::Service,
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::AuthOnly => write!(f, "auth-only"),
            RunMode::Service => write!(f, "service"),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the order runner.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Session load error: {0}")]
    SessionLoad(String),

    #[error("Login did not complete within {timeout_ms}ms")]
    AuthenticationTimeout { timeout_ms: u64 },

    #[error("Invalid job file: {0}")]
    JobParse(String),

    #[error("Cannot sell '{symbol}'!")]
    UnsupportedInstrument { symbol: String },

    #[error("Timed out after {timeout_ms}ms waiting for selector: {selector}")]
    UiTimeout { selector: String, timeout_ms: u64 },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Order for '{symbol}' was submitted but never confirmed")]
    OrderUnconfirmed { symbol: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::UiTimeout { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
