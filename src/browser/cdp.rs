//! Chrome DevTools Protocol page driver.
//!
//! Talks JSON-RPC to one page target over its websocket debugger URL.
//! A writer task drains an unbounded channel into the socket; a reader
//! task resolves pending requests by id and ignores protocol events.
//! Once the socket closes every call fails fast with `AgentError::Browser`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::BrowserPage;
use crate::types::{AgentError, Cookie};

/// How often selector waits re-check the DOM.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on a single navigation.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on one command round trip.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// CDP modifier bitmask for Control.
const MODIFIER_CTRL: u32 = 2;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Entry in the DevTools HTTP `/json/list` response.
#[derive(Debug, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub websocket_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CdpResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpErrorBody>,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    code: i64,
    message: String,
}

/// Pick the first page target that exposes a websocket.
pub fn find_page_target(targets: &[TargetInfo]) -> Option<&str> {
    targets
        .iter()
        .filter(|t| t.kind == "page")
        .find_map(|t| t.websocket_url.as_deref())
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Request/response multiplexer over one DevTools websocket.
pub struct CdpConnection {
    sender: mpsc::UnboundedSender<Message>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self, AgentError> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| AgentError::Browser(format!("Failed to connect to {ws_url}: {e}")))?;
        debug!(url = ws_url, "DevTools websocket connected");

        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "DevTools send failed");
                    break;
                }
            }
        });

        let closed = Arc::new(AtomicBool::new(false));
        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if !msg.is_text() {
                    continue;
                }
                let txt = msg.into_text().unwrap_or_default();
                let response: CdpResponse = match serde_json::from_str(&txt) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "Invalid DevTools message");
                        continue;
                    }
                };
                // Events carry no id
                let Some(id) = response.id else { continue };
                if let Some(tx) = reader_pending.lock().await.remove(&id) {
                    let _ = tx.send(match response.error {
                        Some(err) => Err(format!("{} ({})", err.message, err.code)),
                        None => Ok(response.result.unwrap_or(Value::Null)),
                    });
                }
            }
            debug!("DevTools reader ended, failing pending requests");
            let mut pending = reader_pending.lock().await;
            reader_closed.store(true, Ordering::SeqCst);
            pending.clear();
        });

        Ok(Self {
            sender: tx,
            pending,
            closed,
            next_id: AtomicU64::new(1),
            writer,
            reader,
        })
    }

    /// True once the reader has seen the socket close.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one command and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            // The reader flips `closed` under this lock before clearing.
            let mut pending = self.pending.lock().await;
            if self.is_closed() {
                return Err(AgentError::Browser(format!(
                    "DevTools connection closed before {method}"
                )));
            }
            pending.insert(id, tx);
        }

        let request = json!({ "id": id, "method": method, "params": params });
        if self.sender.send(Message::Text(request.to_string())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AgentError::Browser("DevTools connection closed".into()));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(AgentError::Browser(format!("{method} failed: {message}"))),
            Ok(Err(_)) => Err(AgentError::Browser(format!(
                "DevTools connection closed during {method}"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(AgentError::Browser(format!(
                    "{method} got no response within {}s",
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// A `BrowserPage` backed by a live DevTools connection.
pub struct CdpPage {
    conn: CdpConnection,
}

impl CdpPage {
    /// Attach to a page target and enable the domains the driver relies on.
    pub async fn attach(ws_url: &str) -> Result<Self, AgentError> {
        let conn = CdpConnection::connect(ws_url).await?;
        conn.call("Page.enable", json!({})).await?;
        conn.call("Network.enable", json!({})).await?;
        Ok(Self { conn })
    }

    /// Evaluate an expression and return its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, AgentError> {
        let result = self
            .conn
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("unknown exception");
            return Err(AgentError::Browser(format!("Script threw: {text}")));
        }

        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Classify one polling result. Script and protocol errors are expected
    /// while a document is being replaced and count as "not yet"; a closed
    /// connection is fatal.
    fn poll(&self, result: Result<Value, AgentError>) -> Result<Value, AgentError> {
        match result {
            Err(AgentError::Browser(message)) if !self.conn.is_closed() => {
                debug!(error = %message, "Transient evaluation failure while polling");
                Ok(Value::Null)
            }
            other => other,
        }
    }

    async fn key(&self, params: Value) -> Result<(), AgentError> {
        self.conn.call("Input.dispatchKeyEvent", params).await.map(|_| ())
    }

    async fn mouse(&self, kind: &str, x: f64, y: f64) -> Result<(), AgentError> {
        self.conn
            .call(
                "Input.dispatchMouseEvent",
                json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
            )
            .await
            .map(|_| ())
    }
}

/// Quote a selector as a JavaScript string literal.
fn js_string(selector: &str) -> String {
    Value::String(selector.to_string()).to_string()
}

fn exists_script(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

fn focus_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; el.focus(); return true; }})()",
        js_string(selector)
    )
}

fn center_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return null; \
         el.scrollIntoView({{ block: 'center', inline: 'center' }}); \
         const r = el.getBoundingClientRect(); \
         return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }}; }})()",
        js_string(selector)
    )
}

#[async_trait]
impl BrowserPage for CdpPage {
    async fn goto(&self, url: &str) -> Result<(), AgentError> {
        debug!(url, "Navigating");
        let result = self.conn.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(AgentError::Browser(format!("Navigation to {url} failed: {error}")));
        }

        let deadline = Instant::now() + NAVIGATION_TIMEOUT;
        loop {
            // The old document can still report "complete" right after navigate.
            tokio::time::sleep(POLL_INTERVAL).await;
            if self.poll(self.evaluate("document.readyState").await)? == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AgentError::Browser(format!("Navigation to {url} timed out")));
            }
        }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), AgentError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.poll(self.probe(selector).await.map(Value::Bool))? == true {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AgentError::UiTimeout {
                    selector: selector.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn probe(&self, selector: &str) -> Result<bool, AgentError> {
        Ok(self.evaluate(&exists_script(selector)).await? == true)
    }

    async fn focus(&self, selector: &str) -> Result<(), AgentError> {
        if self.evaluate(&focus_script(selector)).await? == true {
            Ok(())
        } else {
            Err(AgentError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn clear_focused(&self) -> Result<(), AgentError> {
        self.key(json!({
            "type": "rawKeyDown", "key": "Control", "code": "ControlLeft",
            "windowsVirtualKeyCode": 17, "modifiers": MODIFIER_CTRL,
        }))
        .await?;
        self.key(json!({
            "type": "rawKeyDown", "key": "a", "code": "KeyA",
            "windowsVirtualKeyCode": 65, "modifiers": MODIFIER_CTRL,
            "commands": ["selectAll"],
        }))
        .await?;
        self.key(json!({
            "type": "keyUp", "key": "a", "code": "KeyA",
            "windowsVirtualKeyCode": 65, "modifiers": MODIFIER_CTRL,
        }))
        .await?;
        self.key(json!({
            "type": "keyUp", "key": "Control", "code": "ControlLeft",
            "windowsVirtualKeyCode": 17,
        }))
        .await?;
        self.key(json!({
            "type": "rawKeyDown", "key": "Backspace", "code": "Backspace",
            "windowsVirtualKeyCode": 8,
        }))
        .await?;
        self.key(json!({
            "type": "keyUp", "key": "Backspace", "code": "Backspace",
            "windowsVirtualKeyCode": 8,
        }))
        .await
    }

    async fn type_text(&self, text: &str, delay: Duration) -> Result<(), AgentError> {
        for ch in text.chars() {
            let s = ch.to_string();
            self.key(json!({ "type": "keyDown", "key": s, "text": s })).await?;
            self.key(json!({ "type": "keyUp", "key": s })).await?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), AgentError> {
        let center = self.evaluate(&center_script(selector)).await?;
        let (Some(x), Some(y)) = (
            center.get("x").and_then(Value::as_f64),
            center.get("y").and_then(Value::as_f64),
        ) else {
            return Err(AgentError::ElementNotFound {
                selector: selector.to_string(),
            });
        };

        self.mouse("mouseMoved", x, y).await?;
        self.mouse("mousePressed", x, y).await?;
        self.mouse("mouseReleased", x, y).await
    }

    async fn cookies(&self) -> Result<Vec<Cookie>, AgentError> {
        let result = self.conn.call("Network.getCookies", json!({})).await?;
        let cookies = result.get("cookies").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(cookies)
            .map_err(|e| AgentError::Browser(format!("Unexpected cookie payload: {e}")))
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<(), AgentError> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params: Vec<Value> = cookies.iter().map(Cookie::to_restorable).collect();
        self.conn
            .call("Network.setCookies", json!({ "cookies": params }))
            .await
            .map(|_| ())
    }
}
