//! Playwright browser automation
//!
//! A long-lived Node process runs `driver.js` and exchanges JSON lines with
//! the bridge over stdio. Commands carry a sequence number and are answered
//! out of order; network responses stream back as events and feed the
//! [`PageSurface`] response subscription.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::{broadcast, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};

use refcheck_core::{ElementQuery, NetworkResponse, PageSurface, ResponseFeed};

use crate::error::{E2eError, E2eResult};
use crate::spec::{JourneyStep, SubmitSpec, Viewport};

const DRIVER_SCRIPT: &str = include_str!("driver.js");

/// Extra time granted to the driver to report its own timeout
const REPLY_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(format!("unknown browser '{}'", other)),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Joined to relative navigation URLs
    pub base_url: String,

    /// Directory whose node_modules provides `playwright`
    pub project_dir: PathBuf,

    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,

    /// Default timeout for page actions
    pub action_timeout: Duration,

    /// How long the browser may take to come up
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.pws.int.cruk.org".to_string(),
            project_dir: PathBuf::from("."),
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport {
                width: 1280,
                height: 720,
            },
            action_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of executing a journey step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    /// An optional step whose element never showed up
    #[serde(default)]
    pub skipped: bool,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    reply: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timeout: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DriverEvent {
    Ready,
    Response {
        id: u64,
        url: String,
        method: String,
        status: u16,
    },
    Fatal {
        error: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DriverMessage {
    Reply(Reply),
    Event(DriverEvent),
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Handle to a running Playwright driver with one browser page
pub struct PlaywrightBridge {
    child: AsyncMutex<Child>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    pending: PendingReplies,
    responses: broadcast::Sender<NetworkResponse>,
    next_seq: AtomicU64,
    reader: JoinHandle<()>,
    base_url: String,
    action_timeout: Duration,
    _workdir: tempfile::TempDir,
}

impl PlaywrightBridge {
    /// Spawn the driver and wait until its browser page is ready
    pub async fn launch(config: &PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(config)?;

        let workdir = tempfile::tempdir()?;
        let script = workdir.path().join("driver.js");
        std::fs::write(&script, DRIVER_SCRIPT)?;

        let options = json!({
            "browser": config.browser.as_str(),
            "headless": config.headless,
            "viewport": config.viewport,
            "timeout_ms": config.action_timeout.as_millis() as u64,
        });

        let mut child = TokioCommand::new("node")
            .arg(&script)
            .arg(options.to_string())
            .current_dir(&config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| E2eError::Driver(format!("failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Driver("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Driver("driver stdout unavailable".to_string()))?;

        let (responses, _) = broadcast::channel(256);
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = tokio::spawn(read_driver(
            FramedRead::new(stdout, LinesCodec::new()),
            pending.clone(),
            responses.clone(),
            ready_tx,
        ));

        let bridge = Self {
            child: AsyncMutex::new(child),
            stdin: AsyncMutex::new(Some(stdin)),
            pending,
            responses,
            next_seq: AtomicU64::new(1),
            reader,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            action_timeout: config.action_timeout,
            _workdir: workdir,
        };

        match timeout(config.launch_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(reason))) => return Err(E2eError::Driver(reason)),
            Ok(Err(_)) => return Err(E2eError::DriverGone("launch".to_string())),
            Err(_) => return Err(E2eError::Timeout("browser launch".to_string())),
        }

        info!(
            "Launched {} ({})",
            config.browser.as_str(),
            if config.headless { "headless" } else { "headed" }
        );
        Ok(bridge)
    }

    /// Check if Playwright is installed
    pub fn check_playwright_installed(config: &PlaywrightConfig) -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["--no-install", "playwright", "--version"])
            .current_dir(&config.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Send one command and wait for its reply
    async fn request(&self, op: &str, args: Value, wait: Duration) -> E2eResult<Value> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            seq,
        };

        let line = serde_json::to_string(&json!({ "seq": seq, "op": op, "args": args }))?;
        {
            let mut stdin = self.stdin.lock().await;
            let stdin = stdin
                .as_mut()
                .ok_or_else(|| E2eError::DriverGone(op.to_string()))?;
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }

        let reply = match timeout(wait + REPLY_GRACE, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(E2eError::DriverGone(op.to_string())),
            Err(_) => return Err(E2eError::Timeout(format!("driver reply to '{}'", op))),
        };

        if reply.ok {
            Ok(reply.value)
        } else if reply.timeout {
            Err(E2eError::Timeout(format!(
                "{} ({})",
                op,
                reply.error.unwrap_or_default()
            )))
        } else {
            Err(E2eError::Driver(
                reply.error.unwrap_or_else(|| format!("{} failed", op)),
            ))
        }
    }

    async fn request_text(&self, op: &str, args: Value, wait: Duration) -> E2eResult<String> {
        match self.request(op, args, wait).await? {
            Value::String(text) => Ok(text),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    /// Execute a single journey step
    pub async fn execute_step(&self, step: &JourneyStep) -> StepResult {
        let start = std::time::Instant::now();
        let step_name = step_name(step);

        debug!("Executing step: {}", step_name);

        let result = match step {
            JourneyStep::Sleep { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            JourneyStep::Log { message } => {
                info!("[JOURNEY] {}", message);
                Ok(())
            }
            _ => match step_command(step, &self.base_url) {
                Some((op, args)) => {
                    let wait = step_timeout(step).unwrap_or(self.action_timeout);
                    self.request(op, args, wait).await.map(|_| ())
                }
                None => Ok(()),
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let optional = matches!(step, JourneyStep::Click { optional: true, .. });

        match result {
            Ok(()) => StepResult {
                success: true,
                step_name,
                duration_ms,
                skipped: false,
                error: None,
            },
            Err(e) if optional => {
                debug!("Optional step {} skipped: {}", step_name, e);
                StepResult {
                    success: true,
                    step_name,
                    duration_ms,
                    skipped: true,
                    error: None,
                }
            }
            Err(e) => StepResult {
                success: false,
                step_name,
                duration_ms,
                skipped: false,
                error: Some(e.to_string()),
            },
        }
    }

    /// Click the submit control; any failure is a dispatch failure
    pub async fn submit(&self, submit: &SubmitSpec) -> refcheck_core::Result<()> {
        let args = json!({ "selector": submit.selector, "timeout_ms": submit.timeout_ms });
        self.request("click", args, Duration::from_millis(submit.timeout_ms))
            .await
            .map(|_| ())
            .map_err(|e| refcheck_core::Error::DispatchFailure(e.to_string()))
    }

    /// Close the browser: EOF on stdin, then SIGTERM, then kill
    pub async fn shutdown(&self) {
        self.stdin.lock().await.take();
        let mut child = self.child.lock().await;

        if let Ok(Ok(status)) = timeout(Duration::from_secs(5), child.wait()).await {
            debug!("Driver exited with {}", status);
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && timeout(Duration::from_millis(500), child.wait()).await.is_ok()
            {
                return;
            }
        }

        warn!("Driver did not exit, killing it");
        let _ = child.kill().await;
    }
}

impl Drop for PlaywrightBridge {
    fn drop(&mut self) {
        self.reader.abort();
        let child = self.child.get_mut();
        if let Some(pid) = child.id() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                    return;
                }
            }
            let _ = child.start_kill();
        }
    }
}

/// Drops the reply slot when a request is abandoned
struct PendingGuard<'a> {
    pending: &'a PendingReplies,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.seq);
    }
}

async fn read_driver(
    mut lines: FramedRead<ChildStdout, LinesCodec>,
    pending: PendingReplies,
    responses: broadcast::Sender<NetworkResponse>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Unreadable driver output: {}", e);
                break;
            }
        };

        match serde_json::from_str::<DriverMessage>(&line) {
            Ok(DriverMessage::Reply(reply)) => match pending.lock().remove(&reply.reply) {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!("Discarding reply {} nobody waits for", reply.reply),
            },
            Ok(DriverMessage::Event(DriverEvent::Ready)) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(DriverMessage::Event(DriverEvent::Response {
                id,
                url,
                method,
                status,
            })) => {
                let _ = responses.send(NetworkResponse::new(id, method, url, status));
            }
            Ok(DriverMessage::Event(DriverEvent::Fatal { error: reason })) => {
                error!("Playwright driver failed: {}", reason);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(reason));
                }
            }
            Err(_) => debug!("driver: {}", line),
        }
    }

    debug!("Driver output closed");
    pending.lock().clear();
}

/// Generate a display name for a step
pub fn step_name(step: &JourneyStep) -> String {
    match step {
        JourneyStep::Navigate { url, .. } => format!("navigate:{}", url),
        JourneyStep::Click { selector, .. } => format!("click:{}", selector),
        JourneyStep::Fill { selector, .. } => format!("fill:{}", selector),
        JourneyStep::Select { selector, .. } => format!("select:{}", selector),
        JourneyStep::Check { selector, .. } => format!("check:{}", selector),
        JourneyStep::Uncheck { selector, .. } => format!("uncheck:{}", selector),
        JourneyStep::Press { key, .. } => format!("press:{}", key),
        JourneyStep::Wait { selector, .. } => format!("wait:{}", selector),
        JourneyStep::Sleep { ms } => format!("sleep:{}ms", ms),
        JourneyStep::Log { message } => {
            format!("log:{}", message.chars().take(30).collect::<String>())
        }
    }
}

fn step_timeout(step: &JourneyStep) -> Option<Duration> {
    match step {
        JourneyStep::Click {
            timeout_ms: Some(ms),
            ..
        }
        | JourneyStep::Wait { timeout_ms: ms, .. } => Some(Duration::from_millis(*ms)),
        _ => None,
    }
}

/// The driver command a step translates to; `None` for steps the bridge
/// handles itself
pub fn step_command(step: &JourneyStep, base_url: &str) -> Option<(&'static str, Value)> {
    let command = match step {
        JourneyStep::Navigate {
            url,
            wait_for_selector,
        } => {
            let url = if url.starts_with('/') {
                format!("{}{}", base_url.trim_end_matches('/'), url)
            } else {
                url.clone()
            };
            ("goto", json!({ "url": url, "wait_for_selector": wait_for_selector }))
        }
        JourneyStep::Click {
            selector,
            timeout_ms,
            force,
            ..
        } => (
            "click",
            json!({ "selector": selector, "timeout_ms": timeout_ms, "force": force }),
        ),
        JourneyStep::Fill {
            selector,
            value,
            frame,
        } => (
            "fill",
            json!({ "selector": selector, "value": value, "frame": frame }),
        ),
        JourneyStep::Select { selector, label } => {
            ("select", json!({ "selector": selector, "label": label }))
        }
        JourneyStep::Check { selector, force } => {
            ("check", json!({ "selector": selector, "force": force }))
        }
        JourneyStep::Uncheck { selector, force } => {
            ("uncheck", json!({ "selector": selector, "force": force }))
        }
        JourneyStep::Press { selector, key } => {
            ("press", json!({ "selector": selector, "key": key }))
        }
        JourneyStep::Wait {
            selector,
            timeout_ms,
            state,
        } => (
            "wait_state",
            json!({ "selector": selector, "timeout_ms": timeout_ms, "state": state.as_str() }),
        ),
        JourneyStep::Sleep { .. } | JourneyStep::Log { .. } => return None,
    };
    Some(command)
}

#[async_trait]
impl PageSurface for PlaywrightBridge {
    async fn subscribe_responses(&self) -> refcheck_core::Result<ResponseFeed> {
        if self.reader.is_finished() {
            return Err(refcheck_core::Error::ListenerSetup(
                "driver is no longer running".to_string(),
            ));
        }
        Ok(self.responses.subscribe())
    }

    async fn response_body(&self, response: &NetworkResponse) -> refcheck_core::Result<String> {
        self.request_text("body", json!({ "id": response.id }), self.action_timeout)
            .await
            .map_err(E2eError::into_core)
    }

    async fn wait_for_url(&self, pattern: &Regex, wait: Duration) -> refcheck_core::Result<String> {
        let args = json!({ "pattern": pattern.as_str(), "timeout_ms": wait.as_millis() as u64 });
        self.request_text("wait_url", args, wait)
            .await
            .map_err(E2eError::into_core)
    }

    async fn wait_for_visible(
        &self,
        query: &ElementQuery,
        wait: Duration,
    ) -> refcheck_core::Result<String> {
        let args = json!({
            "selector": query.selector,
            "has_text": query.has_text,
            "timeout_ms": wait.as_millis() as u64,
        });
        self.request_text("wait_visible", args, wait)
            .await
            .map_err(E2eError::into_core)
    }
}
