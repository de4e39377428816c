//! Websocket transport framing CDP commands and events.
//!
//! `ChromiumTransport` launches (or attaches to) a Chromium instance and runs
//! a single pump task that correlates command responses by call id and
//! forwards protocol events. `ScriptedTransport` answers commands from a
//! closure so the layers above can be exercised without a browser.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

/// A raw protocol event as it came off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Routing target for a command: the browser itself or an attached session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, AdapterError>>,
}

/// Transport backed by a real Chromium instance.
pub struct ChromiumTransport {
    cfg: CdpConfig,
    runtime: OnceCell<Arc<Runtime>>,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            runtime: OnceCell::new(),
        }
    }

    async fn runtime(&self) -> Result<&Arc<Runtime>, AdapterError> {
        let cfg = self.cfg.clone();
        self.runtime
            .get_or_try_init(|| async move { Runtime::start(cfg).await.map(Arc::new) })
            .await
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        self.runtime().await.map(|_| ())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let runtime = self.runtime().await?;
        runtime
            .send(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.default_deadline_ms),
            )
            .await
    }
}

struct Runtime {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    pump_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl Runtime {
    async fn start(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = browser_config(&cfg)?;
            launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::io(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let pump_alive = alive.clone();
        let pump_task = tokio::spawn(async move {
            let result = Self::pump(conn, command_rx, events_tx).await;
            pump_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "transport pump terminated with error");
            }
        });

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            pump_task,
            child: Mutex::new(child),
            alive,
        })
    }

    async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| AdapterError::io(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::io("command response channel closed")),
            Err(_) => Err(AdapterError::timeout(format!(
                "command {method} timed out after {}ms",
                deadline.as_millis()
            ))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn pump(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), AdapterError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::submit(&mut conn, cmd, &mut inflight);
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::complete(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            Self::forward(event, &event_tx).await;
                        }
                        Some(Err(err)) => {
                            let adapter_err = map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(adapter_err.clone()));
                            }
                            return Err(adapter_err);
                        }
                        None => {
                            let err = AdapterError::io("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn submit(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>,
    ) {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
            }
            Err(err) => {
                let _ = cmd.responder.send(Err(AdapterError::io(err.to_string())));
            }
        }
    }

    fn complete(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>,
    ) {
        let result = if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(err) = resp.error {
            Err(AdapterError::from_protocol(err.code, &err.message))
        } else {
            Err(AdapterError::internal("empty cdp response"))
        };

        if let Some(sender) = inflight.remove(&resp.id) {
            let _ = sender.send(result);
        }
    }

    async fn forward(event: CdpEventMessage, event_tx: &mpsc::Sender<TransportEvent>) {
        let raw: Result<CdpJsonEventMessage, _> = event.try_into();
        match raw {
            Ok(raw) => {
                let payload = TransportEvent {
                    method: raw.method.into_owned(),
                    params: raw.params,
                    session_id: raw.session_id,
                };
                if event_tx.send(payload).await.is_err() {
                    debug!(target: "cdp-transport", "event receiver dropped");
                }
            }
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "failed to decode cdp event");
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no runtime available to kill chromium child");
                }
            }
        }
    }
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::io(format!(
            "chrome executable not found at {} (set FLASHLOOP_CHROME)",
            cfg.executable.display()
        )));
    }

    fs::create_dir_all(&cfg.user_data_dir).map_err(|err| {
        AdapterError::internal(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(20));

    if !cfg.headless {
        builder = builder.with_head();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-background-timer-throttling",
        "--disable-breakpad",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-hang-monitor",
        "--disable-popup-blocking",
        "--disable-prompt-on-repost",
        "--disable-sync",
        "--no-first-run",
        "--no-default-browser-check",
        "--password-store=basic",
        "--remote-allow-origins=*",
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    builder = builder.user_data_dir(cfg.user_data_dir.clone());

    builder
        .build()
        .map_err(|err| AdapterError::internal(format!("browser config error: {err}")))
}

async fn launch_browser(config: BrowserConfig) -> Result<(Option<Child>, String), AdapterError> {
    let mut child = config
        .launch()
        .map_err(|err| AdapterError::internal(format!("failed to launch chromium: {err}")))?;

    let ws_url = extract_ws_url(&mut child)
        .await
        .map_err(|err| AdapterError::io(err.to_string()))?;

    Ok((Some(child), ws_url))
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::timeout(hint),
        CdpError::FrameNotFound(_) | CdpError::JavascriptException(_) | CdpError::Serde(_) => {
            AdapterError::internal(hint)
        }
        _ => AdapterError::io(hint),
    }
}

/// Handler answering scripted commands; also receives the session routing.
pub type CommandHandler =
    dyn Fn(&CommandTarget, &str, &Value) -> Result<Value, AdapterError> + Send + Sync;

/// In-memory transport answering commands from a closure and replaying
/// injected events. The backbone of every browserless test in this workspace.
pub struct ScriptedTransport {
    handler: Box<CommandHandler>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    events_tx: mpsc::Sender<TransportEvent>,
    log: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&CommandTarget, &str, &Value) -> Result<Value, AdapterError>
            + Send
            + Sync
            + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(64);
        Arc::new(Self {
            handler: Box::new(handler),
            events_rx: Mutex::new(events_rx),
            events_tx,
            log: Mutex::new(Vec::new()),
        })
    }

    /// Inject a protocol event as if it arrived from the browser.
    pub async fn inject(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event).await;
    }

    /// Commands observed so far, in order.
    pub async fn sent(&self) -> Vec<(String, Value)> {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl CdpTransport for ScriptedTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.log
            .lock()
            .await
            .push((method.to_string(), params.clone()));
        (self.handler)(&target, method, &params)
    }
}
