//! Chromium DevTools Protocol adapter for the flash-loop agent.
//!
//! The adapter owns the browser process (or an attached debugging session),
//! frames raw CDP commands over a pluggable transport, tracks page targets
//! and their sessions, and surfaces browser lifecycle as a broadcast event
//! stream. Everything above this crate is driver-agnostic: the observer,
//! selector synthesis and executor speak in terms of `PageId` plus the typed
//! command surface exposed here.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod registry;
pub mod transport;
mod util;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::select;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flashloop_core_types::{BrowserId, PageId};

pub use config::{detect_chrome_executable, CdpConfig};
pub use context::{ContextError, ContextManager, PendingDialog, TabSelector};
pub use error::{AdapterError, AdapterErrorKind};
pub use events::{BrowserEvent, DialogKind};
pub use registry::{Registry, TargetContext};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, ScriptedTransport};

/// URL and title of a page target.
#[derive(Clone, Debug, Default)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

#[derive(Clone, Copy, Debug)]
struct NetworkActivity {
    inflight: i64,
    last_activity: Instant,
}

/// Adapter with pluggable transport.
pub struct CdpAdapter {
    pub browser_id: BrowserId,
    pub cfg: CdpConfig,
    registry: Arc<Registry>,
    events: broadcast::Sender<BrowserEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, PageId>,
    network: DashMap<PageId, NetworkActivity>,
}

impl CdpAdapter {
    /// Create an adapter backed by a real Chromium instance.
    pub fn new(cfg: CdpConfig) -> Self {
        let transport = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: CdpConfig, transport: Arc<dyn CdpTransport>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            browser_id: BrowserId::new(),
            cfg,
            registry: Arc::new(Registry::new()),
            events,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
            targets: DashMap::new(),
            sessions: DashMap::new(),
            network: DashMap::new(),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.events.subscribe()
    }

    /// Connect the transport, enable target discovery and start the event
    /// pump. Idempotent.
    pub async fn start(self: &Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        self.send_command("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        self.send_command(
            "Target.setAutoAttach",
            json!({
                "autoAttach": true,
                "waitForDebuggerOnStart": false,
                "flatten": true,
            }),
        )
        .await?;

        let pump = tokio::spawn(Self::event_loop(Arc::clone(self)));
        self.tasks.lock().await.push(pump);
        info!(target: "cdp-adapter", "event pump started");
        Ok(())
    }

    /// Stop the event pump and close the browser (best effort).
    pub async fn shutdown(&self) {
        let _ = self
            .transport
            .send_command(CommandTarget::Browser, "Browser.close", json!({}))
            .await;
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            handle.abort();
            let _ = handle.await;
        }
    }

    // ---- command surface -------------------------------------------------

    /// Browser-scoped command.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.transport
            .send_command(CommandTarget::Browser, method, params)
            .await
    }

    /// Page-scoped command, routed through the page's CDP session.
    pub async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.cdp_session(&page).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::TargetClosed)
                .with_hint(format!("no cdp session for page {page}"))
        })?;
        self.transport
            .send_command(CommandTarget::Session(session), method, params)
            .await
    }

    /// Open a new page target and wait until its session is attached.
    pub async fn create_page(&self, url: &str) -> Result<PageId, AdapterError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::internal("createTarget missing targetId"))?
            .to_string();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(entry) = self.targets.get(&target_id) {
                let page = *entry.value();
                if self.registry.cdp_session(&page).is_some() {
                    return Ok(page);
                }
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::timeout("timed out waiting for target attach"));
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn close_page(&self, page: PageId) -> Result<(), AdapterError> {
        let ctx = self
            .registry
            .get(&page)
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::TargetClosed))?;
        self.send_command("Target.closeTarget", json!({ "targetId": ctx.target_id }))
            .await
            .map(|_| ())
    }

    /// Bring a page to the foreground.
    pub async fn activate_page(&self, page: PageId) -> Result<(), AdapterError> {
        let ctx = self
            .registry
            .get(&page)
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::TargetClosed))?;
        self.send_command(
            "Target.activateTarget",
            json!({ "targetId": ctx.target_id }),
        )
        .await
        .map(|_| ())
    }

    pub async fn navigate(&self, page: PageId, url: &str) -> Result<(), AdapterError> {
        let response = self
            .send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = response.get("errorText").and_then(|v| v.as_str()) {
            if !error_text.is_empty() {
                return Err(AdapterError::new(AdapterErrorKind::NavigationFailed)
                    .with_hint(format!("navigation to {url} failed: {error_text}")));
            }
        }
        self.registry.set_recent_url(&page, url.to_string());
        Ok(())
    }

    pub async fn reload(&self, page: PageId) -> Result<(), AdapterError> {
        self.send_page_command(page, "Page.reload", json!({}))
            .await
            .map(|_| ())
    }

    pub async fn go_back(&self, page: PageId) -> Result<(), AdapterError> {
        let history = self
            .send_page_command(page, "Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if current <= 0 {
            return Err(AdapterError::new(AdapterErrorKind::NavigationFailed)
                .with_hint("no earlier history entry to go back to"));
        }
        let entry_id = history
            .get("entries")
            .and_then(|v| v.as_array())
            .and_then(|entries| entries.get((current - 1) as usize))
            .and_then(|entry| entry.get("id"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AdapterError::internal("navigation history entry missing id"))?;
        self.send_page_command(
            page,
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry_id }),
        )
        .await
        .map(|_| ())
    }

    /// Evaluate an expression in the page, returning its JSON value.
    pub async fn evaluate(&self, page: PageId, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|v| v.as_str())
                .unwrap_or("evaluate raised an exception");
            return Err(AdapterError::internal(text.to_string()));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Evaluate an expression and keep the result as a remote object handle.
    pub async fn evaluate_to_object(
        &self,
        page: PageId,
        expression: &str,
    ) -> Result<String, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": false,
                    "objectGroup": "flashloop",
                }),
            )
            .await?;
        response
            .get("result")
            .and_then(|res| res.get("objectId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint("expression did not produce an object handle")
            })
    }

    pub async fn release_object(&self, page: PageId, object_id: &str) {
        let _ = self
            .send_page_command(
                page,
                "Runtime.releaseObject",
                json!({ "objectId": object_id }),
            )
            .await;
    }

    pub async fn dispatch_mouse_event(
        &self,
        page: PageId,
        payload: Value,
    ) -> Result<(), AdapterError> {
        self.send_page_command(page, "Input.dispatchMouseEvent", payload)
            .await
            .map(|_| ())
    }

    pub async fn dispatch_key_event(
        &self,
        page: PageId,
        payload: Value,
    ) -> Result<(), AdapterError> {
        self.send_page_command(page, "Input.dispatchKeyEvent", payload)
            .await
            .map(|_| ())
    }

    pub async fn insert_text(&self, page: PageId, text: &str) -> Result<(), AdapterError> {
        self.send_page_command(page, "Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }

    /// Attach files to the input element held by `object_id`.
    pub async fn set_file_input(
        &self,
        page: PageId,
        object_id: &str,
        files: &[String],
    ) -> Result<(), AdapterError> {
        self.send_page_command(
            page,
            "DOM.setFileInputFiles",
            json!({ "objectId": object_id, "files": files }),
        )
        .await
        .map(|_| ())
    }

    /// Accept or dismiss the JavaScript dialog currently blocking the page.
    pub async fn handle_js_dialog(
        &self,
        page: PageId,
        accept: bool,
        prompt_text: Option<&str>,
    ) -> Result<(), AdapterError> {
        let mut params = json!({ "accept": accept });
        if let Some(text) = prompt_text {
            params["promptText"] = json!(text);
        }
        self.send_page_command(page, "Page.handleJavaScriptDialog", params)
            .await
            .map(|_| ())
    }

    /// Current URL and title of a page target.
    pub async fn page_info(&self, page: PageId) -> Result<PageInfo, AdapterError> {
        let ctx = self
            .registry
            .get(&page)
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::TargetClosed))?;
        let response = self
            .send_command(
                "Target.getTargetInfo",
                json!({ "targetId": ctx.target_id }),
            )
            .await?;
        let info = response.get("targetInfo").cloned().unwrap_or(Value::Null);
        let url = info
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let title = info
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.registry.set_recent_url(&page, url.clone());
        self.registry.set_recent_title(&page, title.clone());
        Ok(PageInfo { url, title })
    }

    /// Pages currently known to the adapter.
    pub fn pages(&self) -> Vec<PageId> {
        self.registry.list().into_iter().map(|(page, _)| page).collect()
    }

    // ---- waits -----------------------------------------------------------

    /// Poll until `document.readyState` leaves `loading`, bounded by `timeout`.
    pub async fn wait_for_dom_ready(
        &self,
        page: PageId,
        timeout: Duration,
    ) -> Result<bool, AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.evaluate(page, "document.readyState").await {
                Ok(Value::String(state)) if state != "loading" => return Ok(true),
                Ok(_) => {}
                Err(err) if err.is_page_gone() => {
                    // A navigation tore the context down; the next poll sees
                    // the fresh document.
                    debug!(target: "cdp-adapter", %err, "readyState probe lost its context");
                }
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Poll until no request has been in flight for `quiet` time, bounded by
    /// `timeout`. Returns whether the quiet window was reached.
    pub async fn wait_for_network_idle(
        &self,
        page: PageId,
        quiet: Duration,
        timeout: Duration,
    ) -> Result<bool, AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            let quiet_reached = match self.network.get(&page) {
                Some(entry) => {
                    entry.inflight <= 0 && entry.last_activity.elapsed() >= quiet
                }
                None => true,
            };
            if quiet_reached {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Wait until the page has an attached CDP session.
    pub async fn wait_for_page_ready(&self, page: PageId) -> Result<(), AdapterError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.registry.cdp_session(&page).is_some() {
                return Ok(());
            }
            sleep(Duration::from_millis(50)).await;
        }
        Err(AdapterError::new(AdapterErrorKind::TargetClosed)
            .with_hint(format!("cdp session never attached for page {page}")))
    }

    // ---- event pump ------------------------------------------------------

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event pump entered");
        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => self.process_event(ev),
                        None => {
                            warn!(target: "cdp-adapter", "transport stream ended");
                            break;
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event pump exiting");
    }

    fn process_event(self: &Arc<Self>, event: transport::TransportEvent) {
        match event.method.as_str() {
            "Target.targetCreated" => self.on_target_created(event.params),
            "Target.targetDestroyed" => self.on_target_destroyed(event.params),
            "Target.attachedToTarget" => self.on_target_attached(event.params),
            "Target.detachedFromTarget" => self.on_target_detached(event.params),
            "Target.targetInfoChanged" => self.on_target_info_changed(event.params),
            "Page.javascriptDialogOpening" => {
                self.on_dialog_opening(event.session_id.as_deref(), event.params)
            }
            "Page.frameNavigated" => {
                self.on_frame_navigated(event.session_id.as_deref(), event.params)
            }
            "Network.requestWillBeSent" => {
                self.on_network_delta(event.session_id.as_deref(), 1)
            }
            "Network.loadingFinished" | "Network.loadingFailed" => {
                self.on_network_delta(event.session_id.as_deref(), -1)
            }
            other => {
                debug!(target: "cdp-adapter", method = %other, "unhandled cdp event");
            }
        }
    }

    fn page_from_session(&self, session_id: Option<&str>) -> Option<PageId> {
        session_id.and_then(|sid| self.sessions.get(sid).map(|entry| *entry.value()))
    }

    fn emit(&self, event: BrowserEvent) {
        let _ = self.events.send(event);
    }

    fn on_target_created(&self, params: Value) {
        let Ok(payload) = serde_json::from_value::<TargetCreatedParams>(params) else {
            return;
        };
        if payload.target_info.target_type != "page" {
            return;
        }

        let target_id = payload.target_info.target_id;
        let page = PageId::new();
        self.targets.insert(target_id.clone(), page);
        self.registry.insert_page(page, target_id);
        if let Some(url) = payload.target_info.url.clone().filter(|u| !u.is_empty()) {
            self.registry.set_recent_url(&page, url);
        }

        let opener = payload
            .target_info
            .opener_id
            .and_then(|id| self.targets.get(&id).map(|entry| *entry.value()));
        self.emit(BrowserEvent::PageOpened {
            page,
            opener,
            url: payload.target_info.url,
        });
    }

    fn on_target_destroyed(&self, params: Value) {
        let Ok(payload) = serde_json::from_value::<TargetDestroyedParams>(params) else {
            return;
        };
        if let Some((_, page)) = self.targets.remove(&payload.target_id) {
            self.sessions.retain(|_, v| *v != page);
            self.network.remove(&page);
            self.registry.remove_page(&page);
            self.emit(BrowserEvent::PageClosed { page });
        }
    }

    fn on_target_attached(self: &Arc<Self>, params: Value) {
        let Ok(payload) = serde_json::from_value::<AttachedToTargetParams>(params) else {
            return;
        };
        if payload.target_info.target_type != "page" {
            return;
        }

        let Some(entry) = self.targets.get(&payload.target_info.target_id) else {
            return;
        };
        let page = *entry.value();
        drop(entry);
        self.sessions.insert(payload.session_id.clone(), page);
        self.registry.set_cdp_session(&page, payload.session_id);

        // Domains must be enabled per session before their events flow.
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            for method in ["Page.enable", "Runtime.enable", "Network.enable"] {
                if let Err(err) = adapter.send_page_command(page, method, json!({})).await {
                    warn!(target: "cdp-adapter", %err, method, "failed to enable domain");
                }
            }
            adapter.emit(BrowserEvent::PageAttached { page });
        });
    }

    fn on_target_detached(&self, params: Value) {
        if let Ok(payload) = serde_json::from_value::<DetachedFromTargetParams>(params) {
            self.sessions.remove(&payload.session_id);
        }
    }

    fn on_target_info_changed(&self, params: Value) {
        let Ok(payload) = serde_json::from_value::<TargetCreatedParams>(params) else {
            return;
        };
        if let Some(entry) = self.targets.get(&payload.target_info.target_id) {
            let page = *entry.value();
            if let Some(title) = payload.target_info.title {
                self.registry.set_recent_title(&page, title);
            }
            if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
                self.registry.set_recent_url(&page, url);
            }
        }
    }

    fn on_dialog_opening(&self, session_id: Option<&str>, params: Value) {
        let Some(page) = self.page_from_session(session_id) else {
            return;
        };
        let kind = params
            .get("type")
            .and_then(|v| v.as_str())
            .map(DialogKind::parse)
            .unwrap_or(DialogKind::Alert);
        let message = params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.emit(BrowserEvent::DialogOpening {
            page,
            kind,
            message,
        });
    }

    fn on_frame_navigated(&self, session_id: Option<&str>, params: Value) {
        let Some(page) = self.page_from_session(session_id) else {
            return;
        };
        // Only the main frame (no parent id) changes the page URL.
        let frame = params.get("frame").cloned().unwrap_or(Value::Null);
        if frame.get("parentId").is_some() {
            return;
        }
        if let Some(url) = frame.get("url").and_then(|v| v.as_str()) {
            self.registry.set_recent_url(&page, url.to_string());
            self.emit(BrowserEvent::PageNavigated {
                page,
                url: url.to_string(),
            });
        }
    }

    fn on_network_delta(&self, session_id: Option<&str>, delta: i64) {
        let Some(page) = self.page_from_session(session_id) else {
            return;
        };
        let mut entry = self.network.entry(page).or_insert(NetworkActivity {
            inflight: 0,
            last_activity: Instant::now(),
        });
        entry.inflight = (entry.inflight + delta).max(0);
        entry.last_activity = Instant::now();
    }
}

#[derive(Debug, Deserialize)]
struct TargetCreatedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetInfoPayload {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "openerId", default)]
    opener_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedParams {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedToTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct DetachedFromTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::transport::TransportEvent;

    /// Spin up an adapter over a scripted transport and simulate one page
    /// target being created and attached.
    pub async fn adapter_with_page<F>(handler: F) -> (Arc<CdpAdapter>, Arc<ScriptedTransport>, PageId)
    where
        F: Fn(&CommandTarget, &str, &Value) -> Result<Value, AdapterError>
            + Send
            + Sync
            + 'static,
    {
        let transport = ScriptedTransport::new(handler);
        let adapter = Arc::new(CdpAdapter::with_transport(
            CdpConfig::default(),
            transport.clone() as Arc<dyn CdpTransport>,
        ));
        adapter.start().await.unwrap();

        transport
            .inject(TransportEvent {
                method: "Target.targetCreated".to_string(),
                params: json!({
                    "targetInfo": { "targetId": "t-1", "type": "page", "url": "https://example.com" }
                }),
                session_id: None,
            })
            .await;
        transport
            .inject(TransportEvent {
                method: "Target.attachedToTarget".to_string(),
                params: json!({
                    "sessionId": "s-1",
                    "targetInfo": { "targetId": "t-1", "type": "page" }
                }),
                session_id: None,
            })
            .await;

        let deadline = Instant::now() + Duration::from_secs(2);
        let page = loop {
            if let Some((page, ctx)) = adapter.registry.list().into_iter().next() {
                if ctx.cdp_session.is_some() {
                    break page;
                }
            }
            assert!(Instant::now() < deadline, "page never attached");
            sleep(Duration::from_millis(10)).await;
        };

        (adapter, transport, page)
    }
}
