//! Page and dialog bookkeeping for one browser context.
//!
//! The context manager is the only component that mutates the active page
//! and the return stack; everything else reads them. New tabs auto-focus,
//! obvious ad popups are closed on sight, closed tabs restore focus to the
//! previous page on the stack, and JavaScript dialogs land in a single-slot
//! mailbox guarded by a safety-net timer.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use flashloop_core_types::PageId;

use crate::error::AdapterError;
use crate::events::{BrowserEvent, DialogKind};
use crate::CdpAdapter;

/// URL substrings that mark a popup as an ad/tracking window worth closing.
const POPUP_DENYLIST: &[&str] = &["googleads", "doubleclick", "facebook.com/tr"];

/// Default grace period before an unhandled dialog is resolved automatically.
const DIALOG_SAFETY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a freshly opened page gets to reach a classifiable URL.
const NEW_PAGE_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no pending dialog to handle")]
    NoPendingDialog,
    #[error("tab index {0} out of range ({1} open)")]
    TabIndexOutOfRange(usize, usize),
    #[error("no tab matches '{0}'")]
    NoTabMatch(String),
    #[error("no pages remain in the browser context")]
    NoPages,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// A JavaScript dialog waiting for the planner (or the safety net).
#[derive(Clone, Debug)]
pub struct PendingDialog {
    pub page: PageId,
    pub kind: DialogKind,
    pub message: String,
}

impl PendingDialog {
    /// Banner line prepended to the symbolic state while the dialog blocks.
    pub fn banner(&self) -> String {
        format!(
            "⚠️ [Alert Dialog] Type: {}, Message: {}",
            self.kind.as_str(),
            self.message
        )
    }
}

/// Tab reference accepted by `switch_to`.
#[derive(Clone, Debug)]
pub enum TabSelector {
    Index(usize),
    /// Substring matched against title or URL, first match in return-stack
    /// order (most recently focused first).
    Matching(String),
}

#[derive(Default)]
struct ContextState {
    pages: Vec<PageId>,
    return_stack: Vec<PageId>,
    active: Option<PageId>,
}

#[derive(Default)]
struct DialogSlot {
    pending: Option<PendingDialog>,
    /// Bumped whenever the slot changes hands; stale timers compare against
    /// it before acting.
    generation: u64,
}

pub struct ContextManager {
    adapter: Arc<CdpAdapter>,
    state: Mutex<ContextState>,
    dialog: Arc<Mutex<DialogSlot>>,
    dialog_timeout: Duration,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ContextManager {
    /// Build the manager over an adapter, adopt its current pages and start
    /// listening for lifecycle events.
    pub async fn start(adapter: Arc<CdpAdapter>) -> Arc<Self> {
        Self::start_with_dialog_timeout(adapter, DIALOG_SAFETY_TIMEOUT).await
    }

    pub async fn start_with_dialog_timeout(
        adapter: Arc<CdpAdapter>,
        dialog_timeout: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            adapter,
            state: Mutex::new(ContextState::default()),
            dialog: Arc::new(Mutex::new(DialogSlot::default())),
            dialog_timeout,
            listener: Mutex::new(None),
        });

        {
            let mut state = manager.state.lock().await;
            for page in manager.adapter.pages() {
                state.pages.push(page);
            }
            if let Some(first) = state.pages.first().copied() {
                state.return_stack.push(first);
                state.active = Some(first);
            }
        }

        let task = tokio::spawn(Self::listen(Arc::clone(&manager)));
        *manager.listener.lock().await = Some(task);
        manager
    }

    pub async fn stop(&self) {
        if let Some(task) = self.listener.lock().await.take() {
            task.abort();
        }
    }

    /// The page the agent is currently driving.
    pub async fn active_page(&self) -> Option<PageId> {
        self.state.lock().await.active
    }

    pub async fn pages(&self) -> Vec<PageId> {
        self.state.lock().await.pages.clone()
    }

    /// Adopt a page that was registered before this manager started (hosted
    /// mode) or created directly through the adapter.
    pub async fn adopt_page(&self, page: PageId) {
        let mut state = self.state.lock().await;
        if !state.pages.contains(&page) {
            state.pages.push(page);
        }
        state.return_stack.retain(|p| *p != page);
        state.return_stack.push(page);
        state.active = Some(page);
    }

    /// Switch tabs by index or by substring match, focusing the winner.
    pub async fn switch_to(&self, selector: TabSelector) -> Result<PageId, ContextError> {
        let page = match selector {
            TabSelector::Index(index) => {
                let state = self.state.lock().await;
                let count = state.pages.len();
                *state
                    .pages
                    .get(index)
                    .ok_or(ContextError::TabIndexOutOfRange(index, count))?
            }
            TabSelector::Matching(needle) => {
                let candidates: Vec<PageId> = {
                    let state = self.state.lock().await;
                    // Return-stack order, most recently focused first, then
                    // any page that never made it onto the stack.
                    let mut ordered: Vec<PageId> =
                        state.return_stack.iter().rev().copied().collect();
                    for page in &state.pages {
                        if !ordered.contains(page) {
                            ordered.push(*page);
                        }
                    }
                    ordered
                };
                let lowered = needle.to_lowercase();
                let mut found = None;
                for page in candidates {
                    let info = match self.adapter.page_info(page).await {
                        Ok(info) => info,
                        Err(err) => {
                            debug!(target: "context", %err, %page, "skipping unreadable tab");
                            continue;
                        }
                    };
                    if info.title.to_lowercase().contains(&lowered)
                        || info.url.to_lowercase().contains(&lowered)
                    {
                        found = Some(page);
                        break;
                    }
                }
                found.ok_or(ContextError::NoTabMatch(needle))?
            }
        };

        self.focus(page).await?;
        Ok(page)
    }

    /// Close the active page. Focus restoration happens via the close event.
    pub async fn close_active(&self) -> Result<PageId, ContextError> {
        let page = self.active_page().await.ok_or(ContextError::NoPages)?;
        self.adapter.close_page(page).await?;
        Ok(page)
    }

    /// Cheap liveness ping so an idle debugging session does not time out
    /// (used while an interactive prompt is open).
    pub async fn keepalive(&self) {
        if let Some(page) = self.active_page().await {
            let _ = self.adapter.evaluate(page, "document.title").await;
        }
    }

    /// The dialog currently blocking the context, if any.
    pub async fn pending_dialog(&self) -> Option<PendingDialog> {
        self.dialog.lock().await.pending.clone()
    }

    /// Resolve the pending dialog. Clears the safety-net timer and the slot
    /// atomically; a second call reports `NoPendingDialog`.
    pub async fn resolve_dialog(&self, accept: bool) -> Result<PendingDialog, ContextError> {
        let dialog = {
            let mut slot = self.dialog.lock().await;
            let dialog = slot.pending.take().ok_or(ContextError::NoPendingDialog)?;
            slot.generation = slot.generation.wrapping_add(1);
            dialog
        };
        self.adapter
            .handle_js_dialog(dialog.page, accept, None)
            .await?;
        info!(
            target: "context",
            kind = dialog.kind.as_str(),
            accept,
            "dialog resolved"
        );
        Ok(dialog)
    }

    async fn focus(&self, page: PageId) -> Result<(), ContextError> {
        {
            let mut state = self.state.lock().await;
            state.return_stack.retain(|p| *p != page);
            state.return_stack.push(page);
            state.active = Some(page);
        }
        self.adapter.activate_page(page).await?;
        Ok(())
    }

    async fn listen(self: Arc<Self>) {
        let mut rx = self.adapter.subscribe();
        loop {
            match rx.recv().await {
                Ok(BrowserEvent::PageOpened { page, .. }) => {
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move { manager.on_page_opened(page).await });
                }
                Ok(BrowserEvent::PageClosed { page }) => {
                    self.on_page_closed(page).await;
                }
                Ok(BrowserEvent::DialogOpening {
                    page,
                    kind,
                    message,
                }) => {
                    self.on_dialog(page, kind, message).await;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "context", skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn on_page_opened(&self, page: PageId) {
        // Give the popup a moment to commit its first navigation so the
        // denylist sees a real URL.
        if self.adapter.wait_for_page_ready(page).await.is_err() {
            return;
        }
        sleep(NEW_PAGE_SETTLE).await;

        let url = match self.adapter.page_info(page).await {
            Ok(info) => info.url,
            Err(err) => {
                debug!(target: "context", %err, %page, "new page vanished before adoption");
                return;
            }
        };

        let is_blank = url.is_empty() || url == "about:blank";
        if !is_blank && POPUP_DENYLIST.iter().any(|needle| url.contains(needle)) {
            info!(target: "context", %url, "auto-closing denylisted popup");
            if let Err(err) = self.adapter.close_page(page).await {
                warn!(target: "context", %err, "failed to close popup");
            }
            return;
        }

        {
            let mut state = self.state.lock().await;
            if !state.pages.contains(&page) {
                state.pages.push(page);
            }
            state.return_stack.retain(|p| *p != page);
            state.return_stack.push(page);
            state.active = Some(page);
        }
        if let Err(err) = self.adapter.activate_page(page).await {
            warn!(target: "context", %err, "failed to focus new page");
        }
        info!(target: "context", %url, "new tab focused");
    }

    async fn on_page_closed(&self, page: PageId) {
        let mut state = self.state.lock().await;
        state.pages.retain(|p| *p != page);
        state.return_stack.retain(|p| *p != page);

        if state.active == Some(page) {
            state.active = state
                .return_stack
                .last()
                .copied()
                .or_else(|| state.pages.last().copied());
            if let Some(restored) = state.active {
                info!(target: "context", %restored, "focus restored from return stack");
                let adapter = Arc::clone(&self.adapter);
                tokio::spawn(async move {
                    let _ = adapter.activate_page(restored).await;
                });
            }
        }
    }

    async fn on_dialog(&self, page: PageId, kind: DialogKind, message: String) {
        let generation = {
            let mut slot = self.dialog.lock().await;
            // A new dialog supersedes the old slot; bumping the generation
            // disarms the previous timer.
            slot.generation = slot.generation.wrapping_add(1);
            slot.pending = Some(PendingDialog {
                page,
                kind,
                message,
            });
            slot.generation
        };

        let adapter = Arc::clone(&self.adapter);
        let slot_ref = Arc::clone(&self.dialog);
        let timeout = self.dialog_timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let dialog = {
                let mut slot = slot_ref.lock().await;
                if slot.generation != generation {
                    return;
                }
                slot.pending.take()
            };
            if let Some(dialog) = dialog {
                let accept = dialog.kind == DialogKind::BeforeUnload;
                warn!(
                    target: "context",
                    kind = dialog.kind.as_str(),
                    accept,
                    "dialog unhandled for too long; resolving automatically"
                );
                let _ = adapter.handle_js_dialog(dialog.page, accept, None).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::adapter_with_page;
    use crate::transport::TransportEvent;
    use serde_json::{json, Value};
    use tokio::time::{Duration, Instant};

    fn info_handler(url: &'static str) -> impl Fn(&crate::CommandTarget, &str, &Value) -> Result<Value, AdapterError> {
        move |_, method, _| match method {
            "Target.getTargetInfo" => Ok(json!({
                "targetInfo": { "targetId": "t", "type": "page", "url": url, "title": "Example" }
            })),
            "Runtime.evaluate" => Ok(json!({ "result": { "value": "complete" } })),
            _ => Ok(json!({})),
        }
    }

    #[tokio::test]
    async fn adopts_initial_page_as_active() {
        let (adapter, _transport, page) =
            adapter_with_page(info_handler("https://example.com")).await;
        let manager = ContextManager::start(adapter).await;
        assert_eq!(manager.active_page().await, Some(page));
        manager.stop().await;
    }

    #[tokio::test]
    async fn new_tab_is_focused_and_close_restores_opener() {
        let (adapter, transport, first) =
            adapter_with_page(info_handler("https://example.com")).await;
        let manager = ContextManager::start(Arc::clone(&adapter)).await;

        transport
            .inject(TransportEvent {
                method: "Target.targetCreated".to_string(),
                params: json!({
                    "targetInfo": { "targetId": "t-2", "type": "page", "url": "https://example.com/two" }
                }),
                session_id: None,
            })
            .await;
        transport
            .inject(TransportEvent {
                method: "Target.attachedToTarget".to_string(),
                params: json!({
                    "sessionId": "s-2",
                    "targetInfo": { "targetId": "t-2", "type": "page" }
                }),
                session_id: None,
            })
            .await;

        let manager_ref = &manager;
        let deadline = Instant::now() + Duration::from_secs(3);
        let second = loop {
            let pages = manager_ref.pages().await;
            if pages.len() == 2 {
                break pages[1];
            }
            assert!(Instant::now() < deadline, "second tab never adopted");
            sleep(Duration::from_millis(20)).await;
        };
        assert_eq!(manager.active_page().await, Some(second));

        transport
            .inject(TransportEvent {
                method: "Target.targetDestroyed".to_string(),
                params: json!({ "targetId": "t-2" }),
                session_id: None,
            })
            .await;

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if manager.active_page().await == Some(first) {
                break;
            }
            assert!(Instant::now() < deadline, "focus never restored");
            sleep(Duration::from_millis(10)).await;
        }
        manager.stop().await;
    }

    #[tokio::test]
    async fn denylisted_popup_is_closed() {
        let (adapter, transport, _first) = adapter_with_page(|_, method, params| match method {
            "Target.getTargetInfo" => {
                let url = if params["targetId"] == "t-ad" {
                    "https://googleads.g.doubleclick.net/pagead"
                } else {
                    "https://example.com"
                };
                Ok(json!({
                    "targetInfo": { "targetId": params["targetId"].clone(), "type": "page", "url": url, "title": "" }
                }))
            }
            "Runtime.evaluate" => Ok(json!({ "result": { "value": "complete" } })),
            _ => Ok(json!({})),
        })
        .await;
        let manager = ContextManager::start(Arc::clone(&adapter)).await;

        transport
            .inject(TransportEvent {
                method: "Target.targetCreated".to_string(),
                params: json!({
                    "targetInfo": { "targetId": "t-ad", "type": "page", "url": "" }
                }),
                session_id: None,
            })
            .await;
        transport
            .inject(TransportEvent {
                method: "Target.attachedToTarget".to_string(),
                params: json!({
                    "sessionId": "s-ad",
                    "targetInfo": { "targetId": "t-ad", "type": "page" }
                }),
                session_id: None,
            })
            .await;

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let sent = transport.sent().await;
            let closed = sent.iter().any(|(method, params)| {
                method == "Target.closeTarget" && params["targetId"] == "t-ad"
            });
            if closed {
                break;
            }
            assert!(Instant::now() < deadline, "popup never auto-closed");
            sleep(Duration::from_millis(10)).await;
        }
        manager.stop().await;
    }

    #[tokio::test]
    async fn dialog_slot_is_single_and_idempotent() {
        let (adapter, transport, page) =
            adapter_with_page(info_handler("https://example.com")).await;
        let manager = ContextManager::start(Arc::clone(&adapter)).await;

        transport
            .inject(TransportEvent {
                method: "Page.javascriptDialogOpening".to_string(),
                params: json!({ "type": "confirm", "message": "Delete everything?" }),
                session_id: Some("s-1".to_string()),
            })
            .await;

        let deadline = Instant::now() + Duration::from_secs(2);
        let dialog = loop {
            if let Some(dialog) = manager.pending_dialog().await {
                break dialog;
            }
            assert!(Instant::now() < deadline, "dialog never registered");
            sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(dialog.page, page);
        assert_eq!(
            dialog.banner(),
            "⚠️ [Alert Dialog] Type: confirm, Message: Delete everything?"
        );

        manager.resolve_dialog(true).await.unwrap();
        assert!(manager.pending_dialog().await.is_none());
        assert!(matches!(
            manager.resolve_dialog(true).await,
            Err(ContextError::NoPendingDialog)
        ));
        manager.stop().await;
    }

    #[tokio::test]
    async fn safety_net_dismisses_stale_dialogs() {
        let (adapter, transport, _page) =
            adapter_with_page(info_handler("https://example.com")).await;
        let manager = ContextManager::start_with_dialog_timeout(
            Arc::clone(&adapter),
            Duration::from_millis(50),
        )
        .await;

        transport
            .inject(TransportEvent {
                method: "Page.javascriptDialogOpening".to_string(),
                params: json!({ "type": "alert", "message": "hi" }),
                session_id: Some("s-1".to_string()),
            })
            .await;

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let sent = transport.sent().await;
            let auto_dismissed = sent.iter().any(|(method, params)| {
                method == "Page.handleJavaScriptDialog" && params["accept"] == false
            });
            if auto_dismissed {
                break;
            }
            assert!(Instant::now() < deadline, "safety net never fired");
            sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.pending_dialog().await.is_none());
        manager.stop().await;
    }

    #[tokio::test]
    async fn switch_to_index_is_range_checked() {
        let (adapter, _transport, _page) =
            adapter_with_page(info_handler("https://example.com")).await;
        let manager = ContextManager::start(adapter).await;
        assert!(matches!(
            manager.switch_to(TabSelector::Index(5)).await,
            Err(ContextError::TabIndexOutOfRange(5, 1))
        ));
        manager.stop().await;
    }

    #[tokio::test]
    async fn switch_to_substring_matches_title_or_url() {
        let (adapter, _transport, page) =
            adapter_with_page(info_handler("https://example.com/dash")).await;
        let manager = ContextManager::start(adapter).await;
        let hit = manager
            .switch_to(TabSelector::Matching("dash".to_string()))
            .await
            .unwrap();
        assert_eq!(hit, page);
        assert!(matches!(
            manager.switch_to(TabSelector::Matching("nope".to_string())).await,
            Err(ContextError::NoTabMatch(_))
        ));
        manager.stop().await;
    }
}
