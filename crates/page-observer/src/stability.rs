//! DOM quiescence detection.
//!
//! A `MutationObserver` installed in the page arms an idle timer; mutation
//! batches that consist entirely of noise (media playback, spinner churn,
//! `aria-busy` updates) do not reset it. The whole state machine lives in
//! the injected promise so one round-trip settles the question.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use cdp_adapter::CdpAdapter;
use flashloop_core_types::PageId;

use crate::errors::ObserverError;

const STABILITY_SCRIPT: &str = r#"
(() => new Promise((resolve) => {
    const start = Date.now();
    if (!document.body) {
        resolve({ achieved: false, duration: 0 });
        return;
    }
    const stabilityMs = __STABILITY_MS__;
    const maxMs = __MAX_MS__;
    const NOISY_TAGS = ['VIDEO', 'AUDIO', 'SVG', 'PATH', 'CANVAS'];
    const NOISY_HINTS = ['spinner', 'loader', 'loading', 'progress', 'busy'];

    let idleTimer = null;
    let done = false;
    let observer = null;

    const finish = (achieved) => {
        if (done) return;
        done = true;
        if (idleTimer) clearTimeout(idleTimer);
        if (observer) observer.disconnect();
        resolve({ achieved, duration: Date.now() - start });
    };

    const isNoisyTarget = (target) => {
        let el = target && target.nodeType === 1 ? target : target && target.parentElement;
        if (!el) return false;
        if (NOISY_TAGS.includes(el.tagName)) return true;
        const marker = ((typeof el.className === 'string' ? el.className : '') +
            ' ' + (el.id || '')).toLowerCase();
        if (NOISY_HINTS.some((hint) => marker.includes(hint))) return true;
        if (el.getAttribute && el.getAttribute('aria-busy') === 'true') return true;
        if (el.attributes) {
            for (const attr of el.attributes) {
                if (attr.name.indexOf('data-loading') === 0) return true;
            }
        }
        return false;
    };

    const arm = () => {
        if (idleTimer) clearTimeout(idleTimer);
        idleTimer = setTimeout(() => finish(true), stabilityMs);
    };

    observer = new MutationObserver((records) => {
        const allNoisy = records.every((record) => isNoisyTarget(record.target));
        if (!allNoisy) arm();
    });
    observer.observe(document.documentElement, {
        childList: true,
        subtree: true,
        attributes: true,
        characterData: true
    });

    arm();
    setTimeout(() => finish(false), maxMs);
}))()
"#;

/// Outcome of one stability wait.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct StabilityOutcome {
    pub achieved: bool,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

/// Waits for the DOM to go quiet after an action.
#[derive(Clone, Copy, Debug)]
pub struct StabilityWaiter {
    /// Minimum idle period required to declare the page stable.
    pub stability_duration: Duration,
    /// Soft cap on the whole wait.
    pub max_timeout: Duration,
}

impl Default for StabilityWaiter {
    fn default() -> Self {
        Self {
            stability_duration: Duration::from_millis(300),
            max_timeout: Duration::from_millis(2000),
        }
    }
}

impl StabilityWaiter {
    pub fn new(stability_duration: Duration, max_timeout: Duration) -> Self {
        Self {
            stability_duration,
            max_timeout,
        }
    }

    pub fn script(&self) -> String {
        STABILITY_SCRIPT
            .replace("__STABILITY_MS__", &self.stability_duration.as_millis().to_string())
            .replace("__MAX_MS__", &self.max_timeout.as_millis().to_string())
    }

    /// Run the detector. A page torn down mid-wait (navigation, tab close)
    /// counts as "not stable", not as a failure.
    pub async fn wait(
        &self,
        adapter: &Arc<CdpAdapter>,
        page: PageId,
    ) -> Result<StabilityOutcome, ObserverError> {
        match adapter.evaluate(page, &self.script()).await {
            Ok(value) => {
                let outcome: StabilityOutcome = serde_json::from_value(value).map_err(|err| {
                    ObserverError::Extraction(format!("bad stability payload: {err}"))
                })?;
                debug!(
                    target: "stability",
                    achieved = outcome.achieved,
                    duration_ms = outcome.duration_ms,
                    "stability wait finished"
                );
                Ok(outcome)
            }
            Err(err) if err.is_page_gone() => Ok(StabilityOutcome {
                achieved: false,
                duration_ms: 0,
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_substitutes_parameters() {
        let waiter = StabilityWaiter::new(Duration::from_millis(250), Duration::from_millis(1500));
        let script = waiter.script();
        assert!(script.contains("const stabilityMs = 250;"));
        assert!(script.contains("const maxMs = 1500;"));
        assert!(!script.contains("__STABILITY_MS__"));
    }

    #[test]
    fn script_carries_the_noise_filter() {
        let script = StabilityWaiter::default().script();
        for marker in ["spinner", "loader", "progress", "aria-busy", "data-loading", "CANVAS"] {
            assert!(script.contains(marker), "missing noise marker {marker}");
        }
    }

    #[test]
    fn defaults_match_contract() {
        let waiter = StabilityWaiter::default();
        assert_eq!(waiter.stability_duration, Duration::from_millis(300));
        assert_eq!(waiter.max_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn outcome_deserializes_from_page_payload() {
        let outcome: StabilityOutcome =
            serde_json::from_str(r#"{ "achieved": true, "duration": 420 }"#).unwrap();
        assert!(outcome.achieved);
        assert_eq!(outcome.duration_ms, 420);
    }

    #[tokio::test]
    async fn page_teardown_reads_as_unstable() {
        use cdp_adapter::{AdapterError, CdpConfig, CdpTransport, ScriptedTransport};
        use serde_json::json;

        let transport = ScriptedTransport::new(|_, method, _| {
            if method == "Runtime.evaluate" {
                Err(AdapterError::from_protocol(
                    -32000,
                    "Execution context was destroyed.",
                ))
            } else {
                Ok(json!({}))
            }
        });
        let adapter = Arc::new(cdp_adapter::CdpAdapter::with_transport(
            CdpConfig::default(),
            transport as Arc<dyn CdpTransport>,
        ));
        // Register a page by hand so the session routing resolves.
        adapter.registry().insert_page(PageId::new(), "t".into());
        let (page, _) = adapter.registry().list().into_iter().next().unwrap();
        adapter.registry().set_cdp_session(&page, "s".into());

        let outcome = StabilityWaiter::default()
            .wait(&adapter, page)
            .await
            .unwrap();
        assert!(!outcome.achieved);
        assert_eq!(outcome.duration_ms, 0);
    }
}
