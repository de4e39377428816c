//! Launch and connection configuration for the adapter.

use std::env;
use std::path::{Path, PathBuf};

use which::which;

/// Configuration for launching or attaching to a Chromium instance.
#[derive(Clone, Debug)]
pub struct CdpConfig {
    /// Chromium executable. Empty path means "let chromiumoxide probe".
    pub executable: PathBuf,
    /// Profile directory handed to the browser.
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Default per-command deadline.
    pub default_deadline_ms: u64,
    /// Attach to an already-running browser instead of launching one.
    pub websocket_url: Option<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: true,
            default_deadline_ms: 30_000,
            websocket_url: env::var("FLASHLOOP_WS_URL").ok().filter(|v| !v.is_empty()),
        }
    }
}

impl CdpConfig {
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

fn default_profile_dir() -> PathBuf {
    env::temp_dir().join("flashloop-profile")
}

/// Locate a Chromium/Chrome executable.
///
/// `FLASHLOOP_CHROME` wins; otherwise probe PATH for the usual binary names,
/// then the well-known install locations.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(path) = env::var("FLASHLOOP_CHROME") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    const CANDIDATES: &[&str] = &[
        "chromium",
        "chromium-browser",
        "google-chrome",
        "google-chrome-stable",
        "chrome",
    ];
    for name in CANDIDATES {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    const KNOWN_PATHS: &[&str] = &[
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
    ];
    KNOWN_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(|p| p.to_path_buf())
}
