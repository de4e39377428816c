//! Registry tracking live pages and their protocol identifiers.

use dashmap::DashMap;
use flashloop_core_types::PageId;

/// Protocol-level context for one page.
#[derive(Clone, Debug, Default)]
pub struct TargetContext {
    pub target_id: String,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
    pub recent_title: Option<String>,
}

/// Concurrent map from adapter page ids to their protocol context.
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            pages: DashMap::new(),
        }
    }

    pub fn insert_page(&self, page: PageId, target_id: String) {
        self.pages.insert(
            page,
            TargetContext {
                target_id,
                ..Default::default()
            },
        );
    }

    pub fn remove_page(&self, page: &PageId) {
        self.pages.remove(page);
    }

    pub fn get(&self, page: &PageId) -> Option<TargetContext> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<(PageId, TargetContext)> {
        self.pages
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect()
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(session);
        }
    }

    pub fn cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_url = Some(url);
        }
    }

    pub fn set_recent_title(&self, page: &PageId, title: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.recent_title = Some(title);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
