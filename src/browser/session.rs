use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// JavaScript snippets the scraper evaluates in the page.
pub mod scripts {
    pub const READY_STATE: &str = "document.readyState";
    pub const BODY_TEXT: &str = "document.body ? document.body.innerText : ''";
    pub const CLEAR_STORAGE: &str =
        "(() => { try { window.localStorage.clear(); window.sessionStorage.clear(); } catch (e) {} return true; })()";
}

pub type ElementHandle = Box<dyn Element>;

/// A node located in the current page.
#[async_trait]
pub trait Element: Send + Sync {
    /// Rendered text of the node.
    async fn text(&self) -> Result<String>;

    async fn attribute(&self, name: &str) -> Result<Option<String>>;

    async fn click(&self) -> Result<()>;

    async fn scroll_into_view(&self) -> Result<()>;

    /// First descendant matching `selector`.
    async fn find_element(&self, selector: &str) -> Result<ElementHandle>;
}

/// The browser capability every scraping component drives.
///
/// Every call may fail, for example on a timeout or a missing node; callers
/// check every result.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn page_source(&self) -> Result<String>;

    async fn execute_script(&self, script: &str) -> Result<Value>;

    async fn find_element(&self, selector: &str) -> Result<ElementHandle>;

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementHandle>>;

    /// Reload the current page, bypassing the cache.
    async fn refresh(&self) -> Result<()>;

    async fn delete_cookies(&self) -> Result<()>;

    async fn clear_storage(&self) -> Result<()>;

    /// Close every tab except the one being driven.
    async fn close_extra_windows(&self) -> Result<()>;

    async fn quit(&mut self) -> Result<()>;
}

/// Launches fresh browser sessions; used again whenever a session is
/// considered broken.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}
