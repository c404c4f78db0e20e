use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as LaunchConfig};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::ReloadParams;
use chromiumoxide::element::Element as CdpElement;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::session::{scripts, BrowserSession, Element, ElementHandle, SessionFactory};
use crate::config::BrowserConfig;
use crate::error::{Result, ScrapingError};

pub struct ChromeElement {
    inner: CdpElement,
}

#[async_trait]
impl Element for ChromeElement {
    async fn text(&self) -> Result<String> {
        Ok(self.inner.inner_text().await?.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.inner.attribute(name).await?)
    }

    async fn click(&self) -> Result<()> {
        self.inner.click().await?;
        Ok(())
    }

    async fn scroll_into_view(&self) -> Result<()> {
        self.inner.scroll_into_view().await?;
        Ok(())
    }

    async fn find_element(&self, selector: &str) -> Result<ElementHandle> {
        let inner = self
            .inner
            .find_element(selector)
            .await
            .map_err(|_| ScrapingError::ElementNotFound(selector.to_string()))?;
        Ok(Box::new(ChromeElement { inner }))
    }
}

/// One Chrome process driving a single page.
pub struct ChromeSession {
    pub id: Uuid,
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl ChromeSession {
    pub async fn launch(settings: &BrowserConfig) -> Result<Self> {
        let id = Uuid::new_v4();

        // unique profile dir so a restarted session never inherits cookies or locks
        let user_data_dir = std::env::temp_dir().join(format!(
            "realtor-scraper-{}-{}",
            std::process::id(),
            id
        ));
        std::fs::create_dir_all(&user_data_dir)?;

        let mut builder = LaunchConfig::builder()
            .no_sandbox()
            .user_data_dir(&user_data_dir)
            .window_size(settings.window_size.0, settings.window_size.1)
            .args(vec![
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-extensions",
                "--mute-audio",
                "--no-first-run",
                "--disable-default-apps",
                "--disable-sync",
                "--disable-blink-features=AutomationControlled",
                "--log-level=3",
            ]);
        if !settings.headless {
            builder = builder.with_head();
        }

        let launch_config = builder
            .build()
            .map_err(|e| ScrapingError::BrowserError(format!("Failed to create browser config: {}", e)))?;

        info!("Launching browser session {}", id);

        let attempts = settings.launch_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match Browser::launch(launch_config.clone()).await {
                Ok((browser, mut handler)) => {
                    info!("Browser launched successfully on attempt {}", attempt);

                    let handler_task = tokio::spawn(async move {
                        while let Some(event) = handler.next().await {
                            if let Err(e) = event {
                                // websocket deserialization noise is common and harmless
                                let message = e.to_string();
                                if message.contains("data did not match any variant")
                                    || message.contains("untagged enum Message")
                                {
                                    debug!("Ignoring WebSocket deserialization error: {}", e);
                                } else {
                                    warn!("Browser handler error: {}", e);
                                }
                            }
                        }
                        debug!("Browser handler task ended");
                    });

                    let page = match tokio::time::timeout(
                        Duration::from_secs(10),
                        browser.new_page("about:blank"),
                    )
                    .await
                    {
                        Ok(Ok(page)) => page,
                        Ok(Err(e)) => {
                            handler_task.abort();
                            return Err(ScrapingError::BrowserError(format!("Failed to create new page: {}", e)));
                        }
                        Err(_) => {
                            handler_task.abort();
                            return Err(ScrapingError::BrowserError("Timeout creating new page".to_string()));
                        }
                    };

                    return Ok(Self {
                        id,
                        browser,
                        page,
                        handler_task,
                        user_data_dir,
                    });
                }
                Err(e) => {
                    error!("Browser launch attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }

        Err(ScrapingError::BrowserError(format!(
            "Failed to launch browser after {} attempts: {}",
            attempts, last_error
        )))
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("Session {} navigating to {}", self.id, url);
        self.page
            .goto(url)
            .await
            .map_err(|e| ScrapingError::NavigationError(format!("Failed to navigate to {}: {}", url, e)))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        let result = self.page.evaluate(script).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn find_element(&self, selector: &str) -> Result<ElementHandle> {
        let inner = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| ScrapingError::ElementNotFound(selector.to_string()))?;
        Ok(Box::new(ChromeElement { inner }))
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| ScrapingError::BrowserError(format!("Failed to query '{}': {}", selector, e)))?;
        Ok(elements
            .into_iter()
            .map(|inner| Box::new(ChromeElement { inner }) as ElementHandle)
            .collect())
    }

    async fn refresh(&self) -> Result<()> {
        self.page
            .execute(ReloadParams::builder().ignore_cache(true).build())
            .await
            .map_err(|e| ScrapingError::NavigationError(format!("Failed to reload page: {}", e)))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| ScrapingError::NavigationError(format!("Reload did not finish: {}", e)))?;
        Ok(())
    }

    async fn delete_cookies(&self) -> Result<()> {
        self.page.execute(ClearBrowserCookiesParams::default()).await?;
        Ok(())
    }

    async fn clear_storage(&self) -> Result<()> {
        self.page.evaluate(scripts::CLEAR_STORAGE).await?;
        Ok(())
    }

    async fn close_extra_windows(&self) -> Result<()> {
        let ours = self.page.target_id().clone();
        for page in self.browser.pages().await? {
            if *page.target_id() != ours {
                if let Err(e) = page.close().await {
                    warn!("Failed to close extra tab: {}", e);
                }
            }
        }
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        info!("Closing browser session {}", self.id);
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        let _ = std::fs::remove_dir_all(&self.user_data_dir);
        closed?;
        Ok(())
    }
}

/// Launches a new [`ChromeSession`] per call.
pub struct ChromeSessionFactory {
    settings: BrowserConfig,
}

impl ChromeSessionFactory {
    pub fn new(settings: BrowserConfig) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let session = ChromeSession::launch(&self.settings).await?;
        Ok(Box::new(session))
    }
}
