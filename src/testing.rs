//! Scripted in-memory browser used by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{scripts, BrowserSession, Element, ElementHandle, SessionFactory};
use crate::config::Config;
use crate::error::{Result, ScrapingError};

pub const BASE_URL: &str = "https://www.realtor.ca";

#[derive(Debug, Clone)]
pub enum ClickAction {
    Navigate(String),
    AppendBodyText(String),
}

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub children: HashMap<String, Vec<FakeElement>>,
    pub on_click: Option<ClickAction>,
}

impl FakeElement {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, selector: &str, child: FakeElement) -> Self {
        self.children.entry(selector.to_string()).or_default().push(child);
        self
    }

    pub fn on_click(mut self, action: ClickAction) -> Self {
        self.on_click = Some(action);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub elements: HashMap<String, Vec<FakeElement>>,
    pub body_text: String,
    pub source: String,
}

impl FakePage {
    pub fn element(mut self, selector: &str, element: FakeElement) -> Self {
        self.elements.entry(selector.to_string()).or_default().push(element);
        self
    }

    pub fn body(mut self, text: &str) -> Self {
        self.body_text = text.to_string();
        self
    }

    pub fn source(mut self, html: &str) -> Self {
        self.source = html.to_string();
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct SiteStats {
    pub launches: u32,
    pub navigations: Vec<String>,
    pub refreshes: u32,
    pub cookie_clears: u32,
    pub storage_clears: u32,
    pub extra_window_closes: u32,
    pub quits: u32,
    pub clicks: u32,
}

/// The pretend website shared by every session a [`FakeFactory`] launches.
#[derive(Default)]
pub struct FakeSite {
    pages: Mutex<HashMap<String, FakePage>>,
    /// Remaining navigations to a URL that render a blank page.
    flaky: Mutex<HashMap<String, u32>>,
    stats: Mutex<SiteStats>,
    /// Launch numbers (1-based) that fail.
    failing_launches: Mutex<Vec<u32>>,
    /// URL prefixes the site silently sends elsewhere.
    redirects: Mutex<Vec<(String, String)>>,
    /// Remaining multi-element queries that fail outright.
    failing_queries: Mutex<u32>,
}

impl FakeSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_page(&self, url: &str, page: FakePage) {
        self.pages.lock().unwrap().insert(url.to_string(), page);
    }

    pub fn fail_loads(&self, url: &str, times: u32) {
        self.flaky.lock().unwrap().insert(url.to_string(), times);
    }

    pub fn fail_launch(&self, launch_number: u32) {
        self.failing_launches.lock().unwrap().push(launch_number);
    }

    /// Any navigation to a URL starting with `prefix` lands on `target`.
    pub fn redirect(&self, prefix: &str, target: &str) {
        self.redirects.lock().unwrap().push((prefix.to_string(), target.to_string()));
    }

    pub fn fail_queries(&self, times: u32) {
        *self.failing_queries.lock().unwrap() = times;
    }

    pub fn stats(&self) -> SiteStats {
        self.stats.lock().unwrap().clone()
    }

    /// Exact URL first, then the longest registered prefix.
    fn lookup(&self, url: &str) -> FakePage {
        let pages = self.pages.lock().unwrap();
        if let Some(page) = pages.get(url) {
            return page.clone();
        }
        pages
            .iter()
            .filter(|(key, _)| url.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, page)| page.clone())
            .unwrap_or_default()
    }

    fn resolve(&self, url: &str) -> String {
        self.redirects
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, target)| target.clone())
            .unwrap_or_else(|| url.to_string())
    }

    fn consume_flaky(&self, url: &str) -> bool {
        let mut flaky = self.flaky.lock().unwrap();
        match flaky.get_mut(url) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn record<F: FnOnce(&mut SiteStats)>(&self, update: F) {
        update(&mut self.stats.lock().unwrap());
    }
}

struct Viewport {
    url: String,
    page: FakePage,
}

pub struct FakeSession {
    site: Arc<FakeSite>,
    viewport: Arc<Mutex<Viewport>>,
}

impl FakeSession {
    pub fn new(site: Arc<FakeSite>) -> Self {
        Self {
            site,
            viewport: Arc::new(Mutex::new(Viewport {
                url: "about:blank".to_string(),
                page: FakePage::default(),
            })),
        }
    }

    fn load(site: &FakeSite, viewport: &Mutex<Viewport>, url: &str) {
        let page = if site.consume_flaky(url) {
            FakePage::default()
        } else {
            site.lookup(url)
        };
        let mut view = viewport.lock().unwrap();
        view.url = url.to_string();
        view.page = page;
    }

    fn handle(&self, element: FakeElement) -> ElementHandle {
        Box::new(FakeElementHandle {
            element,
            site: self.site.clone(),
            viewport: self.viewport.clone(),
        })
    }
}

struct FakeElementHandle {
    element: FakeElement,
    site: Arc<FakeSite>,
    viewport: Arc<Mutex<Viewport>>,
}

#[async_trait]
impl Element for FakeElementHandle {
    async fn text(&self) -> Result<String> {
        Ok(self.element.text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.element.attributes.get(name).cloned())
    }

    async fn click(&self) -> Result<()> {
        self.site.record(|s| s.clicks += 1);
        match &self.element.on_click {
            Some(ClickAction::Navigate(url)) => {
                FakeSession::load(&self.site, &self.viewport, url);
            }
            Some(ClickAction::AppendBodyText(text)) => {
                let mut view = self.viewport.lock().unwrap();
                view.page.body_text.push(' ');
                view.page.body_text.push_str(text);
            }
            None => {}
        }
        Ok(())
    }

    async fn scroll_into_view(&self) -> Result<()> {
        Ok(())
    }

    async fn find_element(&self, selector: &str) -> Result<ElementHandle> {
        let child = self
            .element
            .children
            .get(selector)
            .and_then(|children| children.first())
            .cloned()
            .ok_or_else(|| ScrapingError::ElementNotFound(selector.to_string()))?;
        Ok(Box::new(FakeElementHandle {
            element: child,
            site: self.site.clone(),
            viewport: self.viewport.clone(),
        }))
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.site.record(|s| s.navigations.push(url.to_string()));
        let target = self.site.resolve(url);
        Self::load(&self.site, &self.viewport, &target);
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.viewport.lock().unwrap().url.clone())
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.viewport.lock().unwrap().page.source.clone())
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        match script {
            scripts::READY_STATE => Ok(Value::String("complete".to_string())),
            scripts::BODY_TEXT => Ok(Value::String(self.viewport.lock().unwrap().page.body_text.clone())),
            scripts::CLEAR_STORAGE => Ok(Value::Bool(true)),
            _ => Ok(Value::Null),
        }
    }

    async fn find_element(&self, selector: &str) -> Result<ElementHandle> {
        let element = self
            .viewport
            .lock()
            .unwrap()
            .page
            .elements
            .get(selector)
            .and_then(|found| found.first())
            .cloned()
            .ok_or_else(|| ScrapingError::ElementNotFound(selector.to_string()))?;
        Ok(self.handle(element))
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        {
            let mut failing = self.site.failing_queries.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ScrapingError::BrowserError(format!("query '{}' failed", selector)));
            }
        }
        let found = self
            .viewport
            .lock()
            .unwrap()
            .page
            .elements
            .get(selector)
            .cloned()
            .unwrap_or_default();
        Ok(found.into_iter().map(|element| self.handle(element)).collect())
    }

    async fn refresh(&self) -> Result<()> {
        self.site.record(|s| s.refreshes += 1);
        let url = self.viewport.lock().unwrap().url.clone();
        Self::load(&self.site, &self.viewport, &url);
        Ok(())
    }

    async fn delete_cookies(&self) -> Result<()> {
        self.site.record(|s| s.cookie_clears += 1);
        Ok(())
    }

    async fn clear_storage(&self) -> Result<()> {
        self.site.record(|s| s.storage_clears += 1);
        Ok(())
    }

    async fn close_extra_windows(&self) -> Result<()> {
        self.site.record(|s| s.extra_window_closes += 1);
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        self.site.record(|s| s.quits += 1);
        Ok(())
    }
}

pub struct FakeFactory {
    pub site: Arc<FakeSite>,
}

impl FakeFactory {
    pub fn new(site: Arc<FakeSite>) -> Self {
        Self { site }
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let launch_number = {
            let mut stats = self.site.stats.lock().unwrap();
            stats.launches += 1;
            stats.launches
        };
        if self.site.failing_launches.lock().unwrap().contains(&launch_number) {
            return Err(ScrapingError::BrowserError(format!("launch {} refused", launch_number)));
        }
        Ok(Box::new(FakeSession::new(self.site.clone())))
    }
}

/// Defaults with every wait and delay shrunk to keep tests fast.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    let timing = &mut config.timing;
    timing.poll_interval = Duration::from_millis(1);
    timing.listing_load_timeout = Duration::from_millis(10);
    timing.listing_retry_backoff = Duration::from_millis(1);
    timing.price_timeout = Duration::from_millis(10);
    timing.listings_timeout = Duration::from_millis(10);
    timing.listings_retry_pause = Duration::from_millis(1);
    timing.page_ready_timeout = Duration::from_millis(10);
    timing.settle_delay = Duration::ZERO;
    timing.next_page_timeout = Duration::from_millis(10);
    timing.inter_page_delay = Duration::ZERO;
    timing.inter_listing_delay_ms = (0, 0);
    timing.verification_timeout = Duration::from_millis(10);
    config
}

pub fn detail_url(id: u32) -> String {
    format!("{}/real-estate/{}/listing", BASE_URL, id)
}

/// A detail page carrying every field the extractor reads.
pub fn detail_page(config: &Config, agent: &str, address: &str) -> FakePage {
    let s = &config.selectors;
    FakePage::default()
        .element(&s.address, FakeElement::with_text(address))
        .element(&s.agent_name, FakeElement::with_text(agent))
        .element(&s.phone, FakeElement::with_text("519-555-0101"))
        .element(&s.email, FakeElement::default().attr("href", "mailto:agent@example.com"))
        .element(&s.website, FakeElement::default().attr("href", "https://agent.example.com"))
        .element(&s.price, FakeElement::with_text("$649,900"))
        .element(&s.posted_time, FakeElement::with_text("3 hours ago"))
        .element(&s.photo_count, FakeElement::with_text(" 24+ "))
        .element(&s.brokerage, FakeElement::with_text("Example Realty Brokerage"))
}

/// A card whose detail link points at `href`.
pub fn listing_card(config: &Config, href: &str) -> FakeElement {
    FakeElement::default().child(&config.selectors.card_link, FakeElement::default().attr("href", href))
}

/// A results page with the given detail links and a next-page control.
pub fn results_page(config: &Config, hrefs: &[String], next: FakeElement, body: &str) -> FakePage {
    let mut page = FakePage::default().body(body);
    for href in hrefs {
        page = page.element(&config.selectors.listing_card, listing_card(config, href));
    }
    page.element(&config.selectors.next_page, next)
}

pub fn disabled_next() -> FakeElement {
    FakeElement::default().attr("class", "lnkNextResultsPage disabled")
}
