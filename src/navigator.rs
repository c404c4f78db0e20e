use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{wait_for_document_ready, wait_for_element, BrowserSession, Element};
use crate::config::{Config, Selectors, TimingConfig};
use crate::error::{Result, ScrapingError};

/// Drives the paginated results list of the map view.
pub struct PageNavigator {
    timing: TimingConfig,
    selectors: Selectors,
    base_url: Url,
    max_cards: usize,
}

impl PageNavigator {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            timing: config.timing.clone(),
            selectors: config.selectors.clone(),
            base_url: Url::parse(&config.site.base_url)?,
            max_cards: config.run.max_cards_per_page,
        })
    }

    /// Document ready plus a fixed settle delay for client-side rendering.
    pub async fn wait_for_page_ready(
        &self,
        session: &dyn BrowserSession,
        timeout: Duration,
        extra_delay: Duration,
    ) -> bool {
        match wait_for_document_ready(session, timeout, self.timing.poll_interval).await {
            Ok(()) => {
                if !extra_delay.is_zero() {
                    sleep(extra_delay).await;
                }
                true
            }
            Err(e) => {
                warn!("Page not ready: {}", e);
                false
            }
        }
    }

    /// Wait for listing cards to render.
    ///
    /// The first miss pauses briefly before retrying; later misses refresh
    /// the page and wait for it to be ready before the next try.
    pub async fn wait_for_listings(
        &self,
        session: &dyn BrowserSession,
        timeout: Duration,
        max_retries: u32,
    ) -> bool {
        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            match wait_for_element(session, &self.selectors.listing_card, timeout, self.timing.poll_interval).await {
                Ok(_) => return true,
                Err(e) => {
                    warn!("Listings did not appear (attempt {}/{}): {}", attempt, attempts, e);
                }
            }

            if attempt == attempts {
                break;
            }
            if attempt == 1 {
                sleep(self.timing.listings_retry_pause).await;
            } else {
                info!("Refreshing page while waiting for listings");
                if let Err(e) = session.refresh().await {
                    warn!("Refresh failed: {}", e);
                }
                self.wait_for_page_ready(session, self.timing.page_ready_timeout, self.timing.settle_delay)
                    .await;
            }
        }
        false
    }

    /// Detail-page URLs of the cards on the current results page, in page
    /// order and without duplicates.
    pub async fn collect_listing_urls(&self, session: &dyn BrowserSession, max_retries: u32) -> Vec<String> {
        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            if attempt == 2 {
                info!("No listing URLs found, refreshing before retrying");
                if let Err(e) = session.refresh().await {
                    warn!("Refresh failed: {}", e);
                }
            } else if attempt > 2 {
                sleep(self.timing.listings_retry_pause).await;
            }

            self.wait_for_page_ready(session, self.timing.page_ready_timeout, self.timing.settle_delay)
                .await;
            if let Err(e) = wait_for_element(
                session,
                &self.selectors.listing_card,
                self.timing.listings_timeout,
                self.timing.poll_interval,
            )
            .await
            {
                warn!("Listing cards missing (attempt {}/{}): {}", attempt, attempts, e);
                continue;
            }

            let cards = match session.find_elements(&self.selectors.listing_card).await {
                Ok(cards) => cards,
                Err(e) => {
                    warn!("Could not list cards: {}", e);
                    continue;
                }
            };

            let mut seen = HashSet::new();
            let mut urls = Vec::new();
            for (index, card) in cards.iter().take(self.max_cards).enumerate() {
                match self.resolve_card_url(card.as_ref()).await {
                    Ok(url) => {
                        if seen.insert(url.clone()) {
                            urls.push(url);
                        } else {
                            debug!("Duplicate listing URL on card {}: {}", index + 1, url);
                        }
                    }
                    Err(e) => debug!("Skipping card {}: {}", index + 1, e),
                }
            }

            if !urls.is_empty() {
                info!("Collected {} listing URLs from {} cards", urls.len(), cards.len().min(self.max_cards));
                return urls;
            }
        }

        warn!("Giving up on collecting listing URLs after {} attempts", attempts);
        Vec::new()
    }

    /// Click the next-page control.
    ///
    /// Returns false when the control reports itself disabled (end of the
    /// results) or when every attempt failed.
    pub async fn navigate_to_next_page(
        &self,
        session: &dyn BrowserSession,
        timeout: Duration,
        max_retries: u32,
    ) -> bool {
        let attempts = max_retries.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                sleep(self.timing.listings_retry_pause).await;
            }

            self.wait_for_page_ready(session, timeout, Duration::ZERO).await;

            let next = match wait_for_element(session, &self.selectors.next_page, timeout, self.timing.poll_interval).await {
                Ok(next) => next,
                Err(e) => {
                    warn!("Next-page control not found (attempt {}/{}): {}", attempt, attempts, e);
                    continue;
                }
            };

            if is_disabled(next.as_ref()).await {
                info!("Next-page control is disabled, no more results");
                return false;
            }

            if let Err(e) = next.scroll_into_view().await {
                debug!("Could not scroll next-page control into view: {}", e);
            }
            if let Err(e) = next.click().await {
                warn!("Clicking next page failed (attempt {}/{}): {}", attempt, attempts, e);
                continue;
            }

            if !self.wait_for_page_ready(session, timeout, self.timing.settle_delay).await {
                continue;
            }
            if self.wait_for_listings(session, timeout, 1).await {
                return true;
            }
        }

        warn!("Could not advance to the next page after {} attempts", attempts);
        false
    }

    async fn resolve_card_url(&self, card: &dyn Element) -> Result<String> {
        let href = match card.find_element(&self.selectors.card_link).await {
            Ok(link) => link.attribute("href").await?,
            // some layouts make the card itself the anchor
            Err(_) => card.attribute("href").await?,
        };

        let href = href
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ScrapingError::ElementNotFound(format!("{} href", self.selectors.card_link)))?;

        Ok(self.base_url.join(&href)?.to_string())
    }
}

async fn is_disabled(control: &dyn Element) -> bool {
    if let Ok(Some(_)) = control.attribute("disabled").await {
        return true;
    }
    if let Ok(Some(value)) = control.attribute("aria-disabled").await {
        if value.eq_ignore_ascii_case("true") {
            return true;
        }
    }
    matches!(
        control.attribute("class").await,
        Ok(Some(class)) if class.split_whitespace().any(|c| c == "disabled")
    )
}
