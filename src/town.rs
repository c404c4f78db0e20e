use std::fmt;
use tracing::{debug, info, warn};

use crate::browser::{body_text, wait_for_element, wait_until, BrowserSession};
use crate::catalog::Town;
use crate::config::{Config, Selectors, SiteConfig, TimingConfig};
use crate::error::{Result, ScrapingError};
use crate::navigator::PageNavigator;

/// Independent signals that the browser is showing the intended town.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationSignal {
    /// Town name appears in the current URL.
    UrlName,
    /// Town name appears in the body once the breadcrumb has rendered.
    BreadcrumbText,
    /// Town name appears in the body after opening the filter panel.
    FilterPanelText,
    /// The town's geo identifier appears in the URL or page source.
    GeoId,
}

impl fmt::Display for VerificationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VerificationSignal::UrlName => "town name in URL",
            VerificationSignal::BreadcrumbText => "breadcrumb text",
            VerificationSignal::FilterPanelText => "filter panel text",
            VerificationSignal::GeoId => "geo identifier",
        };
        f.write_str(label)
    }
}

/// Checked in order; the first positive signal wins.
pub const VERIFICATION_LADDER: [VerificationSignal; 4] = [
    VerificationSignal::UrlName,
    VerificationSignal::BreadcrumbText,
    VerificationSignal::FilterPanelText,
    VerificationSignal::GeoId,
];

/// Moves the browser onto a town's map view and proves it got there.
pub struct TownSwitcher {
    site: SiteConfig,
    timing: TimingConfig,
    selectors: Selectors,
    navigator: PageNavigator,
}

impl TownSwitcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            site: config.site.clone(),
            timing: config.timing.clone(),
            selectors: config.selectors.clone(),
            navigator: PageNavigator::new(config)?,
        })
    }

    pub fn town_url(&self, town: &Town) -> String {
        town.search_url(&self.site.base_url, self.site.zoom_level)
    }

    /// Drive the session to `town`.
    ///
    /// Each attempt navigates, hard-reloads, then walks the verification
    /// ladder. Failed attempts clear cookies and storage before the next
    /// one. Returns the signal that confirmed arrival, or
    /// [`ScrapingError::TownVerification`] once attempts run out.
    pub async fn switch_to(&self, session: &dyn BrowserSession, town: &Town) -> Result<VerificationSignal> {
        let url = self.town_url(town);
        let attempts = self.timing.town_switch_retries.max(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                info!("Clearing browser state before switching to {} again", town.name);
                self.clear_state(session).await;
            }

            info!("Switching to {} (attempt {}/{})", town.name, attempt, attempts);
            if !self.load(session, &url).await {
                warn!("Listings for {} never appeared, verifying anyway", town.name);
            }

            self.hard_reload(session).await;

            if let Some(signal) = self.verify(session, town).await {
                info!("Arrived in {} ({})", town.name, signal);
                return Ok(signal);
            }
            warn!("Could not confirm arrival in {} (attempt {}/{})", town.name, attempt, attempts);
        }

        Err(ScrapingError::TownVerification(town.name.clone()))
    }

    /// Quick re-check used once a switch has already succeeded.
    pub async fn confirm(&self, session: &dyn BrowserSession, town: &Town) -> bool {
        if self.url_names_town(session, town).await {
            return true;
        }
        contains_name(&body_text(session).await, town)
    }

    /// Walk the ladder, returning the first signal that holds.
    pub async fn verify(&self, session: &dyn BrowserSession, town: &Town) -> Option<VerificationSignal> {
        for signal in VERIFICATION_LADDER {
            if self.check(signal, session, town).await {
                return Some(signal);
            }
            debug!("Verification signal '{}' negative for {}", signal, town.name);
        }
        None
    }

    async fn check(&self, signal: VerificationSignal, session: &dyn BrowserSession, town: &Town) -> bool {
        match signal {
            VerificationSignal::UrlName => self.url_names_town(session, town).await,
            VerificationSignal::BreadcrumbText => {
                if let Err(e) = wait_for_element(
                    session,
                    &self.selectors.breadcrumb,
                    self.timing.verification_timeout,
                    self.timing.poll_interval,
                )
                .await
                {
                    debug!("Breadcrumb not rendered: {}", e);
                }
                contains_name(&body_text(session).await, town)
            }
            VerificationSignal::FilterPanelText => {
                let button = match session.find_element(&self.selectors.filter_button).await {
                    Ok(button) => button,
                    Err(e) => {
                        debug!("Filter control unavailable: {}", e);
                        return false;
                    }
                };
                if let Err(e) = button.click().await {
                    debug!("Filter control click failed: {}", e);
                    return false;
                }
                wait_until(self.timing.verification_timeout, self.timing.poll_interval, move || async move {
                    contains_name(&body_text(session).await, town)
                })
                .await
            }
            VerificationSignal::GeoId => {
                let url = session.current_url().await.unwrap_or_default();
                if url.contains(&town.geo_id) {
                    return true;
                }
                session
                    .page_source()
                    .await
                    .map(|source| source.contains(&town.geo_id))
                    .unwrap_or(false)
            }
        }
    }

    async fn url_names_town(&self, session: &dyn BrowserSession, town: &Town) -> bool {
        let url = match session.current_url().await {
            Ok(url) => url.to_lowercase(),
            Err(e) => {
                debug!("Current URL unavailable: {}", e);
                return false;
            }
        };
        let name = town.name.to_lowercase();
        url.contains(&name) || url.contains(&urlencoding::encode(&name).to_lowercase())
    }

    /// Navigate and wait for results, retrying the navigation a few times.
    async fn load(&self, session: &dyn BrowserSession, url: &str) -> bool {
        let attempts = self.timing.town_navigation_retries.max(1);
        for attempt in 1..=attempts {
            if let Err(e) = session.navigate(url).await {
                warn!("Town navigation failed (attempt {}/{}): {}", attempt, attempts, e);
                continue;
            }
            self.navigator
                .wait_for_page_ready(session, self.timing.page_ready_timeout, self.timing.settle_delay)
                .await;
            if self
                .navigator
                .wait_for_listings(session, self.timing.listings_timeout, self.timing.listings_retries)
                .await
            {
                return true;
            }
        }
        false
    }

    async fn hard_reload(&self, session: &dyn BrowserSession) {
        if let Err(e) = session.refresh().await {
            warn!("Hard reload failed: {}", e);
            return;
        }
        self.navigator
            .wait_for_page_ready(session, self.timing.page_ready_timeout, self.timing.settle_delay)
            .await;
        self.navigator
            .wait_for_listings(session, self.timing.listings_timeout, 1)
            .await;
    }

    async fn clear_state(&self, session: &dyn BrowserSession) {
        if let Err(e) = session.delete_cookies().await {
            warn!("Failed to delete cookies: {}", e);
        }
        if let Err(e) = session.clear_storage().await {
            warn!("Failed to clear storage: {}", e);
        }
    }
}

fn contains_name(text: &str, town: &Town) -> bool {
    !town.name.is_empty() && text.to_lowercase().contains(&town.name.to_lowercase())
}
