use scraper::{Html, Selector};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{wait_for_element, BrowserSession};
use crate::config::{Config, Selectors, TimingConfig};
use crate::error::{RecoveryStrategy, Result, ScrapingError};
use crate::models::{AgentListingCounter, ListingRecord};
use crate::normalize::{
    agent_key, clean_address, format_posted_time, normalize_posted_time, split_agent_name,
};

const MAILTO_PREFIX: &str = "mailto:";

/// Reads one listing's detail page into a [`ListingRecord`].
pub struct ListingExtractor {
    timing: TimingConfig,
    selectors: Selectors,
}

/// Raw field values as read from the page, before normalization.
#[derive(Debug, Default)]
struct RawFields {
    agent_name: String,
    phone: String,
    email: String,
    website: String,
    price: String,
    address: String,
    posted: String,
    photos: String,
    brokerage: String,
    breadcrumb: Vec<String>,
}

impl ListingExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            timing: config.timing.clone(),
            selectors: config.selectors.clone(),
        }
    }

    /// Load `url` and extract its record.
    ///
    /// `Ok(None)` means the page never rendered its address block within the
    /// allowed retries. An error is only returned when the browser session
    /// itself is unusable.
    pub async fn extract(
        &self,
        session: &dyn BrowserSession,
        url: &str,
        town: &str,
        agent_counts: &mut AgentListingCounter,
    ) -> Result<Option<ListingRecord>> {
        if !self.load_listing(session, url).await? {
            return Ok(None);
        }

        let raw = self.read_fields(session).await;
        let (first_name, last_name) = split_agent_name(&raw.agent_name);
        let number_of_listings = agent_counts.increment(&agent_key(&first_name, &last_name));

        let date_posted = if raw.posted.is_empty() {
            String::new()
        } else {
            format_posted_time(normalize_posted_time(&raw.posted))
        };

        let town = if town.is_empty() {
            town_from_breadcrumb(&raw.breadcrumb)
        } else {
            town.to_string()
        };

        let record = ListingRecord {
            first_name,
            last_name,
            email: raw.email,
            phone: raw.phone,
            website: raw.website,
            price: raw.price,
            number_of_listings,
            number_of_photos: raw.photos,
            street_address: clean_address(&raw.address),
            date_posted,
            listing_url: url.to_string(),
            town,
            brokerage: raw.brokerage,
        };

        info!(
            "Extracted {} {} ({} listings so far) at {}",
            record.first_name, record.last_name, record.number_of_listings, record.street_address
        );
        Ok(Some(record))
    }

    /// Navigate to the listing until its address block shows up, backing off
    /// a little longer before each retry.
    async fn load_listing(&self, session: &dyn BrowserSession, url: &str) -> Result<bool> {
        let retries = self.timing.listing_load_retries;
        for retry in 0..=retries {
            if retry > 0 {
                let backoff = self.retry_backoff(retry);
                debug!("Retrying {} in {:?} (retry {}/{})", url, backoff, retry, retries);
                sleep(backoff).await;
            }

            if let Err(e) = session.navigate(url).await {
                if e.recovery_strategy() == RecoveryStrategy::RestartBrowser {
                    return Err(e);
                }
                warn!("Navigation to {} failed: {}", url, e);
                continue;
            }

            match wait_for_element(
                session,
                &self.selectors.address,
                self.timing.listing_load_timeout,
                self.timing.poll_interval,
            )
            .await
            {
                Ok(_) => return Ok(true),
                Err(e) => warn!("Listing {} did not load: {}", url, e),
            }
        }

        warn!("Skipping {} after {} retries", url, retries);
        Ok(false)
    }

    /// Pause before retry `retry` (1-based): one backoff unit for the first
    /// retry, two for the second, and so on.
    fn retry_backoff(&self, retry: u32) -> Duration {
        self.timing.listing_retry_backoff * retry
    }

    async fn read_fields(&self, session: &dyn BrowserSession) -> RawFields {
        let s = &self.selectors;
        RawFields {
            agent_name: field_or_default("agent name", text_of(session, &s.agent_name)).await,
            phone: field_or_default("phone", text_of(session, &s.phone)).await,
            email: field_or_default("email", async {
                let href = href_of(session, &s.email).await?;
                Ok::<_, ScrapingError>(href.strip_prefix(MAILTO_PREFIX).unwrap_or(&href).to_string())
            })
            .await,
            website: field_or_default("website", href_of(session, &s.website)).await,
            price: field_or_default("price", async {
                let element =
                    wait_for_element(session, &s.price, self.timing.price_timeout, self.timing.poll_interval)
                        .await?;
                Ok::<_, ScrapingError>(element.text().await?.trim().to_string())
            })
            .await,
            address: field_or_default("address", text_of(session, &s.address)).await,
            posted: field_or_default("posted time", text_of(session, &s.posted_time)).await,
            photos: field_or_default("photo count", async {
                let label = text_of(session, &s.photo_count).await?;
                Ok::<_, ScrapingError>(label.replace('+', "").trim().to_string())
            })
            .await,
            brokerage: field_or_default("brokerage", text_of(session, &s.brokerage)).await,
            breadcrumb: match session.page_source().await {
                Ok(html) => breadcrumb_locations(&html, &s.json_ld),
                Err(e) => {
                    debug!("Page source unavailable for breadcrumb: {}", e);
                    Vec::new()
                }
            },
        }
    }
}

/// Run one field extraction; any failure yields an empty string and never
/// affects the other fields.
async fn field_or_default<F>(label: &str, extraction: F) -> String
where
    F: Future<Output = Result<String>>,
{
    match extraction.await {
        Ok(value) => value,
        Err(e) => {
            debug!("Field '{}' unavailable: {}", label, e);
            String::new()
        }
    }
}

async fn text_of(session: &dyn BrowserSession, selector: &str) -> Result<String> {
    let element = session.find_element(selector).await?;
    Ok(element.text().await?.trim().to_string())
}

async fn href_of(session: &dyn BrowserSession, selector: &str) -> Result<String> {
    let element = session.find_element(selector).await?;
    element
        .attribute("href")
        .await?
        .map(|href| href.trim().to_string())
        .ok_or_else(|| ScrapingError::ElementNotFound(format!("{} href", selector)))
}

/// Location names from the page's JSON-LD `BreadcrumbList`, outermost first.
pub fn breadcrumb_locations(html: &str, json_ld_selector: &str) -> Vec<String> {
    let selector = match Selector::parse(json_ld_selector) {
        Ok(selector) => selector,
        Err(e) => {
            warn!("Invalid JSON-LD selector '{}': {}", json_ld_selector, e);
            return Vec::new();
        }
    };

    let document = Html::parse_document(html);
    for script in document.select(&selector) {
        let body: String = script.text().collect();
        let json: Value = match serde_json::from_str(body.trim()) {
            Ok(json) => json,
            Err(e) => {
                debug!("Skipping unparsable JSON-LD block: {}", e);
                continue;
            }
        };

        let candidates = match json {
            Value::Array(items) => items,
            other => vec![other],
        };
        for candidate in candidates {
            if let Some(names) = breadcrumb_names(&candidate) {
                return names;
            }
        }
    }
    Vec::new()
}

fn breadcrumb_names(json: &Value) -> Option<Vec<String>> {
    if json.get("@type").and_then(Value::as_str) != Some("BreadcrumbList") {
        return None;
    }
    let items = json.get("itemListElement")?.as_array()?;
    Some(
        items
            .iter()
            .filter(|item| item.get("@type").and_then(Value::as_str) == Some("ListItem"))
            .filter_map(|item| item.get("name").and_then(Value::as_str))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
    )
}

// The trail ends with the listing itself; the entry before it is the
// municipality.
fn town_from_breadcrumb(locations: &[String]) -> String {
    match locations {
        [] => String::new(),
        [only] => only.clone(),
        [.., town, _listing] => town.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    const BREADCRUMB_HTML: &str = r#"<html><head>
        <script type="application/ld+json">{"@type": "Organization", "name": "REALTOR.ca"}</script>
        <script type="application/ld+json">
        {"@context": "https://schema.org", "@type": "BreadcrumbList", "itemListElement": [
            {"@type": "ListItem", "position": 1, "name": "Ontario"},
            {"@type": "ListItem", "position": 2, "name": "Kitchener"},
            {"@type": "ListItem", "position": 3, "name": "123 Main St"}
        ]}
        </script></head><body></body></html>"#;

    async fn run(
        config: &Config,
        site: &std::sync::Arc<FakeSite>,
        url: &str,
        town: &str,
        counter: &mut AgentListingCounter,
    ) -> Option<ListingRecord> {
        let session = FakeSession::new(site.clone());
        ListingExtractor::new(config)
            .extract(&session, url, town, counter)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_extracts_every_field() {
        let config = fast_config();
        let site = FakeSite::new();
        site.add_page(
            &detail_url(1),
            detail_page(&config, "jane doe", "123 MAIN ST, Kitchener, Ontario N2G 1A1"),
        );

        let mut counter = AgentListingCounter::new();
        let record = run(&config, &site, &detail_url(1), "Kitchener", &mut counter)
            .await
            .unwrap();

        assert_eq!(record.first_name, "Jane");
        assert_eq!(record.last_name, "Doe");
        assert_eq!(record.email, "agent@example.com");
        assert_eq!(record.phone, "519-555-0101");
        assert_eq!(record.website, "https://agent.example.com");
        assert_eq!(record.price, "$649,900");
        assert_eq!(record.number_of_listings, 1);
        assert_eq!(record.number_of_photos, "24");
        assert_eq!(record.street_address, "123 Main St");
        assert_eq!(record.date_posted.len(), "2025-01-01 00:00".len());
        assert!(record.date_posted.ends_with(":00"));
        assert_eq!(record.listing_url, detail_url(1));
        assert_eq!(record.town, "Kitchener");
        assert_eq!(record.brokerage, "Example Realty Brokerage");
    }

    #[tokio::test]
    async fn test_missing_fields_default_to_empty() {
        let config = fast_config();
        let site = FakeSite::new();
        let page = FakePage::default()
            .element(&config.selectors.address, FakeElement::with_text("9 Elm Ave, Guelph"))
            .element(&config.selectors.photo_count, FakeElement::with_text("7"));
        site.add_page(&detail_url(2), page);

        let mut counter = AgentListingCounter::new();
        let record = run(&config, &site, &detail_url(2), "Guelph", &mut counter)
            .await
            .unwrap();

        assert_eq!(record.street_address, "9 Elm Ave");
        assert_eq!(record.number_of_photos, "7");
        assert_eq!(record.first_name, "");
        assert_eq!(record.last_name, "");
        assert_eq!(record.email, "");
        assert_eq!(record.price, "");
        assert_eq!(record.date_posted, "");
        assert_eq!(record.brokerage, "");
        assert_eq!(counter.get(" "), 1);
    }

    #[tokio::test]
    async fn test_retries_until_address_renders() {
        let config = fast_config();
        let site = FakeSite::new();
        site.add_page(&detail_url(3), detail_page(&config, "Sam Lee", "1 King St, Waterloo"));
        site.fail_loads(&detail_url(3), 2);

        let mut counter = AgentListingCounter::new();
        let record = run(&config, &site, &detail_url(3), "Waterloo", &mut counter).await;

        assert!(record.is_some());
        assert_eq!(site.stats().navigations.len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let config = fast_config();
        let site = FakeSite::new();
        site.add_page(&detail_url(4), detail_page(&config, "Sam Lee", "1 King St, Waterloo"));
        site.fail_loads(&detail_url(4), 3);

        let mut counter = AgentListingCounter::new();
        let record = run(&config, &site, &detail_url(4), "Waterloo", &mut counter).await;

        assert!(record.is_none());
        assert_eq!(site.stats().navigations.len(), 3);
        assert_eq!(counter.agents(), 0);
    }

    #[tokio::test]
    async fn test_counter_stamps_running_totals() {
        let config = fast_config();
        let site = FakeSite::new();
        site.add_page(&detail_url(1), detail_page(&config, "Jane Doe", "1 A St, Kitchener"));
        site.add_page(&detail_url(2), detail_page(&config, "John Smith", "2 B St, Kitchener"));
        site.add_page(&detail_url(3), detail_page(&config, "jane DOE", "3 C St, Kitchener"));
        site.add_page(&detail_url(4), detail_page(&config, "Jane Doe", "4 D St, Kitchener"));

        let mut counter = AgentListingCounter::new();
        let mut stamped = Vec::new();
        for id in 1..=4 {
            let record = run(&config, &site, &detail_url(id), "Kitchener", &mut counter)
                .await
                .unwrap();
            stamped.push((record.first_name, record.number_of_listings));
        }

        assert_eq!(
            stamped,
            vec![
                ("Jane".to_string(), 1),
                ("John".to_string(), 1),
                ("Jane".to_string(), 2),
                ("Jane".to_string(), 3),
            ]
        );
    }

    #[tokio::test]
    async fn test_town_falls_back_to_breadcrumb() {
        let config = fast_config();
        let site = FakeSite::new();
        site.add_page(
            &detail_url(5),
            detail_page(&config, "Jane Doe", "123 Main St, Kitchener").source(BREADCRUMB_HTML),
        );

        let mut counter = AgentListingCounter::new();
        let record = run(&config, &site, &detail_url(5), "", &mut counter).await.unwrap();
        assert_eq!(record.town, "Kitchener");
    }

    #[test]
    fn test_retry_backoff_grows_by_one_unit() {
        let mut config = fast_config();
        config.timing.listing_retry_backoff = Duration::from_millis(200);
        let extractor = ListingExtractor::new(&config);

        assert_eq!(extractor.retry_backoff(1), Duration::from_millis(200));
        assert_eq!(extractor.retry_backoff(2), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failed_load_waits_one_unit() {
        let mut config = fast_config();
        config.timing.listing_retry_backoff = Duration::from_millis(200);
        let site = FakeSite::new();
        site.add_page(&detail_url(6), detail_page(&config, "Sam Lee", "1 King St, Waterloo"));
        site.fail_loads(&detail_url(6), 1);

        let started = tokio::time::Instant::now();
        let mut counter = AgentListingCounter::new();
        let record = run(&config, &site, &detail_url(6), "Waterloo", &mut counter).await;

        assert!(record.is_some());
        let waited = started.elapsed();
        // one backoff unit plus the failed address wait, well short of two units
        assert!(waited >= Duration::from_millis(200), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(400), "waited {:?}", waited);
    }

    #[test]
    fn test_breadcrumb_locations() {
        let selectors = Selectors::default();
        assert_eq!(
            breadcrumb_locations(BREADCRUMB_HTML, &selectors.json_ld),
            vec!["Ontario", "Kitchener", "123 Main St"]
        );
        assert!(breadcrumb_locations("<html></html>", &selectors.json_ld).is_empty());
        assert!(breadcrumb_locations(
            r#"<script type="application/ld+json">{not json</script>"#,
            &selectors.json_ld
        )
        .is_empty());
    }

    #[test]
    fn test_town_from_breadcrumb() {
        assert_eq!(town_from_breadcrumb(&[]), "");
        assert_eq!(town_from_breadcrumb(&["Guelph".to_string()]), "Guelph");
        assert_eq!(
            town_from_breadcrumb(&["Ontario".to_string(), "Guelph".to_string(), "5 Elm".to_string()]),
            "Guelph"
        );
    }
}
