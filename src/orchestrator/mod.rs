use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserSession, SessionFactory};
use crate::catalog::Town;
use crate::config::Config;
use crate::error::{Result, ScrapingError};
use crate::extractor::ListingExtractor;
use crate::models::{RunContext, RunSummary};
use crate::navigator::PageNavigator;
use crate::storage::{ErrorLog, SnapshotSink};
use crate::town::TownSwitcher;


/// A detail URL together with where it was found on the results pages.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingTarget {
    pub page: u32,
    /// 1-based position on its results page.
    pub index: usize,
    pub url: String,
}

/// Drives towns, pages and listings through one replaceable browser
/// session, keeping every record gathered so far safe in memory and in the
/// snapshot file.
pub struct RunOrchestrator {
    config: Config,
    factory: Arc<dyn SessionFactory>,
    session: Option<Box<dyn BrowserSession>>,
    sink: Box<dyn SnapshotSink>,
    error_log: ErrorLog,
    navigator: PageNavigator,
    switcher: TownSwitcher,
    extractor: ListingExtractor,
    ctx: RunContext,
}

impl RunOrchestrator {
    pub fn new(config: Config, factory: Arc<dyn SessionFactory>, sink: Box<dyn SnapshotSink>) -> Result<Self> {
        std::fs::create_dir_all(&config.output.directory)
            .map_err(|e| ScrapingError::StorageError(format!("Failed to create output directory: {}", e)))?;

        Ok(Self {
            error_log: ErrorLog::new(config.output.directory.join(&config.output.error_log)),
            navigator: PageNavigator::new(&config)?,
            switcher: TownSwitcher::new(&config)?,
            extractor: ListingExtractor::new(&config),
            ctx: RunContext::new(config.run.failure_threshold),
            session: None,
            factory,
            sink,
            config,
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Scrape every town in order. Towns that cannot be reached are skipped.
    pub async fn run(&mut self, towns: &[Town]) -> Result<()> {
        self.ensure_session().await?;
        info!("Scraping {} towns, up to {} pages each", towns.len(), self.config.run.pages_per_town);

        for (position, town) in towns.iter().enumerate() {
            info!("Town {}/{}: {}", position + 1, towns.len(), town.name);
            if position > 0 {
                self.clear_cross_town_state().await;
            }

            if !self.enter_town(town).await {
                self.ctx.towns_skipped += 1;
                continue;
            }

            let town_url = self.switcher.town_url(town);
            let targets = self.collect_targets().await;
            info!("Collected {} listings for {}", targets.len(), town.name);

            self.process_listings(&targets, &town.name, &town_url).await;
            self.flush();
            self.ctx.towns_completed += 1;
        }

        Ok(())
    }

    /// Open the site so a search can be set up by hand.
    pub async fn open_site(&mut self) -> Result<()> {
        self.ensure_session().await?;
        let session = self.active_session()?;
        session.navigate(&self.config.site.base_url).await?;
        self.navigator
            .wait_for_page_ready(session, self.config.timing.page_ready_timeout, self.config.timing.settle_delay)
            .await;
        Ok(())
    }

    /// Scrape whatever results the browser currently shows. The URL at the
    /// time of the call is where a replacement session resumes.
    pub async fn run_current_results(&mut self) -> Result<()> {
        self.ensure_session().await?;
        let base_url = self.active_session()?.current_url().await?;
        info!("Scraping current results at {}", base_url);

        let targets = self.collect_targets().await;
        info!("Collected {} listings", targets.len());

        self.process_listings(&targets, "", &base_url).await;
        self.flush();
        self.ctx.towns_completed += 1;
        Ok(())
    }

    /// Final flush and browser teardown. Always runs, whatever happened
    /// before; teardown failures are only logged.
    pub async fn finish(mut self) -> RunSummary {
        self.flush();

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.quit().await {
                warn!("Browser teardown failed: {}", e);
            }
        }

        let summary = RunSummary {
            records: self.ctx.records.len(),
            agents: self.ctx.agent_counts.agents(),
            towns_completed: self.ctx.towns_completed,
            towns_skipped: self.ctx.towns_skipped,
            session_restarts: self.ctx.session_restarts,
            elapsed: self.ctx.elapsed(),
            snapshot_path: self.sink.path(),
        };
        info!("{}", summary);
        summary
    }

    fn active_session(&self) -> Result<&dyn BrowserSession> {
        self.session
            .as_deref()
            .ok_or_else(|| ScrapingError::BrowserError("No active browser session".to_string()))
    }

    async fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_none() {
            self.session = Some(self.factory.launch().await?);
        }
        Ok(())
    }

    /// Throw the current session away and launch a fresh one.
    async fn recreate_session(&mut self) -> Result<()> {
        if let Some(mut old) = self.session.take() {
            if let Err(e) = old.quit().await {
                warn!("Failed to close old browser session: {}", e);
            }
        }
        self.ctx.session_restarts += 1;
        info!("Starting browser session #{}", self.ctx.session_restarts + 1);
        self.session = Some(self.factory.launch().await?);
        Ok(())
    }

    async fn clear_cross_town_state(&self) {
        let Some(session) = self.session.as_deref() else {
            return;
        };
        if let Err(e) = session.delete_cookies().await {
            warn!("Failed to delete cookies: {}", e);
        }
        if let Err(e) = session.clear_storage().await {
            warn!("Failed to clear storage: {}", e);
        }
        if let Err(e) = session.close_extra_windows().await {
            warn!("Failed to close extra windows: {}", e);
        }
    }

    async fn switch_to(&self, town: &Town) -> Result<()> {
        let session = self.active_session()?;
        self.switcher.switch_to(session, town).await?;
        Ok(())
    }

    /// Get the browser onto `town`, with one fresh session as a last resort.
    /// Returns false when the town has to be skipped.
    async fn enter_town(&mut self, town: &Town) -> bool {
        if let Err(e) = self.switch_to(town).await {
            error!("{}; retrying with a new browser session", e);
            if let Err(e) = self.recreate_session().await {
                error!("Could not start a new browser session: {}", e);
                return false;
            }
            if let Err(e) = self.switch_to(town).await {
                error!("Skipping {}: {}", town.name, e);
                return false;
            }
        }

        let Some(session) = self.session.as_deref() else {
            return false;
        };
        if !self.switcher.confirm(session, town).await {
            warn!("Second check does not show {}, navigating again", town.name);
            let timing = &self.config.timing;
            if let Err(e) = session.navigate(&self.switcher.town_url(town)).await {
                warn!("Fresh navigation to {} failed: {}", town.name, e);
            }
            self.navigator
                .wait_for_page_ready(session, timing.page_ready_timeout, timing.settle_delay)
                .await;
            self.navigator
                .wait_for_listings(session, timing.listings_timeout, timing.listings_retries)
                .await;
        }
        true
    }

    /// Walk the results pages from the current one, gathering unique detail
    /// URLs until the page limit, the end of the results, or too many empty
    /// pages in a row.
    async fn collect_targets(&self) -> Vec<ListingTarget> {
        let run = &self.config.run;
        let timing = &self.config.timing;
        let Some(session) = self.session.as_deref() else {
            return Vec::new();
        };

        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        let mut empty_pages = 0;

        for page in 1..=run.pages_per_town {
            info!("Collecting listings on page {}/{}", page, run.pages_per_town);

            let urls = if self
                .navigator
                .wait_for_listings(session, timing.listings_timeout, timing.listings_retries)
                .await
            {
                self.navigator.collect_listing_urls(session, timing.collect_retries).await
            } else {
                Vec::new()
            };

            if urls.is_empty() {
                empty_pages += 1;
                warn!("Page {} has no listings ({} empty in a row)", page, empty_pages);
                if empty_pages >= run.max_empty_pages {
                    warn!("Giving up on this town after {} empty pages", empty_pages);
                    break;
                }
            } else {
                empty_pages = 0;
                let mut index = 0;
                for url in urls {
                    if seen.insert(url.clone()) {
                        index += 1;
                        targets.push(ListingTarget { page, index, url });
                    }
                }
            }

            if page == run.pages_per_town {
                break;
            }
            if !self
                .navigator
                .navigate_to_next_page(session, timing.next_page_timeout, timing.next_page_retries)
                .await
            {
                info!("No further results pages after page {}", page);
                break;
            }
            if !timing.inter_page_delay.is_zero() {
                sleep(timing.inter_page_delay).await;
            }
        }

        targets
    }

    /// Extract every target in order. Consecutive failures past the
    /// threshold replace the browser session and resume at `base_url`.
    async fn process_listings(&mut self, targets: &[ListingTarget], town: &str, base_url: &str) {
        let flush_every = u64::from(self.config.run.flush_every.max(1));

        for (position, target) in targets.iter().enumerate() {
            debug!("Listing {}/{}: {}", position + 1, targets.len(), target.url);

            let outcome = match self.session.as_deref() {
                Some(session) => {
                    self.extractor
                        .extract(session, &target.url, town, &mut self.ctx.agent_counts)
                        .await
                }
                None => Err(ScrapingError::BrowserError("No active browser session".to_string())),
            };

            let threshold_reached = match outcome {
                Ok(Some(record)) => {
                    self.ctx.records.push(record);
                    self.ctx.failures.record_success();
                    false
                }
                Ok(None) => {
                    self.error_log
                        .record(target.page, target.index, &format!("Listing did not load: {}", target.url));
                    self.ctx.failures.record_failure()
                }
                Err(e) => {
                    warn!("Listing {} failed: {}", target.url, e);
                    self.error_log.record(target.page, target.index, &e);
                    self.ctx.failures.record_failure()
                }
            };

            self.ctx.processed += 1;
            if self.ctx.processed % flush_every == 0 {
                info!("Checkpoint after {} listings", self.ctx.processed);
                self.flush();
            }

            if threshold_reached {
                self.recover_session(base_url).await;
            }

            if position + 1 < targets.len() {
                self.pause_between_listings().await;
            }
        }
    }

    async fn recover_session(&mut self, base_url: &str) {
        error!(
            "{} listings failed in a row, replacing the browser session",
            self.ctx.failures.consecutive()
        );
        self.flush();

        match self.recreate_session().await {
            Ok(()) => {
                if let Some(session) = self.session.as_deref() {
                    if let Err(e) = session.navigate(base_url).await {
                        warn!("Could not return to {}: {}", base_url, e);
                    }
                    self.navigator
                        .wait_for_page_ready(
                            session,
                            self.config.timing.page_ready_timeout,
                            self.config.timing.settle_delay,
                        )
                        .await;
                }
            }
            Err(e) => error!("Could not start a new browser session: {}", e),
        }

        self.ctx.failures.reset();
    }

    async fn pause_between_listings(&self) {
        let (min, max) = self.config.timing.inter_listing_delay_ms;
        if max == 0 {
            return;
        }
        let millis = rand::thread_rng().gen_range(min.min(max)..=max);
        sleep(Duration::from_millis(millis)).await;
    }

    fn flush(&self) {
        if let Err(e) = self.sink.write_snapshot(&self.ctx.records) {
            error!("Failed to save snapshot: {}", e);
        }
    }
}

/// Run `work` until it completes or the user presses Ctrl+C, whichever
/// comes first. An interrupt is not an error.
pub async fn until_interrupted<F>(work: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        result = work => result,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => warn!("Interrupted, saving progress"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            Ok(())
        }
    }
}
