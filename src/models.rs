use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// One scraped listing together with the agent who holds it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingRecord {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    /// Price exactly as displayed, e.g. "$649,900".
    pub price: String,
    /// Listings seen for this agent so far in the run, this one included.
    pub number_of_listings: u32,
    pub number_of_photos: String,
    pub street_address: String,
    pub date_posted: String,
    pub listing_url: String,
    pub town: String,
    pub brokerage: String,
}

/// Running count of listings per "First Last" agent key.
///
/// Lives for the whole process; browser restarts do not reset it.
#[derive(Debug, Default, Clone)]
pub struct AgentListingCounter {
    counts: HashMap<String, u32>,
}

impl AgentListingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more listing for `key` and return the new total.
    pub fn increment(&mut self, key: &str) -> u32 {
        let count = self.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, key: &str) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn agents(&self) -> usize {
        self.counts.len()
    }
}

/// Consecutive listing failures before a session is considered broken.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    threshold: u32,
    consecutive: u32,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Returns true once the threshold has been reached.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.threshold
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Mutable state of a run, owned by the orchestrator and passed explicitly
/// to the components that read or update it.
#[derive(Debug)]
pub struct RunContext {
    pub records: Vec<ListingRecord>,
    pub agent_counts: AgentListingCounter,
    pub failures: FailureTracker,
    /// Listings attempted across the whole run, successful or not.
    pub processed: u64,
    pub session_restarts: u32,
    pub towns_completed: u32,
    pub towns_skipped: u32,
    started: Instant,
}

impl RunContext {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            records: Vec::new(),
            agent_counts: AgentListingCounter::new(),
            failures: FailureTracker::new(failure_threshold),
            processed: 0,
            session_restarts: 0,
            towns_completed: 0,
            towns_skipped: 0,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub records: usize,
    pub agents: usize,
    pub towns_completed: u32,
    pub towns_skipped: u32,
    pub session_restarts: u32,
    pub elapsed: Duration,
    pub snapshot_path: PathBuf,
}

impl RunSummary {
    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed.as_secs_f64() / 60.0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scraped {} listings for {} agents in {:.1} minutes ({} towns done, {} skipped, {} browser restarts). Data saved to {}",
            self.records,
            self.agents,
            self.elapsed_minutes(),
            self.towns_completed,
            self.towns_skipped,
            self.session_restarts,
            self.snapshot_path.display()
        )
    }
}
