pub mod browser;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extractor;
pub mod models;
pub mod navigator;
pub mod normalize;
pub mod orchestrator;
pub mod storage;
pub mod town;

#[cfg(test)]
mod testing;

pub use error::{Result, ScrapingError};
pub use config::Config;
pub use catalog::Town;
pub use models::{ListingRecord, RunSummary};
pub use orchestrator::RunOrchestrator;
pub use browser::{BrowserSession, ChromeSessionFactory, SessionFactory};
pub use storage::{CsvSnapshotWriter, SnapshotSink};
