use chrono::NaiveDateTime;
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::OutputSchema;
use crate::error::{Result, ScrapingError};
use crate::models::ListingRecord;

pub const SNAPSHOT_PREFIX: &str = "agents_browser_scrape";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    FirstName,
    LastName,
    Email,
    Phone,
    Website,
    Price,
    NumberOfListings,
    NumberOfPhotos,
    StreetAddress,
    DatePosted,
    ListingUrl,
    Town,
    Brokerage,
}

const FULL_COLUMNS: [Column; 13] = [
    Column::FirstName,
    Column::LastName,
    Column::Email,
    Column::Phone,
    Column::Website,
    Column::Price,
    Column::NumberOfListings,
    Column::NumberOfPhotos,
    Column::StreetAddress,
    Column::DatePosted,
    Column::ListingUrl,
    Column::Town,
    Column::Brokerage,
];

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Column::FirstName => "First Name",
            Column::LastName => "Last Name",
            Column::Email => "Email",
            Column::Phone => "Phone",
            Column::Website => "Website",
            Column::Price => "Price",
            Column::NumberOfListings => "Number of Listings",
            Column::NumberOfPhotos => "Number of Photos",
            Column::StreetAddress => "Street Address",
            Column::DatePosted => "Date Posted",
            Column::ListingUrl => "Listing URL",
            Column::Town => "Town",
            Column::Brokerage => "Brokerage",
        }
    }

    pub fn value(&self, record: &ListingRecord) -> String {
        match self {
            Column::FirstName => record.first_name.clone(),
            Column::LastName => record.last_name.clone(),
            Column::Email => record.email.clone(),
            Column::Phone => record.phone.clone(),
            Column::Website => record.website.clone(),
            Column::Price => record.price.clone(),
            Column::NumberOfListings => record.number_of_listings.to_string(),
            Column::NumberOfPhotos => record.number_of_photos.clone(),
            Column::StreetAddress => record.street_address.clone(),
            Column::DatePosted => record.date_posted.clone(),
            Column::ListingUrl => record.listing_url.clone(),
            Column::Town => record.town.clone(),
            Column::Brokerage => record.brokerage.clone(),
        }
    }
}

impl OutputSchema {
    /// Columns written for this schema, in file order.
    pub fn columns(&self) -> &'static [Column] {
        match self {
            OutputSchema::Full => &FULL_COLUMNS,
            // the single-town layout simply stops before Town and Brokerage
            OutputSchema::SingleTown => &FULL_COLUMNS[..11],
        }
    }
}

/// Destination for materialized snapshots of the result set.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotSink: Send + Sync {
    /// Replace the snapshot with exactly `records`.
    fn write_snapshot(&self, records: &[ListingRecord]) -> Result<()>;

    fn path(&self) -> PathBuf;
}

/// Rewrites one timestamped CSV file in full on every flush.
pub struct CsvSnapshotWriter {
    path: PathBuf,
    schema: OutputSchema,
}

impl CsvSnapshotWriter {
    pub fn new(directory: &Path, schema: OutputSchema, run_started: NaiveDateTime) -> Self {
        Self {
            path: directory.join(snapshot_file_name(run_started)),
            schema,
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("csv.tmp")
    }

    fn write_to(&self, target: &Path, records: &[ListingRecord]) -> Result<()> {
        let columns = self.schema.columns();
        let mut writer = csv::Writer::from_path(target)?;
        writer.write_record(columns.iter().map(Column::header))?;
        for record in records {
            writer.write_record(columns.iter().map(|column| column.value(record)))?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl SnapshotSink for CsvSnapshotWriter {
    fn write_snapshot(&self, records: &[ListingRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ScrapingError::StorageError(format!("Failed to create directory: {}", e)))?;
        }

        // readers never see a half-written snapshot
        let temp = self.temp_path();
        self.write_to(&temp, records)?;
        fs::rename(&temp, &self.path)
            .map_err(|e| ScrapingError::StorageError(format!("Failed to replace snapshot: {}", e)))?;

        debug!("Wrote {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }
}

pub fn snapshot_file_name(run_started: NaiveDateTime) -> String {
    format!("{}_{}.csv", SNAPSHOT_PREFIX, run_started.format("%Y-%m-%d_%H-%M-%S"))
}

/// Append-only text log of per-listing failures. Write failures are logged
/// and otherwise ignored.
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, page: u32, index: usize, error: &dyn Display) {
        let line = format!("Page {}, Listing {} Error: {}\n", page, index, error);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!("Could not write to error log {}: {}", self.path.display(), e);
        }
    }
}
