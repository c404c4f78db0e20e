use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{self, Town};
use crate::error::{Result, ScrapingError};

pub const MAX_PAGES_PER_TOWN: u32 = 50;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub run: RunConfig,
    pub timing: TimingConfig,
    pub output: OutputConfig,
    pub browser: BrowserConfig,
    pub selectors: Selectors,
    /// Replaces the built-in town catalog when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub towns: Option<Vec<Town>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub zoom_level: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub pages_per_town: u32,
    /// Town names to scrape; empty means the whole catalog.
    pub towns: Vec<String>,
    pub failure_threshold: u32,
    pub flush_every: u32,
    pub max_empty_pages: u32,
    pub max_cards_per_page: usize,
}

/// Every wait, retry and delay used while driving the browser.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub listing_load_timeout: Duration,
    pub listing_load_retries: u32,
    /// Backoff before the first retry is one unit, the second two units, and so on.
    #[serde(with = "humantime_serde")]
    pub listing_retry_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub price_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub listings_timeout: Duration,
    pub listings_retries: u32,
    #[serde(with = "humantime_serde")]
    pub listings_retry_pause: Duration,
    #[serde(with = "humantime_serde")]
    pub page_ready_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub next_page_timeout: Duration,
    pub next_page_retries: u32,
    pub collect_retries: u32,
    #[serde(with = "humantime_serde")]
    pub inter_page_delay: Duration,
    /// Random pause between listings, in milliseconds.
    pub inter_listing_delay_ms: (u64, u64),
    pub town_navigation_retries: u32,
    pub town_switch_retries: u32,
    #[serde(with = "humantime_serde")]
    pub verification_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputSchema {
    /// All thirteen columns, including Town and Brokerage.
    Full,
    /// The eleven columns of a single-town run.
    SingleTown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub schema: OutputSchema,
    pub error_log: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub launch_attempts: u32,
    pub window_size: (u32, u32),
}

/// CSS selectors for the target site.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Selectors {
    pub listing_card: String,
    pub card_link: String,
    pub next_page: String,
    pub breadcrumb: String,
    pub filter_button: String,
    pub address: String,
    pub agent_name: String,
    pub phone: String,
    pub email: String,
    pub website: String,
    pub price: String,
    pub posted_time: String,
    pub photo_count: String,
    pub brokerage: String,
    pub json_ld: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.realtor.ca".to_string(),
            zoom_level: 11,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pages_per_town: 3,
            towns: Vec::new(),
            failure_threshold: 5,
            flush_every: 10,
            max_empty_pages: 3,
            max_cards_per_page: 12,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            listing_load_timeout: Duration::from_secs(8),
            listing_load_retries: 2,
            listing_retry_backoff: Duration::from_secs(1),
            price_timeout: Duration::from_secs(10),
            listings_timeout: Duration::from_secs(10),
            listings_retries: 3,
            listings_retry_pause: Duration::from_secs(2),
            page_ready_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_secs(2),
            next_page_timeout: Duration::from_secs(10),
            next_page_retries: 3,
            collect_retries: 3,
            inter_page_delay: Duration::from_secs(3),
            inter_listing_delay_ms: (1500, 3000),
            town_navigation_retries: 3,
            town_switch_retries: 3,
            verification_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./scraped_data"),
            schema: OutputSchema::Full,
            error_log: PathBuf::from("errors.log"),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            launch_attempts: 3,
            window_size: (1920, 1080),
        }
    }
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            listing_card: "div.smallListingCardBodyWrap".to_string(),
            card_link: "a.listingDetailsLink".to_string(),
            next_page: "a.lnkNextResultsPage".to_string(),
            breadcrumb: "#mapSearchBreadcrumb".to_string(),
            filter_button: "#mapFiltersBtn".to_string(),
            address: "#listingAddress".to_string(),
            agent_name: ".realtorCardName".to_string(),
            phone: ".realtorCardContactNumber".to_string(),
            email: ".agent-email".to_string(),
            website: "a.realtorCardWebsite".to_string(),
            price: "#listingPrice".to_string(),
            posted_time: ".ConditionallyTimeOnRealtorCon".to_string(),
            photo_count: "#btnPhotoCount".to_string(),
            brokerage: ".realtorCardOfficeName".to_string(),
            json_ld: "script[type=\"application/ld+json\"]".to_string(),
        }
    }
}

impl Config {
    /// Town catalog in effect: the configured one, or the built-in default.
    pub fn catalog(&self) -> Vec<Town> {
        self.towns.clone().unwrap_or_else(catalog::default_catalog)
    }

    /// Towns selected for this run, in order.
    pub fn selected_towns(&self) -> Result<Vec<Town>> {
        catalog::select_towns(&self.catalog(), &self.run.towns)
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        // check if config file exists, create default if not
        if !self.config_path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        let config_content = fs::read_to_string(&self.config_path)
            .map_err(|e| ScrapingError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&config_content)
            .map_err(|e| ScrapingError::ConfigError(format!("Failed to parse TOML config: {}", e)))?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| ScrapingError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .map_err(|e| ScrapingError::ConfigError(format!("Failed to write config file: {}", e)))?;

        info!("Configuration saved successfully");
        Ok(())
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        let base_url = &config.site.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ScrapingError::ConfigError("site.base_url must start with http:// or https://".to_string()));
        }
        url::Url::parse(base_url)
            .map_err(|e| ScrapingError::ConfigError(format!("Invalid site.base_url '{}': {}", base_url, e)))?;

        // checking run limits
        if config.run.pages_per_town == 0 || config.run.pages_per_town > MAX_PAGES_PER_TOWN {
            return Err(ScrapingError::ConfigError(format!(
                "pages_per_town must be between 1 and {}",
                MAX_PAGES_PER_TOWN
            )));
        }
        if config.run.failure_threshold == 0 {
            return Err(ScrapingError::ConfigError("failure_threshold must be greater than 0".to_string()));
        }
        if config.run.flush_every == 0 {
            return Err(ScrapingError::ConfigError("flush_every must be greater than 0".to_string()));
        }
        if config.run.max_empty_pages == 0 {
            return Err(ScrapingError::ConfigError("max_empty_pages must be greater than 0".to_string()));
        }
        if config.run.max_cards_per_page == 0 {
            return Err(ScrapingError::ConfigError("max_cards_per_page must be greater than 0".to_string()));
        }

        // checking timing
        let (min_delay, max_delay) = config.timing.inter_listing_delay_ms;
        if min_delay > max_delay {
            return Err(ScrapingError::ConfigError("inter_listing_delay_ms minimum must not exceed maximum".to_string()));
        }
        if config.timing.poll_interval.is_zero() {
            return Err(ScrapingError::ConfigError("poll_interval must be greater than 0".to_string()));
        }
        if config.timing.town_switch_retries == 0 || config.timing.town_navigation_retries == 0 {
            return Err(ScrapingError::ConfigError("town retries must be greater than 0".to_string()));
        }

        if config.browser.launch_attempts == 0 {
            return Err(ScrapingError::ConfigError("launch_attempts must be greater than 0".to_string()));
        }

        // checking selectors
        let selectors = &config.selectors;
        let named = [
            ("listing_card", &selectors.listing_card),
            ("card_link", &selectors.card_link),
            ("next_page", &selectors.next_page),
            ("breadcrumb", &selectors.breadcrumb),
            ("filter_button", &selectors.filter_button),
            ("address", &selectors.address),
            ("agent_name", &selectors.agent_name),
            ("phone", &selectors.phone),
            ("email", &selectors.email),
            ("website", &selectors.website),
            ("price", &selectors.price),
            ("posted_time", &selectors.posted_time),
            ("photo_count", &selectors.photo_count),
            ("brokerage", &selectors.brokerage),
            ("json_ld", &selectors.json_ld),
        ];
        for (name, selector) in named {
            if selector.trim().is_empty() {
                return Err(ScrapingError::ConfigError(format!("Selector '{}' cannot be empty", name)));
            }
        }

        // checking towns
        if let Some(ref towns) = config.towns {
            if towns.is_empty() {
                return Err(ScrapingError::ConfigError("Town catalog cannot be empty".to_string()));
            }
            for town in towns {
                if town.name.trim().is_empty() || town.geo_id.trim().is_empty() {
                    return Err(ScrapingError::ConfigError("Every town needs a name and a geo_id".to_string()));
                }
                if town.latitude_min >= town.latitude_max || town.longitude_min >= town.longitude_max {
                    return Err(ScrapingError::ConfigError(format!("Town '{}' has an empty bounding box", town.name)));
                }
            }
        }
        config.selected_towns()?;

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl FileConfigManager {
    /// Create a default configuration file
    async fn create_default_config(&self) -> Result<()> {
        let default_config = Config::default();
        let toml_content = toml::to_string_pretty(&default_config)
            .map_err(|e| ScrapingError::ConfigError(format!("Failed to serialize default config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| ScrapingError::ConfigError(format!("Failed to create config directory: {}", e)))?;
            }
        }

        fs::write(&self.config_path, toml_content)
            .map_err(|e| ScrapingError::ConfigError(format!("Failed to write default config: {}", e)))?;

        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }
}
