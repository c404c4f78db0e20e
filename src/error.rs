use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScrapingError>;

#[derive(Error, Debug)]
pub enum ScrapingError {
    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Navigation error: {0}")]
    NavigationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Could not verify arrival in town {0}")]
    TownVerification(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    RetryWithBackoff,
    RestartBrowser,
    LogAndContinue,
    SkipTown,
}

impl ScrapingError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            ScrapingError::BrowserError(_) => RecoveryStrategy::RestartBrowser,
            ScrapingError::Timeout(_) => RecoveryStrategy::RetryWithBackoff,
            ScrapingError::ElementNotFound(_) => RecoveryStrategy::LogAndContinue,
            ScrapingError::NavigationError(_) => RecoveryStrategy::RetryWithBackoff,
            ScrapingError::ParseError(_) => RecoveryStrategy::LogAndContinue,
            ScrapingError::StorageError(_) => RecoveryStrategy::LogAndContinue,
            ScrapingError::ConfigError(_) => RecoveryStrategy::LogAndContinue,
            ScrapingError::TownVerification(_) => RecoveryStrategy::SkipTown,
        }
    }
}

// Conversion implementations for common error types
impl From<std::io::Error> for ScrapingError {
    fn from(err: std::io::Error) -> Self {
        ScrapingError::StorageError(err.to_string())
    }
}

impl From<csv::Error> for ScrapingError {
    fn from(err: csv::Error) -> Self {
        ScrapingError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapingError {
    fn from(err: serde_json::Error) -> Self {
        ScrapingError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for ScrapingError {
    fn from(err: toml::de::Error) -> Self {
        ScrapingError::ConfigError(err.to_string())
    }
}

impl From<toml::ser::Error> for ScrapingError {
    fn from(err: toml::ser::Error) -> Self {
        ScrapingError::ConfigError(err.to_string())
    }
}

impl From<url::ParseError> for ScrapingError {
    fn from(err: url::ParseError) -> Self {
        ScrapingError::ParseError(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for ScrapingError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        ScrapingError::BrowserError(err.to_string())
    }
}
