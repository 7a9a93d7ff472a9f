//! Menagerie: a three-stage concurrent listing crawler
//!
//! This crate discovers records from a tabular listing page, follows each
//! record's detail page, extracts the page's infobox image and stores the image
//! locally. The stages are connected by bounded work queues and shut down
//! through explicit completion signals.

pub mod config;
pub mod crawler;
pub mod output;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Menagerie operations
#[derive(Debug, Error)]
pub enum MenagerieError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Queue error: {0}")]
    Queue(#[from] pipeline::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid {stage} stage transition: {from:?} -> {to:?}")]
    InvalidTransition {
        stage: &'static str,
        from: state::StageState,
        to: state::StageState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Record name is empty")]
    EmptyName,
}

/// Result type alias for Menagerie operations
pub type Result<T> = std::result::Result<T, MenagerieError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{Coordinator, CrawlReport};
pub use state::StageState;
pub use storage::{InMemoryStore, LookupStore, StoreSnapshot};
