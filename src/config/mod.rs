//! Configuration module for Menagerie
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use menagerie::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("menagerie.toml")).unwrap();
//! println!("Detail workers: {}", config.pipeline.detail_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffConfig, Config, FetchConfig, OutputConfig, PipelineConfig, SourceConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{starvation_warning, validate};
