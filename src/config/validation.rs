use crate::config::types::{
    BackoffConfig, Config, FetchConfig, PipelineConfig, SourceConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_source_config(&config.source)?;
    validate_fetch_config(&config.fetch)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_backoff_config(&config.backoff)?;
    validate_user_agent_config(&config.user_agent)?;
    Ok(())
}

/// Warns when idle workers can give up sooner than one fetch may take
///
/// A detail page or asset still in flight when every worker of its stage has
/// starved is never handled. The settings stay legal; the caller decides
/// whether to log the returned message.
pub fn starvation_warning(config: &Config) -> Option<String> {
    let budget = config.backoff.starvation_budget();
    let timeout = config.fetch.timeout();
    if budget >= timeout {
        return None;
    }
    Some(format!(
        "Idle workers give up after {:.1}s but a fetch may take {}s; \
         raise backoff max-attempts or lower fetch timeout-secs",
        budget.as_secs_f64(),
        timeout.as_secs()
    ))
}

/// Validates the listing source settings
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    validate_http_url("listing_url", &config.listing_url)?;
    validate_http_url("detail_base_url", &config.detail_base_url)?;

    // Record names are appended verbatim, so the base must end on a path boundary
    if !config.detail_base_url.ends_with('/') {
        return Err(ConfigError::Validation(format!(
            "detail_base_url must end with '/', got '{}'",
            config.detail_base_url
        )));
    }

    for (field, value) in [
        ("table_selector", &config.table_selector),
        ("tag_column", &config.tag_column),
        ("infobox_selector", &config.infobox_selector),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", field)));
        }
    }

    for (field, selector) in [
        ("table_selector", &config.table_selector),
        ("infobox_selector", &config.infobox_selector),
    ] {
        if scraper::Selector::parse(selector).is_err() {
            return Err(ConfigError::Validation(format!(
                "{} is not a valid CSS selector: '{}'",
                field, selector
            )));
        }
    }

    Ok(())
}

/// Validates transport settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_connections < 1 || config.max_connections > 100 {
        return Err(ConfigError::Validation(format!(
            "max_connections must be between 1 and 100, got {}",
            config.max_connections
        )));
    }

    if config.discovery_batch_size == 0 {
        return Err(ConfigError::Validation(
            "discovery_batch_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker pool and queue sizing
fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    for (field, value) in [
        ("detail_workers", config.detail_workers),
        ("persistence_workers", config.persistence_workers),
        ("drain_batch_size", config.drain_batch_size),
        ("asset_drain_batch_size", config.asset_drain_batch_size),
        ("max_concurrent_writes", config.max_concurrent_writes),
        ("max_pending_asset_requests", config.max_pending_asset_requests),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 1, got 0",
                field
            )));
        }
    }

    Ok(())
}

/// Validates queue starvation handling
fn validate_backoff_config(config: &BackoffConfig) -> Result<(), ConfigError> {
    if config.wait_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "wait_timeout_ms must be >= 1".to_string(),
        ));
    }

    if config.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "multiplier must be >= 1.0, got {}",
            config.multiplier
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    // Validate contact URL
    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    // Validate contact email (basic validation)
    validate_email(&config.contact_email)?;

    Ok(())
}

/// Parses a URL and requires an http or https scheme
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
