use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Menagerie
///
/// Every section is optional; a missing section falls back to the values that
/// crawl the Wikipedia "List of animal names" page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub fetch: FetchConfig,
    pub pipeline: PipelineConfig,
    pub backoff: BackoffConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Where the listing lives and how its markup is read
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// URL of the listing page holding the primary table
    #[serde(rename = "listing-url")]
    pub listing_url: String,

    /// Prefix that a record name is appended to in order to form its detail URL
    #[serde(rename = "detail-base-url")]
    pub detail_base_url: String,

    /// CSS selector locating the primary data table
    #[serde(rename = "table-selector")]
    pub table_selector: String,

    /// Header text of the column holding the tags
    #[serde(rename = "tag-column")]
    pub tag_column: String,

    /// Index of the cell carrying the record's link
    #[serde(rename = "name-column")]
    pub name_column: usize,

    /// Placeholder text meaning "no tags"
    #[serde(rename = "empty-tag-glyph")]
    pub empty_tag_glyph: String,

    /// CSS selector of the info panel on detail pages
    #[serde(rename = "infobox-selector")]
    pub infobox_selector: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://en.wikipedia.org/wiki/List_of_animal_names".to_string(),
            detail_base_url: "https://en.wikipedia.org/wiki/".to_string(),
            table_selector: "table.wikitable.sortable".to_string(),
            tag_column: "Collateral adjective".to_string(),
            name_column: 0,
            empty_tag_glyph: "—".to_string(),
            infobox_selector: "table.infobox".to_string(),
        }
    }
}

/// Transport settings shared by both fetch gateways
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds
    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    /// Maximum concurrent requests per gateway instance
    #[serde(rename = "max-connections")]
    pub max_connections: usize,

    /// Number of listing rows dispatched per discovery batch
    #[serde(rename = "discovery-batch-size")]
    pub discovery_batch_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_connections: 10,
            discovery_batch_size: 10,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Worker pool and queue sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Workers extracting asset references from detail pages
    #[serde(rename = "detail-workers")]
    pub detail_workers: usize,

    /// Workers writing assets to disk
    #[serde(rename = "persistence-workers")]
    pub persistence_workers: usize,

    /// Detail-page results pulled from the gateway per drain
    #[serde(rename = "drain-batch-size")]
    pub drain_batch_size: usize,

    /// Asset results pulled from the binary gateway per drain
    #[serde(rename = "asset-drain-batch-size")]
    pub asset_drain_batch_size: usize,

    /// Capacity of the detail and persistence queues (0 means unbounded)
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Maximum concurrent file writes
    #[serde(rename = "max-concurrent-writes")]
    pub max_concurrent_writes: usize,

    /// Maximum asset requests the detail stage keeps in flight
    #[serde(rename = "max-pending-asset-requests")]
    pub max_pending_asset_requests: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detail_workers: 10,
            persistence_workers: 10,
            drain_batch_size: 10,
            asset_drain_batch_size: 10,
            queue_capacity: 100,
            max_concurrent_writes: 10,
            max_pending_asset_requests: 50,
        }
    }
}

impl PipelineConfig {
    /// Queue capacity as an option, `None` meaning unbounded
    pub fn capacity(&self) -> Option<usize> {
        (self.queue_capacity > 0).then_some(self.queue_capacity)
    }
}

/// Queue starvation handling for worker pulls
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// How long a single queue pull waits before counting as a stall
    #[serde(rename = "wait-timeout-ms")]
    pub wait_timeout_ms: u64,

    /// Delay after the first stall
    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,

    /// Growth factor applied to the delay after each stall
    pub multiplier: f64,

    /// Consecutive stalls after which a worker gives up
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Upper bound of the random jitter added to each delay
    #[serde(rename = "max-jitter-ms")]
    pub max_jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 2000,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_attempts: 5,
            max_jitter_ms: 500,
        }
    }
}

impl BackoffConfig {
    /// Least time a worker keeps polling an empty queue before it gives up
    ///
    /// Counts every timed-out pull and the delays between them. Jitter only
    /// adds to this.
    pub fn starvation_budget(&self) -> Duration {
        let pulls = f64::from(self.max_attempts) * self.wait_timeout_ms as f64;
        let stalls = f64::from(self.max_attempts.saturating_sub(1));
        let delays = if self.multiplier == 1.0 {
            self.initial_delay_ms as f64 * stalls
        } else {
            self.initial_delay_ms as f64 * (self.multiplier.powf(stalls) - 1.0)
                / (self.multiplier - 1.0)
        };

        let secs = (pulls + delays) / 1000.0;
        if secs.is_finite() && secs < Duration::MAX.as_secs_f64() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            Duration::MAX
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "Menagerie".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/menagerie".to_string(),
            contact_email: "operator@example.com".to_string(),
        }
    }
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `<name>.jpg` files; the system temp dir when unset
    #[serde(rename = "asset-dir")]
    pub asset_dir: Option<PathBuf>,

    /// Optional markdown report written after the run
    #[serde(rename = "summary-path")]
    pub summary_path: Option<PathBuf>,

    /// Optional SQLite file receiving the final store snapshot
    #[serde(rename = "database-path")]
    pub database_path: Option<PathBuf>,
}

impl OutputConfig {
    pub fn resolved_asset_dir(&self) -> PathBuf {
        self.asset_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
