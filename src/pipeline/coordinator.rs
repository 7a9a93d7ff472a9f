//! Pipeline coordinator
//!
//! The coordinator owns the queues, gateways and signals, starts the three
//! stages and waits for them in order: discovery, then detail (gated on the
//! record queue being joined), then persistence. It always reaches the end and
//! reports whatever was accumulated.

use crate::config::{starvation_warning, Config};
use crate::crawler::{build_http_client, BodyKind, FetchGateway};
use crate::pipeline::backoff::BackoffPolicy;
use crate::pipeline::detail::{DetailPage, DetailReport, DetailStage};
use crate::pipeline::discovery::{DiscoveryReport, DiscoveryStage, Record};
use crate::pipeline::persistence::{AssetDownload, PersistenceReport, PersistenceStage};
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::signal::CompletionSignal;
use crate::pipeline::stage::Stage;
use crate::state::{StageState, StageTracker};
use crate::storage::{InMemoryStore, LookupStore, RunRecord, StoreSnapshot};
use crate::MenagerieError;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// SHA-256 of the configuration file, empty when running on defaults
    pub config_hash: String,
    pub asset_dir: PathBuf,
    pub discovery: DiscoveryReport,
    pub detail: DetailReport,
    pub persistence: PersistenceReport,
    /// Final state of each stage, in pipeline order
    pub stage_states: Vec<(&'static str, StageState)>,
    pub snapshot: StoreSnapshot,
}

impl CrawlReport {
    /// Run metadata in the shape the SQLite export stores
    pub fn run_record(&self) -> RunRecord {
        RunRecord {
            started_at: self.started_at.to_rfc3339(),
            finished_at: self.finished_at.to_rfc3339(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            config_hash: self.config_hash.clone(),
        }
    }

    /// Returns true if every stage reached `Done`
    pub fn all_done(&self) -> bool {
        self.stage_states
            .iter()
            .all(|(_, state)| *state == StageState::Done)
    }
}

/// Runs one crawl end to end
pub struct Coordinator {
    config: Config,
    config_hash: String,
    store: Arc<dyn LookupStore>,
}

impl Coordinator {
    /// Creates a coordinator with an empty in-memory store
    pub fn new(config: Config) -> Self {
        Self {
            config,
            config_hash: String::new(),
            store: Arc::new(InMemoryStore::new()),
        }
    }

    /// Uses `store` instead of a fresh in-memory store
    pub fn with_store(mut self, store: Arc<dyn LookupStore>) -> Self {
        self.store = store;
        self
    }

    /// Records the hash of the configuration file in the report
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// The store the stages write to
    pub fn store(&self) -> Arc<dyn LookupStore> {
        Arc::clone(&self.store)
    }

    /// Runs the pipeline to completion
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - The run finished; individual failures are counted in the report
    /// * `Err(MenagerieError)` - The run could not start (HTTP client, asset directory)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use menagerie::{Config, Coordinator};
    ///
    /// # async fn example() -> Result<(), menagerie::MenagerieError> {
    /// let report = Coordinator::new(Config::default()).run().await?;
    /// println!("{} assets written", report.persistence.written);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(self) -> Result<CrawlReport, MenagerieError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let config = &self.config;
        if let Some(warning) = starvation_warning(config) {
            tracing::warn!("{}", warning);
        }

        let asset_dir = config.output.resolved_asset_dir();
        tokio::fs::create_dir_all(&asset_dir).await?;

        let client = build_http_client(&config.user_agent, &config.fetch)?;
        let max_connections = config.fetch.max_connections;
        let page_gateway = Arc::new(FetchGateway::new(
            "pages",
            client.clone(),
            BodyKind::Text,
            max_connections,
        ));
        let asset_gateway = Arc::new(FetchGateway::new(
            "assets",
            client,
            BodyKind::Binary,
            max_connections,
        ));

        let records: Arc<WorkQueue<Record>> = Arc::new(WorkQueue::unbounded("records"));
        let pages: Arc<WorkQueue<DetailPage>> =
            Arc::new(WorkQueue::new("pages", config.pipeline.capacity()));
        let downloads: Arc<WorkQueue<AssetDownload>> =
            Arc::new(WorkQueue::new("downloads", config.pipeline.capacity()));

        let discovery_done = CompletionSignal::new("discovery");
        let policy = BackoffPolicy::from(&config.backoff);

        let discovery_tracker = StageTracker::new("discovery");
        let detail_tracker = StageTracker::new("detail");
        let persistence_tracker = StageTracker::new("persistence");

        tracing::info!(
            listing = %config.source.listing_url,
            asset_dir = %asset_dir.display(),
            "Starting crawl"
        );

        let discovery = launch(DiscoveryStage::new(
            config.source.clone(),
            &config.fetch,
            Arc::clone(&page_gateway),
            Arc::clone(&records),
            Arc::clone(&self.store),
            discovery_done.clone(),
            discovery_tracker.clone(),
        ));
        let detail = launch(DetailStage::new(
            &config.source,
            config.pipeline.clone(),
            policy,
            Arc::clone(&page_gateway),
            Arc::clone(&asset_gateway),
            Arc::clone(&records),
            pages,
            discovery_done.clone(),
            Arc::clone(&self.store),
            detail_tracker.clone(),
        ));
        let persistence = launch(PersistenceStage::new(
            config.pipeline.clone(),
            policy,
            asset_dir.clone(),
            Arc::clone(&asset_gateway),
            downloads,
            Arc::clone(&self.store),
            persistence_tracker.clone(),
        ));

        let discovery_report = settle(discovery, &discovery_tracker, || {
            // Unblock the downstream stages
            page_gateway.close();
            discovery_done.raise();
        })
        .await;
        let detail_report = settle(detail, &detail_tracker, || asset_gateway.close()).await;
        let persistence_report = settle(persistence, &persistence_tracker, || {}).await;

        let elapsed = clock.elapsed();
        let report = CrawlReport {
            started_at,
            finished_at: Utc::now(),
            elapsed,
            config_hash: self.config_hash.clone(),
            asset_dir,
            discovery: discovery_report,
            detail: detail_report,
            persistence: persistence_report,
            stage_states: vec![
                ("discovery", discovery_tracker.state()),
                ("detail", detail_tracker.state()),
                ("persistence", persistence_tracker.state()),
            ],
            snapshot: self.store.snapshot(),
        };

        tracing::info!(
            elapsed_ms = elapsed.as_millis() as u64,
            records = report.discovery.records_enqueued,
            assets = report.persistence.written + report.persistence.skipped_existing,
            "Crawl finished"
        );
        Ok(report)
    }
}

/// Spawns a stage onto the runtime
fn launch<S: Stage>(stage: S) -> JoinHandle<S::Report> {
    let name = stage.name();
    tracing::debug!(stage = name, "Launching stage");
    tokio::spawn(stage.run())
}

/// Waits for a stage and forces it to `Done` if its task died
///
/// `on_abort` releases whatever the stage would have released on its way out.
async fn settle<R, F>(handle: JoinHandle<R>, tracker: &StageTracker, on_abort: F) -> R
where
    R: Default,
    F: FnOnce(),
{
    let report = match handle.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(stage = tracker.stage(), "Stage task failed: {}", e);
            on_abort();
            R::default()
        }
    };

    if tracker.state() != StageState::Done {
        let _ = tracker.advance(StageState::Done);
    }
    report
}
