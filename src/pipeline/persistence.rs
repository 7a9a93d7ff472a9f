//! Asset persistence stage
//!
//! A drain loop moves downloaded assets from the asset gateway into the
//! persistence queue. Workers resolve each asset's owner through the lookup
//! store and write it to `<asset_dir>/<name>.jpg`, skipping files that were
//! already there when the stage started.

use crate::config::PipelineConfig;
use crate::crawler::FetchGateway;
use crate::pipeline::backoff::BackoffPolicy;
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::signal::CompletionSignal;
use crate::pipeline::stage::Stage;
use crate::pipeline::worker::{run_worker, WorkerExit};
use crate::state::{StageState, StageTracker};
use crate::storage::LookupStore;
use crate::url::{asset_file_name, ASSET_EXTENSION};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Downloaded asset bytes and the URL they came from
#[derive(Debug, Clone)]
pub struct AssetDownload {
    pub url: String,
    pub bytes: Vec<u8>,
}

/// What the persistence stage did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceReport {
    /// Assets downloaded successfully
    pub assets_received: usize,
    pub written: usize,
    /// Files found in place at startup and registered without writing
    pub skipped_existing: usize,
    /// Later assets for an owner whose path was already claimed this run
    pub duplicates: usize,
    /// Assets whose URL has no owner in the lookup store
    pub unattributed: usize,
    pub write_failures: usize,
    /// Asset downloads that failed
    pub fetch_failures: usize,
    /// Assets never handled because every worker had exited
    pub abandoned: usize,
    pub workers_drained: usize,
    pub workers_starved: usize,
}

#[derive(Debug, Default)]
struct Counters {
    assets_received: AtomicUsize,
    written: AtomicUsize,
    skipped_existing: AtomicUsize,
    duplicates: AtomicUsize,
    unattributed: AtomicUsize,
    write_failures: AtomicUsize,
    fetch_failures: AtomicUsize,
    abandoned: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn report(&self, exits: &[WorkerExit]) -> PersistenceReport {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        PersistenceReport {
            assets_received: load(&self.assets_received),
            written: load(&self.written),
            skipped_existing: load(&self.skipped_existing),
            duplicates: load(&self.duplicates),
            unattributed: load(&self.unattributed),
            write_failures: load(&self.write_failures),
            fetch_failures: load(&self.fetch_failures),
            abandoned: load(&self.abandoned),
            workers_drained: exits.iter().filter(|e| **e != WorkerExit::Starved).count(),
            workers_starved: exits.iter().filter(|e| **e == WorkerExit::Starved).count(),
        }
    }
}

/// The persistence stage
pub struct PersistenceStage {
    pipeline: PipelineConfig,
    policy: BackoffPolicy,
    asset_dir: PathBuf,
    gateway: Arc<FetchGateway>,
    downloads: Arc<WorkQueue<AssetDownload>>,
    store: Arc<dyn LookupStore>,
    tracker: StageTracker,
}

impl PersistenceStage {
    /// Creates the stage
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Worker count, drain batch size and write cap
    /// * `policy` - Queue pull timeout and backoff for workers
    /// * `asset_dir` - Directory receiving `<name>.jpg` files; must exist
    /// * `gateway` - Asset gateway the downloads arrive through
    /// * `downloads` - This stage's work queue
    /// * `store` - Resolves owners and receives local paths
    /// * `tracker` - Lifecycle of this stage
    pub fn new(
        pipeline: PipelineConfig,
        policy: BackoffPolicy,
        asset_dir: PathBuf,
        gateway: Arc<FetchGateway>,
        downloads: Arc<WorkQueue<AssetDownload>>,
        store: Arc<dyn LookupStore>,
        tracker: StageTracker,
    ) -> Self {
        Self {
            pipeline,
            policy,
            asset_dir,
            gateway,
            downloads,
            store,
            tracker,
        }
    }
}

#[async_trait]
impl Stage for PersistenceStage {
    type Report = PersistenceReport;

    fn name(&self) -> &'static str {
        "persistence"
    }

    async fn run(self) -> PersistenceReport {
        let counters = Arc::new(Counters::default());
        let existing = scan_existing(&self.asset_dir).await;
        tracing::debug!(
            dir = %self.asset_dir.display(),
            existing = existing.len(),
            "Scanned asset directory"
        );

        if !self.gateway.wait_ready().await {
            tracing::info!("No assets to persist");
            let _ = self.tracker.advance(StageState::Draining);
            let _ = self.tracker.advance(StageState::Done);
            return counters.report(&[]);
        }
        let _ = self.tracker.advance(StageState::Running);

        let exhausted = CompletionSignal::new("asset-fetch");
        let drain = tokio::spawn(drain_assets(
            Arc::clone(&self.gateway),
            Arc::clone(&self.downloads),
            self.pipeline.asset_drain_batch_size,
            exhausted.clone(),
            Arc::clone(&counters),
            self.tracker.clone(),
        ));

        let writer = Arc::new(Writer {
            asset_dir: self.asset_dir.clone(),
            existing,
            claimed: Mutex::new(HashSet::new()),
            disk: Semaphore::new(self.pipeline.max_concurrent_writes.max(1)),
            store: Arc::clone(&self.store),
            counters: Arc::clone(&counters),
        });

        let mut workers = JoinSet::new();
        for id in 0..self.pipeline.persistence_workers {
            let writer = Arc::clone(&writer);
            workers.spawn(run_worker(
                "persistence",
                id,
                Arc::clone(&self.downloads),
                exhausted.clone(),
                self.policy,
                move |download| {
                    let writer = Arc::clone(&writer);
                    async move { writer.handle(download).await }
                },
            ));
        }

        let mut exits = Vec::with_capacity(self.pipeline.persistence_workers);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(exit) => exits.push(exit),
                Err(e) => {
                    tracing::error!("Persistence worker failed: {}", e);
                    exits.push(WorkerExit::Closed);
                }
            }
        }

        if self.tracker.state() < StageState::Draining {
            tracing::warn!("Every persistence worker exited before the asset stream ended");
            let _ = self.tracker.advance(StageState::Draining);
        }

        self.downloads.close();
        if let Err(e) = drain.await {
            tracing::error!("Asset drain loop failed: {}", e);
        }
        let abandoned = self.downloads.abandon_remaining();
        counters.abandoned.fetch_add(abandoned, Ordering::Relaxed);
        self.downloads.join().await;
        let _ = self.tracker.advance(StageState::Done);

        let report = counters.report(&exits);
        tracing::info!(
            written = report.written,
            skipped = report.skipped_existing,
            unattributed = report.unattributed,
            starved = report.workers_starved,
            "Persistence stage finished"
        );
        report
    }
}

/// Names of asset files already present in `dir`
async fn scan_existing(dir: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "Cannot scan asset directory: {}", e);
            return names;
        }
    };

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let is_asset = path.extension().and_then(|e| e.to_str()) == Some(ASSET_EXTENSION);
                if is_asset {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        names.insert(name.to_string());
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "Asset directory scan stopped: {}", e);
                break;
            }
        }
    }
    names
}

/// Moves downloaded assets into the persistence queue until the gateway is exhausted
async fn drain_assets(
    gateway: Arc<FetchGateway>,
    downloads: Arc<WorkQueue<AssetDownload>>,
    batch_size: usize,
    exhausted: CompletionSignal,
    counters: Arc<Counters>,
    tracker: StageTracker,
) {
    loop {
        let batch = gateway.drain_results(batch_size).await;
        if batch.is_empty() {
            break;
        }
        tracing::debug!(size = batch.len(), "Drained assets");

        for outcome in batch {
            match outcome {
                Ok(fetched) => {
                    bump(&counters.assets_received);
                    let download = AssetDownload {
                        url: fetched.url,
                        bytes: fetched.body.into_bytes(),
                    };
                    if let Err(e) = downloads.put(download).await {
                        tracing::debug!("Asset not queued: {}", e);
                        bump(&counters.abandoned);
                    }
                }
                Err(e) => {
                    bump(&counters.fetch_failures);
                    tracing::warn!("Asset download failed: {}", e);
                }
            }
        }
    }

    exhausted.raise();
    if tracker.state() < StageState::Draining {
        let _ = tracker.advance(StageState::Draining);
    }
}

/// Per-asset work of a persistence worker
struct Writer {
    asset_dir: PathBuf,
    existing: HashSet<String>,
    claimed: Mutex<HashSet<String>>,
    disk: Semaphore,
    store: Arc<dyn LookupStore>,
    counters: Arc<Counters>,
}

impl Writer {
    /// Claims a file name for this run; false if it was claimed before
    fn claim(&self, file_name: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_name.to_string())
    }

    /// Gives a claimed file name back so a later asset may retry the write
    fn release(&self, file_name: &str) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(file_name);
    }

    async fn handle(&self, download: AssetDownload) {
        let Some(owner) = self.store.owner_of_asset(&download.url) else {
            tracing::warn!(url = %download.url, "Asset has no owning record, discarded");
            bump(&self.counters.unattributed);
            return;
        };

        let file_name = asset_file_name(&owner);
        let path = self.asset_dir.join(&file_name);
        let path_str = path.to_string_lossy().into_owned();

        if !self.claim(&file_name) {
            tracing::debug!(name = %owner, "Asset path already claimed this run");
            bump(&self.counters.duplicates);
            return;
        }

        if self.existing.contains(&file_name) {
            tracing::debug!(name = %owner, path = %path_str, "Asset already on disk");
            bump(&self.counters.skipped_existing);
            self.store.put_local_path(&owner, &path_str);
            return;
        }

        // Never closed
        let Ok(_permit) = self.disk.acquire().await else {
            bump(&self.counters.write_failures);
            return;
        };

        match tokio::fs::write(&path, &download.bytes).await {
            Ok(()) => {
                tracing::debug!(name = %owner, path = %path_str, bytes = download.bytes.len(), "Asset written");
                bump(&self.counters.written);
                self.store.put_local_path(&owner, &path_str);
            }
            Err(e) => {
                tracing::error!(name = %owner, path = %path_str, "Failed to write asset: {}", e);
                bump(&self.counters.write_failures);
                self.release(&file_name);
            }
        }
    }
}
