//! Detail fetch and extract stage
//!
//! A drain loop moves fetched detail pages from the page gateway into the
//! detail queue, matching each one to its discovered record and acknowledging
//! that record. A pool of workers pulls pages, extracts the infobox image and
//! hands the image URL to a supervised pool that requests it through the
//! asset gateway.

use crate::config::{PipelineConfig, SourceConfig};
use crate::crawler::{first_image_in_infobox, FetchGateway};
use crate::pipeline::backoff::BackoffPolicy;
use crate::pipeline::discovery::Record;
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::signal::CompletionSignal;
use crate::pipeline::stage::Stage;
use crate::pipeline::worker::{run_worker, WorkerExit};
use crate::state::{StageState, StageTracker};
use crate::storage::LookupStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// A fetched detail page with the record it belongs to
#[derive(Debug, Clone)]
pub struct DetailPage {
    pub record: Record,
    pub html: String,
}

/// What the detail stage did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailReport {
    /// Detail pages fetched successfully
    pub pages_received: usize,
    /// Detail fetches that failed (timeouts, bad statuses)
    pub fetch_failures: usize,
    /// Pages whose infobox held an image
    pub assets_found: usize,
    /// Pages without an infobox image
    pub no_asset_pages: usize,
    pub asset_requests_dispatched: usize,
    /// Asset requests that could not be issued
    pub asset_requests_failed: usize,
    /// Pages never handled because every worker had exited
    pub abandoned: usize,
    /// Records whose page never came back
    pub orphaned_records: usize,
    /// Pages that matched no discovered record
    pub unmatched_pages: usize,
    pub workers_drained: usize,
    pub workers_starved: usize,
}

#[derive(Debug, Default)]
struct Counters {
    pages_received: AtomicUsize,
    fetch_failures: AtomicUsize,
    assets_found: AtomicUsize,
    no_asset_pages: AtomicUsize,
    asset_requests_dispatched: AtomicUsize,
    asset_requests_failed: AtomicUsize,
    abandoned: AtomicUsize,
    orphaned_records: AtomicUsize,
    unmatched_pages: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn report(&self, exits: &[WorkerExit]) -> DetailReport {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        DetailReport {
            pages_received: load(&self.pages_received),
            fetch_failures: load(&self.fetch_failures),
            assets_found: load(&self.assets_found),
            no_asset_pages: load(&self.no_asset_pages),
            asset_requests_dispatched: load(&self.asset_requests_dispatched),
            asset_requests_failed: load(&self.asset_requests_failed),
            abandoned: load(&self.abandoned),
            orphaned_records: load(&self.orphaned_records),
            unmatched_pages: load(&self.unmatched_pages),
            workers_drained: exits.iter().filter(|e| **e != WorkerExit::Starved).count(),
            workers_starved: exits.iter().filter(|e| **e == WorkerExit::Starved).count(),
        }
    }
}

/// The detail stage
pub struct DetailStage {
    infobox_selector: String,
    pipeline: PipelineConfig,
    policy: BackoffPolicy,
    page_gateway: Arc<FetchGateway>,
    asset_gateway: Arc<FetchGateway>,
    records: Arc<WorkQueue<Record>>,
    pages: Arc<WorkQueue<DetailPage>>,
    discovery_done: CompletionSignal,
    store: Arc<dyn LookupStore>,
    tracker: StageTracker,
}

impl DetailStage {
    /// Creates the stage
    ///
    /// # Arguments
    ///
    /// * `source` - Supplies the infobox selector
    /// * `pipeline` - Worker count, drain batch size and asset request cap
    /// * `policy` - Queue pull timeout and backoff for workers
    /// * `page_gateway` - Gateway the detail pages arrive through
    /// * `asset_gateway` - Gateway asset requests are submitted to; closed when the stage ends
    /// * `records` - Queue of discovered records, acknowledged here
    /// * `pages` - This stage's work queue
    /// * `discovery_done` - Raised by discovery
    /// * `store` - Receives asset references
    /// * `tracker` - Lifecycle of this stage
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: &SourceConfig,
        pipeline: PipelineConfig,
        policy: BackoffPolicy,
        page_gateway: Arc<FetchGateway>,
        asset_gateway: Arc<FetchGateway>,
        records: Arc<WorkQueue<Record>>,
        pages: Arc<WorkQueue<DetailPage>>,
        discovery_done: CompletionSignal,
        store: Arc<dyn LookupStore>,
        tracker: StageTracker,
    ) -> Self {
        Self {
            infobox_selector: source.infobox_selector.clone(),
            pipeline,
            policy,
            page_gateway,
            asset_gateway,
            records,
            pages,
            discovery_done,
            store,
            tracker,
        }
    }

    /// Ends a run in which no detail page ever arrived
    async fn finish_idle(&self, counters: &Counters) -> DetailReport {
        tracing::info!("No detail pages to process");
        self.discovery_done.wait().await;

        let orphaned = self.records.abandon_remaining();
        counters.orphaned_records.fetch_add(orphaned, Ordering::Relaxed);
        self.records.join().await;

        let _ = self.tracker.advance(StageState::Draining);
        self.asset_gateway.close();
        let _ = self.tracker.advance(StageState::Done);
        counters.report(&[])
    }
}

#[async_trait]
impl Stage for DetailStage {
    type Report = DetailReport;

    fn name(&self) -> &'static str {
        "detail"
    }

    async fn run(self) -> DetailReport {
        let counters = Arc::new(Counters::default());

        if !self.page_gateway.wait_ready().await {
            return self.finish_idle(&counters).await;
        }
        let _ = self.tracker.advance(StageState::Running);

        let exhausted = CompletionSignal::new("detail-fetch");
        let drain = tokio::spawn(drain_pages(
            Arc::clone(&self.page_gateway),
            Arc::clone(&self.records),
            Arc::clone(&self.pages),
            self.pipeline.drain_batch_size,
            self.discovery_done.clone(),
            exhausted.clone(),
            Arc::clone(&counters),
            self.tracker.clone(),
        ));

        let limit = self.pipeline.max_pending_asset_requests.max(1);
        let (asset_tx, asset_rx) = mpsc::channel(limit);
        let supervisor = tokio::spawn(supervise_asset_requests(
            Arc::clone(&self.asset_gateway),
            asset_rx,
            limit,
            Arc::clone(&counters),
        ));

        let extractor = Arc::new(Extractor {
            infobox_selector: self.infobox_selector.clone(),
            store: Arc::clone(&self.store),
            asset_tx,
            counters: Arc::clone(&counters),
        });

        let mut workers = JoinSet::new();
        for id in 0..self.pipeline.detail_workers {
            let extractor = Arc::clone(&extractor);
            workers.spawn(run_worker(
                "detail",
                id,
                Arc::clone(&self.pages),
                exhausted.clone(),
                self.policy,
                move |page| {
                    let extractor = Arc::clone(&extractor);
                    async move { extractor.handle(page).await }
                },
            ));
        }
        // Workers hold the remaining senders; the supervisor ends once they exit
        drop(extractor);

        let mut exits = Vec::with_capacity(self.pipeline.detail_workers);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(exit) => exits.push(exit),
                Err(e) => {
                    tracing::error!("Detail worker failed: {}", e);
                    exits.push(WorkerExit::Closed);
                }
            }
        }

        if self.tracker.state() < StageState::Draining {
            tracing::warn!("Every detail worker exited before the page stream ended");
            let _ = self.tracker.advance(StageState::Draining);
        }

        // No consumer is left, so the drain loop must not block on a full queue
        self.pages.close();
        if let Err(e) = drain.await {
            tracing::error!("Detail drain loop failed: {}", e);
        }
        self.records.join().await;

        let abandoned = self.pages.abandon_remaining();
        counters.abandoned.fetch_add(abandoned, Ordering::Relaxed);

        if let Err(e) = supervisor.await {
            tracing::error!("Asset request supervisor failed: {}", e);
        }
        self.asset_gateway.close();
        let _ = self.tracker.advance(StageState::Done);

        let report = counters.report(&exits);
        tracing::info!(
            pages = report.pages_received,
            assets = report.assets_found,
            failures = report.fetch_failures,
            starved = report.workers_starved,
            "Detail stage finished"
        );
        report
    }
}

/// Moves fetched pages into the detail queue until the page gateway is exhausted
#[allow(clippy::too_many_arguments)]
async fn drain_pages(
    gateway: Arc<FetchGateway>,
    records: Arc<WorkQueue<Record>>,
    pages: Arc<WorkQueue<DetailPage>>,
    batch_size: usize,
    discovery_done: CompletionSignal,
    exhausted: CompletionSignal,
    counters: Arc<Counters>,
    tracker: StageTracker,
) {
    let mut pending: HashMap<String, VecDeque<Record>> = HashMap::new();

    loop {
        let batch = gateway.drain_results(batch_size).await;
        if batch.is_empty() {
            break;
        }
        tracing::debug!(size = batch.len(), "Drained detail pages");

        for outcome in batch {
            // Discovery queues a record before requesting its page
            while let Some(record) = records.try_get() {
                pending
                    .entry(record.detail_url.to_string())
                    .or_default()
                    .push_back(record);
            }

            let url = match &outcome {
                Ok(fetched) => fetched.url.clone(),
                Err(e) => e.url().to_string(),
            };
            let Some(record) = pending.get_mut(&url).and_then(VecDeque::pop_front) else {
                tracing::warn!(url = %url, "Fetched page matches no record");
                bump(&counters.unmatched_pages);
                continue;
            };

            match outcome {
                Ok(fetched) => {
                    bump(&counters.pages_received);
                    let page = DetailPage {
                        record,
                        html: fetched.body.into_text(),
                    };
                    if let Err(e) = pages.put(page).await {
                        tracing::debug!(url = %url, "Page not queued: {}", e);
                        bump(&counters.abandoned);
                    }
                }
                Err(e) => {
                    bump(&counters.fetch_failures);
                    tracing::warn!(name = %record.name, "Detail page dropped: {}", e);
                }
            }

            if let Err(e) = records.task_done() {
                tracing::error!("{}", e);
            }
        }
    }

    exhausted.raise();
    if tracker.state() < StageState::Draining {
        let _ = tracker.advance(StageState::Draining);
    }

    // Account for records whose page never came back
    discovery_done.wait().await;
    while let Some(record) = records.try_get() {
        pending
            .entry(record.detail_url.to_string())
            .or_default()
            .push_back(record);
    }
    for record in pending.into_values().flatten() {
        tracing::warn!(name = %record.name, "No detail page outcome for record");
        bump(&counters.orphaned_records);
        if let Err(e) = records.task_done() {
            tracing::error!("{}", e);
        }
    }
}

/// Per-page work of a detail worker
struct Extractor {
    infobox_selector: String,
    store: Arc<dyn LookupStore>,
    asset_tx: mpsc::Sender<String>,
    counters: Arc<Counters>,
}

impl Extractor {
    async fn handle(&self, page: DetailPage) {
        let image = first_image_in_infobox(
            &page.html,
            &self.infobox_selector,
            &page.record.detail_url,
        );

        let Some(src) = image else {
            tracing::warn!(name = %page.record.name, "No infobox image on detail page");
            bump(&self.counters.no_asset_pages);
            return;
        };

        tracing::debug!(name = %page.record.name, asset = %src, "Found infobox image");
        self.store.put_asset_ref(&src, &page.record.name);
        bump(&self.counters.assets_found);

        if self.asset_tx.send(src).await.is_err() {
            tracing::error!(name = %page.record.name, "Asset request pool is gone");
            bump(&self.counters.asset_requests_failed);
        }
    }
}

/// Issues asset requests with at most `limit` in flight
///
/// Runs until every sender is dropped and every request has settled. Request
/// failures are logged and counted, never propagated.
async fn supervise_asset_requests(
    gateway: Arc<FetchGateway>,
    mut requests: mpsc::Receiver<String>,
    limit: usize,
    counters: Arc<Counters>,
) {
    let mut in_flight = JoinSet::new();

    while let Some(url) = requests.recv().await {
        while in_flight.len() >= limit {
            if let Some(joined) = in_flight.join_next().await {
                settle(joined, &counters);
            }
        }

        let gateway = Arc::clone(&gateway);
        in_flight.spawn(async move { gateway.submit(vec![url]).await });
        bump(&counters.asset_requests_dispatched);
    }

    while let Some(joined) = in_flight.join_next().await {
        settle(joined, &counters);
    }
}

fn settle(
    joined: Result<Result<(), crate::crawler::FetchError>, tokio::task::JoinError>,
    counters: &Counters,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("Asset request rejected: {}", e);
            bump(&counters.asset_requests_failed);
        }
        Err(e) => {
            tracing::error!("Asset request task failed: {}", e);
            bump(&counters.asset_requests_failed);
        }
    }
}
