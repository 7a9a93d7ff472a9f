//! Record discovery stage
//!
//! Reads the listing page once, registers every row's tags, queues a
//! [`Record`] per row and requests its detail page through the page gateway.
//! Rows go out in fixed-size batches; a batch's fetches settle before the next
//! batch is dispatched.

use crate::config::{FetchConfig, SourceConfig};
use crate::crawler::{parse_listing, FetchGateway, ListingParse, ListingRow};
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::signal::CompletionSignal;
use crate::pipeline::stage::Stage;
use crate::state::{StageState, StageTracker};
use crate::storage::LookupStore;
use crate::url::detail_url;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// One discovered entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub tags: Vec<String>,
    pub detail_url: Url,
}

/// How discovery ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// The table was found and every row was processed
    Completed,
    /// The listing had no primary table
    TableMissing,
    /// The table had no column with the expected header
    TagColumnMissing(String),
    /// The listing page could not be fetched
    ListingUnavailable(String),
    /// The stage did not report (it panicked)
    #[default]
    Aborted,
}

impl DiscoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TableMissing => "table missing",
            Self::TagColumnMissing(_) => "tag column missing",
            Self::ListingUnavailable(_) => "listing unavailable",
            Self::Aborted => "aborted",
        }
    }
}

/// What discovery did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub outcome: DiscoveryOutcome,
    pub rows_seen: usize,
    pub records_enqueued: usize,
    pub rows_skipped: usize,
    pub tag_registrations: usize,
    pub batches: usize,
}

/// The discovery stage
pub struct DiscoveryStage {
    source: SourceConfig,
    batch_size: usize,
    gateway: Arc<FetchGateway>,
    records: Arc<WorkQueue<Record>>,
    store: Arc<dyn LookupStore>,
    done: CompletionSignal,
    tracker: StageTracker,
}

impl DiscoveryStage {
    /// Creates the stage
    ///
    /// # Arguments
    ///
    /// * `source` - Listing location and markup settings
    /// * `fetch` - Supplies the discovery batch size
    /// * `gateway` - Page gateway; fetches the listing and every detail page
    /// * `records` - Queue receiving one record per row
    /// * `store` - Receives tag registrations
    /// * `done` - Raised exactly once when discovery ends, however it ends
    /// * `tracker` - Lifecycle of this stage
    pub fn new(
        source: SourceConfig,
        fetch: &FetchConfig,
        gateway: Arc<FetchGateway>,
        records: Arc<WorkQueue<Record>>,
        store: Arc<dyn LookupStore>,
        done: CompletionSignal,
        tracker: StageTracker,
    ) -> Self {
        Self {
            source,
            batch_size: fetch.discovery_batch_size.max(1),
            gateway,
            records,
            store,
            done,
            tracker,
        }
    }

    async fn discover(&self, report: &mut DiscoveryReport) -> DiscoveryOutcome {
        let listing = match self.gateway.fetch_one(&self.source.listing_url).await {
            Ok(fetched) => fetched.body.into_text(),
            Err(e) => {
                tracing::error!("Listing unavailable: {}", e);
                return DiscoveryOutcome::ListingUnavailable(e.to_string());
            }
        };

        let (rows, rows_seen, skipped) = match parse_listing(&listing, &self.source) {
            ListingParse::TableMissing => {
                tracing::warn!(
                    selector = %self.source.table_selector,
                    "No primary table on listing page"
                );
                return DiscoveryOutcome::TableMissing;
            }
            ListingParse::TagColumnMissing { column } => {
                tracing::warn!(column = %column, "Tag column missing from listing table");
                return DiscoveryOutcome::TagColumnMissing(column);
            }
            ListingParse::Rows {
                rows,
                rows_seen,
                skipped,
            } => (rows, rows_seen, skipped),
        };

        report.rows_seen = rows_seen;
        report.rows_skipped = skipped;
        tracing::info!(rows = rows.len(), skipped, "Parsed listing table");

        let records: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| self.register(row, report))
            .collect();

        for batch in records.chunks(self.batch_size) {
            self.dispatch(batch, report).await;
        }

        DiscoveryOutcome::Completed
    }

    /// Builds a row's record and registers its tags
    ///
    /// Tags of a row that yields no record are not registered.
    fn register(&self, row: ListingRow, report: &mut DiscoveryReport) -> Option<Record> {
        let url = match detail_url(&self.source.detail_base_url, &row.name) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(name = %row.name, "Skipping row: {}", e);
                report.rows_skipped += 1;
                return None;
            }
        };

        for tag in &row.tags {
            self.store.put_tag(tag, &row.name);
            report.tag_registrations += 1;
        }

        Some(Record {
            name: row.name,
            tags: row.tags,
            detail_url: url,
        })
    }

    /// Queues a batch of records, then fetches their detail pages
    async fn dispatch(&self, batch: &[Record], report: &mut DiscoveryReport) {
        let mut urls = Vec::with_capacity(batch.len());
        for record in batch {
            // Queued before the fetch so the consumer always holds the record
            // by the time its page arrives
            match self.records.put(record.clone()).await {
                Ok(()) => {
                    report.records_enqueued += 1;
                    urls.push(record.detail_url.to_string());
                }
                Err(e) => tracing::error!(name = %record.name, "Record dropped: {}", e),
            }
        }

        report.batches += 1;
        tracing::debug!(batch = report.batches, size = urls.len(), "Dispatching detail fetches");
        if let Err(e) = self.gateway.submit(urls).await {
            tracing::error!("Detail fetch batch rejected: {}", e);
        }
    }
}

#[async_trait]
impl Stage for DiscoveryStage {
    type Report = DiscoveryReport;

    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn run(self) -> DiscoveryReport {
        if let Err(e) = self.tracker.advance(StageState::Running) {
            tracing::warn!("{}", e);
        }

        let mut report = DiscoveryReport::default();
        let outcome = self.discover(&mut report).await;
        report.outcome = outcome;

        let _ = self.tracker.advance(StageState::Draining);
        self.gateway.close();
        if !self.done.raise() {
            tracing::warn!("Discovery completion was already signalled");
        }
        let _ = self.tracker.advance(StageState::Done);

        tracing::info!(
            outcome = report.outcome.as_str(),
            records = report.records_enqueued,
            tags = report.tag_registrations,
            "Discovery finished"
        );
        report
    }
}
