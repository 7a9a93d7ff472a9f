//! The three-stage crawl pipeline
//!
//! Discovery → (records) → Detail → (pages) → Persistence
//!
//! # Components
//!
//! - `WorkQueue`: FIFO with acknowledgement and join
//! - `CompletionSignal`: one-shot "producer finished" flag
//! - `BackoffPolicy` and `run_worker`: bounded-wait queue pulls with backoff
//! - `DiscoveryStage`, `DetailStage`, `PersistenceStage`: the stages
//! - `Coordinator`: wires the stages together and reports the run

mod backoff;
mod coordinator;
mod detail;
mod discovery;
mod persistence;
mod queue;
mod signal;
mod stage;
mod worker;

pub use backoff::BackoffPolicy;
pub use coordinator::{Coordinator, CrawlReport};
pub use detail::{DetailPage, DetailReport, DetailStage};
pub use discovery::{DiscoveryOutcome, DiscoveryReport, DiscoveryStage, Record};
pub use persistence::{AssetDownload, PersistenceReport, PersistenceStage};
pub use queue::{Pull, QueueError, WorkQueue};
pub use signal::CompletionSignal;
pub use stage::Stage;
pub use worker::{run_worker, WorkerExit};
