//! Common shape of a pipeline stage

use async_trait::async_trait;

/// A stage the coordinator can launch
///
/// A stage owns everything it needs once constructed. `run` always finishes
/// with a report, whatever went wrong along the way.
#[async_trait]
pub trait Stage: Send + 'static {
    /// Counters describing what the stage did
    type Report: Default + Send + 'static;

    fn name(&self) -> &'static str;

    async fn run(self) -> Self::Report;
}
