//! Console report of a finished run
//!
//! Prints per-stage counters followed by a dump of the lookup store.

use crate::pipeline::CrawlReport;

/// Share of enqueued records whose asset ended up on disk, in percent
pub fn success_rate(report: &CrawlReport) -> f64 {
    let records = report.discovery.records_enqueued;
    if records == 0 {
        return 0.0;
    }
    (report.snapshot.local_assets.len() as f64 / records as f64) * 100.0
}

/// Prints the report to stdout in a formatted manner
///
/// # Arguments
///
/// * `report` - The report to display
pub fn print_report(report: &CrawlReport) {
    println!("=== Crawl Report ===\n");

    println!("Run:");
    println!("  Started: {}", report.started_at.to_rfc3339());
    println!("  Finished: {}", report.finished_at.to_rfc3339());
    println!("  Elapsed: {:.2}s", report.elapsed.as_secs_f64());
    if !report.config_hash.is_empty() {
        println!("  Config hash: {}", report.config_hash);
    }
    println!("  Asset directory: {}", report.asset_dir.display());
    for (stage, state) in &report.stage_states {
        println!("  {} stage: {}", stage, state);
    }
    println!();

    let discovery = &report.discovery;
    println!("Discovery ({}):", discovery.outcome.as_str());
    println!("  Rows seen: {}", discovery.rows_seen);
    println!("  Records enqueued: {}", discovery.records_enqueued);
    println!("  Rows skipped: {}", discovery.rows_skipped);
    println!("  Tag registrations: {}", discovery.tag_registrations);
    println!();

    let detail = &report.detail;
    println!("Detail pages:");
    println!("  Received: {}", detail.pages_received);
    println!("  Fetch failures: {}", detail.fetch_failures);
    println!("  With image: {}", detail.assets_found);
    println!("  Without image: {}", detail.no_asset_pages);
    println!(
        "  Asset requests: {} ({} failed)",
        detail.asset_requests_dispatched, detail.asset_requests_failed
    );
    if detail.abandoned + detail.orphaned_records > 0 {
        println!(
            "  Abandoned: {} pages, {} records",
            detail.abandoned, detail.orphaned_records
        );
    }
    println!(
        "  Workers: {} drained, {} starved",
        detail.workers_drained, detail.workers_starved
    );
    println!();

    let persistence = &report.persistence;
    println!("Assets:");
    println!("  Received: {}", persistence.assets_received);
    println!("  Written: {}", persistence.written);
    println!("  Already present: {}", persistence.skipped_existing);
    println!("  Duplicates: {}", persistence.duplicates);
    println!("  Unattributed: {}", persistence.unattributed);
    println!("  Download failures: {}", persistence.fetch_failures);
    println!("  Write failures: {}", persistence.write_failures);
    if persistence.abandoned > 0 {
        println!("  Abandoned: {}", persistence.abandoned);
    }
    println!(
        "  Workers: {} drained, {} starved",
        persistence.workers_drained, persistence.workers_starved
    );
    println!();

    let snapshot = &report.snapshot;
    println!("Collateral adjectives ({}):", snapshot.tags.len());
    for (tag, names) in &snapshot.tags {
        println!("  {}: {}", tag, names.join(", "));
    }
    println!();

    println!("Image URLs ({}):", snapshot.asset_refs.len());
    for (url, name) in &snapshot.asset_refs {
        println!("  {} -> {}", name, url);
    }
    println!();

    println!("Local images ({}):", snapshot.local_assets.len());
    for (name, path) in &snapshot.local_assets {
        println!("  {} -> {}", name, path);
    }
    println!();

    println!(
        "Success Rate: {:.1}% ({} / {} records stored locally)",
        success_rate(report),
        snapshot.local_assets.len(),
        discovery.records_enqueued
    );
}
