//! Markdown summary generation
//!
//! This module generates a human-readable markdown summary of a run,
//! including stage counters and the collected tag and image tables.

use crate::output::stats::success_rate;
use crate::output::OutputResult;
use crate::pipeline::CrawlReport;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown summary of a run to a file
///
/// # Arguments
///
/// * `report` - The finished run
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn generate_markdown_summary(report: &CrawlReport, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(report);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run report as markdown
pub fn format_markdown_summary(report: &CrawlReport) -> String {
    let mut md = String::new();

    md.push_str("# Menagerie Crawl Summary\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Started**: {}\n", report.started_at.to_rfc3339()));
    md.push_str(&format!("- **Finished**: {}\n", report.finished_at.to_rfc3339()));
    md.push_str(&format!(
        "- **Duration**: {:.2} seconds\n",
        report.elapsed.as_secs_f64()
    ));
    if !report.config_hash.is_empty() {
        md.push_str(&format!("- **Config Hash**: {}\n", report.config_hash));
    }
    md.push_str(&format!(
        "- **Asset Directory**: {}\n",
        report.asset_dir.display()
    ));
    md.push_str(&format!(
        "- **Discovery Outcome**: {}\n",
        report.discovery.outcome.as_str()
    ));
    md.push_str(&format!("- **Success Rate**: {:.2}%\n\n", success_rate(report)));

    if !report.stage_states.is_empty() {
        md.push_str("## Stages\n\n");
        md.push_str("| Stage | Final State |\n");
        md.push_str("|-------|-------------|\n");
        for (stage, state) in &report.stage_states {
            md.push_str(&format!("| {} | {} |\n", stage, state));
        }
        md.push('\n');
    }

    let discovery = &report.discovery;
    let detail = &report.detail;
    let persistence = &report.persistence;
    md.push_str("## Counters\n\n");
    md.push_str("| Counter | Count |\n");
    md.push_str("|---------|-------|\n");
    for (label, count) in [
        ("Rows seen", discovery.rows_seen),
        ("Records enqueued", discovery.records_enqueued),
        ("Rows skipped", discovery.rows_skipped),
        ("Tag registrations", discovery.tag_registrations),
        ("Detail pages received", detail.pages_received),
        ("Detail fetch failures", detail.fetch_failures),
        ("Pages with image", detail.assets_found),
        ("Pages without image", detail.no_asset_pages),
        ("Asset requests", detail.asset_requests_dispatched),
        ("Assets written", persistence.written),
        ("Assets already present", persistence.skipped_existing),
        ("Unattributed assets", persistence.unattributed),
        ("Asset download failures", persistence.fetch_failures),
        ("Asset write failures", persistence.write_failures),
        ("Starved workers", detail.workers_starved + persistence.workers_starved),
        ("Abandoned items", detail.abandoned + persistence.abandoned),
    ] {
        md.push_str(&format!("| {} | {} |\n", label, count));
    }
    md.push('\n');

    let snapshot = &report.snapshot;
    if !snapshot.tags.is_empty() {
        md.push_str("## Collateral Adjectives\n\n");
        md.push_str("| Adjective | Animals |\n");
        md.push_str("|-----------|---------|\n");
        for (tag, names) in &snapshot.tags {
            md.push_str(&format!("| {} | {} |\n", tag, names.join(", ")));
        }
        md.push('\n');
    }

    if !snapshot.local_assets.is_empty() {
        md.push_str("## Images\n\n");
        md.push_str("| Animal | Local Path |\n");
        md.push_str("|--------|------------|\n");
        for (name, path) in &snapshot.local_assets {
            md.push_str(&format!("| {} | {} |\n", name, path));
        }
        md.push('\n');
    }

    md
}
