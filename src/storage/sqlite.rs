//! SQLite export of a finished run's lookup store

use crate::storage::schema::initialize_schema;
use crate::storage::traits::StorageResult;
use crate::storage::{RunRecord, StoreSnapshot};
use rusqlite::{params, Connection};
use std::path::Path;

/// Row counts written by one export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotExport {
    pub run_id: i64,
    pub tags: usize,
    pub asset_refs: usize,
    pub local_assets: usize,
}

/// Appends a snapshot to the SQLite file at `path` as a new run
///
/// Each call adds a run row; earlier runs in the same file are left alone.
/// The whole export is one transaction.
///
/// # Arguments
///
/// * `path` - Path of the database file, created if missing
/// * `run` - Metadata of the run the snapshot belongs to
/// * `snapshot` - Store contents to write
pub fn export_snapshot(
    path: &Path,
    run: &RunRecord,
    snapshot: &StoreSnapshot,
) -> StorageResult<SnapshotExport> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    initialize_schema(&conn)?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO runs (started_at, finished_at, elapsed_ms, config_hash) VALUES (?1, ?2, ?3, ?4)",
        params![
            run.started_at,
            run.finished_at,
            run.elapsed_ms as i64,
            run.config_hash
        ],
    )?;
    let run_id = tx.last_insert_rowid();

    let mut export = SnapshotExport {
        run_id,
        ..SnapshotExport::default()
    };

    {
        let mut stmt = tx.prepare(
            "INSERT INTO tags (run_id, tag, position, name) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (tag, names) in &snapshot.tags {
            for (position, name) in names.iter().enumerate() {
                stmt.execute(params![run_id, tag, position as i64, name])?;
                export.tags += 1;
            }
        }

        let mut stmt =
            tx.prepare("INSERT INTO asset_refs (run_id, url, owner) VALUES (?1, ?2, ?3)")?;
        for (url, owner) in &snapshot.asset_refs {
            stmt.execute(params![run_id, url, owner])?;
            export.asset_refs += 1;
        }

        let mut stmt =
            tx.prepare("INSERT INTO local_assets (run_id, owner, path) VALUES (?1, ?2, ?3)")?;
        for (owner, path) in &snapshot.local_assets {
            stmt.execute(params![run_id, owner, path])?;
            export.local_assets += 1;
        }
    }

    tx.commit()?;
    tracing::info!(
        run_id,
        tags = export.tags,
        asset_refs = export.asset_refs,
        local_assets = export.local_assets,
        "Exported snapshot to {}",
        path.display()
    );

    Ok(export)
}
