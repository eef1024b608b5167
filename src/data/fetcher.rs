//! Resumable batch sync of raw series stores.
//!
//! `ensure_range` walks the window batch by batch, skips batches whose dates
//! are already in the store, fetches the rest sequentially, and writes the
//! merged result once at the end. Re-running with the same or a wider window
//! only requests what is missing.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::data::co2map::IntensityClient;
use crate::data::transport::{Pause, Transport};
use crate::domain::{DateWindow, EntityKey};
use crate::error::AppError;
use crate::io::store::{SeriesTable, load_store, write_store};

/// What one `ensure_range` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub entity: EntityKey,
    pub path: PathBuf,
    pub batches_total: usize,
    pub batches_skipped: usize,
    pub batches_fetched: usize,
    pub batches_failed: usize,
    pub records_fetched: usize,
    /// Row count of the rewritten store, or `None` when it was left untouched.
    pub stored_rows: Option<usize>,
}

/// Per-entity outcome of `ensure_all`.
#[derive(Debug)]
pub struct EntityOutcome {
    pub entity: EntityKey,
    pub result: Result<SyncReport, AppError>,
}

pub struct BatchFetcher<T, P> {
    client: IntensityClient<T, P>,
    raw_dir: PathBuf,
    batch_days: u32,
}

impl<T: Transport, P: Pause> BatchFetcher<T, P> {
    pub fn new(client: IntensityClient<T, P>, raw_dir: impl Into<PathBuf>, batch_days: u32) -> Self {
        Self {
            client,
            raw_dir: raw_dir.into(),
            batch_days: batch_days.max(1),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn store_path(&self, entity: &EntityKey) -> PathBuf {
        self.raw_dir.join(entity.file_name())
    }

    /// Bring `entity`'s store up to date for `window`.
    ///
    /// Only store I/O errors are returned; remote failures are contained per batch.
    pub fn ensure_range(&self, entity: &EntityKey, window: &DateWindow) -> Result<SyncReport, AppError> {
        let path = self.store_path(entity);
        let existing = load_store(&path)?;
        let covered = existing
            .as_ref()
            .map(SeriesTable::covered_dates)
            .unwrap_or_default();

        let batches = window.batches(self.batch_days);
        let mut report = SyncReport {
            entity: *entity,
            path: path.clone(),
            batches_total: batches.len(),
            batches_skipped: 0,
            batches_fetched: 0,
            batches_failed: 0,
            records_fetched: 0,
            stored_rows: None,
        };
        let mut fetched = Vec::new();

        for batch in &batches {
            if batch.dates().all(|d| covered.contains(&d)) {
                debug!(%entity, %batch, "batch already covered, skipping");
                report.batches_skipped += 1;
                continue;
            }

            let result = self.client.fetch_batch(entity, batch);
            if result.is_fetched() {
                report.batches_fetched += 1;
            } else {
                report.batches_failed += 1;
            }
            report.records_fetched += result.records.len();
            fetched.extend(result.records);

            self.client.pause().pause(self.client.settings().post_batch_delay);
        }

        if fetched.is_empty() {
            info!(%entity, "no new data");
            return Ok(report);
        }

        let merged = existing.unwrap_or_default().merge(fetched);
        write_store(&path, &merged)?;
        report.stored_rows = Some(merged.len());
        info!(%entity, rows = merged.len(), path = %path.display(), "store updated");
        Ok(report)
    }

    /// Sync every entity in order; one entity's failure does not stop the rest.
    pub fn ensure_all(&self, entities: &[EntityKey], window: &DateWindow) -> Vec<EntityOutcome> {
        entities
            .iter()
            .map(|entity| {
                info!(%entity, %window, "fetching");
                let result = self.ensure_range(entity, window);
                if let Err(e) = &result {
                    warn!(%entity, %window, error = %e, "entity sync failed; re-run to resume");
                }
                EntityOutcome {
                    entity: *entity,
                    result,
                }
            })
            .collect()
    }
}
