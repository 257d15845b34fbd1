//! Bulk delete of every asset.
//!
//! The database is cleared first and counts as the point at which the delete
//! happened. Objects are removed afterwards; any that survive are reported as
//! orphans rather than failing the call.

use crate::app::PhotoApp;
use crate::error::{Error, Result};
use crate::object_store::DELETE_BATCH_LIMIT;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

/// Outcome of [`PhotoApp::delete_all`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteSummary {
    /// Asset rows removed
    pub assets_deleted: usize,
    /// Objects the store confirmed as removed
    pub objects_deleted: usize,
    /// Keys whose rows are gone but whose objects may remain
    pub orphaned_keys: Vec<String>,
    /// Whether asset numbering was reset to its starting value
    pub identity_reset: bool,
}

impl PhotoApp {
    /// Remove every asset, label and stored object.
    ///
    /// Fails only if the database step fails before any row is removed, in
    /// which case nothing has been deleted from the object store.
    #[instrument(skip(self))]
    pub async fn delete_all(&self) -> Result<DeleteSummary> {
        let (keys, identity_reset) = match self
            .retry
            .run("purge_assets", || self.metadata.purge_assets())
            .await
        {
            Ok(keys) => (keys, true),
            Err(Error::PurgeIncomplete { keys, source }) => {
                error!(
                    error = %source,
                    count = keys.len(),
                    "Asset rows truncated but purge did not finish"
                );
                (keys, false)
            }
            Err(e) => return Err(e),
        };

        metrics::counter!("photoapp.purges").increment(1);

        let mut summary = DeleteSummary {
            assets_deleted: keys.len(),
            identity_reset,
            ..Default::default()
        };

        if keys.is_empty() {
            info!("No assets stored, object delete skipped");
            return Ok(summary);
        }

        // Each chunk is retried and accounted for on its own
        for chunk in keys.chunks(DELETE_BATCH_LIMIT) {
            match self
                .retry
                .run("delete_objects", || self.objects.delete_batch(chunk))
                .await
            {
                Ok(report) => {
                    summary.objects_deleted += report.deleted;
                    summary.orphaned_keys.extend(report.failed);
                }
                Err(e) => {
                    warn!(error = %e, count = chunk.len(), "Batch object delete failed");
                    summary.orphaned_keys.extend(chunk.iter().cloned());
                }
            }
        }

        if !summary.orphaned_keys.is_empty() {
            error!(
                count = summary.orphaned_keys.len(),
                keys = ?summary.orphaned_keys,
                "Asset rows deleted but objects remain"
            );
            metrics::counter!("photoapp.orphaned_objects", "stage" => "purge")
                .increment(summary.orphaned_keys.len() as u64);
        }

        info!(
            assets = summary.assets_deleted,
            objects = summary.objects_deleted,
            identity_reset = summary.identity_reset,
            "All assets deleted"
        );
        Ok(summary)
    }
}
