//! Upload pipeline: user lookup, object put, asset insert, then best-effort
//! labeling.
//!
//! The object is written before the asset row, so a failure between the two
//! leaves an object nobody references. That window is logged and counted but
//! not repaired here.

use crate::app::PhotoApp;
use crate::error::{Error, LabelStage, Result};
use crate::models::{generate_bucket_key, local_name, NewAsset};
use std::path::Path;
use tracing::{error, info, instrument, warn};

impl PhotoApp {
    /// Store a local image for `userid` and return the new asset id.
    ///
    /// Fails if the user does not exist, the object cannot be written or the
    /// asset row cannot be inserted. Label detection and label insertion
    /// never fail the upload.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn upload(&self, userid: i64, path: &Path) -> Result<i64> {
        let localname = local_name(path)?;

        let username = self
            .retry
            .run("lookup_username", || self.metadata.username(userid))
            .await?;

        let bucketkey = generate_bucket_key(&username, &localname);

        self.retry
            .run("put_object", || self.objects.put_file(&bucketkey, path))
            .await?;

        let asset = NewAsset {
            userid,
            localname,
            bucketkey,
        };

        let assetid = match self
            .retry
            .run("insert_asset", || self.metadata.insert_asset(&asset))
            .await
        {
            Ok(assetid) => assetid,
            Err(e) => {
                error!(
                    bucketkey = %asset.bucketkey,
                    error = %e,
                    "Asset row not inserted, uploaded object is orphaned"
                );
                metrics::counter!("photoapp.orphaned_objects", "stage" => "upload").increment(1);
                return Err(e);
            }
        };

        metrics::counter!("photoapp.assets_uploaded").increment(1);
        info!(assetid, bucketkey = %asset.bucketkey, "Asset stored");

        match self.attach_labels(assetid, &asset.bucketkey).await {
            Ok(count) => info!(assetid, labels = count, "Labels attached"),
            Err(e) => report_label_failure(assetid, &e),
        }

        Ok(assetid)
    }

    /// Detect labels for a freshly stored asset and insert them as one batch.
    ///
    /// Failures come back as [`Error::BestEffort`] tagged with the stage that
    /// failed.
    async fn attach_labels(&self, assetid: i64, bucketkey: &str) -> Result<usize> {
        let labels = self
            .retry
            .run("detect_labels", || self.labels.detect_labels(bucketkey))
            .await
            .map_err(|e| Error::best_effort(LabelStage::Detection, e))?;

        if labels.is_empty() {
            return Ok(0);
        }

        self.retry
            .run("insert_labels", || self.metadata.insert_labels(assetid, &labels))
            .await
            .map_err(|e| Error::best_effort(LabelStage::Insert, e))?;

        Ok(labels.len())
    }
}

fn report_label_failure(assetid: i64, err: &Error) {
    match err {
        Error::BestEffort {
            stage: LabelStage::Detection,
            source,
        } => {
            warn!(assetid, error = %source, "Label detection failed, asset kept without labels");
            metrics::counter!("photoapp.label_failures", "stage" => "detection").increment(1);
        }
        Error::BestEffort {
            stage: LabelStage::Insert,
            source,
        } => {
            warn!(assetid, error = %source, "Label insert failed, asset kept without labels");
            metrics::counter!("photoapp.label_failures", "stage" => "insert").increment(1);
        }
        other => warn!(assetid, error = %other, "Labeling failed"),
    }
}
