use crate::app::PhotoApp;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

impl PhotoApp {
    /// Write the bytes of `assetid` to `dest`, or to the asset's original
    /// file name when no destination is given. Returns the path written.
    #[instrument(skip(self, dest))]
    pub async fn download(&self, assetid: i64, dest: Option<&Path>) -> Result<PathBuf> {
        let location = self
            .retry
            .run("asset_location", || self.metadata.asset_location(assetid))
            .await?;

        let dest = dest
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&location.localname));

        self.retry
            .run("get_object", || {
                self.objects.get_to_file(&location.bucketkey, &dest)
            })
            .await?;

        info!(
            assetid,
            bucketkey = %location.bucketkey,
            dest = %dest.display(),
            "Asset downloaded"
        );
        Ok(dest)
    }
}
