use crate::config::Config;
use crate::error::Result;
use crate::label_detector::{LabelDetector, RekognitionLabels};
use crate::metadata_store::{MetadataStore, MySqlMetadataStore};
use crate::models::{Asset, AssetLabel, LabelMatch, User};
use crate::object_store::{ObjectStore, S3ObjectStore};
use crate::retry::RetryPolicy;
use crate::transaction::Database;
use aws_config::retry::RetryConfig as SdkRetryConfig;
use aws_config::BehaviorVersion;
use std::sync::Arc;
use tracing::{info, instrument};

/// Entry point for every photo operation.
///
/// Holds one immutable handle per store. Handles are built once at startup
/// and shared read-only by concurrent invocations; the database handle opens
/// a fresh connection per unit of work.
#[derive(Clone)]
pub struct PhotoApp {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) labels: Arc<dyn LabelDetector>,
    pub(crate) retry: RetryPolicy,
}

impl PhotoApp {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        labels: Arc<dyn LabelDetector>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            metadata,
            objects,
            labels,
            retry,
        }
    }

    /// Build S3, Rekognition and MySQL clients from configuration
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.s3.region.clone()))
            .retry_config(SdkRetryConfig::standard().with_max_attempts(config.s3.sdk_max_attempts));

        if let Some(ref profile) = config.s3.profile {
            loader = loader.profile_name(profile);
        }

        let sdk = loader.load().await;

        let objects = S3ObjectStore::new(&sdk, &config.s3);
        let labels = RekognitionLabels::new(&sdk, &config.s3.bucket, &config.labels);
        let metadata = MySqlMetadataStore::new(Database::new(&config.database));

        if config.database.run_migrations {
            metadata.run_migrations().await?;
        }

        info!(
            bucket = %config.s3.bucket,
            database = %config.database.name,
            "Store clients initialized"
        );

        Ok(Self::new(
            Arc::new(metadata),
            Arc::new(objects),
            Arc::new(labels),
            RetryPolicy::from_config(&config.retry),
        ))
    }

    /// All users, by ascending id
    #[instrument(skip(self))]
    pub async fn users(&self) -> Result<Vec<User>> {
        self.retry.run("users", || self.metadata.users()).await
    }

    /// All assets, or only those owned by `userid`
    #[instrument(skip(self))]
    pub async fn images(&self, userid: Option<i64>) -> Result<Vec<Asset>> {
        self.retry
            .run("images", || self.metadata.assets(userid))
            .await
    }

    /// Labels attached to one asset; `NotFound` if the asset does not exist
    #[instrument(skip(self))]
    pub async fn image_labels(&self, assetid: i64) -> Result<Vec<AssetLabel>> {
        self.retry
            .run("image_labels", || self.metadata.labels_for(assetid))
            .await
    }

    /// Every label containing `label` as a substring, with its asset
    #[instrument(skip(self))]
    pub async fn images_with_label(&self, label: &str) -> Result<Vec<LabelMatch>> {
        self.retry
            .run("images_with_label", || self.metadata.search_labels(label))
            .await
    }
}
