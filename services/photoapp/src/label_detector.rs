use crate::config::LabelConfig;
use crate::error::{Error, Result, Store};
use crate::models::DetectedLabel;
use async_trait::async_trait;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client as RekognitionClient;
use aws_types::SdkConfig;
use tracing::{debug, instrument};

/// Image-recognition service producing labels for stored objects
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// Detect labels on the object stored under `key`
    async fn detect_labels(&self, key: &str) -> Result<Vec<DetectedLabel>>;
}

/// Rekognition-backed label detector reading images straight from the bucket
pub struct RekognitionLabels {
    client: RekognitionClient,
    bucket: String,
    max_labels: i32,
    min_confidence: f32,
}

impl RekognitionLabels {
    pub fn new(sdk: &SdkConfig, bucket: impl Into<String>, config: &LabelConfig) -> Self {
        Self {
            client: RekognitionClient::new(sdk),
            bucket: bucket.into(),
            max_labels: config.max_labels,
            min_confidence: config.min_confidence,
        }
    }
}

#[async_trait]
impl LabelDetector for RekognitionLabels {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn detect_labels(&self, key: &str) -> Result<Vec<DetectedLabel>> {
        let image = Image::builder()
            .s3_object(S3Object::builder().bucket(&self.bucket).name(key).build())
            .build();

        let response = self
            .client
            .detect_labels()
            .image(image)
            .max_labels(self.max_labels)
            .min_confidence(self.min_confidence)
            .send()
            .await
            .map_err(|e| Error::from_sdk(Store::LabelService, e))?;

        // Unnamed labels carry nothing worth storing
        let labels: Vec<DetectedLabel> = response
            .labels()
            .iter()
            .filter_map(|label| {
                Some(DetectedLabel {
                    name: label.name()?.to_string(),
                    confidence: label.confidence().unwrap_or_default(),
                })
            })
            .collect();

        debug!(count = labels.len(), "Labels detected");
        Ok(labels)
    }
}
