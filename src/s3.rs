//! Bucket access over the AWS SDK: object listing, sizes and downloads.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::Object;
use aws_smithy_types::retry::RetryConfig;
use aws_smithy_types::timeout::TimeoutConfig;
use tokio::runtime::Runtime;

use crate::config::{BucketSettings, HttpSettings};
use crate::error::HarvestError;

const CREDENTIALS_PROVIDER: &str = "foph-harvest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// Read access to the bucket holding the metadata workbook and the dataset files.
pub trait ObjectStore: Send + Sync {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, HarvestError>;
    fn object_size(&self, key: &str) -> Result<u64, HarvestError>;
    fn download(&self, key: &str, destination: &Path) -> Result<(), HarvestError>;
}

/// Blocking facade over `aws_sdk_s3::Client`, driven by a private current-thread runtime.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
    runtime: Arc<Runtime>,
}

impl Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3Client {
    pub fn new(bucket: BucketSettings, http_settings: HttpSettings) -> Result<Self, HarvestError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| HarvestError::S3Http(err.to_string()))?;

        let credentials = Credentials::new(
            bucket.access_key.clone(),
            bucket.secret_key.clone(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let sdk_config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(bucket.region.clone()))
                .credentials_provider(credentials)
                .load(),
        );

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .retry_config(
                RetryConfig::standard().with_max_attempts(max_attempts(http_settings.max_retries)),
            )
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(http_settings.timeout)
                    .connect_timeout(Duration::from_secs(10))
                    .build(),
            );
        // Custom endpoints (MinIO, LocalStack) expect bucket-in-path addressing.
        if let Some(endpoint) = &bucket.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.bucket_name,
            runtime: Arc::new(runtime),
        })
    }
}

impl ObjectStore for S3Client {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, HarvestError> {
        let objects = self
            .runtime
            .block_on(async {
                let mut objects = Vec::new();
                let mut continuation_token = None;
                loop {
                    let mut request = self
                        .client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(prefix);
                    if let Some(token) = continuation_token.take() {
                        request = request.continuation_token(token);
                    }
                    let response = request
                        .send()
                        .await
                        .map_err(|err| map_sdk_error(err, prefix))?;
                    objects.extend(summaries(response.contents()));
                    match response.next_continuation_token() {
                        Some(token) => continuation_token = Some(token.to_string()),
                        None => break,
                    }
                }
                Ok::<_, HarvestError>(objects)
            })
            .map_err(|err| HarvestError::RemoteList {
                prefix: prefix.to_string(),
                message: err.to_string(),
            })?;
        tracing::debug!(prefix, count = objects.len(), "listed bucket objects");
        Ok(objects)
    }

    fn object_size(&self, key: &str) -> Result<u64, HarvestError> {
        let response = self
            .runtime
            .block_on(
                self.client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send(),
            )
            .map_err(|err| map_sdk_error(err, key))?;
        response
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .ok_or_else(|| HarvestError::S3Http(format!("missing content length for {key}")))
    }

    fn download(&self, key: &str, destination: &Path) -> Result<(), HarvestError> {
        let bytes = self.runtime.block_on(async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| map_sdk_error(err, key))?;
            response
                .body
                .collect()
                .await
                .map(|data| data.into_bytes())
                .map_err(|err| HarvestError::S3Http(format!("failed to read {key}: {err}")))
        })?;
        std::fs::write(destination, &bytes)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        tracing::debug!(key, bytes = bytes.len(), "downloaded bucket object");
        Ok(())
    }
}

/// The SDK counts the initial attempt; the config counts retries after it.
fn max_attempts(max_retries: usize) -> u32 {
    u32::try_from(max_retries)
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

fn summaries(contents: &[Object]) -> Vec<ObjectSummary> {
    contents
        .iter()
        .filter_map(|object| {
            object.key().map(|key| ObjectSummary {
                key: key.to_string(),
                size: object
                    .size()
                    .and_then(|size| u64::try_from(size).ok())
                    .unwrap_or(0),
            })
        })
        .collect()
}

fn map_sdk_error<E: Debug>(err: SdkError<E>, key: &str) -> HarvestError {
    match &err {
        SdkError::ServiceError(service_err) => HarvestError::S3Status {
            status: service_err.raw().status().as_u16(),
            message: format!("{key}: {err:?}"),
        },
        SdkError::TimeoutError(_) => HarvestError::S3Http(format!("timed out on {key}")),
        SdkError::DispatchFailure(_) => {
            HarvestError::S3Http(format!("connection failed for {key}: {err:?}"))
        }
        _ => HarvestError::S3Http(format!("{key}: {err:?}")),
    }
}
