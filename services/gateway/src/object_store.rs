use crate::config::{RetryConfig, S3Config};
use crate::error::{GatewayError, Result};
use crate::retry::with_backoff;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// One entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
}

/// Object bytes with their content type
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// A signed, time-limited URL for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Access to the single bucket holding the gateway's images.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object in the bucket with one unpaginated call.
    /// An empty bucket yields an empty vector.
    async fn list_all(&self) -> Result<Vec<ObjectSummary>>;

    /// Fetch an object's bytes
    async fn fetch(&self, key: &str) -> Result<StoredObject>;

    /// Store an object, silently replacing any existing one at `key`
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    /// Issue a URL granting read access to `key` for `ttl`
    async fn sign_temporary_access(&self, key: &str, ttl: Duration) -> Result<TemporaryLink>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    retry: RetryConfig,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config, retry: RetryConfig) -> anyhow::Result<Self> {
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_attempt_timeout(config.operation_timeout())
            .build();

        // Retries are driven by `with_backoff` so the policy lives in one place
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .timeout_config(timeouts)
            .retry_config(aws_config::retry::RetryConfig::disabled())
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            retry,
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_once(&self) -> Result<Vec<ObjectSummary>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error("list", e))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or_default(),
                })
            })
            .collect();

        Ok(objects)
    }

    async fn fetch_once(&self, key: &str) -> Result<StoredObject> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(GatewayError::ObjectNotFound(key.to_string()));
                }
                return Err(map_sdk_error("get", e));
            }
        };

        let content_type = output
            .content_type()
            .map(String::from)
            .unwrap_or_else(|| content_type_for(key).to_string());

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| GatewayError::StoreUnavailable(format!("S3 body read failed: {e}")))?
            .into_bytes();

        Ok(StoredObject { body, content_type })
    }

    async fn put_once(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        let size = body.len() as i64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .content_length(size)
            .send()
            .await
            .map_err(|e| map_sdk_error("put", e))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_all(&self) -> Result<Vec<ObjectSummary>> {
        let objects = with_backoff(&self.retry, "s3.list", || self.list_once()).await?;
        debug!(count = objects.len(), "Listed bucket");
        Ok(objects)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn fetch(&self, key: &str) -> Result<StoredObject> {
        with_backoff(&self.retry, "s3.get", || self.fetch_once(key)).await
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        // Bytes clones share the buffer
        with_backoff(&self.retry, "s3.put", || {
            self.put_once(key, body.clone(), content_type)
        })
        .await?;

        info!(key = %key, size_bytes = body.len(), "Object stored");
        Ok(())
    }

    async fn sign_temporary_access(&self, key: &str, ttl: Duration) -> Result<TemporaryLink> {
        let signing_error = |reason: String| GatewayError::SigningError {
            key: key.to_string(),
            reason,
        };

        let presigning_config =
            PresigningConfig::expires_in(ttl).map_err(|e| signing_error(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| signing_error(DisplayErrorContext(&e).to_string()))?;

        let ttl = chrono::Duration::from_std(ttl).map_err(|e| signing_error(e.to_string()))?;

        Ok(TemporaryLink {
            url: presigned.uri().to_string(),
            expires_at: Utc::now() + ttl,
        })
    }
}

fn map_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> GatewayError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) => GatewayError::Timeout(format!("S3 {operation}")),
        other => GatewayError::StoreUnavailable(format!(
            "S3 {operation} failed: {}",
            DisplayErrorContext(&other)
        )),
    }
}

/// Guess a content type from a file name's extension
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
