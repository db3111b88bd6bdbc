use crate::config::IngestConfig;
use crate::error::{GatewayError, Result};
use crate::key_classifier::original_key;
use crate::object_store::{content_type_for, ObjectStore};
use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// How a failed remote re-host is reported to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RehostFailurePolicy {
    /// Return the error
    #[default]
    Propagate,
    /// Log the error and report success
    Swallow,
}

/// An image received from the client
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Result of an ingestion that did not return an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored { key: String, size_bytes: usize },
    /// Re-host failed and the swallow policy hid it
    Swallowed,
}

/// Writes new images into the original-thumbnails namespace
pub struct IngestionHandler {
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
    config: IngestConfig,
}

impl IngestionHandler {
    pub fn new(store: Arc<dyn ObjectStore>, config: IngestConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()?;

        Ok(Self {
            store,
            http,
            config,
        })
    }

    /// Store a client upload under `original-thumbnails/<file name>`
    #[instrument(skip(self, upload), fields(file_name = %upload.file_name, size_bytes = upload.body.len()))]
    pub async fn upload_direct(&self, upload: Upload) -> Result<IngestOutcome> {
        if upload.file_name.trim().is_empty() {
            return Err(GatewayError::BadPayload("upload has no file name".to_string()));
        }
        if upload.body.len() > self.config.max_body_bytes {
            return Err(GatewayError::BadPayload(format!(
                "upload of {} bytes exceeds limit of {}",
                upload.body.len(),
                self.config.max_body_bytes
            )));
        }

        let key = original_key(&upload.file_name);
        let content_type = upload
            .content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| content_type_for(&upload.file_name).to_string());

        self.store_object(key, upload.body, &content_type).await
    }

    /// Fetch `source_url` and store it under `original-thumbnails/<title> poster`.
    ///
    /// Validation errors are always returned; fetch and store failures follow
    /// the configured `RehostFailurePolicy`.
    #[instrument(skip(self))]
    pub async fn rehost_remote(&self, source_url: &str, title: &str) -> Result<IngestOutcome> {
        if title.trim().is_empty() {
            return Err(GatewayError::BadPayload("title is required".to_string()));
        }
        let url = Url::parse(source_url)
            .map_err(|e| GatewayError::BadPayload(format!("invalid image URL: {e}")))?;

        let key = original_key(&format!("{title} poster"));

        let result = match self.fetch_remote(url).await {
            Ok((body, content_type)) => self.store_object(key, body, &content_type).await,
            Err(e) => Err(e),
        };

        match (result, self.config.rehost_failure_policy) {
            (Ok(outcome), _) => Ok(outcome),
            (Err(e), RehostFailurePolicy::Propagate) => {
                metrics::counter!("gateway.ingest.failures").increment(1);
                Err(e)
            }
            (Err(e), RehostFailurePolicy::Swallow) => {
                metrics::counter!("gateway.ingest.failures").increment(1);
                error!(error = %e, source_url, "Error re-hosting remote image, reporting success");
                Ok(IngestOutcome::Swallowed)
            }
        }
    }

    /// Download a remote resource into memory, enforcing the body limit
    async fn fetch_remote(&self, url: Url) -> Result<(Bytes, String)> {
        let remote_error = |e: reqwest::Error| GatewayError::RemoteFetchError(e.to_string());

        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(remote_error)?
            .error_for_status()
            .map_err(remote_error)?;

        let limit = self.config.max_body_bytes;
        if response.content_length().is_some_and(|len| len as usize > limit) {
            return Err(GatewayError::RemoteFetchError(format!(
                "remote body exceeds limit of {limit} bytes"
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| content_type_for(url.path()).to_string());

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(remote_error)? {
            if body.len() + chunk.len() > limit {
                return Err(GatewayError::RemoteFetchError(format!(
                    "remote body exceeds limit of {limit} bytes"
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body.freeze(), content_type))
    }

    async fn store_object(
        &self,
        key: String,
        body: Bytes,
        content_type: &str,
    ) -> Result<IngestOutcome> {
        let size_bytes = body.len();
        self.store.put(&key, body, content_type).await?;

        metrics::counter!("gateway.ingest.stored").increment(1);
        metrics::counter!("gateway.ingest.bytes").increment(size_bytes as u64);
        info!(key = %key, size_bytes, content_type, "Image ingested");

        Ok(IngestOutcome::Stored { key, size_bytes })
    }
}
