//! Listing pipeline: enumerate the bucket, drop folder markers, and sign a
//! temporary link for every remaining object.
//!
//! Signing fans out with bounded concurrency and joins all-or-nothing: the
//! first failed signing call fails the listing and drops the in-flight
//! siblings, so a truncated listing is never returned.

use crate::config::ListingConfig;
use crate::error::{GatewayError, Result};
use crate::key_classifier::{classify, KeyClass, UnclassifiedPolicy};
use crate::object_store::{ObjectStore, ObjectSummary};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// One displayable image in a listing response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayEntry {
    /// Presigned URL for the image
    pub url: String,
    /// Key with its thumbnail prefix removed; `None` for unclassified keys
    pub caption: Option<String>,
    /// When `url` stops working
    pub expires_at: DateTime<Utc>,
}

/// A key that survived classification, waiting to be signed
#[derive(Debug, Clone, PartialEq)]
pub struct RetainedKey {
    pub key: String,
    pub caption: Option<String>,
}

/// Builds listing responses from the object store
pub struct ListingOrchestrator {
    store: Arc<dyn ObjectStore>,
    config: ListingConfig,
    link_ttl: Duration,
}

impl ListingOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, config: ListingConfig, link_ttl: Duration) -> Self {
        Self {
            store,
            config,
            link_ttl,
        }
    }

    /// List every displayable object with a freshly signed link.
    ///
    /// Fails as a whole if the listing call fails, any signing call fails,
    /// or the whole operation exceeds the configured listing timeout.
    #[instrument(skip(self))]
    pub async fn list_display_entries(&self) -> Result<Vec<DisplayEntry>> {
        let started = Instant::now();
        metrics::counter!("gateway.listing.requests").increment(1);

        let result = tokio::time::timeout(self.config.listing_timeout(), self.collect_entries())
            .await
            .unwrap_or_else(|_| Err(GatewayError::Timeout("listing".to_string())));

        metrics::histogram!("gateway.listing.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(entries) => {
                metrics::counter!("gateway.listing.entries").increment(entries.len() as u64);
                info!(
                    count = entries.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Listing assembled"
                );
            }
            Err(e) => {
                metrics::counter!("gateway.listing.failures").increment(1);
                warn!(error = %e, "Listing failed");
            }
        }

        result
    }

    async fn collect_entries(&self) -> Result<Vec<DisplayEntry>> {
        let objects = self.store.list_all().await?;
        let total = objects.len();
        let retained = retain_displayable(objects, self.config.unclassified);

        debug!(
            listed = total,
            retained = retained.len(),
            "Classified bucket keys"
        );

        // try_collect stops at the first error; dropping the stream cancels
        // whatever signing calls are still pending.
        stream::iter(retained)
            .map(|retained| self.sign_entry(retained))
            .buffer_unordered(self.config.sign_concurrency.max(1))
            .try_collect()
            .await
    }

    async fn sign_entry(&self, retained: RetainedKey) -> Result<DisplayEntry> {
        let RetainedKey { key, caption } = retained;

        let link = tokio::time::timeout(
            self.config.sign_timeout(),
            self.store.sign_temporary_access(&key, self.link_ttl),
        )
        .await
        .map_err(|_| GatewayError::SigningError {
            key: key.clone(),
            reason: "signing timed out".to_string(),
        })??;

        Ok(DisplayEntry {
            url: link.url,
            caption,
            expires_at: link.expires_at,
        })
    }
}

/// Drop folder markers (and unclassified keys when the policy says so),
/// pairing every survivor with its caption.
pub fn retain_displayable(
    objects: Vec<ObjectSummary>,
    policy: UnclassifiedPolicy,
) -> Vec<RetainedKey> {
    objects
        .into_iter()
        .filter_map(|object| match classify(&object.key) {
            KeyClass::Excluded => None,
            KeyClass::Leaf { caption, .. } => Some(RetainedKey {
                key: object.key,
                caption: Some(caption),
            }),
            KeyClass::Unclassified => match policy {
                UnclassifiedPolicy::Keep => Some(RetainedKey {
                    key: object.key,
                    caption: None,
                }),
                UnclassifiedPolicy::Exclude => None,
            },
        })
        .collect()
}
