//! Cinemage Gateway
//!
//! Bridges the Cinemage web client to the poster object store (S3) and the
//! movie record store (PostgreSQL).
//!
//! ## Features
//!
//! - **Image Listing**: Enumerate the bucket, drop folder markers, caption
//!   each image by its key, and sign a two-hour link per image
//! - **Ingestion**: Store client uploads and re-host remote posters under
//!   `original-thumbnails/`
//! - **Movie Records**: List all movies or look one up by title over a
//!   pooled connection
//!
//! ## Architecture
//!
//! ```text
//!  Web client
//!      │
//!      ▼
//! ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ Gateway API  │─────▶│ Listing      │─────▶│ Key          │
//! │ (axum)       │      │ Orchestrator │      │ Classifier   │
//! └──────────────┘      └──────────────┘      └──────────────┘
//!      │   │                   │ list + sign (fan-out)
//!      │   ▼                   ▼
//!      │ ┌──────────────┐   ┌──────────────┐
//!      │ │ Ingestion    │──▶│ Object Store │──▶ S3 bucket
//!      │ │ Handler      │   │ (S3)         │
//!      │ └──────────────┘   └──────────────┘
//!      ▼
//! ┌──────────────┐
//! │ Record Store │──▶ PostgreSQL
//! └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod key_classifier;
pub mod listing;
pub mod object_store;
pub mod record_store;
pub mod retry;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{GatewayError, Result};
pub use ingest::{IngestOutcome, IngestionHandler, RehostFailurePolicy, Upload};
pub use key_classifier::{classify, KeyClass, UnclassifiedPolicy};
pub use listing::{DisplayEntry, ListingOrchestrator};
pub use object_store::{ObjectStore, ObjectSummary, S3ObjectStore, StoredObject, TemporaryLink};
pub use record_store::{PgRecordStore, Record, RecordStore};
