use crate::config::{DatabaseConfig, RetryConfig};
use crate::error::{GatewayError, Result};
use crate::retry::with_backoff;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A movie document, addressed by its title
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    /// Remaining document fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a record from a stored document, dropping fields the row owns
    pub fn from_document(id: Uuid, title: String, mut document: Map<String, Value>) -> Self {
        document.remove("_id");
        document.remove("title");
        Self {
            id,
            title,
            fields: document,
        }
    }
}

/// Table created by `migrations/`; queries and schema must agree on it
pub const MOVIES_TABLE: &str = "movies";

/// Read access to the movie collection
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record in the collection
    async fn list_all(&self) -> Result<Vec<Record>>;

    /// The record with this title, or `None` when there is none
    async fn find_by_key(&self, title: &str) -> Result<Option<Record>>;

    /// Cheap connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

type DocumentRow = (Uuid, String, Json<Map<String, Value>>);

/// Record store backed by a PostgreSQL JSONB table
pub struct PgRecordStore {
    pool: PgPool,
    retry: RetryConfig,
}

impl PgRecordStore {
    /// Open the connection pool once; every query checks a connection out of it
    pub async fn new(config: &DatabaseConfig, retry: RetryConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!(table = MOVIES_TABLE, "Connected to record store");

        Ok(Self { pool, retry })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn list_once(&self) -> Result<Vec<Record>> {
        let sql = format!("SELECT id, title, document FROM {MOVIES_TABLE} ORDER BY title");

        let rows: Vec<DocumentRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, title, Json(document))| Record::from_document(id, title, document))
            .collect())
    }

    async fn find_once(&self, title: &str) -> Result<Option<Record>> {
        let sql =
            format!("SELECT id, title, document FROM {MOVIES_TABLE} WHERE title = $1 LIMIT 1");

        let row: Option<DocumentRow> = sqlx::query_as(&sql)
            .bind(title)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|(id, title, Json(document))| Record::from_document(id, title, document)))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<Record>> {
        metrics::counter!("gateway.records.queries").increment(1);
        let records = with_backoff(&self.retry, "records.list", || self.list_once()).await?;
        debug!(count = records.len(), "Listed records");
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn find_by_key(&self, title: &str) -> Result<Option<Record>> {
        metrics::counter!("gateway.records.queries").increment(1);
        with_backoff(&self.retry, "records.find", || self.find_once(title)).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> GatewayError {
    match err {
        sqlx::Error::PoolTimedOut => {
            GatewayError::RecordStoreUnavailable("connection pool exhausted".to_string())
        }
        other => GatewayError::RecordStoreUnavailable(other.to_string()),
    }
}
