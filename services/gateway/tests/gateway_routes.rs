use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use cinemage_gateway::config::{ApiConfig, IngestConfig, ListingConfig};
use cinemage_gateway::{
    create_router, AppState, GatewayError, IngestionHandler, ListingOrchestrator, ObjectStore,
    ObjectSummary, Record, RecordStore, RehostFailurePolicy, Result, StoredObject, TemporaryLink,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

/// In-memory bucket with injectable failures
#[derive(Default)]
struct MemoryBucket {
    objects: Mutex<BTreeMap<String, (Bytes, String)>>,
    list_fails: bool,
    unsignable: HashSet<String>,
}

impl MemoryBucket {
    fn with_objects(keys: &[&str]) -> Self {
        let bucket = Self::default();
        {
            let mut objects = bucket.objects.lock().unwrap();
            for key in keys {
                objects.insert(
                    key.to_string(),
                    (Bytes::from_static(b"jpeg"), "image/jpeg".to_string()),
                );
            }
        }
        bucket
    }

    fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryBucket {
    async fn list_all(&self) -> Result<Vec<ObjectSummary>> {
        if self.list_fails {
            return Err(GatewayError::StoreUnavailable("bucket offline".into()));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(key, (body, _))| ObjectSummary {
                key: key.clone(),
                size: body.len() as i64,
            })
            .collect())
    }

    async fn fetch(&self, key: &str) -> Result<StoredObject> {
        self.get(key)
            .map(|(body, content_type)| StoredObject { body, content_type })
            .ok_or_else(|| GatewayError::ObjectNotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn sign_temporary_access(&self, key: &str, ttl: Duration) -> Result<TemporaryLink> {
        if self.unsignable.contains(key) {
            return Err(GatewayError::SigningError {
                key: key.to_string(),
                reason: "no credentials".into(),
            });
        }
        Ok(TemporaryLink {
            url: format!("https://cdn.example/{key}?expires={}", ttl.as_secs()),
            expires_at: Utc::now(),
        })
    }
}

#[derive(Default)]
struct MemoryRecords {
    records: Vec<Record>,
    fails: bool,
}

#[async_trait]
impl RecordStore for MemoryRecords {
    async fn list_all(&self) -> Result<Vec<Record>> {
        if self.fails {
            return Err(GatewayError::RecordStoreUnavailable(
                "connection refused (os error 111)".into(),
            ));
        }
        Ok(self.records.clone())
    }

    async fn find_by_key(&self, title: &str) -> Result<Option<Record>> {
        if self.fails {
            return Err(GatewayError::RecordStoreUnavailable("pool exhausted".into()));
        }
        Ok(self.records.iter().find(|r| r.title == title).cloned())
    }

    async fn ping(&self) -> Result<()> {
        if self.fails {
            return Err(GatewayError::RecordStoreUnavailable("down".into()));
        }
        Ok(())
    }
}

fn movie(title: &str, year: u32) -> Record {
    let Value::Object(fields) = json!({ "year": year }) else {
        unreachable!()
    };
    Record {
        id: Uuid::new_v4(),
        title: title.to_string(),
        fields,
    }
}

fn router_with(
    bucket: Arc<MemoryBucket>,
    records: MemoryRecords,
    policy: RehostFailurePolicy,
) -> Router {
    let listing = ListingOrchestrator::new(
        bucket.clone(),
        ListingConfig::default(),
        Duration::from_secs(7200),
    );
    let ingest_config = IngestConfig {
        rehost_failure_policy: policy,
        fetch_timeout_secs: 5,
        ..Default::default()
    };
    let ingest = IngestionHandler::new(bucket.clone(), ingest_config.clone()).unwrap();

    let state = AppState {
        listing: Arc::new(listing),
        ingest: Arc::new(ingest),
        objects: bucket,
        records: Arc::new(records),
    };

    create_router(state, &ApiConfig::default(), ingest_config.max_body_bytes)
}

fn router(bucket: Arc<MemoryBucket>) -> Router {
    router_with(bucket, MemoryRecords::default(), RehostFailurePolicy::Propagate)
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn images_lists_captioned_links_without_folder_markers() {
    let bucket = Arc::new(MemoryBucket::with_objects(&[
        "original-thumbnails/",
        "original-thumbnails/Dune poster",
        "resized-thumbnails/",
        "resized-thumbnails/Dune poster",
    ]));

    let (status, body) = send(router(bucket), get("/images")).await;
    assert_eq!(status, StatusCode::OK);

    let body = json_body(&body);
    let urls = body["urls"].as_array().unwrap();
    assert_eq!(urls.len(), 2);
    for entry in urls {
        assert_eq!(entry["caption"], "Dune poster");
        let url = entry["url"].as_str().unwrap();
        assert!(url.ends_with("Dune poster?expires=7200"));
    }
}

#[tokio::test]
async fn images_on_empty_bucket_is_empty_list() {
    let (status, body) = send(router(Arc::new(MemoryBucket::default())), get("/images")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "urls": [] }));
}

#[tokio::test]
async fn images_fails_whole_listing_on_one_signing_error() {
    let mut bucket = MemoryBucket::with_objects(&[
        "original-thumbnails/a.jpg",
        "original-thumbnails/b.jpg",
    ]);
    bucket.unsignable.insert("original-thumbnails/b.jpg".to_string());

    let (status, body) = send(router(Arc::new(bucket)), get("/images")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["code"], "SIGNING_ERROR");
    assert!(body.get("urls").is_none());
}

#[tokio::test]
async fn images_surfaces_listing_outage() {
    let bucket = MemoryBucket {
        list_fails: true,
        ..Default::default()
    };

    let (status, body) = send(router(Arc::new(bucket)), get("/images")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(&body)["code"], "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn image_bytes_are_proxied() {
    let bucket = Arc::new(MemoryBucket::with_objects(&["original-thumbnails/cat.jpg"]));

    let response = router(bucket.clone())
        .oneshot(get("/images/original-thumbnails/cat.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

    let (status, _) = send(router(bucket), get("/images/original-thumbnails/dog.jpg")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_stores_image_field_under_original_prefix() {
    let bucket = Arc::new(MemoryBucket::default());
    let multipart = concat!(
        "--X-BOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"image\"; filename=\"cat.jpg\"\r\n",
        "Content-Type: image/jpeg\r\n",
        "\r\n",
        "meow\r\n",
        "--X-BOUNDARY--\r\n",
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=X-BOUNDARY")
        .body(Body::from(multipart))
        .unwrap();

    let (status, body) = send(router(bucket.clone()), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({}));
    let (stored, content_type) = bucket.get("original-thumbnails/cat.jpg").unwrap();
    assert_eq!(stored.as_ref(), b"meow");
    assert_eq!(content_type, "image/jpeg");
}

#[tokio::test]
async fn upload_without_image_field_is_bad_request() {
    let bucket = Arc::new(MemoryBucket::default());
    let multipart = concat!(
        "--X-BOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"caption\"\r\n",
        "\r\n",
        "hello\r\n",
        "--X-BOUNDARY--\r\n",
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=X-BOUNDARY")
        .body(Body::from(multipart))
        .unwrap();

    let (status, body) = send(router(bucket.clone()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], "BAD_PAYLOAD");
    assert_eq!(bucket.len(), 0);
}

fn rehost_request(encoded_url: &str, title: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/upload/{encoded_url}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "title": title }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn rehost_of_unreachable_url_reports_error_by_default() {
    let bucket = Arc::new(MemoryBucket::default());

    let (status, body) = send(
        router(bucket.clone()),
        rehost_request("http%3A%2F%2F127.0.0.1%3A1%2Fposter.jpg", "Dune"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(&body)["code"], "REMOTE_FETCH_ERROR");
    assert_eq!(bucket.len(), 0);
}

#[tokio::test]
async fn rehost_of_unreachable_url_succeeds_when_swallowing() {
    let bucket = Arc::new(MemoryBucket::default());
    let router = router_with(
        bucket.clone(),
        MemoryRecords::default(),
        RehostFailurePolicy::Swallow,
    );

    let (status, body) = send(
        router,
        rehost_request("http%3A%2F%2F127.0.0.1%3A1%2Fposter.jpg", "Dune"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({}));
    assert_eq!(bucket.len(), 0);
}

#[tokio::test]
async fn rehost_without_body_is_bad_request_even_when_swallowing() {
    let bucket = Arc::new(MemoryBucket::default());
    let router = router_with(
        bucket.clone(),
        MemoryRecords::default(),
        RehostFailurePolicy::Swallow,
    );
    let request = Request::builder()
        .method("POST")
        .uri("/upload/http%3A%2F%2F127.0.0.1%3A1%2Fposter.jpg")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], "BAD_PAYLOAD");
    assert_eq!(bucket.len(), 0);
}

#[tokio::test]
async fn rehost_with_malformed_json_is_bad_request() {
    let bucket = Arc::new(MemoryBucket::default());
    let request = Request::builder()
        .method("POST")
        .uri("/upload/http%3A%2F%2F127.0.0.1%3A1%2Fposter.jpg")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"title\":"))
        .unwrap();

    let (status, body) = send(router(bucket.clone()), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = json_body(&body);
    assert_eq!(body["code"], "BAD_PAYLOAD");
    assert!(body["error"].as_str().unwrap().starts_with("bad payload:"));
    assert_eq!(bucket.len(), 0);
}

#[tokio::test]
async fn movies_lists_all_records() {
    let records = MemoryRecords {
        records: vec![movie("Heat", 1995), movie("Inception", 2010)],
        fails: false,
    };
    let router = router_with(
        Arc::new(MemoryBucket::default()),
        records,
        RehostFailurePolicy::Propagate,
    );

    let (status, body) = send(router, get("/movies")).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    let titles: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["Heat", "Inception"]);
    assert_eq!(body[1]["year"], 2010);
}

#[tokio::test]
async fn movie_lookup_by_title() {
    let records = MemoryRecords {
        records: vec![movie("Inception", 2010)],
        fails: false,
    };
    let router = router_with(
        Arc::new(MemoryBucket::default()),
        records,
        RehostFailurePolicy::Propagate,
    );

    let (status, body) = send(router.clone(), get("/movies/Inception")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["title"], "Inception");

    let (status, body) = send(router, get("/movies/Tenet")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), Value::Null);
}

#[tokio::test]
async fn record_store_failure_is_generic_server_error() {
    let records = MemoryRecords {
        records: vec![],
        fails: true,
    };
    let router = router_with(
        Arc::new(MemoryBucket::default()),
        records,
        RehostFailurePolicy::Propagate,
    );

    let (status, body) = send(router.clone(), get("/movies")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert_eq!(body["error"], "Failed to read movie records");
    assert!(!body.to_string().contains("os error"));

    let (status, _) = send(router, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn landing_and_health_pages() {
    let bucket = Arc::new(MemoryBucket::default());

    let (status, body) = send(router(bucket.clone()), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("Cinemage"));

    let (status, body) = send(router(bucket), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "healthy");
}
