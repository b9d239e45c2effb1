use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::put,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Url};
use stash_store::{
    BlobStore, Credentials, MemoryBlobStore, RequestSigner, S3BlobStore, S3Config, SigV4Signer,
    SignableRequest, StoreError, StoreResult,
};

fn decode_data_url(url: &str) -> (String, Vec<u8>) {
    let rest = url.strip_prefix("data:").expect("data url");
    let (content_type, payload) = rest.split_once(";base64,").expect("base64 data url");
    (content_type.to_string(), STANDARD.decode(payload).unwrap())
}

#[tokio::test]
async fn memory_upload_then_get_reproduces_bytes() {
    let store = MemoryBlobStore::new();
    let bytes: Vec<u8> = (0u8..=255).collect();
    let reference = store.upload(bytes.clone(), "application/octet-stream").await.unwrap();

    let url = store.get(&reference).await.unwrap().unwrap();
    let (content_type, decoded) = decode_data_url(&url);
    assert_eq!(content_type, "application/octet-stream");
    assert_eq!(decoded, bytes);
}

#[tokio::test]
async fn memory_delete_then_get_is_none() {
    let store = MemoryBlobStore::new();
    let reference = store.upload(b"bye".to_vec(), "text/plain").await.unwrap();
    store.delete(&reference).await.unwrap();
    store.delete(&reference).await.unwrap();
    assert_eq!(store.get(&reference).await.unwrap(), None);
}

#[tokio::test]
async fn memory_references_are_unique() {
    let store = MemoryBlobStore::new();
    let a = store.upload(b"same".to_vec(), "text/plain").await.unwrap();
    let b = store.upload(b"same".to_vec(), "text/plain").await.unwrap();
    assert_ne!(a, b);
    assert_eq!(store.len(), 2);
}

/// In-process stand-in for an S3 bucket named `uploads`.
#[derive(Clone, Default)]
struct FakeBucket {
    objects: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
    signed_headers: Arc<Mutex<Vec<String>>>,
}

fn authorized(bucket: &FakeBucket, headers: &HeaderMap) -> bool {
    let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    bucket.signed_headers.lock().push(auth.to_string());
    auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/") && headers.contains_key("x-amz-date")
}

async fn put_object(
    State(bucket): State<FakeBucket>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !authorized(&bucket, &headers) {
        return StatusCode::FORBIDDEN;
    }
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    bucket.objects.lock().insert(key, (content_type, body.to_vec()));
    StatusCode::OK
}

async fn head_object(State(bucket): State<FakeBucket>, Path(key): Path<String>, headers: HeaderMap) -> StatusCode {
    if !authorized(&bucket, &headers) {
        return StatusCode::FORBIDDEN;
    }
    if bucket.objects.lock().contains_key(&key) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn delete_object(
    State(bucket): State<FakeBucket>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, &'static str) {
    if !authorized(&bucket, &headers) || key == "locked" {
        return (StatusCode::FORBIDDEN, "AccessDenied");
    }
    bucket.objects.lock().remove(&key);
    (StatusCode::NO_CONTENT, "")
}

async fn spawn_bucket() -> (FakeBucket, Url) {
    let bucket = FakeBucket::default();
    let app = Router::new()
        .route(
            "/uploads/:key",
            put(put_object).head(head_object).delete(delete_object),
        )
        .with_state(bucket.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (bucket, Url::parse(&format!("http://{addr}")).unwrap())
}

/// Wraps the real signer and counts how often each form is used.
struct CountingSigner {
    inner: SigV4Signer,
    signed: AtomicUsize,
    presigned: AtomicUsize,
}

impl RequestSigner for CountingSigner {
    fn sign_request(&self, request: &mut SignableRequest, at: DateTime<Utc>) -> StoreResult<()> {
        self.signed.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_request(request, at)
    }

    fn presign_url(&self, method: &str, url: &Url, expires_in: Duration, at: DateTime<Utc>) -> StoreResult<Url> {
        self.presigned.fetch_add(1, Ordering::SeqCst);
        self.inner.presign_url(method, url, expires_in, at)
    }
}

async fn s3_store() -> (FakeBucket, Arc<CountingSigner>, S3BlobStore) {
    let (bucket, endpoint) = spawn_bucket().await;
    let config = S3Config {
        credentials: Credentials::new("AKID", "test-secret"),
        bucket: "uploads".into(),
        region: "auto".into(),
        endpoint,
        presign_ttl: Duration::from_secs(360),
    };
    let signer = Arc::new(CountingSigner {
        inner: SigV4Signer::s3(config.credentials.clone(), config.region.clone()),
        signed: AtomicUsize::new(0),
        presigned: AtomicUsize::new(0),
    });
    let store = S3BlobStore::with_signer(&config, Client::new(), signer.clone());
    (bucket, signer, store)
}

#[tokio::test]
async fn s3_get_for_missing_key_skips_presigning() {
    let (_bucket, signer, store) = s3_store().await;

    assert_eq!(store.get("does-not-exist").await.unwrap(), None);
    assert_eq!(signer.presigned.load(Ordering::SeqCst), 0);
    // only the HEAD probe was signed
    assert_eq!(signer.signed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s3_upload_get_and_delete() {
    let (bucket, signer, store) = s3_store().await;

    let reference = store.upload(b"hello world".to_vec(), "text/plain").await.unwrap();
    {
        let objects = bucket.objects.lock();
        let (content_type, body) = objects.get(&reference).expect("object stored");
        assert_eq!(content_type, "text/plain");
        assert_eq!(body, b"hello world");
    }
    let put_auth = bucket.signed_headers.lock()[0].clone();
    assert!(put_auth.contains("SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date"));

    let url = Url::parse(&store.get(&reference).await.unwrap().unwrap()).unwrap();
    assert_eq!(signer.presigned.load(Ordering::SeqCst), 1);
    assert_eq!(url.path(), format!("/uploads/{reference}"));
    let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query["X-Amz-Expires"], "360");
    assert_eq!(query["X-Amz-SignedHeaders"], "host");
    assert_eq!(query["X-Amz-Signature"].len(), 64);

    store.delete(&reference).await.unwrap();
    assert_eq!(store.get(&reference).await.unwrap(), None);
    assert_eq!(signer.presigned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s3_failed_delete_surfaces_backend_status() {
    let (_bucket, _signer, store) = s3_store().await;
    let err = store.delete("locked").await.unwrap_err();
    match err {
        StoreError::Backend { status, body, .. } => {
            assert_eq!(status, 403);
            assert_eq!(body, "AccessDenied");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn s3_rejected_signature_is_fatal() {
    let (_bucket, endpoint) = spawn_bucket().await;
    let config = S3Config {
        credentials: Credentials::new("WRONG", "secret"),
        bucket: "uploads".into(),
        region: "auto".into(),
        endpoint,
        presign_ttl: Duration::from_secs(360),
    };
    let store = S3BlobStore::new(config).unwrap();
    let err = store.upload(b"x".to_vec(), "text/plain").await.unwrap_err();
    assert!(matches!(err, StoreError::Backend { status: 403, .. }));
    let err = store.get("anything").await.unwrap_err();
    assert!(matches!(err, StoreError::Backend { status: 403, .. }));
}
