//! Blob store backed by an S3-compatible bucket.
//!
//! PUT, HEAD and DELETE are signed with SigV4 headers. Reads are handed out as
//! presigned GET URLs, issued only after a HEAD probe confirms the object
//! exists.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode, Url};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::blobs::BlobStore;
use crate::config::S3Config;
use crate::error::{StoreError, StoreResult};
use crate::http::expect_success;
use crate::sigv4::{RequestSigner, SigV4Signer, SignableRequest};

pub struct S3BlobStore {
    client: Client,
    signer: Arc<dyn RequestSigner>,
    endpoint: Url,
    bucket: String,
    presign_ttl: Duration,
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("presign_ttl", &self.presign_ttl)
            .finish_non_exhaustive()
    }
}

impl S3BlobStore {
    pub fn new(config: S3Config) -> StoreResult<Self> {
        let client = Client::builder().build()?;
        let signer = Arc::new(SigV4Signer::s3(config.credentials.clone(), config.region.clone()));
        Ok(Self::with_signer(&config, client, signer))
    }

    /// Builds the store around an explicit client and signer.
    pub fn with_signer(config: &S3Config, client: Client, signer: Arc<dyn RequestSigner>) -> Self {
        Self {
            client,
            signer,
            endpoint: config.endpoint.clone(),
            bucket: config.bucket.clone(),
            presign_ttl: config.presign_ttl,
        }
    }

    /// Path-style object URL; the key is percent-encoded as a single segment.
    fn object_url(&self, key: &str) -> StoreResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::misconfigured("endpoint", "cannot carry a path"))?
            .pop_if_empty()
            .push(&self.bucket)
            .push(key);
        Ok(url)
    }

    async fn send_signed(&self, mut request: SignableRequest, body: Vec<u8>) -> StoreResult<reqwest::Response> {
        self.signer.sign_request(&mut request, Utc::now())?;

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|err| StoreError::Signing(format!("invalid method: {err}")))?;
        let mut builder = self.client.request(method, request.url);
        for (name, value) in &request.headers {
            // the client derives Host from the URL itself
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }
        Ok(builder.send().await?)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, bytes), fields(backend = "s3", size = bytes.len()))]
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> StoreResult<String> {
        let key = Uuid::new_v4().to_string();
        let request = SignableRequest::new("PUT", self.object_url(&key)?, &bytes)
            .header("content-type", content_type);
        expect_success(self.send_signed(request, bytes).await?, "s3 put").await?;
        debug!(%key, "object uploaded");
        Ok(key)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, reference: &str) -> StoreResult<Option<String>> {
        if !self.exists(reference).await? {
            return Ok(None);
        }
        let url = self
            .signer
            .presign_url("GET", &self.object_url(reference)?, self.presign_ttl, Utc::now())?;
        Ok(Some(url.to_string()))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, reference: &str) -> StoreResult<bool> {
        if reference.is_empty() {
            return Ok(false);
        }
        let request = SignableRequest::new("HEAD", self.object_url(reference)?, b"");
        let response = self.send_signed(request, Vec::new()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response, "s3 head").await?;
        Ok(true)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, reference: &str) -> StoreResult<()> {
        if reference.is_empty() {
            return Ok(());
        }
        let request = SignableRequest::new("DELETE", self.object_url(reference)?, b"");
        expect_success(self.send_signed(request, Vec::new()).await?, "s3 delete").await?;
        Ok(())
    }
}
