//! AWS Signature Version 4 for S3-compatible object stores.
//!
//! Two forms are supported: header signing (`Authorization` header) for
//! PUT/DELETE/HEAD and presigned query-string URLs for GET.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// Longest lifetime S3 accepts for a presigned URL (7 days).
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Headers never folded into a signature. Conditional headers stay out so an
/// object changing between signing and fetch cannot break the signature.
const UNSIGNED_HEADERS: &[&str] = &[
    "authorization",
    "user-agent",
    "content-length",
    "expect",
    "if-match",
    "if-none-match",
    "if-modified-since",
    "if-unmodified-since",
];

/// Long-lived access key pair.
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// A request about to be sent, in the shape the signer needs.
#[derive(Debug, Clone)]
pub struct SignableRequest {
    pub method: String,
    pub url: Url,
    /// Lowercased header names.
    pub headers: BTreeMap<String, String>,
    /// Hex SHA-256 of the body.
    pub payload_sha256: String,
}

impl SignableRequest {
    pub fn new(method: &str, url: Url, payload: &[u8]) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: BTreeMap::new(),
            payload_sha256: sha256_hex(payload),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

/// Request signing seam used by the S3 blob store.
pub trait RequestSigner: Send + Sync {
    /// Adds `x-amz-date`, `x-amz-content-sha256`, `host` and `authorization`
    /// headers to `request`.
    fn sign_request(&self, request: &mut SignableRequest, at: DateTime<Utc>) -> StoreResult<()>;

    /// Returns `url` with a query-string signature valid for `expires_in`.
    fn presign_url(
        &self,
        method: &str,
        url: &Url,
        expires_in: Duration,
        at: DateTime<Utc>,
    ) -> StoreResult<Url>;
}

/// SigV4 signer scoped to one region and service.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    pub fn new(credentials: Credentials, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn s3(credentials: Credentials, region: impl Into<String>) -> Self {
        Self::new(credentials, region, "s3")
    }

    fn scope(&self, date_stamp: &str) -> String {
        format!("{date_stamp}/{}/{}/aws4_request", self.region, self.service)
    }

    fn signing_key(&self, date_stamp: &str) -> StoreResult<Vec<u8>> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }

    fn signature(&self, canonical_request: &str, amz_date: &str, date_stamp: &str) -> StoreResult<String> {
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{}\n{}",
            self.scope(date_stamp),
            sha256_hex(canonical_request.as_bytes())
        );
        let key = self.signing_key(date_stamp)?;
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }
}

impl RequestSigner for SigV4Signer {
    fn sign_request(&self, request: &mut SignableRequest, at: DateTime<Utc>) -> StoreResult<()> {
        let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = at.format("%Y%m%d").to_string();

        request.headers.insert("host".into(), host_header(&request.url)?);
        request.headers.insert("x-amz-date".into(), amz_date.clone());
        request
            .headers
            .insert("x-amz-content-sha256".into(), request.payload_sha256.clone());

        let signed: Vec<(&String, &String)> = request
            .headers
            .iter()
            .filter(|(name, _)| !UNSIGNED_HEADERS.contains(&name.as_str()))
            .collect();
        let signed_headers = signed
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = signed
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", normalize_header_value(value)))
            .collect();

        let query: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method,
            canonical_uri(&request.url),
            canonical_query(&query),
            canonical_headers,
            signed_headers,
            request.payload_sha256
        );

        let signature = self.signature(&canonical_request, &amz_date, &date_stamp)?;
        request.headers.insert(
            "authorization".into(),
            format!(
                "{ALGORITHM} Credential={}/{}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id,
                self.scope(&date_stamp)
            ),
        );
        Ok(())
    }

    fn presign_url(
        &self,
        method: &str,
        url: &Url,
        expires_in: Duration,
        at: DateTime<Utc>,
    ) -> StoreResult<Url> {
        if expires_in.is_zero() || expires_in > MAX_PRESIGN_EXPIRY {
            return Err(StoreError::Signing(format!(
                "presign expiry must be between 1 and {} seconds, got {}",
                MAX_PRESIGN_EXPIRY.as_secs(),
                expires_in.as_secs()
            )));
        }

        let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = at.format("%Y%m%d").to_string();
        let host = host_header(url)?;

        let mut query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        query.extend([
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.credentials.access_key_id, self.scope(&date_stamp)),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires_in.as_secs().to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ]);
        let canonical_query = canonical_query(&query);

        let canonical_request = format!(
            "{}\n{}\n{canonical_query}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}",
            method.to_ascii_uppercase(),
            canonical_uri(url),
        );
        let signature = self.signature(&canonical_request, &amz_date, &date_stamp)?;

        let mut presigned = url.clone();
        presigned.set_query(Some(&format!("{canonical_query}&X-Amz-Signature={signature}")));
        Ok(presigned)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> StoreResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| StoreError::Signing(format!("invalid HMAC key: {err}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn host_header(url: &Url) -> StoreResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| StoreError::Signing(format!("url '{url}' has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Path segments decoded and re-encoded with the SigV4 unreserved set.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| uri_encode(&percent_decode_str(segment).collect::<Vec<u8>>()))
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(key, value)| (uri_encode(key.as_bytes()), uri_encode(value.as_bytes())))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Everything except the SigV4 unreserved characters gets escaped.
const SIGV4_ESCAPED: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

pub(crate) fn uri_encode(bytes: &[u8]) -> String {
    percent_encode(bytes, SIGV4_ESCAPED).to_string()
}
