//! Storage configuration and backend selection.
//!
//! Selection is a pure function of the settings present at process start:
//! document-database credentials pick the Cosmos record store, object-store
//! credentials pick the S3 blob store, and anything else falls back to the
//! in-memory backends. Once a backend is picked every one of its settings is
//! required.

use std::{env, fmt, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Url;

use crate::error::{StoreError, StoreResult};
use crate::sigv4::{Credentials, MAX_PRESIGN_EXPIRY};

pub const COSMOS_CONNECTION_STRING: &str = "STASH_COSMOS_CONNECTION_STRING";
pub const COSMOS_DATABASE: &str = "STASH_COSMOS_DATABASE";
pub const COSMOS_CONTAINER: &str = "STASH_COSMOS_CONTAINER";
pub const S3_ACCESS_KEY_ID: &str = "STASH_S3_ACCESS_KEY_ID";
pub const S3_SECRET_ACCESS_KEY: &str = "STASH_S3_SECRET_ACCESS_KEY";
pub const S3_BUCKET: &str = "STASH_S3_BUCKET";
pub const S3_REGION: &str = "STASH_S3_REGION";
pub const S3_ENDPOINT: &str = "STASH_S3_ENDPOINT";
pub const S3_PRESIGN_TTL_SECONDS: &str = "STASH_S3_PRESIGN_TTL_SECONDS";

/// Lifetime of presigned GET URLs unless overridden.
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(360);

/// Resolved configuration for both store types.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub records: RecordBackendConfig,
    pub blobs: BlobBackendConfig,
}

#[derive(Debug, Clone)]
pub enum RecordBackendConfig {
    Memory,
    Cosmos(CosmosConfig),
}

#[derive(Debug, Clone)]
pub enum BlobBackendConfig {
    Memory,
    S3(S3Config),
}

/// Document database account and container.
#[derive(Clone)]
pub struct CosmosConfig {
    pub endpoint: Url,
    /// Decoded master key.
    pub account_key: Vec<u8>,
    pub database: String,
    pub container: String,
}

impl fmt::Debug for CosmosConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosmosConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("account_key", &"<redacted>")
            .field("database", &self.database)
            .field("container", &self.container)
            .finish()
    }
}

/// S3-compatible bucket settings. Objects are addressed path-style:
/// `{endpoint}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub credentials: Credentials,
    pub bucket: String,
    pub region: String,
    pub endpoint: Url,
    pub presign_ttl: Duration,
}

impl StorageConfig {
    /// Both stores in memory.
    pub fn in_memory() -> Self {
        Self {
            records: RecordBackendConfig::Memory,
            blobs: BlobBackendConfig::Memory,
        }
    }

    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Blank values
    /// count as absent.
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| StoreError::misconfigured(key, "is required by the selected backend"))
        };

        let records = match get(COSMOS_CONNECTION_STRING) {
            Some(connection_string) => {
                let (endpoint, account_key) = parse_connection_string(&connection_string)?;
                RecordBackendConfig::Cosmos(CosmosConfig {
                    endpoint,
                    account_key,
                    database: require(COSMOS_DATABASE)?,
                    container: require(COSMOS_CONTAINER)?,
                })
            }
            None => RecordBackendConfig::Memory,
        };

        let blobs = if get(S3_ACCESS_KEY_ID).is_some() || get(S3_SECRET_ACCESS_KEY).is_some() {
            let presign_ttl = match get(S3_PRESIGN_TTL_SECONDS) {
                Some(raw) => parse_presign_ttl(&raw)?,
                None => DEFAULT_PRESIGN_TTL,
            };
            BlobBackendConfig::S3(S3Config {
                credentials: Credentials::new(require(S3_ACCESS_KEY_ID)?, require(S3_SECRET_ACCESS_KEY)?),
                bucket: require(S3_BUCKET)?,
                region: require(S3_REGION)?,
                endpoint: parse_endpoint(&require(S3_ENDPOINT)?)?,
                presign_ttl,
            })
        } else {
            BlobBackendConfig::Memory
        };

        Ok(Self { records, blobs })
    }
}

/// Parses `AccountEndpoint=...;AccountKey=...;` into endpoint and decoded key.
fn parse_connection_string(raw: &str) -> StoreResult<(Url, Vec<u8>)> {
    let mut endpoint = None;
    let mut key = None;
    for part in raw.split(';').map(str::trim).filter(|part| !part.is_empty()) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if name.eq_ignore_ascii_case("AccountEndpoint") {
            endpoint = Some(value.trim());
        } else if name.eq_ignore_ascii_case("AccountKey") {
            key = Some(value.trim());
        }
    }

    let endpoint = endpoint
        .ok_or_else(|| StoreError::misconfigured(COSMOS_CONNECTION_STRING, "lacks AccountEndpoint"))?;
    let endpoint = Url::parse(endpoint)
        .map_err(|err| StoreError::misconfigured(COSMOS_CONNECTION_STRING, format!("has invalid AccountEndpoint: {err}")))?;
    let key = key.ok_or_else(|| StoreError::misconfigured(COSMOS_CONNECTION_STRING, "lacks AccountKey"))?;
    let key = STANDARD
        .decode(key)
        .map_err(|err| StoreError::misconfigured(COSMOS_CONNECTION_STRING, format!("has non-base64 AccountKey: {err}")))?;
    Ok((endpoint, key))
}

/// Accepts a bare host (`s3.example.com`, https implied) or a full URL.
fn parse_endpoint(raw: &str) -> StoreResult<Url> {
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|err| StoreError::misconfigured(S3_ENDPOINT, format!("is not a valid host: {err}")))?;
    if url.host_str().is_none() {
        return Err(StoreError::misconfigured(S3_ENDPOINT, "has no host"));
    }
    Ok(url)
}

fn parse_presign_ttl(raw: &str) -> StoreResult<Duration> {
    let seconds: u64 = raw
        .parse()
        .map_err(|_| StoreError::misconfigured(S3_PRESIGN_TTL_SECONDS, format!("'{raw}' is not a whole number of seconds")))?;
    let ttl = Duration::from_secs(seconds);
    if ttl.is_zero() || ttl > MAX_PRESIGN_EXPIRY {
        return Err(StoreError::misconfigured(
            S3_PRESIGN_TTL_SECONDS,
            format!("must be between 1 and {}", MAX_PRESIGN_EXPIRY.as_secs()),
        ));
    }
    Ok(ttl)
}
