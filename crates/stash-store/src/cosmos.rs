//! Record store backed by a Cosmos DB (SQL API) container over its REST API.
//!
//! Records share one logical partition of a container partitioned on `/pk`.
//! Ordering and name search compile to native SQL (`ORDER BY`,
//! `CONTAINS(..., true)`), and the total count comes from a second `COUNT`
//! query issued alongside the page query, so the two may disagree under
//! concurrent writes.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{header::HeaderMap, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::CosmosConfig;
use crate::error::{StoreError, StoreResult};
use crate::http::expect_success;
use crate::model::{NewRecord, Page, PageRequest, Record, RecordOrder, RecordPatch};
use crate::records::RecordStore;
use crate::sigv4::uri_encode;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";

/// Partition key path the container must be created with.
pub const PARTITION_KEY_PATH: &str = "/pk";
const PARTITION_KEY_VALUE: &str = "record";

/// SQL text plus named parameters for a query request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SqlQuery {
    pub query: String,
    pub parameters: Vec<SqlParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SqlParameter {
    pub name: &'static str,
    pub value: Value,
}

impl SqlQuery {
    fn new(query: String) -> Self {
        Self {
            query,
            parameters: Vec::new(),
        }
    }

    fn bind(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.parameters.push(SqlParameter {
            name,
            value: value.into(),
        });
        self
    }
}

const NAME_FILTER: &str = " WHERE CONTAINS(c.name, @term, true)";

fn order_clause(order: RecordOrder) -> &'static str {
    match order {
        RecordOrder::NewestFirst => " ORDER BY c.uploadedAt DESC",
        RecordOrder::DownloadsFirst => " ORDER BY c.downloadCount DESC",
        RecordOrder::Unordered => "",
    }
}

pub(crate) fn list_query(order: RecordOrder, offset: usize, limit: usize) -> SqlQuery {
    SqlQuery::new(format!(
        "SELECT * FROM c{} OFFSET @offset LIMIT @limit",
        order_clause(order)
    ))
    .bind("@offset", offset)
    .bind("@limit", limit)
}

pub(crate) fn name_query(term: &str, offset: usize, limit: usize) -> SqlQuery {
    SqlQuery::new(format!("SELECT * FROM c{NAME_FILTER} OFFSET @offset LIMIT @limit"))
        .bind("@term", term)
        .bind("@offset", offset)
        .bind("@limit", limit)
}

pub(crate) fn count_query(term: Option<&str>) -> SqlQuery {
    match term {
        Some(term) => {
            SqlQuery::new(format!("SELECT VALUE COUNT(1) FROM c{NAME_FILTER}")).bind("@term", term)
        }
        None => SqlQuery::new("SELECT VALUE COUNT(1) FROM c".to_string()),
    }
}

/// Patch operations for a typed partial update.
pub(crate) fn patch_operations(patch: &RecordPatch) -> Vec<Value> {
    let mut ops = Vec::new();
    let mut set = |path: &str, value: Value| ops.push(json!({"op": "set", "path": path, "value": value}));
    if let Some(name) = &patch.name {
        set("/name", json!(name));
    }
    if let Some(author) = &patch.author {
        set("/author", json!(author));
    }
    if let Some(count) = patch.download_count {
        set("/downloadCount", json!(count));
    }
    if let Some(encrypted) = patch.encrypted {
        set("/encrypted", json!(encrypted));
    }
    if let Some(reference) = &patch.additional_data {
        set("/additionalData", json!(reference));
    }
    ops
}

/// Builds the master-key authorization token for one request.
pub(crate) fn master_key_token(
    key: &[u8],
    verb: &str,
    resource_type: &str,
    resource_link: &str,
    date: &str,
) -> StoreResult<String> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| StoreError::Signing(format!("invalid account key: {err}")))?;
    mac.update(payload.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    Ok(uri_encode(format!("type=master&ver=1.0&sig={signature}").as_bytes()))
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    #[serde(rename = "Documents")]
    documents: Vec<T>,
}

/// Document body written on create: the record plus its partition key.
#[derive(Serialize)]
struct StoredDocument<'a> {
    #[serde(flatten)]
    record: &'a Record,
    pk: &'static str,
}

/// Characters Cosmos refuses in document ids. Such ids can never name a
/// stored record.
fn is_addressable(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\', '?', '#'])
}

fn partition_key_header() -> String {
    json!([PARTITION_KEY_VALUE]).to_string()
}

/// Cosmos DB record store.
///
/// The container must be partitioned on [`PARTITION_KEY_PATH`]. Every record
/// is written to the same logical partition, so ordered, paged and aggregate
/// queries run as single-partition queries the gateway can serve directly.
#[derive(Debug, Clone)]
pub struct CosmosRecordStore {
    client: Client,
    config: CosmosConfig,
}

impl CosmosRecordStore {
    pub fn new(config: CosmosConfig) -> StoreResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: CosmosConfig) -> Self {
        Self { client, config }
    }

    fn collection_link(&self) -> String {
        format!("dbs/{}/colls/{}", self.config.database, self.config.container)
    }

    fn document_link(&self, id: &str) -> String {
        format!("{}/docs/{id}", self.collection_link())
    }

    /// Endpoint plus `dbs/{db}/colls/{container}/docs`, then `extra` segments,
    /// each percent-encoded on its own.
    fn docs_url(&self, extra: Option<&str>) -> StoreResult<Url> {
        let mut url = self.config.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::misconfigured("endpoint", "cannot carry a path"))?;
            segments.pop_if_empty().extend([
                "dbs",
                self.config.database.as_str(),
                "colls",
                self.config.container.as_str(),
                "docs",
            ]);
            if let Some(id) = extra {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Starts an authorized request scoped to the record partition.
    /// `resource_link` is the link that gets signed.
    fn request(&self, method: Method, resource_link: &str, url: Url) -> StoreResult<RequestBuilder> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let token = master_key_token(
            &self.config.account_key,
            method.as_str(),
            "docs",
            resource_link,
            &date,
        )?;
        Ok(self
            .client
            .request(method, url)
            .header("authorization", token)
            .header("x-ms-date", date)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-documentdb-partitionkey", partition_key_header()))
    }

    fn item_request(&self, method: Method, id: &str) -> StoreResult<RequestBuilder> {
        self.request(method, &self.document_link(id), self.docs_url(Some(id))?)
    }

    /// Runs a query inside the record partition, following continuation tokens.
    async fn query<T: DeserializeOwned>(&self, query: &SqlQuery) -> StoreResult<Vec<T>> {
        let link = self.collection_link();
        let body = serde_json::to_vec(query)?;
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .request(Method::POST, &link, self.docs_url(None)?)?
                .header("content-type", "application/query+json")
                .header("x-ms-documentdb-isquery", "True");
            if let Some(token) = &continuation {
                request = request.header("x-ms-continuation", token.as_str());
            }

            let response = expect_success(request.body(body.clone()).send().await?, "cosmos query").await?;
            continuation = continuation_token(response.headers());
            let page: QueryResponse<T> = response.json().await?;
            out.extend(page.documents);

            if continuation.is_none() {
                return Ok(out);
            }
        }
    }

    async fn paged(&self, page_query: SqlQuery, count: SqlQuery, offset: usize) -> StoreResult<Page<Record>> {
        let (items, counts) = futures::try_join!(self.query::<Record>(&page_query), self.query::<u64>(&count))?;
        let total_count = counts.first().copied().unwrap_or_default();
        Ok(Page::new(items, total_count, offset))
    }

    async fn patch_document(&self, id: &str, body: &Value) -> StoreResult<Response> {
        let response = self
            .item_request(Method::PATCH, id)?
            .header("content-type", "application/json_patch+json")
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl RecordStore for CosmosRecordStore {
    fn backend(&self) -> &'static str {
        "cosmos"
    }

    #[instrument(skip(self), fields(backend = "cosmos"))]
    async fn get(&self, id: &str) -> StoreResult<Option<Record>> {
        if !is_addressable(id) {
            return Ok(None);
        }
        let response = self.item_request(Method::GET, id)?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success(response, "cosmos read").await?;
        Ok(Some(response.json().await?))
    }

    #[instrument(skip(self, page), fields(backend = "cosmos"))]
    async fn query_by_name(&self, term: &str, page: &PageRequest) -> StoreResult<Page<Record>> {
        let (offset, limit) = page.window()?;
        self.paged(name_query(term, offset, limit), count_query(Some(term)), offset)
            .await
    }

    #[instrument(skip(self, page), fields(backend = "cosmos", order = order.as_str()))]
    async fn list(&self, order: RecordOrder, page: &PageRequest) -> StoreResult<Page<Record>> {
        let (offset, limit) = page.window()?;
        self.paged(list_query(order, offset, limit), count_query(None), offset)
            .await
    }

    #[instrument(skip(self, record), fields(backend = "cosmos"))]
    async fn put(&self, record: NewRecord) -> StoreResult<Record> {
        let record = record.into_record(Uuid::new_v4().to_string());
        let document = StoredDocument {
            record: &record,
            pk: PARTITION_KEY_VALUE,
        };
        let request = self
            .request(Method::POST, &self.collection_link(), self.docs_url(None)?)?
            .json(&document);
        expect_success(request.send().await?, "cosmos create").await?;
        debug!(id = %record.id, "cosmos record created");
        Ok(record)
    }

    #[instrument(skip(self, patch), fields(backend = "cosmos", id = %patch.id))]
    async fn update(&self, patch: RecordPatch) -> StoreResult<Record> {
        if !is_addressable(&patch.id) {
            return Err(StoreError::NotFound(patch.id));
        }
        if patch.is_empty() {
            return self
                .get(&patch.id)
                .await?
                .ok_or_else(|| StoreError::NotFound(patch.id.clone()));
        }

        let mut body = json!({ "operations": patch_operations(&patch) });
        if let Some(count) = patch.download_count {
            body["condition"] = json!(format!("FROM c WHERE c.downloadCount <= {count}"));
        }

        let response = self.patch_document(&patch.id, &body).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(patch.id.clone())),
            StatusCode::PRECONDITION_FAILED => Err(StoreError::InvalidUpdate {
                id: patch.id.clone(),
                reason: "downloadCount cannot decrease".to_string(),
            }),
            _ => Ok(expect_success(response, "cosmos patch").await?.json().await?),
        }
    }

    #[instrument(skip(self), fields(backend = "cosmos"))]
    async fn bump_download_count(&self, id: &str) -> StoreResult<()> {
        if !is_addressable(id) {
            return Ok(());
        }
        let body = json!({
            "operations": [{"op": "incr", "path": "/downloadCount", "value": 1}]
        });
        let response = self.patch_document(id, &body).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("bump skipped, record absent");
            return Ok(());
        }
        expect_success(response, "cosmos increment").await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "cosmos"))]
    async fn delete(&self, id: &str) -> StoreResult<()> {
        if !is_addressable(id) {
            return Ok(());
        }
        let response = self.item_request(Method::DELETE, id)?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response, "cosmos delete").await?;
        Ok(())
    }
}

fn continuation_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-ms-continuation")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
