//! Record shape, pagination and ordering shared by all record backends.

use std::{convert::Infallible, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A stored record as exchanged with the route layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    pub name: String,
    pub author: String,
    pub download_count: u64,
    pub encrypted: bool,
    /// Blob reference issued by the blob store that was active when it was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<String>,
    #[serde(with = "timestamp")]
    pub uploaded_at: DateTime<Utc>,
}

/// Input for [`crate::RecordStore::put`]. Any id the caller sends is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<String>,
    #[serde(with = "timestamp", default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}

impl NewRecord {
    pub fn new(name: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: author.into(),
            download_count: 0,
            encrypted: false,
            additional_data: None,
            uploaded_at: Utc::now(),
        }
    }

    /// Binds the record to a freshly generated id; every other field is kept as is.
    pub(crate) fn into_record(self, id: String) -> Record {
        Record {
            id,
            name: self.name,
            author: self.author,
            download_count: self.download_count,
            encrypted: self.encrypted,
            additional_data: self.additional_data,
            uploaded_at: self.uploaded_at,
        }
    }
}

/// Typed partial update merged into an existing record by id.
///
/// Unknown fields are rejected when decoding, and `id`/`uploadedAt` can never
/// be changed through a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<String>,
}

impl RecordPatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn download_count(mut self, count: u64) -> Self {
        self.download_count = Some(count);
        self
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = Some(encrypted);
        self
    }

    pub fn additional_data(mut self, reference: impl Into<String>) -> Self {
        self.additional_data = Some(reference.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.author.is_none()
            && self.download_count.is_none()
            && self.encrypted.is_none()
            && self.additional_data.is_none()
    }

    /// Validates the patch against the stored record, then merges it in place.
    pub(crate) fn apply(&self, record: &mut Record) -> StoreResult<()> {
        if let Some(count) = self.download_count {
            if count < record.download_count {
                return Err(StoreError::InvalidUpdate {
                    id: self.id.clone(),
                    reason: format!(
                        "downloadCount cannot decrease ({} -> {})",
                        record.download_count, count
                    ),
                });
            }
        }

        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(author) = &self.author {
            record.author = author.clone();
        }
        if let Some(count) = self.download_count {
            record.download_count = count;
        }
        if let Some(encrypted) = self.encrypted {
            record.encrypted = encrypted;
        }
        if let Some(reference) = &self.additional_data {
            record.additional_data = Some(reference.clone());
        }
        Ok(())
    }
}

/// Ordering applied by [`crate::RecordStore::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordOrder {
    /// Descending by `uploadedAt`.
    NewestFirst,
    /// Descending by `downloadCount`.
    DownloadsFirst,
    /// Backend-defined; insertion order for the in-memory store.
    #[default]
    #[serde(other)]
    Unordered,
}

impl RecordOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrder::NewestFirst => "NewestFirst",
            RecordOrder::DownloadsFirst => "DownloadsFirst",
            RecordOrder::Unordered => "Unordered",
        }
    }

    /// Lenient parse: anything unrecognized (including `None`) is `Unordered`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("NewestFirst") => RecordOrder::NewestFirst,
            Some("DownloadsFirst") => RecordOrder::DownloadsFirst,
            _ => RecordOrder::Unordered,
        }
    }
}

impl FromStr for RecordOrder {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RecordOrder::parse(Some(s)))
    }
}

/// Page request. An absent or empty token means the first page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self {
            limit,
            page_token: None,
        }
    }

    pub fn with_token(limit: u32, token: impl Into<String>) -> Self {
        Self {
            limit,
            page_token: Some(token.into()),
        }
    }

    /// Resolves the request into `(offset, limit)`.
    pub(crate) fn window(&self) -> StoreResult<(usize, usize)> {
        if self.limit == 0 {
            return Err(StoreError::InvalidPageRequest(
                "limit must be a positive integer".to_string(),
            ));
        }
        let offset = decode_page_token(self.page_token.as_deref())?;
        Ok((offset, self.limit as usize))
    }
}

/// One page of results plus the size of the full matching set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    /// Token for the following page; absent on the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub(crate) fn new(items: Vec<T>, total_count: u64, offset: usize) -> Self {
        let consumed = (offset + items.len()) as u64;
        let next_page_token = (!items.is_empty() && consumed < total_count)
            .then(|| encode_page_token(offset + items.len()));
        Self {
            items,
            total_count,
            next_page_token,
        }
    }
}

/// Slices an already ordered result set into one page.
pub(crate) fn paginate<T>(ordered: Vec<T>, request: &PageRequest) -> StoreResult<Page<T>> {
    let (offset, limit) = request.window()?;
    let total = ordered.len() as u64;
    let items: Vec<T> = ordered.into_iter().skip(offset).take(limit).collect();
    Ok(Page::new(items, total, offset))
}

pub(crate) fn encode_page_token(offset: usize) -> String {
    offset.to_string()
}

pub(crate) fn decode_page_token(token: Option<&str>) -> StoreResult<usize> {
    match token.map(str::trim) {
        None | Some("") => Ok(0),
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| StoreError::InvalidPageToken(raw.to_string())),
    }
}

/// Case-insensitive substring match used by every backend's name search.
pub(crate) fn name_matches(name: &str, term: &str) -> bool {
    name.to_lowercase().contains(&term.to_lowercase())
}

/// Fixed-width RFC 3339 timestamps (nanosecond precision) so documents sort
/// correctly as strings.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
