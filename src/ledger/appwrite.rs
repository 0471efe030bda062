use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::model::*;
use super::repo::*;
use crate::config::AppwriteIds;

/// Popularity records kept as documents in an Appwrite collection.
pub struct AppwriteStore {
    client: reqwest::Client,
    documents_url: String,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<AppwriteDocument>,
}

#[derive(Debug, Deserialize)]
struct AppwriteDocument {
    #[serde(rename = "$id")]
    id: String,
    search_term: String,
    #[serde(default)]
    count: i64,
    #[serde(default)]
    movie_id: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    poster_url: Option<String>,
    #[serde(default)]
    first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
    #[serde(rename = "$createdAt", default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "$updatedAt", default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<AppwriteDocument> for PopularityRecord {
    fn from(doc: AppwriteDocument) -> Self {
        let fallback = Utc::now();
        let first_seen = doc.first_seen.or(doc.created_at).unwrap_or(fallback);
        let last_seen = doc.last_seen.or(doc.updated_at).unwrap_or(first_seen);
        PopularityRecord {
            id: doc.id,
            search_term: doc.search_term,
            count: doc.count,
            movie_id: doc.movie_id,
            title: doc.title,
            poster_url: doc.poster_url,
            first_seen,
            last_seen,
        }
    }
}

#[derive(Debug, Serialize)]
struct DocumentData<'a> {
    search_term: &'a str,
    count: i64,
    movie_id: Option<i64>,
    title: Option<&'a str>,
    poster_url: Option<&'a str>,
    first_seen: String,
    last_seen: String,
}

impl<'a> DocumentData<'a> {
    fn new(
        search_term: &'a str,
        count: i64,
        movie_id: Option<i64>,
        title: Option<&'a str>,
        poster_url: Option<&'a str>,
        (first_seen, last_seen): (&DateTime<Utc>, &DateTime<Utc>),
    ) -> Self {
        Self {
            search_term,
            count,
            movie_id,
            title,
            poster_url,
            first_seen: timestamp(first_seen),
            last_seen: timestamp(last_seen),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}

fn query(method: &str, attribute: Option<&str>, values: Option<Value>) -> String {
    let mut q = json!({ "method": method });
    if let Some(attribute) = attribute {
        q["attribute"] = json!(attribute);
    }
    if let Some(values) = values {
        q["values"] = values;
    }
    q.to_string()
}

impl AppwriteStore {
    pub fn new(ids: &AppwriteIds) -> LedgerResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Appwrite-Project",
            HeaderValue::from_str(&ids.project_id)
                .map_err(|_| LedgerError::Invalid("project id".to_string()))?,
        );
        if let Some(ref key) = ids.api_key {
            headers.insert(
                "X-Appwrite-Key",
                HeaderValue::from_str(key)
                    .map_err(|_| LedgerError::Invalid("api key".to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .default_headers(headers)
            .build()?;

        let documents_url = format!(
            "{}/databases/{}/collections/{}/documents",
            ids.endpoint,
            urlencoding::encode(&ids.database_id),
            urlencoding::encode(&ids.collection_id)
        );

        Ok(Self {
            client,
            documents_url,
        })
    }

    async fn check(response: reqwest::Response, term: &str) -> LedgerResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.message)
            .unwrap_or_default();
        match status.as_u16() {
            404 => Err(LedgerError::NotFound(message)),
            409 => Err(LedgerError::AlreadyExists(term.to_string())),
            code => Err(LedgerError::Status {
                status: code,
                message,
            }),
        }
    }

    async fn list(&self, queries: Vec<String>) -> LedgerResult<Vec<PopularityRecord>> {
        let params: Vec<(&str, String)> = queries.into_iter().map(|q| ("queries[]", q)).collect();
        debug!(url = %self.documents_url, queries = ?params, "Listing documents");

        let response = self
            .client
            .get(&self.documents_url)
            .query(&params)
            .send()
            .await?;
        let list: DocumentList = Self::check(response, "").await?.json().await?;
        Ok(list.documents.into_iter().map(PopularityRecord::from).collect())
    }
}

#[async_trait]
impl DocumentStore for AppwriteStore {
    async fn find_by_term(&self, search_term: &str) -> LedgerResult<Option<PopularityRecord>> {
        let records = self
            .list(vec![
                query("equal", Some("search_term"), Some(json!([search_term]))),
                query("limit", None, Some(json!([1]))),
            ])
            .await?;
        Ok(records.into_iter().next())
    }

    async fn create(&self, record: &NewPopularityRecord) -> LedgerResult<PopularityRecord> {
        let body = json!({
            "documentId": "unique()",
            "data": DocumentData::new(
                &record.search_term,
                record.count,
                record.movie_id,
                record.title.as_deref(),
                record.poster_url.as_deref(),
                (&record.first_seen, &record.last_seen),
            ),
        });

        let response = self
            .client
            .post(&self.documents_url)
            .json(&body)
            .send()
            .await?;
        let doc: AppwriteDocument = Self::check(response, &record.search_term)
            .await?
            .json()
            .await?;
        Ok(doc.into())
    }

    async fn update(&self, record: &PopularityRecord) -> LedgerResult<PopularityRecord> {
        let body = json!({
            "data": DocumentData::new(
                &record.search_term,
                record.count,
                record.movie_id,
                record.title.as_deref(),
                record.poster_url.as_deref(),
                (&record.first_seen, &record.last_seen),
            ),
        });

        let url = format!("{}/{}", self.documents_url, urlencoding::encode(&record.id));
        let response = self.client.patch(&url).json(&body).send().await?;
        let doc: AppwriteDocument = Self::check(response, &record.search_term)
            .await?
            .json()
            .await?;
        Ok(doc.into())
    }

    async fn list_top(&self, min_count: i64, limit: usize) -> LedgerResult<Vec<PopularityRecord>> {
        self.list(vec![
            query("greaterThan", Some("count"), Some(json!([min_count]))),
            query("orderDesc", Some("count"), None),
            query("limit", None, Some(json!([limit]))),
        ])
        .await
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: usize) -> LedgerResult<Vec<PopularityRecord>> {
        self.list(vec![
            query("lessThan", Some("last_seen"), Some(json!([timestamp(&cutoff)]))),
            query("limit", None, Some(json!([limit]))),
        ])
        .await
    }

    async fn delete(&self, id: &str) -> LedgerResult<()> {
        let url = format!("{}/{}", self.documents_url, urlencoding::encode(id));
        let response = self.client.delete(&url).send().await?;
        Self::check(response, id).await?;
        Ok(())
    }
}
