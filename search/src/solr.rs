//! Solr client.
//!
//! Talks to one core over the JSON API:
//!
//! - `GET  {core}/select` - search (`q`, `fq`, `start`, `rows`, `wt=json`)
//! - `POST {core}/update?commit=true` - add, atomic update, delete
//! - `GET  {core}/admin/ping` - liveness
//!
//! Stored fields may come back multi-valued; documents are decoded through
//! [`SearchDocument::from_value`], which takes the first element.

use crate::backend::SearchBackend;
use crate::document::{FILTER_KEYS, SearchDocument, SearchRequest};
use crate::error::SearchError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Default timeout for Solr calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Query fields and their boosts.
const QUERY_FIELDS: &[(&str, Option<u8>)] = &[
    ("titulo", Some(2)),
    ("descripcion", None),
    ("categoria", None),
    ("instructor", None),
    ("dia", None),
];

#[derive(Debug, Deserialize)]
struct SelectResponse {
    response: SelectBody,
}

#[derive(Debug, Deserialize)]
struct SelectBody {
    #[serde(rename = "numFound")]
    num_found: i64,
    #[serde(default)]
    docs: Vec<Value>,
}

/// HTTP client for one Solr core.
#[derive(Debug, Clone)]
pub struct SolrClient {
    client: reqwest::Client,
    base_url: String,
}

impl SolrClient {
    /// Client for a core URL such as `http://localhost:8983/solr/gym_activities`.
    ///
    /// # Errors
    ///
    /// [`SearchError::Backend`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Backend(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn update(&self, body: &Value) -> Result<(), SearchError> {
        let response = self
            .client
            .post(format!("{}/update?commit=true", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| SearchError::Backend(format!("update request failed: {e}")))?;
        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Backend(format!("solr returned status {status}: {body}")))
}

/// Escape Lucene syntax in one word so it is matched literally.
fn escape(word: &str) -> String {
    if matches!(word, "AND" | "OR" | "NOT") {
        return format!("\"{word}\"");
    }
    let mut escaped = String::with_capacity(word.len());
    for c in word.chars() {
        if "+-&|!(){}[]^\"~*?:\\/".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// User text as a group of escaped words, any of which may match.
fn terms(query: &str) -> String {
    let words: Vec<String> = query.split_whitespace().map(escape).collect();
    format!("({})", words.join(" "))
}

/// Solr query parameters for `request`.
fn select_params(request: &SearchRequest) -> Vec<(&'static str, String)> {
    let query = request.query.trim();
    let q = if query.is_empty() {
        "*:*".to_string()
    } else {
        let term = terms(query);
        QUERY_FIELDS
            .iter()
            .map(|(field, boost)| match boost {
                Some(boost) => format!("{field}:{term}^{boost}"),
                None => format!("{field}:{term}"),
            })
            .collect::<Vec<_>>()
            .join(" OR ")
    };

    let mut params = vec![("q", q)];
    if !request.kind.is_empty() {
        params.push(("fq", format!("type:\"{}\"", request.kind.replace('"', "\\\""))));
    }
    for (key, value) in &request.filters {
        if FILTER_KEYS.contains(&key.as_str()) {
            params.push(("fq", format!("{key}:\"{}\"", value.replace('"', "\\\""))));
        } else {
            tracing::debug!(filter = %key, "Ignoring unknown filter");
        }
    }
    params.push(("start", request.offset().to_string()));
    params.push(("rows", request.limit().to_string()));
    params.push(("wt", "json".to_string()));
    params
}

#[async_trait]
impl SearchBackend for SolrClient {
    async fn ping(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .get(format!("{}/admin/ping", self.base_url))
            .send()
            .await
            .map_err(|e| SearchError::Backend(format!("ping failed: {e}")))?;
        check_status(response).await.map(|_| ())
    }

    async fn search(&self, request: &SearchRequest) -> Result<(Vec<SearchDocument>, i64), SearchError> {
        let response = self
            .client
            .get(format!("{}/select", self.base_url))
            .query(&select_params(request))
            .send()
            .await
            .map_err(|e| SearchError::Backend(format!("search request failed: {e}")))?;

        let body: SelectResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SearchError::Backend(format!("undecodable search response: {e}")))?;

        let documents = body
            .response
            .docs
            .iter()
            .filter_map(SearchDocument::from_value)
            .collect();
        Ok((documents, body.response.num_found))
    }

    async fn index(&self, documents: &[SearchDocument]) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(documents)
            .map_err(|e| SearchError::Backend(format!("failed to encode documents: {e}")))?;
        self.update(&body).await?;
        tracing::debug!(count = documents.len(), "Indexed documents in Solr");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SearchError> {
        self.update(&json!({ "delete": { "id": id } })).await
    }

    async fn set_seats(&self, id: &str, seats: i64) -> Result<(), SearchError> {
        self.update(&json!([{ "id": id, "cupo_disponible": { "set": seats } }]))
            .await
    }
}
