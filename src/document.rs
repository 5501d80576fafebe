use crate::codec::EncodedLog;
use crate::config::ConnectionConfig;
use crate::error::StoreError;
use crate::store::{LogStore, RecordId, StoredRow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::future::Future;

/// Documents requested per `_search` page; the default `max_result_window`.
const PAGE_SIZE: u64 = 10_000;

/// Document store backed by an OpenSearch-compatible REST API.
///
/// Each record is one document in the bound index; the index name is the
/// resolved collection. Writes and deletes ask for a refresh so that counts
/// and searches issued right after them observe the change.
#[derive(Clone)]
pub struct DocumentStore {
    client: Client,
    /// Base URL of the cluster, e.g. "http://localhost:9200".
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    connection: String,
    index: String,
}

impl DocumentStore {
    /// Create an unbound store for `config`; call [`DocumentStore::bind`]
    /// before use.
    pub fn new(config: &ConnectionConfig) -> Self {
        DocumentStore {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            connection: String::new(),
            index: String::new(),
        }
    }

    /// Attach the connection name and target index.
    pub fn bind(&mut self, connection: &str, index: &str) {
        self.connection = connection.to_string();
        self.index = index.to_string();
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            urlencoding::encode(&self.index),
            path
        )
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, StoreError> {
        let resp = self.authed(request).send().await?;
        read_json(resp).await
    }

    /// Run `query` newest first, paging until `limit` rows (or every match
    /// when `None`) have been read.
    async fn search(&self, query: Option<Value>, limit: Option<u64>) -> Result<Vec<StoredRow>, StoreError> {
        collect_pages(
            |body| self.send_json(self.client.post(self.url("_search")).json(&body)),
            query.as_ref(),
            limit,
            PAGE_SIZE,
        )
        .await
    }

    async fn delete_by_query(&self, query: Value) -> Result<u64, StoreError> {
        let resp = self
            .send_json(
                self.client
                    .post(self.url("_delete_by_query?refresh=true&conflicts=proceed"))
                    .json(&json!({ "query": query })),
            )
            .await?;
        resp.get("deleted")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::UnexpectedResponse(resp.to_string()))
    }
}

async fn read_json(resp: Response) -> Result<Value, StoreError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp.json::<Value>().await?)
    } else {
        let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn doc_ids(ids: &[RecordId]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

/// One `_search` page, newest first. `_id` breaks `unix_time` ties so
/// `search_after` never skips or repeats a document.
pub(crate) fn page_body(query: Option<&Value>, size: u64, after: Option<&Value>) -> Value {
    let mut body = json!({
        "size": size,
        "sort": [
            { "unix_time": { "order": "desc" } },
            { "_id": { "order": "asc" } }
        ],
    });
    if let Some(query) = query {
        body["query"] = query.clone();
    }
    if let Some(after) = after {
        body["search_after"] = after.clone();
    }
    body
}

pub(crate) fn unix_time_at_most_query(cutoff: i64) -> Value {
    json!({ "range": { "unix_time": { "lte": cutoff } } })
}

/// Sort values of the last hit, the cursor for the next page.
fn last_sort(resp: &Value) -> Option<Value> {
    resp.pointer("/hits/hits")
        .and_then(Value::as_array)
        .and_then(|hits| hits.last())
        .and_then(|hit| hit.get("sort"))
        .cloned()
}

/// Drive `fetch` through `search_after` pages of at most `page_size` hits.
///
/// Stops at `limit` rows, on a short page, or when a page carries no sort
/// cursor.
pub(crate) async fn collect_pages<F, Fut>(
    mut fetch: F,
    query: Option<&Value>,
    limit: Option<u64>,
    page_size: u64,
) -> Result<Vec<StoredRow>, StoreError>
where
    F: FnMut(Value) -> Fut,
    Fut: Future<Output = Result<Value, StoreError>>,
{
    let mut rows = Vec::new();
    let mut after: Option<Value> = None;

    loop {
        let size = match limit {
            Some(limit) => limit.saturating_sub(rows.len() as u64).min(page_size),
            None => page_size,
        };
        if size == 0 {
            break;
        }

        let resp = fetch(page_body(query, size, after.as_ref())).await?;
        let page = parse_hits(&resp)?;
        let fetched = page.len() as u64;
        rows.extend(page);

        after = last_sort(&resp);
        if fetched < size || after.is_none() {
            break;
        }
    }

    Ok(rows)
}

pub(crate) fn not_in_ids_query(keep: &[RecordId]) -> Value {
    if keep.is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({ "bool": { "must_not": { "ids": { "values": doc_ids(keep) } } } })
    }
}

pub(crate) fn in_ids_query(ids: &[RecordId]) -> Value {
    json!({ "ids": { "values": doc_ids(ids) } })
}

/// Turn a `_search` response into rows.
pub(crate) fn parse_hits(resp: &Value) -> Result<Vec<StoredRow>, StoreError> {
    let hits = resp
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::UnexpectedResponse(resp.to_string()))?;

    hits.iter()
        .map(|hit| {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::UnexpectedResponse(hit.to_string()))?;
            let source = hit.get("_source").cloned().unwrap_or(Value::Null);
            Ok(StoredRow {
                id: RecordId::Key(id.to_string()),
                log: serde_json::from_value(source)?,
            })
        })
        .collect()
}

#[async_trait]
impl LogStore for DocumentStore {
    async fn insert(&self, log: &EncodedLog) -> Result<RecordId, StoreError> {
        let resp = self
            .send_json(
                self.client
                    .post(self.url("_doc?refresh=wait_for"))
                    .json(log),
            )
            .await?;

        resp.get("_id")
            .and_then(Value::as_str)
            .map(|id| RecordId::Key(id.to_string()))
            .ok_or_else(|| StoreError::UnexpectedResponse(resp.to_string()))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let resp = self.send_json(self.client.get(self.url("_count"))).await?;
        resp.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| StoreError::UnexpectedResponse(resp.to_string()))
    }

    async fn latest(&self, limit: u64) -> Result<Vec<StoredRow>, StoreError> {
        self.search(None, Some(limit)).await
    }

    async fn delete_where_id_not_in(&self, keep: &[RecordId]) -> Result<u64, StoreError> {
        self.delete_by_query(not_in_ids_query(keep)).await
    }

    async fn select_unix_time_at_most(&self, cutoff: i64) -> Result<Vec<StoredRow>, StoreError> {
        self.search(Some(unix_time_at_most_query(cutoff)), None).await
    }

    async fn delete_all(&self, ids: &[RecordId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_by_query(in_ids_query(ids)).await
    }
}
