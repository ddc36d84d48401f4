use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::app::ports::{StoreError, StorePort};
use crate::pipeline::bulk::encode_bulk;
use crate::types::{Document, FetchedDoc};

/// Document store adapter speaking the Elasticsearch-style HTTP API:
/// `_bulk` per bucket, `_mget` for totals lookup, and versioned `PUT` for the
/// compare-and-swap totals write. Only the conflict status (409) is
/// special-cased; everything else is a transport failure.
pub struct EsStore {
    base: String,
    client: reqwest::Client,
}

impl EsStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Installs the index templates the pipeline writes into: monthly
    /// `time_*` slices (1 shard, 1 replica) and the single `totals` index
    /// (6 shards, no replicas). Idempotent; safe to run on every deploy.
    pub async fn configure_templates(&self) -> Result<(), StoreError> {
        let mut time = default_settings();
        time["template"] = json!("time_*");
        time["settings"]["number_of_shards"] = json!(1);
        time["settings"]["number_of_replicas"] = json!(1);
        self.put_template("time_1", &time).await?;

        let mut totals = default_settings();
        totals["template"] = json!("totals");
        totals["settings"]["number_of_shards"] = json!(6);
        totals["settings"]["number_of_replicas"] = json!(0);
        self.put_template("total_1", &totals).await
    }

    /// Fully merges an index down to one segment. Meant for time slices that
    /// no longer receive writes.
    pub async fn optimize_index(&self, name: &str) -> Result<(), StoreError> {
        let url = format!("{}/{}/_optimize", self.base, name);
        let resp = self
            .client
            .post(&url)
            .query(&[("max_num_segments", "1"), ("wait_for_merge", "true")])
            .send()
            .await
            .map_err(transport)?;
        check_success(resp, "index optimize").await
    }

    async fn put_template(&self, name: &str, settings: &Value) -> Result<(), StoreError> {
        let url = format!("{}/_template/{}", self.base, name);
        let resp = self
            .client
            .put(&url)
            .json(settings)
            .send()
            .await
            .map_err(transport)?;
        debug!(template = name, "installed index template");
        check_success(resp, "template install").await
    }
}

#[async_trait]
impl StorePort for EsStore {
    async fn bulk_write(
        &self,
        index: &str,
        category: &str,
        docs: &[Document],
    ) -> Result<(), StoreError> {
        let url = format!("{}/{}/{}/_bulk", self.base, index, category);
        let resp = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(encode_bulk(docs))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Transport(format!(
                "bulk write failed: {status} {body}"
            )));
        }
        // Per-document failures come back as 200 with a top-level flag.
        let summary: BulkResponse = resp.json().await.map_err(transport)?;
        if summary.errors {
            return Err(StoreError::Transport(
                "bulk write reported per-document errors".to_string(),
            ));
        }
        debug!(index, category, docs = docs.len(), "bulk write accepted");
        Ok(())
    }

    async fn multi_fetch(
        &self,
        index: &str,
        category: &str,
        ids: &[String],
    ) -> Result<HashMap<String, FetchedDoc>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!("{}/{}/{}/_mget", self.base, index, category);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "ids": ids }))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Transport(format!(
                "multi-fetch failed: {status} {body}"
            )));
        }
        let parsed: MgetResponse = resp.json().await.map_err(transport)?;
        Ok(parsed
            .docs
            .into_iter()
            .filter(|d| d.found)
            .map(|d| {
                (
                    d.id,
                    FetchedDoc {
                        version: d.version,
                        source: d.source,
                    },
                )
            })
            .collect())
    }

    async fn versioned_write(
        &self,
        index: &str,
        category: &str,
        id: &str,
        body: &Value,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let url = format!("{}/{}/{}/{}", self.base, index, category, id);
        // Version 0 means nothing stored yet: create-only write, which the
        // store rejects with a conflict if another writer got there first.
        let req = if expected_version > 0 {
            self.client
                .put(&url)
                .query(&[("version", expected_version.to_string())])
        } else {
            self.client.put(&url).query(&[("op_type", "create")])
        };
        let resp = req.json(body).send().await.map_err(transport)?;

        let status = resp.status();
        if status == StatusCode::CONFLICT {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Transport(format!(
                "versioned write failed: {status} {text}"
            )));
        }
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

async fn check_success(resp: reqwest::Response, what: &str) -> Result<(), StoreError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Transport(format!(
            "{what} failed: {status} {body}"
        )))
    }
}

/// Shared template settings: keyword analysis, no `_all`, strings stored
/// unanalyzed.
fn default_settings() -> Value {
    json!({
        "settings": {
            "refresh_interval": "10s",
            "analysis": {
                "analyzer": {
                    "default": { "type": "custom", "tokenizer": "keyword" },
                },
            },
        },
        "mappings": {
            "_default_": {
                "_all": { "enabled": false },
                "dynamic_templates": [{
                    "disable_string_analyzing": {
                        "match": "*",
                        "match_mapping_type": "string",
                        "mapping": { "type": "string", "index": "not_analyzed" },
                    },
                }],
            },
        },
    })
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
}

#[derive(Debug, Deserialize)]
struct MgetResponse {
    docs: Vec<MgetDoc>,
}

#[derive(Debug, Deserialize)]
struct MgetDoc {
    #[serde(rename = "_id")]
    id: String,
    // Older store versions report `exists` instead of `found`.
    #[serde(rename = "found", alias = "exists", default)]
    found: bool,
    #[serde(rename = "_version", default)]
    version: i64,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}
