//! Secondary document store
//!
//! A read-optimized copy of the relational store, one collection per table.
//! Writes `$set` the given fields and `$unset` only the keys named by the
//! caller; nothing else on the stored document is touched.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RemoteError, RemoteResult};
use crate::models::{SyncTable, UpsertOutcome};
use crate::transform::{DocValue, Document, LookupFilter};
use crate::util::truncate_body;

/// Read-optimized, non-authoritative document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The single document matching a natural-key filter
    async fn find_one(&self, table: SyncTable, filter: &LookupFilter)
        -> RemoteResult<Option<Document>>;

    /// Set the document's fields and remove the `unset` keys, creating it
    /// when no document matches
    async fn upsert(
        &self,
        table: SyncTable,
        filter: &LookupFilter,
        document: &Document,
        unset: &[String],
    ) -> RemoteResult<UpsertOutcome>;

    /// Remove the matching document; returns whether one existed
    async fn delete(&self, table: SyncTable, filter: &LookupFilter) -> RemoteResult<bool>;
}

/// Connection settings for an HTTP data API endpoint
#[derive(Clone)]
pub struct DataApiConfig {
    /// Base URL, e.g. `https://data.example.com/app/<id>/endpoint/data/v1`
    pub base_url: String,
    pub api_key: String,
    /// Cluster name
    pub data_source: String,
    pub database: String,
    pub timeout: Duration,
}

impl fmt::Debug for DataApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("data_source", &self.data_source)
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// `DocumentStore` over an HTTP data API speaking extended JSON
#[derive(Debug, Clone)]
pub struct DataApiDocumentStore {
    client: reqwest::Client,
    config: Arc<DataApiConfig>,
}

#[derive(Debug, Deserialize)]
struct FindOneResponse {
    document: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateOneResponse {
    #[serde(default)]
    matched_count: u64,
    #[serde(default)]
    modified_count: u64,
    #[serde(default)]
    upserted_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOneResponse {
    #[serde(default)]
    deleted_count: u64,
}

impl DataApiDocumentStore {
    pub fn new(config: DataApiConfig) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    fn envelope(&self, table: SyncTable, filter: &LookupFilter) -> serde_json::Map<String, Value> {
        let mut body = serde_json::Map::new();
        body.insert("dataSource".into(), json!(self.config.data_source));
        body.insert("database".into(), json!(self.config.database));
        body.insert("collection".into(), json!(table.as_str()));
        body.insert("filter".into(), filter.to_document().to_ejson());
        body
    }

    async fn action<T: DeserializeOwned>(
        &self,
        action: &str,
        body: serde_json::Map<String, Value>,
    ) -> RemoteResult<T> {
        let url = format!(
            "{}/action/{action}",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("api-key", &self.config.api_key)
            .header("Accept", "application/ejson")
            .header("Content-Type", "application/ejson")
            .body(Value::Object(body).to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "document store {action} failed with HTTP {}: {}",
                status.as_u16(),
                truncate_body(&body)
            );
            // Credentials and server faults affect every record alike.
            return Err(
                if status.is_server_error()
                    || status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN
                    || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                {
                    RemoteError::Transport(message)
                } else {
                    RemoteError::Rejected(message)
                },
            );
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|error| {
            RemoteError::Transport(format!(
                "document store {action} returned an unreadable body: {}",
                crate::util::sanitize(&error)
            ))
        })
    }
}

#[async_trait]
impl DocumentStore for DataApiDocumentStore {
    async fn find_one(
        &self,
        table: SyncTable,
        filter: &LookupFilter,
    ) -> RemoteResult<Option<Document>> {
        let response: FindOneResponse = self.action("findOne", self.envelope(table, filter)).await?;
        response
            .document
            .filter(|document| !document.is_null())
            .map(|document| {
                Document::from_ejson(&document)
                    .map_err(|error| RemoteError::Rejected(crate::util::sanitize(&error)))
            })
            .transpose()
    }

    async fn upsert(
        &self,
        table: SyncTable,
        filter: &LookupFilter,
        document: &Document,
        unset: &[String],
    ) -> RemoteResult<UpsertOutcome> {
        let mut body = self.envelope(table, filter);
        body.insert("update".into(), update_operators(document, unset));
        body.insert("upsert".into(), Value::Bool(true));

        let response: UpdateOneResponse = self.action("updateOne", body).await?;
        Ok(if response.upserted_id.is_some() {
            UpsertOutcome::Created
        } else if response.matched_count > 0 && response.modified_count > 0 {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Unchanged
        })
    }

    async fn delete(&self, table: SyncTable, filter: &LookupFilter) -> RemoteResult<bool> {
        let response: DeleteOneResponse =
            self.action("deleteOne", self.envelope(table, filter)).await?;
        Ok(response.deleted_count > 0)
    }
}

fn update_operators(document: &Document, unset: &[String]) -> Value {
    let mut update = serde_json::Map::new();
    update.insert("$set".into(), document.to_ejson());
    if !unset.is_empty() {
        let keys = unset.iter().map(|key| (key.clone(), json!(""))).collect();
        update.insert("$unset".into(), Value::Object(keys));
    }
    Value::Object(update)
}

/// In-process `DocumentStore` for tests and local development
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    collections: Arc<Mutex<HashMap<SyncTable, Vec<Document>>>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection
    pub async fn documents(&self, table: SyncTable) -> Vec<Document> {
        self.collections
            .lock()
            .await
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of documents in a collection
    pub async fn len(&self, table: SyncTable) -> usize {
        self.collections
            .lock()
            .await
            .get(&table)
            .map_or(0, Vec::len)
    }

    pub async fn is_empty(&self, table: SyncTable) -> bool {
        self.len(table).await == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_one(
        &self,
        table: SyncTable,
        filter: &LookupFilter,
    ) -> RemoteResult<Option<Document>> {
        let wanted = filter.to_document();
        Ok(self
            .collections
            .lock()
            .await
            .get(&table)
            .and_then(|documents| documents.iter().find(|doc| doc.matches(&wanted)).cloned()))
    }

    async fn upsert(
        &self,
        table: SyncTable,
        filter: &LookupFilter,
        document: &Document,
        unset: &[String],
    ) -> RemoteResult<UpsertOutcome> {
        let wanted = filter.to_document();
        let mut collections = self.collections.lock().await;
        let documents = collections.entry(table).or_default();

        if let Some(existing) = documents.iter_mut().find(|doc| doc.matches(&wanted)) {
            let before = existing.clone();
            existing.merge(document);
            for key in unset {
                existing.remove(key);
            }
            return Ok(if *existing == before {
                UpsertOutcome::Unchanged
            } else {
                UpsertOutcome::Updated
            });
        }

        let mut created = wanted;
        created.merge(document);
        created.put("_id", DocValue::Text(Uuid::new_v4().simple().to_string()));
        documents.push(created);
        Ok(UpsertOutcome::Created)
    }

    async fn delete(&self, table: SyncTable, filter: &LookupFilter) -> RemoteResult<bool> {
        let wanted = filter.to_document();
        let mut collections = self.collections.lock().await;
        let Some(documents) = collections.get_mut(&table) else {
            return Ok(false);
        };
        let before = documents.len();
        if let Some(index) = documents.iter().position(|doc| doc.matches(&wanted)) {
            documents.remove(index);
        }
        Ok(documents.len() < before)
    }
}
