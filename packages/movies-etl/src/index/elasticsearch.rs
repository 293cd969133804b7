//! Elasticsearch over its REST API

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{BulkItem, BulkReport, IndexDocument, SearchIndex};
use crate::config::ElasticsearchSettings;
use crate::error::{EtlError, Result};

#[derive(Clone)]
pub struct ElasticsearchIndex {
    base_url: String,
    index: String,
    credentials: Option<(String, Option<String>)>,
    client: reqwest::Client,
}

impl ElasticsearchIndex {
    /// `timeout` bounds every single request
    pub fn new(settings: &ElasticsearchSettings, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: settings.base_url().trim_end_matches('/').to_string(),
            index: settings.index.clone(),
            credentials: settings
                .username
                .clone()
                .map(|user| (user, settings.password.clone())),
            client,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    fn bulk_url(&self) -> String {
        format!("{}/_bulk", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        }
    }

    /// NDJSON body: one `index` action line and one source line per document
    fn bulk_body(&self, documents: &[IndexDocument]) -> Result<String> {
        let mut body = String::new();
        for doc in documents {
            let action = serde_json::json!({
                "index": { "_index": self.index, "_id": doc.id }
            });
            body.push_str(&serde_json::to_string(&action).map_err(EtlError::serialization)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&doc.source).map_err(EtlError::serialization)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    status: u16,
    error: Option<serde_json::Value>,
}

fn error_reason(error: &serde_json::Value) -> String {
    error
        .get("reason")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

fn parse_bulk_response(body: &[u8]) -> Result<BulkReport> {
    let response: BulkResponse = serde_json::from_slice(body)
        .map_err(|e| EtlError::IndexRejected(format!("unreadable bulk response: {}", e)))?;

    let items = response
        .items
        .into_iter()
        .flat_map(|item| item.into_values())
        .map(|item| BulkItem {
            id: item.id,
            status: item.status,
            error: item.error.as_ref().map(error_reason),
        })
        .collect();

    Ok(BulkReport {
        errors: response.errors,
        items,
    })
}

/// Judge a `PUT /<index>` response; an `error` member fails it whatever the status
fn check_created(index: &str, status: StatusCode, body: &[u8]) -> Result<()> {
    let body: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        EtlError::IndexRejected(format!(
            "create index {} returned {} with unreadable body: {}",
            index, status, e
        ))
    })?;

    if let Some(error) = body.get("error") {
        return Err(EtlError::IndexRejected(format!(
            "create index {}: {}",
            index,
            error_reason(error)
        )));
    }
    if !status.is_success() {
        return Err(EtlError::IndexRejected(format!(
            "create index {} returned {}",
            index, status
        )));
    }
    Ok(())
}

async fn rejection(operation: &str, response: reqwest::Response) -> EtlError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    EtlError::IndexRejected(format!("{} returned {}: {}", operation, status, body))
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn bulk_upsert(&self, documents: &[IndexDocument]) -> Result<BulkReport> {
        if documents.is_empty() {
            return Ok(BulkReport::default());
        }

        let body = self.bulk_body(documents)?;
        let response = self
            .authorized(self.client.post(self.bulk_url()))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejection("bulk", response).await);
        }

        let bytes = response.bytes().await?;
        let report = parse_bulk_response(&bytes)?;
        debug!(
            "Bulk upsert into {}: {} items, errors={}",
            self.index,
            report.items.len(),
            report.errors
        );
        Ok(report)
    }

    async fn recreate(&self, schema: &serde_json::Value) -> Result<()> {
        let response = self
            .authorized(self.client.delete(self.index_url()))
            .send()
            .await?;
        if response.status() != StatusCode::NOT_FOUND && !response.status().is_success() {
            return Err(rejection("delete index", response).await);
        }

        let response = self
            .authorized(self.client.put(self.index_url()))
            .json(schema)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        check_created(&self.index, status, &body)?;

        info!("Index {} recreated", self.index);
        Ok(())
    }
}
