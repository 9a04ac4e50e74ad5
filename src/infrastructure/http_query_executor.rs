// HTTP query executor - Runs named queries against the remote query service
use crate::application::query_source::{DataSourceDescriptor, DirectQueryRequest, QueryExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpQueryExecutor {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    query_timeout: Duration,
    fallback_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NamedQueryBody<'a> {
    data_source: &'a DataSourceDescriptor,
    sql: &'a str,
    parameters: &'a HashMap<String, String>,
}

impl HttpQueryExecutor {
    pub fn new(
        base_url: String,
        token: Option<String>,
        query_timeout: Duration,
        fallback_timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            query_timeout,
            fallback_timeout,
        }
    }

    fn named_query_url(&self, query_name: &str) -> String {
        format!(
            "{}/queries/{}/execute",
            self.base_url,
            urlencoding::encode(query_name)
        )
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Value> {
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Accept", "application/json")
            .json(body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Query service returned {}: {}", status, body);
        }

        let data = response
            .json::<Value>()
            .await
            .context("Failed to parse query service response")?;

        Ok(unwrap_rows(data))
    }
}

/// The query service wraps row sets as `{ "data": [...] }`; bare arrays
/// are passed through. Anything else is returned as-is for the caller to
/// reject.
fn unwrap_rows(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("data").is_some_and(Value::is_array) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute_named_query(
        &self,
        query_name: &str,
        data_source: &DataSourceDescriptor,
        sql: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<Value> {
        let url = self.named_query_url(query_name);
        tracing::debug!("Executing named query {} via {}", query_name, url);
        let body = NamedQueryBody {
            data_source,
            sql,
            parameters,
        };
        self.post(&url, &body, self.query_timeout).await
    }

    async fn direct_query(&self, request: &DirectQueryRequest) -> Result<Value> {
        let url = format!("{}/custom-query", self.base_url);
        tracing::debug!(
            "Direct query on {}.{} via {}",
            request.db_name,
            request.table_name,
            url
        );
        self.post(&url, request, self.fallback_timeout).await
    }
}
