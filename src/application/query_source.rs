// Remote query boundary - Registered query commands and their executor
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Connection details for the remote data source a query runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// A named SQL template bound to a data source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryCommand {
    pub name: String,
    pub sql: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, alias = "dataSource")]
    pub data_source: DataSourceDescriptor,
}

fn enabled_by_default() -> bool {
    true
}

/// Simplified direct call used when the named query fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectQueryRequest {
    pub db_name: String,
    pub table_name: String,
    /// Comma-joined field list.
    pub fields: String,
    pub limit: usize,
    pub order_by: String,
    pub order_dir: String,
}

/// Local registry of query commands, looked up by name at fetch time.
pub trait QueryCatalog: Send + Sync {
    fn find(&self, name: &str) -> Option<QueryCommand>;
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute a registered query with its template already substituted.
    /// Returns the raw response body, expected to be an array of rows.
    async fn execute_named_query(
        &self,
        query_name: &str,
        data_source: &DataSourceDescriptor,
        sql: &str,
        parameters: &HashMap<String, String>,
    ) -> anyhow::Result<Value>;

    /// Fallback path with no SQL, just table and fields.
    async fn direct_query(&self, request: &DirectQueryRequest) -> anyhow::Result<Value>;
}
