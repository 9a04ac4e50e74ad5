// Test doubles for the remote query and storage boundaries
use crate::application::persistence::PersistenceGateway;
use crate::application::query_source::{DataSourceDescriptor, DirectQueryRequest, QueryExecutor};
use crate::domain::error::StoreError;
use crate::domain::series::{ChartType, SeriesConfig, SourceAttrs};
use crate::infrastructure::memory_store::MemoryStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub fn series_config(key: &str, query_name: &str) -> SeriesConfig {
    SeriesConfig {
        series_id: key.to_string(),
        title: format!("{} title", key),
        query_name: query_name.to_string(),
        refresh_interval_ms: 1000,
        retention_days: 7.0,
        display_window_days: 1.0,
        max_points: 1000,
        chart_type: ChartType::Line,
        unit: String::new(),
        source: SourceAttrs::default(),
        data_field: None,
    }
}

/// Scripted executor that counts calls. With a gate, each named query
/// waits for a permit before answering.
pub struct FakeExecutor {
    pub named_calls: AtomicUsize,
    pub direct_calls: AtomicUsize,
    pub last_sql: Mutex<Option<String>>,
    pub last_direct: Mutex<Option<DirectQueryRequest>>,
    named: Mutex<Result<Value, String>>,
    direct: Mutex<Result<Value, String>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeExecutor {
    pub fn returning(response: Value) -> Self {
        Self::scripted(Ok(response))
    }

    pub fn failing(message: &str) -> Self {
        Self::scripted(Err(message.to_string()))
    }

    fn scripted(named: Result<Value, String>) -> Self {
        Self {
            named_calls: AtomicUsize::new(0),
            direct_calls: AtomicUsize::new(0),
            last_sql: Mutex::new(None),
            last_direct: Mutex::new(None),
            named: Mutex::new(named),
            direct: Mutex::new(Err("fallback unavailable".to_string())),
            gate: None,
        }
    }

    pub fn with_direct(self, direct: Result<Value, String>) -> Self {
        *self.direct.lock().unwrap() = direct;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set_named(&self, named: Result<Value, String>) {
        *self.named.lock().unwrap() = named;
    }

    pub fn calls(&self) -> usize {
        self.named_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute_named_query(
        &self,
        _query_name: &str,
        _data_source: &DataSourceDescriptor,
        sql: &str,
        _parameters: &HashMap<String, String>,
    ) -> anyhow::Result<Value> {
        self.named_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_sql.lock().unwrap() = Some(sql.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        let scripted = self.named.lock().unwrap().clone();
        scripted.map_err(|e| anyhow::anyhow!(e))
    }

    async fn direct_query(&self, request: &DirectQueryRequest) -> anyhow::Result<Value> {
        self.direct_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_direct.lock().unwrap() = Some(request.clone());
        let scripted = self.direct.lock().unwrap().clone();
        scripted.map_err(|e| anyhow::anyhow!(e))
    }
}

/// In-memory store that counts config writes and can refuse them.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    pub config_writes: AtomicUsize,
    pub reject_config: AtomicBool,
}

impl RecordingStore {
    pub fn config_writes(&self) -> usize {
        self.config_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if key.starts_with("trend_config_") {
            if self.reject_config.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("config writes disabled".to_string()));
            }
            self.config_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.put(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key).await
    }
}
