// Durable key/value storage shared by every series
use crate::domain::error::StoreError;
use async_trait::async_trait;

/// Key for a series' persisted samples.
pub fn data_key(series_key: &str) -> String {
    format!("trend_data_{}", series_key)
}

/// Key for a series' persisted configuration.
pub fn config_key(series_key: &str) -> String {
    format!("trend_config_{}", series_key)
}

/// Key for the title -> series key mapping.
pub fn title_key(title: &str) -> String {
    format!("trend_series_key_{}", title)
}

/// One store shared by all series, namespaced by disjoint keys.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`. Fails with `StoreError::Capacity` when the
    /// backend's quota would be exceeded.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
