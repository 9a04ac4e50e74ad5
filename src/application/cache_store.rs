// Cache store - Hydrates and persists per-series sample caches
use crate::application::persistence::{data_key, PersistenceGateway};
use crate::domain::cache_record::CacheRecord;
use crate::domain::error::{StoreError, TrendError};
use crate::domain::series::{Sample, SeriesConfig};
use crate::domain::timestamp::parse_timestamp;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Samples kept by the reduced-payload retry after a capacity failure.
pub const REDUCED_PAYLOAD_SAMPLES: usize = 100;

/// Persisted shape of one sample.
#[derive(Debug, Serialize)]
struct StoredSample<'a> {
    timestamp: String,
    value: f64,
    category: &'a str,
}

/// How a persist attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Full,
    /// Capacity was exceeded; only the newest samples were written.
    Reduced,
    /// Nothing was written; the record keeps serving from memory.
    Failed,
}

#[derive(Clone)]
pub struct CacheStore {
    gateway: Arc<dyn PersistenceGateway>,
}

impl CacheStore {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    /// Read the persisted samples for `series_key`. Entries with an
    /// unparseable timestamp or a missing value are skipped.
    pub async fn load(&self, series_key: &str) -> Result<CacheRecord, StoreError> {
        let Some(raw) = self.gateway.get(&data_key(series_key)).await? else {
            return Ok(CacheRecord::new(series_key));
        };

        let entries = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) | Err(_) => {
                tracing::warn!("Persisted data for {} is not an array, starting empty", series_key);
                return Ok(CacheRecord::new(series_key));
            }
        };

        let total = entries.len();
        let samples: Vec<Sample> = entries.iter().filter_map(stored_to_sample).collect();
        if samples.len() < total {
            tracing::debug!(
                "Skipped {} malformed persisted samples for {}",
                total - samples.len(),
                series_key
            );
        }

        Ok(CacheRecord::from_samples(series_key, samples))
    }

    /// Write the record. A capacity failure is retried once with only the
    /// newest samples; a second failure is recorded on the record and
    /// otherwise swallowed.
    pub async fn persist(&self, record: &mut CacheRecord) -> PersistOutcome {
        let key = data_key(&record.series_id);

        let err = match self.write(&key, record.samples()).await {
            Ok(()) => {
                record.last_persist_error = None;
                return PersistOutcome::Full;
            }
            Err(e) => e,
        };

        if !matches!(err, StoreError::Capacity { .. }) {
            tracing::error!("Failed to persist {}: {}", record.series_id, err);
            record.last_persist_error = Some(TrendError::from(err).kind());
            return PersistOutcome::Failed;
        }

        tracing::warn!(
            "Persisting {} exceeded capacity ({}), retrying with newest {} samples",
            record.series_id,
            err,
            REDUCED_PAYLOAD_SAMPLES
        );
        match self
            .write(&key, record.newest(REDUCED_PAYLOAD_SAMPLES))
            .await
        {
            Ok(()) => {
                record.last_persist_error = None;
                PersistOutcome::Reduced
            }
            Err(e) => {
                tracing::error!(
                    "Reduced persist for {} also failed, serving from memory: {}",
                    record.series_id,
                    e
                );
                record.last_persist_error = Some(TrendError::from(e).kind());
                PersistOutcome::Failed
            }
        }
    }

    /// Final write for a closing view: re-read what is persisted, let the
    /// in-memory samples win on collision, bound, and persist.
    pub async fn flush(
        &self,
        record: &mut CacheRecord,
        config: &SeriesConfig,
        now: DateTime<Utc>,
    ) -> PersistOutcome {
        match self.load(&record.series_id).await {
            Ok(persisted) => {
                let mut merged = persisted;
                merged.merge(record.samples().to_vec());
                merged.last_fetch_at = record.last_fetch_at;
                merged.last_persist_error = record.last_persist_error;
                *record = merged;
            }
            Err(e) => {
                tracing::warn!(
                    "Could not re-read {} before final flush, writing memory only: {}",
                    record.series_id,
                    e
                );
            }
        }
        record.prune(now, config.retention_days);
        record.cap(config.max_points);
        self.persist(record).await
    }

    pub async fn remove(&self, series_key: &str) -> Result<(), StoreError> {
        self.gateway.remove(&data_key(series_key)).await
    }

    async fn write(&self, key: &str, samples: &[Sample]) -> Result<(), StoreError> {
        let stored: Vec<StoredSample<'_>> = samples
            .iter()
            .map(|s| StoredSample {
                timestamp: s.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                value: s.value,
                category: &s.series_label,
            })
            .collect();
        let raw = serde_json::to_string(&stored)?;
        self.gateway.put(key, &raw).await
    }
}

fn stored_to_sample(entry: &Value) -> Option<Sample> {
    let timestamp = parse_timestamp(entry.get("timestamp")?)?;
    let value = entry.get("value")?.as_f64()?;
    let label = entry
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(Sample::new(timestamp, value, label))
}
