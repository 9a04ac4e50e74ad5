// Config store - Per-series configuration, persisted apart from samples
use crate::application::persistence::{config_key, PersistenceGateway};
use crate::domain::error::{StoreError, TrendError};
use crate::domain::series::{ChartType, SeriesConfig, SourceAttrs};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Defaults applied under any stored partial configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeriesDefaults {
    pub refresh_interval_ms: u64,
    pub retention_days: f64,
    pub display_window_days: f64,
    pub max_points: usize,
    pub chart_type: ChartType,
}

impl Default for SeriesDefaults {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 60_000,
            retention_days: 7.0,
            display_window_days: 1.0,
            max_points: 1000,
            chart_type: ChartType::Line,
        }
    }
}

#[derive(Clone)]
pub struct ConfigStore {
    gateway: Arc<dyn PersistenceGateway>,
    defaults: SeriesDefaults,
}

impl ConfigStore {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, defaults: SeriesDefaults) -> Self {
        Self { gateway, defaults }
    }

    /// Load the config for `series_key`, defaults merged under whatever is
    /// stored. An unreadable stored value is treated as absent.
    pub async fn load(&self, series_key: &str) -> Result<SeriesConfig, StoreError> {
        let stored = match self.gateway.get(&config_key(series_key)).await? {
            Some(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Discarding unreadable config for {}: {}", series_key, e);
                    Value::Null
                }
            },
            None => Value::Null,
        };
        Ok(self.coerce(series_key, &stored))
    }

    /// Whether a config has ever been saved for `series_key`.
    pub async fn exists(&self, series_key: &str) -> Result<bool, StoreError> {
        Ok(self.gateway.get(&config_key(series_key)).await?.is_some())
    }

    /// Persist `config`. Callers debounce rapid successive edits.
    pub async fn save(&self, series_key: &str, config: &SeriesConfig) -> Result<(), TrendError> {
        validate(config)?;
        let raw = serde_json::to_string(config).map_err(StoreError::from)?;
        self.gateway.put(&config_key(series_key), &raw).await?;
        tracing::debug!("Saved config for {}", series_key);
        Ok(())
    }

    pub async fn remove(&self, series_key: &str) -> Result<(), StoreError> {
        self.gateway.remove(&config_key(series_key)).await
    }

    /// Apply `partial` on top of `base`, coercing loosely typed fields.
    pub fn overlay(&self, base: &SeriesConfig, partial: &Value) -> SeriesConfig {
        let mut merged = match serde_json::to_value(base) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Value::Object(patch) = partial {
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
        }
        self.coerce(&base.series_id, &Value::Object(merged))
    }

    /// Build a fully typed config from an arbitrary JSON value. Numbers
    /// stored as strings are parsed; anything unusable falls back to the
    /// default.
    pub fn coerce(&self, series_key: &str, raw: &Value) -> SeriesConfig {
        let empty = Map::new();
        let obj = raw.as_object().unwrap_or(&empty);
        let d = &self.defaults;

        let refresh_interval_ms = number(obj, "refreshIntervalMs")
            .filter(|n| *n >= 1.0)
            .map(|n| n as u64)
            .unwrap_or(d.refresh_interval_ms);
        let retention_days = number(obj, "retentionDays")
            .filter(|n| *n > 0.0)
            .unwrap_or(d.retention_days);
        let display_window_days = number(obj, "displayWindowDays")
            .filter(|n| *n > 0.0)
            .unwrap_or(d.display_window_days);
        let max_points = number(obj, "maxPoints")
            .filter(|n| *n >= 1.0)
            .map(|n| n as usize)
            .unwrap_or(d.max_points);
        let chart_type = text(obj, "chartType")
            .and_then(|s| s.parse().ok())
            .unwrap_or(d.chart_type);

        let source = obj
            .get("source")
            .cloned()
            .and_then(|v| serde_json::from_value::<SourceAttrs>(v).ok())
            .unwrap_or_default();

        SeriesConfig {
            series_id: series_key.to_string(),
            title: text(obj, "title").unwrap_or_default(),
            query_name: text(obj, "queryName").unwrap_or_default().trim().to_string(),
            refresh_interval_ms,
            retention_days,
            display_window_days,
            max_points,
            chart_type,
            unit: text(obj, "unit").unwrap_or_default(),
            source,
            data_field: text(obj, "dataField").filter(|s| !s.is_empty()),
        }
    }
}

/// A series with no bound query can never fetch.
pub fn validate(config: &SeriesConfig) -> Result<(), TrendError> {
    if config.query_name.trim().is_empty() {
        return Err(TrendError::Configuration(format!(
            "series {} has no bound query",
            config.series_id
        )));
    }
    Ok(())
}

fn number(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let n = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryStore;
    use serde_json::json;

    fn store() -> (Arc<MemoryStore>, ConfigStore) {
        let gateway = Arc::new(MemoryStore::new());
        let configs = ConfigStore::new(gateway.clone(), SeriesDefaults::default());
        (gateway, configs)
    }

    #[tokio::test]
    async fn test_load_defaults_when_absent() {
        let (_, configs) = store();
        let config = configs.load("boiler").await.unwrap();

        assert_eq!(config.series_id, "boiler");
        assert_eq!(config.refresh_interval_ms, 60_000);
        assert_eq!(config.retention_days, 7.0);
        assert_eq!(config.display_window_days, 1.0);
        assert_eq!(config.max_points, 1000);
        assert_eq!(config.chart_type, ChartType::Line);
        assert!(config.query_name.is_empty());
    }

    #[tokio::test]
    async fn test_load_coerces_string_numbers() {
        let (gateway, configs) = store();
        let stored = json!({
            "title": "Boiler",
            "queryName": "boiler_temp",
            "refreshIntervalMs": "5000",
            "retentionDays": "2.5",
            "maxPoints": 250,
            "chartType": "Area",
        });
        gateway
            .put(&config_key("boiler"), &stored.to_string())
            .await
            .unwrap();

        let config = configs.load("boiler").await.unwrap();
        assert_eq!(config.refresh_interval_ms, 5000);
        assert_eq!(config.retention_days, 2.5);
        assert_eq!(config.display_window_days, 1.0);
        assert_eq!(config.max_points, 250);
        assert_eq!(config.chart_type, ChartType::Area);
    }

    #[tokio::test]
    async fn test_save_stores_numbers_as_numbers() {
        let (gateway, configs) = store();
        let config = configs.coerce(
            "boiler",
            &json!({ "queryName": "boiler_temp", "refreshIntervalMs": "1500" }),
        );
        configs.save("boiler", &config).await.unwrap();

        let raw = gateway.get(&config_key("boiler")).await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["refreshIntervalMs"], json!(1500));
        assert_eq!(value["retentionDays"], json!(7.0));
        assert_eq!(configs.load("boiler").await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_save_rejects_missing_query() {
        let (gateway, configs) = store();
        let config = configs.coerce("boiler", &json!({ "queryName": "   " }));

        let err = configs.save("boiler", &config).await.unwrap_err();
        assert!(matches!(err, TrendError::Configuration(_)));
        assert!(gateway.get(&config_key("boiler")).await.unwrap().is_none());
    }

    #[test]
    fn test_overlay_keeps_unpatched_fields() {
        let (_, configs) = store();
        let base = configs.coerce(
            "boiler",
            &json!({ "queryName": "q", "unit": "°C", "retentionDays": 3 }),
        );
        let patched = configs.overlay(&base, &json!({ "retentionDays": "10", "unit": "K" }));

        assert_eq!(patched.query_name, "q");
        assert_eq!(patched.retention_days, 10.0);
        assert_eq!(patched.unit, "K");
    }
}
