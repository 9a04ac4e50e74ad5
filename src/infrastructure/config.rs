// Settings - Service configuration and the local query registry
use crate::application::config_store::SeriesDefaults;
use crate::application::query_source::QueryCommand;
use crate::application::trend_service::OpenSeriesRequest;
use crate::domain::series::{ChartType, SourceAttrs};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub remote: RemoteSettings,
    pub defaults: SeriesDefaults,
    pub series: Vec<SeriesSeed>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: String,
    pub quota_bytes: Option<usize>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: "trend-cache.db".to_string(),
            quota_bytes: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub query_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            token: None,
            query_timeout_ms: 15_000,
            fallback_timeout_ms: 10_000,
        }
    }
}

/// A series opened at startup. Read in snake_case, handed to the config
/// store in the persisted camelCase shape.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct SeriesSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub source: SourceAttrs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_window_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<ChartType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_field: Option<String>,
}

impl SeriesSeed {
    /// Open request carrying the seed's settings as its initial config.
    pub fn to_open_request(&self) -> Result<OpenSeriesRequest, serde_json::Error> {
        Ok(OpenSeriesRequest {
            id: self.id.clone(),
            title: self.title.clone(),
            source: self.source.clone(),
            config: serde_json::to_value(self)?,
        })
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueriesConfig {
    #[serde(default)]
    pub queries: Vec<QueryCommand>,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/trends").required(false))
        .add_source(
            config::Environment::with_prefix("TRENDS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_queries_config() -> anyhow::Result<QueriesConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/queries").required(false))
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_query() {
        let mut vars = HashMap::new();
        vars.insert("startDate".to_string(), "2024-01-01 00:00:00".to_string());
        vars.insert("endTimestamp".to_string(), "1704153600".to_string());

        let query = "SELECT time, temp FROM boiler WHERE time >= '${startDate}' AND epoch < ${endTimestamp} AND x = '${unknown}'";
        let result = prepare_query(query, &vars);

        assert_eq!(
            result,
            "SELECT time, temp FROM boiler WHERE time >= '2024-01-01 00:00:00' AND epoch < 1704153600 AND x = '${unknown}'"
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(settings.storage.backend, StorageBackend::Sqlite);
        assert_eq!(settings.remote.query_timeout_ms, 15_000);
        assert_eq!(settings.remote.fallback_timeout_ms, 10_000);
        assert_eq!(settings.defaults.max_points, 1000);
        assert!(settings.series.is_empty());
    }

    #[test]
    fn test_settings_from_toml() {
        let raw = r#"
            [storage]
            backend = "memory"
            quota_bytes = 5000000

            [defaults]
            refresh_interval_ms = 30000

            [[series]]
            title = "Boiler Temp"
            query_name = "boiler_temp"
            source = { db_name = "plant", table_name = "boiler", field_name = "temp" }
        "#;
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.storage.quota_bytes, Some(5_000_000));
        assert_eq!(settings.defaults.refresh_interval_ms, 30_000);
        assert_eq!(settings.defaults.retention_days, 7.0);
        assert_eq!(settings.series.len(), 1);
        assert_eq!(settings.series[0].source.table_name, "boiler");
        assert_eq!(settings.series[0].query_name.as_deref(), Some("boiler_temp"));

        let request = settings.series[0].to_open_request().unwrap();
        assert_eq!(request.title, "Boiler Temp");
        assert_eq!(request.config["queryName"], "boiler_temp");
        assert!(request.config.get("retentionDays").is_none());
    }
}
