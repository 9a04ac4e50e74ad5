// Remote sample fetcher - Runs a series' query and normalizes rows into samples
use crate::application::query_source::{DirectQueryRequest, QueryCatalog, QueryExecutor};
use crate::domain::error::TrendError;
use crate::domain::series::{Sample, SeriesConfig, TimeRange};
use crate::domain::timestamp::parse_timestamp;
use crate::infrastructure::config::prepare_query;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

const TIME_FIELD_CANDIDATES: [&str; 4] = ["time", "timestamp", "datetime", "date"];
const DEFAULT_TIME_FIELD: &str = "time";
const TEMPLATE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone)]
pub struct RemoteSampleFetcher {
    catalog: Arc<dyn QueryCatalog>,
    executor: Arc<dyn QueryExecutor>,
}

impl RemoteSampleFetcher {
    pub fn new(catalog: Arc<dyn QueryCatalog>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { catalog, executor }
    }

    pub async fn fetch(
        &self,
        config: &SeriesConfig,
        range: TimeRange,
    ) -> Result<Vec<Sample>, TrendError> {
        if config.query_name.trim().is_empty() {
            return Err(TrendError::Configuration(format!(
                "series {} has no bound query",
                config.series_id
            )));
        }

        let command = self
            .catalog
            .find(&config.query_name)
            .filter(|c| c.enabled)
            .ok_or_else(|| {
                TrendError::Configuration(format!("query not found: {}", config.query_name))
            })?;

        let vars = template_vars(range);
        let sql = prepare_query(&command.sql, &vars);
        tracing::debug!("Executing query {} for {}", command.name, config.series_id);

        let response = match self
            .executor
            .execute_named_query(&command.name, &command.data_source, &sql, &vars)
            .await
        {
            Ok(response) => response,
            Err(primary) => {
                tracing::warn!(
                    "Query {} failed for {}, trying direct fallback: {:#}",
                    command.name,
                    config.series_id,
                    primary
                );
                let request = fallback_request(config);
                self.executor.direct_query(&request).await.map_err(|fallback| {
                    TrendError::TransientFetch(format!(
                        "{:#}; fallback also failed: {:#}",
                        primary, fallback
                    ))
                })?
            }
        };

        normalize_rows(&response, config, Utc::now())
    }
}

/// Values substituted into `${...}` placeholders of a query template.
pub fn template_vars(range: TimeRange) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert(
        "startDate".to_string(),
        range.start.format(TEMPLATE_DATE_FORMAT).to_string(),
    );
    vars.insert(
        "endDate".to_string(),
        range.end.format(TEMPLATE_DATE_FORMAT).to_string(),
    );
    vars.insert("startTimestamp".to_string(), range.start.timestamp().to_string());
    vars.insert("endTimestamp".to_string(), range.end.timestamp().to_string());
    vars
}

fn fallback_request(config: &SeriesConfig) -> DirectQueryRequest {
    let mut fields = vec!["timestamp"];
    if let Some(field) = config.value_field() {
        fields.push(field);
    }
    DirectQueryRequest {
        db_name: config.source.db_name.clone(),
        table_name: config.source.table_name.clone(),
        fields: fields.join(","),
        limit: config.max_points,
        order_by: "timestamp".to_string(),
        order_dir: "DESC".to_string(),
    }
}

/// Turn a row-set response into ascending samples.
///
/// Rows whose timestamp cannot be parsed are kept, stamped with `now`.
/// Rows without a numeric value are skipped.
pub fn normalize_rows(
    response: &Value,
    config: &SeriesConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Sample>, TrendError> {
    let rows = response
        .as_array()
        .ok_or_else(|| TrendError::DataShape("response is not an array".to_string()))?;

    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let first = first
        .as_object()
        .ok_or_else(|| TrendError::DataShape("rows are not objects".to_string()))?;

    let time_field = detect_time_field(first);
    let value_field = detect_value_field(first, &time_field, config.value_field())
        .ok_or_else(|| TrendError::DataShape("no numeric field in response".to_string()))?;
    let label = if config.title.is_empty() {
        value_field.clone()
    } else {
        config.title.clone()
    };

    let mut samples = Vec::with_capacity(rows.len());
    let mut substituted = 0;
    for row in rows.iter().filter_map(Value::as_object) {
        let Some(value) = row.get(&value_field).and_then(numeric) else {
            continue;
        };
        let timestamp = match row.get(&time_field).and_then(parse_timestamp) {
            Some(ts) => ts,
            None => {
                substituted += 1;
                now
            }
        };
        samples.push(Sample::new(timestamp, value, label.as_str()));
    }

    if substituted > 0 {
        tracing::warn!(
            "{} rows for {} had unparseable '{}' values, stamped with current time",
            substituted,
            config.series_id,
            time_field
        );
    }

    samples.sort_by_key(Sample::time_ms);
    Ok(samples)
}

fn detect_time_field(row: &Map<String, Value>) -> String {
    TIME_FIELD_CANDIDATES
        .iter()
        .find_map(|candidate| {
            row.keys()
                .find(|k| k.eq_ignore_ascii_case(candidate))
                .cloned()
        })
        .unwrap_or_else(|| DEFAULT_TIME_FIELD.to_string())
}

fn detect_value_field(
    row: &Map<String, Value>,
    time_field: &str,
    preferred: Option<&str>,
) -> Option<String> {
    if let Some(field) = preferred {
        if row.get(field).and_then(numeric).is_some() {
            return Some(field.to_string());
        }
    }
    row.iter()
        .find(|(k, v)| k.as_str() != time_field && numeric(v).is_some())
        .map(|(k, _)| k.clone())
}

fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::query_source::QueryCommand;
    use crate::application::testing::{series_config, FakeExecutor};
    use crate::infrastructure::query_catalog::StaticQueryCatalog;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn catalog() -> Arc<StaticQueryCatalog> {
        Arc::new(StaticQueryCatalog::new(vec![
            QueryCommand {
                name: "boiler_temp".to_string(),
                sql: "SELECT time, temp FROM boiler WHERE time BETWEEN '${startDate}' AND '${endDate}' AND ts > ${startTimestamp}".to_string(),
                enabled: true,
                data_source: Default::default(),
            },
            QueryCommand {
                name: "retired".to_string(),
                sql: "SELECT 1".to_string(),
                enabled: false,
                data_source: Default::default(),
            },
        ]))
    }

    fn range() -> TimeRange {
        TimeRange {
            start: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            end: DateTime::from_timestamp(1_700_086_400, 0).unwrap(),
        }
    }

    #[test]
    fn test_template_vars() {
        let vars = template_vars(range());
        assert_eq!(vars["startDate"], "2023-11-14 22:13:20");
        assert_eq!(vars["endDate"], "2023-11-15 22:13:20");
        assert_eq!(vars["startTimestamp"], "1700000000");
        assert_eq!(vars["endTimestamp"], "1700086400");
    }

    #[tokio::test]
    async fn test_fetch_substitutes_and_sorts() {
        let executor = Arc::new(FakeExecutor::returning(json!([
            { "Time": "2023-11-14 22:15:00", "temp": "71.5" },
            { "Time": "2023-11-14 22:14:00", "temp": 70.0 },
        ])));
        let fetcher = RemoteSampleFetcher::new(catalog(), executor.clone());

        let samples = fetcher
            .fetch(&series_config("boiler", "boiler_temp"), range())
            .await
            .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 70.0);
        assert_eq!(samples[1].value, 71.5);
        assert_eq!(samples[0].series_label, "boiler title");

        let sql = executor.last_sql.lock().unwrap().clone().unwrap();
        assert!(sql.contains("BETWEEN '2023-11-14 22:13:20' AND '2023-11-15 22:13:20'"));
        assert!(sql.contains("ts > 1700000000"));
        assert_eq!(executor.direct_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_query_fails_without_network() {
        let executor = Arc::new(FakeExecutor::returning(json!([])));
        let fetcher = RemoteSampleFetcher::new(catalog(), executor.clone());

        for name in ["missing", "retired", ""] {
            let err = fetcher
                .fetch(&series_config("boiler", name), range())
                .await
                .unwrap_err();
            assert!(matches!(err, TrendError::Configuration(_)), "{}", name);
        }
        assert_eq!(executor.named_calls.load(Ordering::SeqCst), 0);
        assert_eq!(executor.direct_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_on_execution_failure() {
        let executor = Arc::new(
            FakeExecutor::failing("connection refused")
                .with_direct(Ok(json!([{ "timestamp": 1_700_000_100, "temp": 5 }]))),
        );
        let fetcher = RemoteSampleFetcher::new(catalog(), executor.clone());
        let mut config = series_config("boiler", "boiler_temp");
        config.source.db_name = "plant".to_string();
        config.source.table_name = "boiler".to_string();
        config.source.field_name = "temp".to_string();

        let samples = fetcher.fetch(&config, range()).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp.timestamp(), 1_700_000_100);

        let request = executor.last_direct.lock().unwrap().clone().unwrap();
        assert_eq!(request.fields, "timestamp,temp");
        assert_eq!(request.limit, 1000);
        assert_eq!(request.order_by, "timestamp");
        assert_eq!(request.order_dir, "DESC");
    }

    #[tokio::test]
    async fn test_both_paths_failing_is_transient() {
        let executor = Arc::new(
            FakeExecutor::failing("timeout").with_direct(Err("bad gateway".to_string())),
        );
        let fetcher = RemoteSampleFetcher::new(catalog(), executor);

        let err = fetcher
            .fetch(&series_config("boiler", "boiler_temp"), range())
            .await
            .unwrap_err();
        assert!(matches!(err, TrendError::TransientFetch(_)));
    }

    #[test]
    fn test_normalize_rejects_non_array() {
        let config = series_config("boiler", "q");
        let err = normalize_rows(&json!({ "rows": [] }), &config, Utc::now()).unwrap_err();
        assert!(matches!(err, TrendError::DataShape(_)));

        let err = normalize_rows(&json!([{ "time": "x", "name": "abc" }]), &config, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TrendError::DataShape(_)));

        assert!(normalize_rows(&json!([]), &config, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_prefers_configured_field() {
        let mut config = series_config("boiler", "q");
        config.data_field = Some("pressure".to_string());
        let rows = json!([{ "date": "2023-11-14", "temp": 1.0, "pressure": "2.5" }]);

        let samples = normalize_rows(&rows, &config, Utc::now()).unwrap();
        assert_eq!(samples[0].value, 2.5);

        config.data_field = Some("missing".to_string());
        let samples = normalize_rows(&rows, &config, Utc::now()).unwrap();
        assert_eq!(samples[0].value, 1.0);
    }

    #[test]
    fn test_normalize_keeps_unparseable_timestamps() {
        let config = series_config("boiler", "q");
        let now = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        let rows = json!([
            { "time": "garbage", "value": 1.0 },
            { "time": "2023-11-14T22:13:20Z", "value": 2.0 },
            { "time": "2023-11-14T22:13:21Z", "value": null },
        ]);

        let samples = normalize_rows(&rows, &config, now).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].timestamp, now);
        assert_eq!(samples[1].value, 1.0);
    }
}
