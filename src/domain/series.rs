// Series domain models
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// A single observation. Identity for dedup is the millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub series_label: String,
}

impl Sample {
    /// Timestamps are truncated to millisecond precision on construction.
    pub fn new(timestamp: DateTime<Utc>, value: f64, series_label: impl Into<String>) -> Self {
        Self {
            timestamp: truncate_to_millis(timestamp),
            value,
            series_label: series_label.into(),
        }
    }

    pub fn time_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Convert a fractional day count into a duration, rounded to the millisecond.
pub fn days(days: f64) -> TimeDelta {
    if !days.is_finite() || days <= 0.0 {
        return TimeDelta::zero();
    }
    TimeDelta::try_milliseconds((days * MILLIS_PER_DAY).round() as i64).unwrap_or(TimeDelta::MAX)
}

/// `now` minus a day count, saturating at the earliest representable instant.
pub fn days_before(now: DateTime<Utc>, day_count: f64) -> DateTime<Utc> {
    now.checked_sub_signed(days(day_count))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Line,
    Area,
    Column,
    Indicator,
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(ChartType::Line),
            "area" => Ok(ChartType::Area),
            "column" => Ok(ChartType::Column),
            "indicator" => Ok(ChartType::Indicator),
            other => Err(format!("unknown chart type '{}'", other)),
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Column => "column",
            ChartType::Indicator => "indicator",
        };
        f.write_str(name)
    }
}

/// Where a series' values live on the remote side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceAttrs {
    #[serde(alias = "db_name")]
    pub db_name: String,
    #[serde(alias = "table_name")]
    pub table_name: String,
    #[serde(alias = "field_name")]
    pub field_name: String,
}

/// Fully typed per-series configuration. Coercion and defaulting happen
/// once, in `ConfigStore`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesConfig {
    pub series_id: String,
    pub title: String,
    pub query_name: String,
    pub refresh_interval_ms: u64,
    pub retention_days: f64,
    pub display_window_days: f64,
    pub max_points: usize,
    pub chart_type: ChartType,
    pub unit: String,
    pub source: SourceAttrs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_field: Option<String>,
}

impl SeriesConfig {
    /// Field used for the value column, preferring the explicit override.
    pub fn value_field(&self) -> Option<&str> {
        self.data_field
            .as_deref()
            .filter(|f| !f.is_empty())
            .or_else(|| Some(self.source.field_name.as_str()).filter(|f| !f.is_empty()))
    }

    /// Range fetched on each cycle: the display window ending at `now`.
    pub fn fetch_range(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange {
            start: days_before(now, self.display_window_days),
            end: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
