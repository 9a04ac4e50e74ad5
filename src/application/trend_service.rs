// Trend service - Registry of open series views
use crate::application::key_resolver::SeriesKeyResolver;
use crate::application::refresh_scheduler::{
    RefreshOutcome, RefreshScheduler, SchedulerDeps, SeriesStatus, Teardown,
};
use crate::domain::error::{StoreError, TrendError};
use crate::domain::series::{Sample, SeriesConfig, SourceAttrs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("series {0} is not open")]
    NotOpen(String),

    #[error(transparent)]
    Trend(#[from] TrendError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Request to open a view on a series.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSeriesRequest {
    /// Explicit series key. A blank id counts as absent.
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub source: SourceAttrs,
    /// Partial config applied only when nothing is stored for the series yet.
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSnapshot {
    pub series_key: String,
    pub config: SeriesConfig,
    pub status: SeriesStatus,
    pub retained: usize,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSummary {
    pub series_key: String,
    pub title: String,
    pub status: SeriesStatus,
}

pub struct TrendService {
    resolver: SeriesKeyResolver,
    deps: SchedulerDeps,
    views: RwLock<HashMap<String, Arc<RefreshScheduler>>>,
}

impl TrendService {
    pub fn new(resolver: SeriesKeyResolver, deps: SchedulerDeps) -> Self {
        Self {
            resolver,
            deps,
            views: RwLock::new(HashMap::new()),
        }
    }

    /// Open a view, or return the key of the already open one.
    ///
    /// Storage is read without holding the registry lock; the registry is
    /// only locked to insert the started scheduler.
    pub async fn open(&self, request: OpenSeriesRequest) -> Result<String, ServiceError> {
        let explicit_id = request.id.as_deref().filter(|id| !id.trim().is_empty());
        let key = self
            .resolver
            .resolve(explicit_id, &request.title, &request.source)
            .await?;

        if self.views.read().await.contains_key(&key) {
            return Ok(key);
        }

        let configs = &self.deps.configs;
        let mut config = configs.load(&key).await?;
        if !configs.exists(&key).await? {
            config.title = request.title.clone();
            config.source = request.source.clone();
            config = configs.overlay(&config, &request.config);
            if config.query_name.is_empty() {
                tracing::warn!("Series {} opened without a bound query", key);
            } else {
                configs.save(&key, &config).await?;
            }
        }

        // Hydrate before the first fetch can land.
        let record = self.deps.cache.load(&key).await?;

        let mut views = self.views.write().await;
        if views.contains_key(&key) {
            return Ok(key);
        }
        tracing::info!(
            "Opening series {} ('{}', {} chart) with {} cached samples",
            key,
            config.title,
            config.chart_type,
            record.len()
        );
        views.insert(
            key.clone(),
            Arc::new(RefreshScheduler::start(self.deps.clone(), config, record)),
        );
        Ok(key)
    }

    /// Handle for an open series. The registry lock is released on return.
    async fn view(&self, series_key: &str) -> Result<Arc<RefreshScheduler>, ServiceError> {
        self.views
            .read()
            .await
            .get(series_key)
            .cloned()
            .ok_or_else(|| ServiceError::NotOpen(series_key.to_string()))
    }

    /// Close a view, writing its final snapshot.
    pub async fn close(&self, series_key: &str) -> Result<(), ServiceError> {
        let scheduler = self
            .views
            .write()
            .await
            .remove(series_key)
            .ok_or_else(|| ServiceError::NotOpen(series_key.to_string()))?;
        scheduler.stop(Teardown::Flush).await;
        Ok(())
    }

    /// Stop any open view and remove the series' stored data and config.
    pub async fn delete(&self, series_key: &str) -> Result<(), ServiceError> {
        let open = self.views.write().await.remove(series_key);
        if let Some(scheduler) = open {
            scheduler.stop(Teardown::Discard).await;
        }
        self.deps.cache.remove(series_key).await?;
        self.deps.configs.remove(series_key).await?;
        tracing::info!("Deleted series {}", series_key);
        Ok(())
    }

    pub async fn refresh(&self, series_key: &str) -> Result<RefreshOutcome, ServiceError> {
        let scheduler = self.view(series_key).await?;
        Ok(scheduler.refresh().await?)
    }

    /// Patch the config of an open series with loosely typed fields.
    pub async fn reconfigure(
        &self,
        series_key: &str,
        patch: &Value,
    ) -> Result<SeriesConfig, ServiceError> {
        let scheduler = self.view(series_key).await?;
        let config = self.deps.configs.overlay(&scheduler.config(), patch);
        scheduler.reconfigure(config.clone()).await?;
        Ok(config)
    }

    pub async fn snapshot(
        &self,
        series_key: &str,
        now: DateTime<Utc>,
    ) -> Result<SeriesSnapshot, ServiceError> {
        let scheduler = self.view(series_key).await?;
        Ok(SeriesSnapshot {
            series_key: series_key.to_string(),
            config: scheduler.config(),
            status: scheduler.status(),
            retained: scheduler.retained().await,
            samples: scheduler.window(now).await,
        })
    }

    /// Status updates for an open series.
    pub async fn subscribe(
        &self,
        series_key: &str,
    ) -> Result<watch::Receiver<SeriesStatus>, ServiceError> {
        Ok(self.view(series_key).await?.subscribe())
    }

    pub async fn list(&self) -> Vec<SeriesSummary> {
        let views = self.views.read().await;
        let mut summaries: Vec<SeriesSummary> = views
            .values()
            .map(|s| SeriesSummary {
                series_key: s.series_key().to_string(),
                title: s.config().title,
                status: s.status(),
            })
            .collect();
        summaries.sort_by(|a, b| a.series_key.cmp(&b.series_key));
        summaries
    }

    /// Close every open view. All final flushes finish before this returns.
    pub async fn shutdown(&self) {
        let views: Vec<Arc<RefreshScheduler>> = self
            .views
            .write()
            .await
            .drain()
            .map(|(_, scheduler)| scheduler)
            .collect();
        tracing::info!("Flushing {} open series", views.len());
        futures::future::join_all(views.iter().map(|s| s.stop(Teardown::Flush))).await;
    }
}
