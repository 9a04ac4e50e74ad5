// Refresh scheduler - Polling loop driving fetch, merge and persist for one series
use crate::application::cache_store::{CacheStore, PersistOutcome};
use crate::application::config_store::{validate, ConfigStore};
use crate::application::sample_fetcher::RemoteSampleFetcher;
use crate::domain::cache_record::CacheRecord;
use crate::domain::error::{ErrorKind, TrendError};
use crate::domain::series::{Sample, SeriesConfig};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

/// Quiet period after a config edit before it is persisted and applied.
pub const CONFIG_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Fetching,
    /// The last fetch failed. Schedules like `Idle`.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Start,
    Tick,
    Manual,
}

impl Trigger {
    /// Foreground fetches show a loading state and re-arm the periodic
    /// timer from the moment they complete.
    fn foreground(self) -> bool {
        !matches!(self, Trigger::Tick)
    }
}

/// What a user looking at the series sees besides the samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesStatus {
    pub phase: Phase,
    pub loading: bool,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub last_persist_error: Option<ErrorKind>,
    pub fetch_count: u64,
    pub skipped_ticks: u64,
    pub stopped: bool,
}

impl Default for SeriesStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            loading: false,
            last_fetch_at: None,
            message: None,
            last_persist_error: None,
            fetch_count: 0,
            skipped_ticks: 0,
            stopped: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum RefreshOutcome {
    Completed { fetched: usize, retained: usize },
    /// A fetch for this series was already in flight.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Re-read, merge and persist before stopping.
    Flush,
    /// Stop without writing; the series is about to be deleted.
    Discard,
}

/// Services a scheduler needs for each cycle.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub fetcher: RemoteSampleFetcher,
    pub cache: CacheStore,
    pub configs: ConfigStore,
}

type RefreshReply = oneshot::Sender<Result<RefreshOutcome, TrendError>>;
type ConfigReply = oneshot::Sender<Result<(), TrendError>>;

enum Command {
    Refresh(RefreshReply),
    Reconfigure(SeriesConfig, ConfigReply),
    Stop(Teardown, oneshot::Sender<()>),
}

struct CycleReport {
    fetched: usize,
    retained: usize,
    fetched_at: DateTime<Utc>,
    last_persist_error: Option<ErrorKind>,
}

struct InFlight {
    trigger: Trigger,
    reply: Option<RefreshReply>,
    future: BoxFuture<'static, Result<CycleReport, TrendError>>,
}

/// Handle to the polling loop of one open series view.
///
/// At most one fetch per series is in flight at any time: ticks and manual
/// refreshes that arrive while a fetch is outstanding are skipped.
pub struct RefreshScheduler {
    series_key: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SeriesStatus>,
    config: watch::Receiver<SeriesConfig>,
    record: Arc<RwLock<CacheRecord>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Start polling. `record` must already be hydrated from storage; the
    /// first fetch is issued immediately.
    pub fn start(deps: SchedulerDeps, config: SeriesConfig, record: CacheRecord) -> Self {
        let series_key = config.series_id.clone();
        let (command_tx, command_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(SeriesStatus {
            last_fetch_at: record.last_fetch_at,
            last_persist_error: record.last_persist_error,
            ..SeriesStatus::default()
        });
        let (config_tx, config_rx) = watch::channel(config.clone());
        let record = Arc::new(RwLock::new(record));

        let event_loop = SchedulerLoop {
            deps,
            config,
            config_tx,
            record: record.clone(),
            status_tx,
            timer: None,
            debounce: None,
            pending_config: None,
            config_waiters: Vec::new(),
            in_flight: None,
            restart_pending: false,
        };
        let task = tokio::spawn(event_loop.run(command_rx));

        tracing::info!("Started refresh scheduler for {}", series_key);
        Self {
            series_key,
            commands: command_tx,
            status: status_rx,
            config: config_rx,
            record,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn series_key(&self) -> &str {
        &self.series_key
    }

    pub fn status(&self) -> SeriesStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SeriesStatus> {
        self.status.clone()
    }

    pub fn config(&self) -> SeriesConfig {
        self.config.borrow().clone()
    }

    /// Samples inside the current display window. Never mutates the cache.
    pub async fn window(&self, now: DateTime<Utc>) -> Vec<Sample> {
        let display_window_days = self.config.borrow().display_window_days;
        self.record.read().await.window(now, display_window_days)
    }

    pub async fn retained(&self) -> usize {
        self.record.read().await.len()
    }

    /// Manual refresh. Resets the periodic cadence; a no-op while a fetch
    /// is already in flight. Errors are returned to the caller.
    pub async fn refresh(&self) -> Result<RefreshOutcome, TrendError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Refresh(tx)).await.is_err() {
            return Ok(RefreshOutcome::Skipped);
        }
        rx.await.unwrap_or(Ok(RefreshOutcome::Skipped))
    }

    /// Replace the config. Rejected immediately when no query is bound;
    /// otherwise persisted after `CONFIG_DEBOUNCE` of quiet, then polling
    /// restarts with a fresh fetch.
    pub async fn reconfigure(&self, config: SeriesConfig) -> Result<(), TrendError> {
        validate(&config)?;
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Reconfigure(config, tx))
            .await
            .is_err()
        {
            return Err(closed(&self.series_key));
        }
        rx.await.unwrap_or_else(|_| Err(closed(&self.series_key)))
    }

    /// Cancel all timers and, for `Teardown::Flush`, write the final merged
    /// snapshot. Returns once the loop has exited. Stopping twice is a no-op.
    pub async fn stop(&self, teardown: Teardown) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Stop(teardown, tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = task.await {
            tracing::error!("Scheduler task for {} ended abnormally: {}", self.series_key, e);
        }
        tracing::info!("Stopped refresh scheduler for {}", self.series_key);
    }
}

fn closed(series_key: &str) -> TrendError {
    TrendError::Configuration(format!("series {} is no longer open", series_key))
}

struct SchedulerLoop {
    deps: SchedulerDeps,
    config: SeriesConfig,
    config_tx: watch::Sender<SeriesConfig>,
    record: Arc<RwLock<CacheRecord>>,
    status_tx: watch::Sender<SeriesStatus>,
    timer: Option<Interval>,
    debounce: Option<Pin<Box<Sleep>>>,
    pending_config: Option<SeriesConfig>,
    config_waiters: Vec<ConfigReply>,
    in_flight: Option<InFlight>,
    restart_pending: bool,
}

impl SchedulerLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.begin(Trigger::Start, None);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh(reply)) => self.on_manual_refresh(reply),
                    Some(Command::Reconfigure(config, reply)) => self.on_reconfigure(config, reply),
                    Some(Command::Stop(teardown, reply)) => {
                        self.teardown(teardown).await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.teardown(Teardown::Flush).await;
                        break;
                    }
                },
                _ = next_tick(&mut self.timer) => self.on_tick(),
                _ = debounce_elapsed(&mut self.debounce) => self.on_debounce_elapsed().await,
                result = in_flight_done(&mut self.in_flight) => self.on_cycle_done(result),
            }
        }
    }

    fn begin(&mut self, trigger: Trigger, reply: Option<RefreshReply>) {
        let future = run_cycle(
            self.deps.clone(),
            self.config.clone(),
            self.record.clone(),
        )
        .boxed();
        self.in_flight = Some(InFlight {
            trigger,
            reply,
            future,
        });
        self.status_tx.send_modify(|s| {
            s.phase = Phase::Fetching;
            s.loading = trigger.foreground();
        });
    }

    fn arm_timer(&mut self) {
        let period = Duration::from_millis(self.config.refresh_interval_ms.max(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timer = Some(interval);
    }

    fn on_tick(&mut self) {
        if self.in_flight.is_some() {
            tracing::debug!(
                "Skipping tick for {}, fetch already in flight",
                self.config.series_id
            );
            self.status_tx.send_modify(|s| s.skipped_ticks += 1);
            return;
        }
        self.begin(Trigger::Tick, None);
    }

    fn on_manual_refresh(&mut self, reply: RefreshReply) {
        if self.in_flight.is_some() {
            let _ = reply.send(Ok(RefreshOutcome::Skipped));
            return;
        }
        self.timer = None;
        self.begin(Trigger::Manual, Some(reply));
    }

    fn on_reconfigure(&mut self, config: SeriesConfig, reply: ConfigReply) {
        self.timer = None;
        self.pending_config = Some(config);
        self.config_waiters.push(reply);
        self.debounce = Some(Box::pin(tokio::time::sleep(CONFIG_DEBOUNCE)));
    }

    async fn on_debounce_elapsed(&mut self) {
        self.debounce = None;
        let Some(config) = self.pending_config.take() else {
            return;
        };

        let result = self.deps.configs.save(&config.series_id, &config).await;
        if result.is_ok() {
            tracing::info!("Applied new config for {}", config.series_id);
            self.config = config.clone();
            let _ = self.config_tx.send(config);
        }
        for waiter in self.config_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }

        match result {
            Ok(()) => {
                if self.in_flight.is_some() {
                    self.restart_pending = true;
                } else {
                    self.begin(Trigger::Start, None);
                }
            }
            Err(e) => {
                tracing::warn!("Keeping previous config for {}: {}", self.config.series_id, e);
                if self.in_flight.is_none() {
                    self.arm_timer();
                }
            }
        }
    }

    fn on_cycle_done(&mut self, result: Result<CycleReport, TrendError>) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        let key = &self.config.series_id;

        let reply = match result {
            Ok(report) => {
                tracing::debug!(
                    "Fetched {} samples for {}, {} retained",
                    report.fetched,
                    key,
                    report.retained
                );
                self.status_tx.send_modify(|s| {
                    s.phase = Phase::Idle;
                    s.message = None;
                    s.last_fetch_at = Some(report.fetched_at);
                    s.last_persist_error = report.last_persist_error;
                });
                Ok(RefreshOutcome::Completed {
                    fetched: report.fetched,
                    retained: report.retained,
                })
            }
            Err(e) => {
                let surface = match &e {
                    TrendError::Configuration(_) => true,
                    _ => flight.trigger == Trigger::Manual,
                };
                if flight.trigger.foreground() {
                    tracing::warn!("Fetch for {} failed: {}", key, e);
                } else {
                    tracing::warn!("Background fetch for {} failed: {}", key, e);
                }
                let message = e.to_string();
                self.status_tx.send_modify(|s| {
                    s.phase = Phase::Error;
                    if surface {
                        s.message = Some(message);
                    }
                });
                Err(e)
            }
        };

        self.status_tx.send_modify(|s| {
            s.loading = false;
            s.fetch_count += 1;
        });
        if let Some(waiter) = flight.reply {
            let _ = waiter.send(reply);
        }

        // A background tick keeps the running interval unless a config edit
        // cancelled it while the fetch was outstanding.
        if self.restart_pending {
            self.restart_pending = false;
            self.timer = None;
            self.begin(Trigger::Start, None);
        } else if self.debounce.is_none() && (flight.trigger.foreground() || self.timer.is_none()) {
            self.arm_timer();
        }
    }

    async fn teardown(&mut self, teardown: Teardown) {
        self.timer = None;
        self.debounce = None;
        self.restart_pending = false;

        if let Some(flight) = self.in_flight.take() {
            let result = flight.future.await;
            if let Some(waiter) = flight.reply {
                let _ = waiter.send(result.map(|r| RefreshOutcome::Completed {
                    fetched: r.fetched,
                    retained: r.retained,
                }));
            }
        }

        if teardown == Teardown::Flush {
            if let Some(config) = self.pending_config.take() {
                let result = self.deps.configs.save(&config.series_id, &config).await;
                if result.is_ok() {
                    self.config = config.clone();
                    let _ = self.config_tx.send(config);
                }
                for waiter in self.config_waiters.drain(..) {
                    let _ = waiter.send(result.clone());
                }
            }

            let mut record = self.record.write().await;
            let outcome = self
                .deps
                .cache
                .flush(&mut record, &self.config, Utc::now())
                .await;
            tracing::info!(
                "Final flush for {}: {} samples, {:?}",
                self.config.series_id,
                record.len(),
                outcome
            );
            let last_persist_error = record.last_persist_error;
            self.status_tx
                .send_modify(|s| s.last_persist_error = last_persist_error);
        }

        self.status_tx.send_modify(|s| {
            s.phase = Phase::Idle;
            s.loading = false;
            s.stopped = true;
        });
    }
}

/// One fetch, merge, prune, cap, persist step.
async fn run_cycle(
    deps: SchedulerDeps,
    config: SeriesConfig,
    record: Arc<RwLock<CacheRecord>>,
) -> Result<CycleReport, TrendError> {
    let range = config.fetch_range(Utc::now());
    let samples = deps.fetcher.fetch(&config, range).await?;
    let fetched = samples.len();

    let mut record = record.write().await;
    let now = Utc::now();
    record.apply(samples, now, config.retention_days, config.max_points);
    record.last_fetch_at = Some(now);
    if deps.cache.persist(&mut record).await == PersistOutcome::Failed {
        tracing::warn!("Serving {} from memory until storage recovers", config.series_id);
    }

    Ok(CycleReport {
        fetched,
        retained: record.len(),
        fetched_at: now,
        last_persist_error: record.last_persist_error,
    })
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn debounce_elapsed(debounce: &mut Option<Pin<Box<Sleep>>>) {
    match debounce {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn in_flight_done(in_flight: &mut Option<InFlight>) -> Result<CycleReport, TrendError> {
    match in_flight {
        Some(flight) => (&mut flight.future).await,
        None => std::future::pending().await,
    }
}
