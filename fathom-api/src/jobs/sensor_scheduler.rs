//! Per-Sensor Simulation Scheduler
//!
//! Runs one independent task per sensor. Every task ticks at its sensor's own
//! `data_output_rate`, generates readings, persists the detections and then
//! writes one snapshot of the sensor.
//!
//! Loops never share mutable state. Faults go to a bounded fault log drained
//! by a supervisor task that logs and counts them; reporting a fault never
//! stops another loop. What a loop does about its own failed snapshot update
//! is decided by [`FaultPolicy`].
//!
//! # Loop states
//!
//! ```text
//! Idle -> Generating -> Persisting -> Idle
//!                           |
//!                           +-> Aborted   (snapshot failed, AbortSensor policy)
//! any non-terminal state   -> Stopped     (stop signal or process shutdown)
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! scheduler:
//!   fault_policy: abort_sensor     # or log_and_continue
//!   max_concurrent_ticks: 8        # omit for unbounded
//!   fault_log_capacity: 256
//! ```

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fathom_core::{
    next_detected_fish, next_temperature, next_transparency, Codename, FathomError, Sensor,
    SensorId, SensorSnapshot,
};
use fathom_storage::SensorStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::env_parse;
use crate::constants::{DEFAULT_FAULT_LOG_CAPACITY, RECENT_FAULTS_KEPT};
use crate::telemetry::metrics::with_metrics;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Reaction of a loop to a failed snapshot update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(utoipa::ToSchema)]
pub enum FaultPolicy {
    /// The loop enters `Aborted` and exits. Other loops are unaffected.
    #[default]
    AbortSensor,
    /// The fault is logged and the loop keeps ticking.
    LogAndContinue,
}

impl FromStr for FaultPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "abort_sensor" | "abort" => Ok(Self::AbortSensor),
            "log_and_continue" | "continue" => Ok(Self::LogAndContinue),
            other => Err(format!("unknown fault policy '{}'", other)),
        }
    }
}

/// Configuration for the sensor scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub fault_policy: FaultPolicy,

    /// Upper bound on ticks persisting at the same time. `None` is unbounded.
    pub max_concurrent_ticks: Option<usize>,

    /// Faults buffered between the loops and the supervisor. Faults reported
    /// while the buffer is full are counted as dropped.
    pub fault_log_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fault_policy: FaultPolicy::default(),
            max_concurrent_ticks: None,
            fault_log_capacity: DEFAULT_FAULT_LOG_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Create configuration from environment variables.
    ///
    /// - `FATHOM_FAULT_POLICY`: `abort_sensor` (default) or `log_and_continue`
    /// - `FATHOM_MAX_CONCURRENT_TICKS`: positive bound, `0` for unbounded
    /// - `FATHOM_FAULT_LOG_CAPACITY`: default 256
    pub fn from_env() -> Self {
        Self::default().apply_env(&|k: &str| std::env::var(k).ok())
    }

    pub fn apply_env<L: Fn(&str) -> Option<String>>(mut self, lookup: &L) -> Self {
        if let Some(policy) = env_parse(lookup, "FATHOM_FAULT_POLICY") {
            self.fault_policy = policy;
        }
        if let Some(bound) = env_parse::<usize, _>(lookup, "FATHOM_MAX_CONCURRENT_TICKS") {
            self.max_concurrent_ticks = (bound > 0).then_some(bound);
        }
        if let Some(capacity) = env_parse::<usize, _>(lookup, "FATHOM_FAULT_LOG_CAPACITY") {
            self.fault_log_capacity = capacity.max(1);
        }
        self
    }

    /// Keep every loop alive so faults stay visible while iterating locally.
    pub fn development() -> Self {
        Self {
            fault_policy: FaultPolicy::LogAndContinue,
            ..Self::default()
        }
    }

    /// Abort failing sensors and cap concurrent persistence.
    pub fn production() -> Self {
        Self {
            fault_policy: FaultPolicy::AbortSensor,
            max_concurrent_ticks: Some(32),
            fault_log_capacity: 1024,
        }
    }
}

// ============================================================================
// STATE, FAULTS AND METRICS
// ============================================================================

/// Lifecycle state of one sensor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(utoipa::ToSchema)]
pub enum LoopState {
    Idle,
    Generating,
    Persisting,
    Aborted,
    Stopped,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Stopped)
    }
}

/// Which step of a tick failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(utoipa::ToSchema)]
pub enum FaultKind {
    DetectionPersist,
    SnapshotUpdate,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DetectionPersist => "detection_persist",
            Self::SnapshotUpdate => "snapshot_update",
        }
    }
}

/// One fault reported by a sensor loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[derive(utoipa::ToSchema)]
pub struct SensorFault {
    #[schema(value_type = String, format = "uuid")]
    pub sensor_id: SensorId,
    pub codename: String,
    pub kind: FaultKind,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Snapshot written. `saved` of `detections` generated detections were persisted.
    Completed { detections: usize, saved: usize },
    /// The snapshot update failed; the sensor row is unchanged.
    SnapshotFailed,
}

/// Counters shared by every loop of one scheduler.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub ticks_completed: AtomicU64,
    pub ticks_failed: AtomicU64,
    pub detections_saved: AtomicU64,
    pub faults_reported: AtomicU64,
    pub faults_dropped: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            ticks_failed: self.ticks_failed.load(Ordering::Relaxed),
            detections_saved: self.detections_saved.load(Ordering::Relaxed),
            faults_reported: self.faults_reported.load(Ordering::Relaxed),
            faults_dropped: self.faults_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SchedulerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[derive(utoipa::ToSchema)]
pub struct SchedulerMetricsSnapshot {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub detections_saved: u64,
    pub faults_reported: u64,
    pub faults_dropped: u64,
}

/// Loop counts per state plus the scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[derive(utoipa::ToSchema)]
pub struct SchedulerSummary {
    pub sensors: usize,
    pub running: usize,
    pub aborted: usize,
    pub stopped: usize,
    #[serde(flatten)]
    pub counters: SchedulerMetricsSnapshot,
}

// ============================================================================
// FAULT REPORTING
// ============================================================================

#[derive(Clone)]
struct FaultReporter {
    tx: mpsc::Sender<SensorFault>,
    metrics: Arc<SchedulerMetrics>,
}

impl FaultReporter {
    fn report(&self, fault: SensorFault) {
        self.metrics.faults_reported.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.tx.try_send(fault) {
            self.metrics.faults_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "Fault log full, fault dropped");
        }
    }
}

/// Drain the fault log until shutdown, then drain what is left.
async fn supervise_faults(
    mut rx: mpsc::Receiver<SensorFault>,
    recent: Arc<StdMutex<VecDeque<SensorFault>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let record = |fault: SensorFault| {
        tracing::error!(
            sensor_id = %fault.sensor_id,
            codename = %fault.codename,
            kind = fault.kind.as_str(),
            error = %fault.error,
            "Sensor fault"
        );
        with_metrics(|m| m.record_fault(fault.kind.as_str()));
        if let Ok(mut recent) = recent.lock() {
            if recent.len() == RECENT_FAULTS_KEPT {
                recent.pop_front();
            }
            recent.push_back(fault);
        }
    };

    loop {
        tokio::select! {
            biased;
            fault = rx.recv() => match fault {
                Some(fault) => record(fault),
                None => return,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    while let Ok(fault) = rx.try_recv() {
        record(fault);
    }
}

// ============================================================================
// SENSOR LOOP
// ============================================================================

/// Everything one sensor needs to tick. Owned by exactly one task.
pub struct SensorLoop {
    sensor_id: SensorId,
    codename: Codename,
    depth: f64,
    period: Duration,
    /// Last persisted transparency; the next value walks from here.
    transparency: u8,
    policy: FaultPolicy,
    store: Arc<dyn SensorStore>,
    catalog: Arc<[String]>,
    permits: Option<Arc<Semaphore>>,
    states: Arc<DashMap<SensorId, LoopState>>,
    faults: FaultReporter,
    metrics: Arc<SchedulerMetrics>,
    rng: StdRng,
}

impl SensorLoop {
    /// Replace the entropy-seeded generator with a deterministic one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    pub fn transparency(&self) -> u8 {
        self.transparency
    }

    fn set_state(&self, state: LoopState) {
        self.states.insert(self.sensor_id, state);
    }

    fn report(&self, kind: FaultKind, error: &FathomError) {
        self.faults.report(SensorFault {
            sensor_id: self.sensor_id,
            codename: self.codename.to_string(),
            kind,
            error: error.to_string(),
            at: Utc::now(),
        });
    }

    /// Run one tick: generate, persist detections, then write the snapshot.
    ///
    /// A failed detection insert is reported and left out of the snapshot.
    /// A failed snapshot update is reported and leaves the loop `Aborted`
    /// under [`FaultPolicy::AbortSensor`], `Idle` otherwise.
    ///
    /// With a tick bound configured the loop stays in its previous state until
    /// a permit is free.
    pub async fn run_tick(&mut self) -> TickOutcome {
        let _permit = match &self.permits {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };

        self.set_state(LoopState::Generating);
        let detections = next_detected_fish(self.sensor_id, &self.catalog[..], &mut self.rng);
        let temperature = next_temperature(self.depth, &mut self.rng);
        let transparency = next_transparency(self.transparency, &mut self.rng);

        self.set_state(LoopState::Persisting);

        let mut saved = Vec::with_capacity(detections.len());
        for fish in &detections {
            match self.store.save_detected_fish(fish).await {
                Ok(stored) => saved.push(stored.id),
                Err(e) => self.report(FaultKind::DetectionPersist, &e),
            }
        }
        self.metrics
            .detections_saved
            .fetch_add(saved.len() as u64, Ordering::Relaxed);

        let snapshot = SensorSnapshot {
            sensor_id: self.sensor_id,
            temperature,
            transparency,
            detected_fish: saved,
            updated_at: Utc::now(),
        };

        match self.store.update_sensor_data(&snapshot).await {
            Ok(()) => {
                self.transparency = transparency;
                self.set_state(LoopState::Idle);
                self.metrics.ticks_completed.fetch_add(1, Ordering::Relaxed);
                with_metrics(|m| m.record_tick("completed"));
                tracing::debug!(
                    codename = %self.codename,
                    temperature,
                    transparency,
                    detections = snapshot.detected_fish.len(),
                    "Sensor tick persisted"
                );
                TickOutcome::Completed {
                    detections: detections.len(),
                    saved: snapshot.detected_fish.len(),
                }
            }
            Err(e) => {
                self.report(FaultKind::SnapshotUpdate, &e);
                self.metrics.ticks_failed.fetch_add(1, Ordering::Relaxed);
                with_metrics(|m| m.record_tick("snapshot_failed"));
                let next = match self.policy {
                    FaultPolicy::AbortSensor => LoopState::Aborted,
                    FaultPolicy::LogAndContinue => LoopState::Idle,
                };
                self.set_state(next);
                TickOutcome::SnapshotFailed
            }
        }
    }

    /// Tick until stopped, shut down or aborted.
    async fn run(
        mut self,
        mut stop_rx: watch::Receiver<bool>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        with_metrics(|m| m.loop_started());
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            codename = %self.codename,
            period_secs = self.period.as_secs(),
            "Sensor loop started"
        );

        loop {
            if *stop_rx.borrow() || *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let outcome = self.run_tick().await;
                    if outcome == TickOutcome::SnapshotFailed
                        && self.policy == FaultPolicy::AbortSensor
                    {
                        tracing::warn!(codename = %self.codename, "Sensor loop aborted");
                        with_metrics(|m| m.loop_finished());
                        return;
                    }
                }
            }
        }

        self.set_state(LoopState::Stopped);
        with_metrics(|m| m.loop_finished());
        tracing::info!(codename = %self.codename, "Sensor loop stopped");
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct SensorTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns one loop per sensor.
///
/// Must be created inside a tokio runtime: the fault supervisor is spawned
/// by [`SensorScheduler::new`].
pub struct SensorScheduler {
    store: Arc<dyn SensorStore>,
    config: SchedulerConfig,
    catalog: Arc<[String]>,
    tasks: Mutex<HashMap<SensorId, SensorTask>>,
    states: Arc<DashMap<SensorId, LoopState>>,
    shutdown_tx: watch::Sender<bool>,
    fault_tx: mpsc::Sender<SensorFault>,
    recent_faults: Arc<StdMutex<VecDeque<SensorFault>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    permits: Option<Arc<Semaphore>>,
    metrics: Arc<SchedulerMetrics>,
}

impl SensorScheduler {
    pub fn new(store: Arc<dyn SensorStore>, config: SchedulerConfig, catalog: Vec<String>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fault_tx, fault_rx) = mpsc::channel(config.fault_log_capacity.max(1));
        let recent_faults = Arc::new(StdMutex::new(VecDeque::with_capacity(RECENT_FAULTS_KEPT)));
        let supervisor = tokio::spawn(supervise_faults(
            fault_rx,
            Arc::clone(&recent_faults),
            shutdown_rx,
        ));
        let permits = config
            .max_concurrent_ticks
            .map(|bound| Arc::new(Semaphore::new(bound.max(1))));

        Self {
            store,
            config,
            catalog: catalog.into(),
            tasks: Mutex::new(HashMap::new()),
            states: Arc::new(DashMap::new()),
            shutdown_tx,
            fault_tx,
            recent_faults,
            supervisor: Mutex::new(Some(supervisor)),
            permits,
            metrics: Arc::new(SchedulerMetrics::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Build the loop for `sensor` without spawning it.
    pub fn sensor_loop(&self, sensor: &Sensor) -> SensorLoop {
        SensorLoop {
            sensor_id: sensor.id,
            codename: sensor.codename.clone(),
            depth: sensor.coordinates.depth(),
            period: sensor.output_interval(),
            transparency: sensor.transparency.min(100),
            policy: self.config.fault_policy,
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
            permits: self.permits.clone(),
            states: Arc::clone(&self.states),
            faults: FaultReporter {
                tx: self.fault_tx.clone(),
                metrics: Arc::clone(&self.metrics),
            },
            metrics: Arc::clone(&self.metrics),
            rng: StdRng::from_os_rng(),
        }
    }

    fn spawn_loop(&self, sensor: &Sensor) -> SensorTask {
        let (stop_tx, stop_rx) = watch::channel(false);
        let sensor_loop = self.sensor_loop(sensor);
        self.states.insert(sensor.id, LoopState::Idle);
        let handle = tokio::spawn(sensor_loop.run(stop_rx, self.shutdown_tx.subscribe()));
        SensorTask { stop_tx, handle }
    }

    /// Launch one loop per sensor. Sensors that already have a live loop are
    /// skipped. Returns the number of loops launched.
    pub async fn start(&self, sensors: &[Sensor]) -> usize {
        if self.is_shut_down() {
            tracing::warn!("Scheduler already shut down, not starting sensors");
            return 0;
        }

        let mut tasks = self.tasks.lock().await;
        let mut launched = 0;
        for sensor in sensors {
            if let Some(existing) = tasks.get(&sensor.id) {
                if !existing.handle.is_finished() {
                    tracing::debug!(codename = %sensor.codename, "Sensor loop already running");
                    continue;
                }
            }
            tasks.insert(sensor.id, self.spawn_loop(sensor));
            launched += 1;
        }

        tracing::info!(launched, total = tasks.len(), "Sensor scheduler started");
        launched
    }

    /// Stop the loop of `sensor` if any and start a fresh one from the
    /// sensor's persisted readings.
    ///
    /// The task table stays locked across both steps so a concurrent
    /// [`start`](Self::start) cannot slip a second loop in between.
    pub async fn relaunch(&self, sensor: &Sensor) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.remove(&sensor.id) {
            stop_task(sensor.id, task).await;
        }
        tasks.insert(sensor.id, self.spawn_loop(sensor));
        tracing::info!(codename = %sensor.codename, "Sensor loop relaunched");
        true
    }

    /// Stop one loop and wait for it to exit. Returns false for unknown sensors.
    pub async fn stop(&self, sensor_id: SensorId) -> bool {
        let task = self.tasks.lock().await.remove(&sensor_id);
        match task {
            Some(task) => {
                stop_task(sensor_id, task).await;
                true
            }
            None => false,
        }
    }

    /// Signal every loop to stop and wait for all of them and the supervisor.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<(SensorId, SensorTask)> = self.tasks.lock().await.drain().collect();
        let count = tasks.len();
        for (sensor_id, task) in tasks {
            if let Err(e) = task.handle.await {
                tracing::error!(sensor_id = %sensor_id, error = %e, "Sensor loop panicked");
            }
        }

        if let Some(supervisor) = self.supervisor.lock().await.take() {
            if let Err(e) = supervisor.await {
                tracing::error!(error = %e, "Fault supervisor panicked");
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            loops = count,
            ticks_completed = snapshot.ticks_completed,
            ticks_failed = snapshot.ticks_failed,
            faults_reported = snapshot.faults_reported,
            faults_dropped = snapshot.faults_dropped,
            "Sensor scheduler shut down"
        );
    }

    /// Current state of one loop, `None` for sensors never started.
    pub fn state(&self, sensor_id: SensorId) -> Option<LoopState> {
        self.states.get(&sensor_id).map(|s| *s)
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Faults seen by the supervisor, oldest first.
    pub fn recent_faults(&self) -> Vec<SensorFault> {
        self.recent_faults
            .lock()
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> SchedulerSummary {
        let mut summary = SchedulerSummary {
            counters: self.metrics.snapshot(),
            ..SchedulerSummary::default()
        };
        for entry in self.states.iter() {
            summary.sensors += 1;
            match *entry.value() {
                LoopState::Aborted => summary.aborted += 1,
                LoopState::Stopped => summary.stopped += 1,
                _ => summary.running += 1,
            }
        }
        summary
    }
}

async fn stop_task(sensor_id: SensorId, task: SensorTask) {
    let _ = task.stop_tx.send(true);
    if let Err(e) = task.handle.await {
        tracing::error!(sensor_id = %sensor_id, error = %e, "Sensor loop panicked");
    }
}

impl std::fmt::Debug for SensorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorScheduler")
            .field("config", &self.config)
            .field("sensors", &self.states.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_storage::{MockSensorStore, StoreOperation};
    use fathom_test_utils::{sample_sensor, seeded_store};
    use std::collections::HashMap as Lookup;

    fn catalog() -> Vec<String> {
        fathom_core::SPECIES_CATALOG
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn scheduler(store: &MockSensorStore, config: SchedulerConfig) -> SensorScheduler {
        SensorScheduler::new(Arc::new(store.clone()), config, catalog())
    }

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.fault_policy, FaultPolicy::AbortSensor);
        assert_eq!(config.max_concurrent_ticks, None);
        assert_eq!(config.fault_log_capacity, DEFAULT_FAULT_LOG_CAPACITY);
    }

    #[test]
    fn test_config_env() {
        let vars: Lookup<&str, &str> = [
            ("FATHOM_FAULT_POLICY", "log-and-continue"),
            ("FATHOM_MAX_CONCURRENT_TICKS", "0"),
            ("FATHOM_FAULT_LOG_CAPACITY", "8"),
        ]
        .into_iter()
        .collect();
        let config = SchedulerConfig::production()
            .apply_env(&|k: &str| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.fault_policy, FaultPolicy::LogAndContinue);
        assert_eq!(config.max_concurrent_ticks, None);
        assert_eq!(config.fault_log_capacity, 8);
    }

    #[test]
    fn test_fault_policy_parse() {
        assert_eq!("abort_sensor".parse(), Ok(FaultPolicy::AbortSensor));
        assert_eq!("LOG_AND_CONTINUE".parse(), Ok(FaultPolicy::LogAndContinue));
        assert!("retry".parse::<FaultPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_run_tick_round_trip() {
        let (store, sensors) = seeded_store(&["alpha"], 1).await;
        let sensor = &sensors[0];
        let scheduler = scheduler(&store, SchedulerConfig::default());
        let mut sensor_loop = scheduler.sensor_loop(sensor).with_seed(7);

        let outcome = sensor_loop.run_tick().await;
        let TickOutcome::Completed { detections, saved } = outcome else {
            panic!("tick failed: {:?}", outcome);
        };
        assert_eq!(detections, saved);

        let stored = store.sensor(sensor.id).expect("sensor exists");
        assert!(stored.updated_at.is_some());
        assert_eq!(stored.transparency, sensor_loop.transparency());
        assert!(stored.temperature >= fathom_core::temperature_floor(sensor.coordinates.z));
        assert_eq!(stored.detected_fish.len(), saved);
        assert_eq!(store.detections_for(sensor.id).len(), saved);
        assert_eq!(scheduler.state(sensor.id), Some(LoopState::Idle));
    }

    #[tokio::test]
    async fn test_transparency_walks_from_last_value() {
        let (store, sensors) = seeded_store(&["alpha"], 1).await;
        let scheduler = scheduler(&store, SchedulerConfig::default());
        let mut sensor_loop = scheduler.sensor_loop(&sensors[0]).with_seed(11);

        for _ in 0..20 {
            let before = sensor_loop.transparency();
            sensor_loop.run_tick().await;
            let after = sensor_loop.transparency();
            assert!(after.abs_diff(before) <= 10);
            assert!(after <= 100);
        }
    }

    #[tokio::test]
    async fn test_detection_failure_is_not_fatal() {
        let (store, sensors) = seeded_store(&["alpha"], 1).await;
        store.fail_operation(StoreOperation::SaveDetectedFish);
        let scheduler = scheduler(&store, SchedulerConfig::default());
        let mut sensor_loop = scheduler.sensor_loop(&sensors[0]).with_seed(3);

        // Tick until the generator picks at least one species.
        let mut generated = 0;
        for _ in 0..10 {
            match sensor_loop.run_tick().await {
                TickOutcome::Completed { detections, saved } => {
                    assert_eq!(saved, 0);
                    generated += detections;
                }
                TickOutcome::SnapshotFailed => panic!("snapshot should succeed"),
            }
        }
        assert!(generated > 0);
        assert_eq!(store.detection_count(), 0);
        assert_eq!(scheduler.metrics().faults_reported, generated as u64);
        assert_eq!(scheduler.state(sensors[0].id), Some(LoopState::Idle));
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_under_default_policy() {
        let (store, sensors) = seeded_store(&["alpha"], 1).await;
        store.fail_updates_for(sensors[0].id);
        let scheduler = scheduler(&store, SchedulerConfig::default());
        let mut sensor_loop = scheduler.sensor_loop(&sensors[0]);

        assert_eq!(sensor_loop.run_tick().await, TickOutcome::SnapshotFailed);
        assert_eq!(scheduler.state(sensors[0].id), Some(LoopState::Aborted));
        assert_eq!(sensor_loop.transparency(), sensors[0].transparency);
        assert_eq!(scheduler.metrics().ticks_failed, 1);
    }

    #[tokio::test]
    async fn test_snapshot_failure_continues_when_configured() {
        let (store, sensors) = seeded_store(&["alpha"], 1).await;
        store.fail_updates_for(sensors[0].id);
        let scheduler = scheduler(&store, SchedulerConfig::development());
        let mut sensor_loop = scheduler.sensor_loop(&sensors[0]);

        assert_eq!(sensor_loop.run_tick().await, TickOutcome::SnapshotFailed);
        assert_eq!(scheduler.state(sensors[0].id), Some(LoopState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_tick_at_their_own_rate() {
        let store = MockSensorStore::new();
        let fast = sample_sensor("alpha", 1, 5);
        let slow = sample_sensor("alpha", 2, 10);
        store.insert_sensor(fast.clone()).expect("insert");
        store.insert_sensor(slow.clone()).expect("insert");

        let scheduler = scheduler(&store, SchedulerConfig::default());
        assert_eq!(scheduler.start(&[fast.clone(), slow.clone()]).await, 2);
        tokio::time::sleep(Duration::from_secs(21)).await;

        // fast: 5, 10, 15, 20; slow: 10, 20
        assert_eq!(store.call_count(StoreOperation::UpdateSensorData), 6);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_skips_running_sensors() {
        let (store, sensors) = seeded_store(&["alpha"], 2).await;
        let scheduler = scheduler(&store, SchedulerConfig::default());
        assert_eq!(scheduler.start(&sensors).await, 2);
        assert_eq!(scheduler.start(&sensors).await, 0);
        scheduler.shutdown().await;
        assert_eq!(scheduler.start(&sensors).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_isolation() {
        let (store, sensors) = seeded_store(&["alpha"], 3).await;
        let broken = sensors[0].id;
        store.fail_updates_for(broken);

        let scheduler = scheduler(&store, SchedulerConfig::default());
        scheduler.start(&sensors).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(scheduler.state(broken), Some(LoopState::Aborted));
        for sensor in &sensors[1..] {
            assert_eq!(scheduler.state(sensor.id), Some(LoopState::Idle));
            assert!(store.sensor(sensor.id).and_then(|s| s.updated_at).is_some());
        }
        assert!(store.sensor(broken).and_then(|s| s.updated_at).is_none());

        scheduler.shutdown().await;
        let summary = scheduler.summary();
        assert_eq!(summary.aborted, 1);
        assert_eq!(summary.stopped, 2);
        assert!(scheduler
            .recent_faults()
            .iter()
            .any(|f| f.sensor_id == broken && f.kind == FaultKind::SnapshotUpdate));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_every_loop() {
        let (store, sensors) = seeded_store(&["alpha", "beta"], 3).await;
        let scheduler = scheduler(&store, SchedulerConfig::default());
        scheduler.start(&sensors).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        scheduler.shutdown().await;
        for sensor in &sensors {
            assert_eq!(scheduler.state(sensor.id), Some(LoopState::Stopped));
        }
        assert_eq!(scheduler.summary().running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_relaunch_one_sensor() {
        let (store, sensors) = seeded_store(&["alpha"], 2).await;
        let target = sensors[0].clone();
        store.fail_updates_for(target.id);

        let scheduler = scheduler(&store, SchedulerConfig::default());
        scheduler.start(&sensors).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(scheduler.state(target.id), Some(LoopState::Aborted));

        // No automatic restart: still aborted after more time passes.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(scheduler.state(target.id), Some(LoopState::Aborted));

        assert!(scheduler.relaunch(&target).await);
        assert_eq!(scheduler.state(target.id), Some(LoopState::Idle));

        assert!(scheduler.stop(sensors[1].id).await);
        assert_eq!(scheduler.state(sensors[1].id), Some(LoopState::Stopped));
        assert!(!scheduler.stop(SensorId::now_v7()).await);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_relaunch_racing_start_leaves_one_loop() {
        let (store, sensors) = seeded_store(&["alpha"], 1).await;
        let target = sensors[0].clone();
        let scheduler = scheduler(&store, SchedulerConfig::default());
        scheduler.start(std::slice::from_ref(&target)).await;

        let (relaunched, started) = tokio::join!(
            scheduler.relaunch(&target),
            scheduler.start(std::slice::from_ref(&target))
        );
        assert!(relaunched);
        assert_eq!(started, 0);

        store.reset_call_counts();
        tokio::time::sleep(target.output_interval() + Duration::from_millis(500)).await;
        assert_eq!(store.call_count(StoreOperation::UpdateSensorData), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_waiting_for_permit_is_not_generating() {
        let (store, sensors) = seeded_store(&["alpha"], 1).await;
        let config = SchedulerConfig {
            max_concurrent_ticks: Some(1),
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(&store, config);
        let held = scheduler
            .permits
            .clone()
            .expect("bounded scheduler")
            .acquire_owned()
            .await
            .expect("permit");

        let mut sensor_loop = scheduler.sensor_loop(&sensors[0]).with_seed(7);
        let tick = tokio::spawn(async move { sensor_loop.run_tick().await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_ne!(scheduler.state(sensors[0].id), Some(LoopState::Generating));
        assert_ne!(scheduler.state(sensors[0].id), Some(LoopState::Persisting));
        assert_eq!(store.call_count(StoreOperation::UpdateSensorData), 0);

        drop(held);
        let outcome = tick.await.expect("tick task");
        assert!(matches!(outcome, TickOutcome::Completed { .. }));
        assert_eq!(scheduler.state(sensors[0].id), Some(LoopState::Idle));

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_concurrency_still_ticks_everyone() {
        let (store, sensors) = seeded_store(&["alpha", "beta"], 4).await;
        let config = SchedulerConfig {
            max_concurrent_ticks: Some(1),
            ..SchedulerConfig::default()
        };
        let scheduler = scheduler(&store, config);
        scheduler.start(&sensors).await;
        tokio::time::sleep(Duration::from_secs(26)).await;

        for sensor in &sensors {
            assert!(store.sensor(sensor.id).and_then(|s| s.updated_at).is_some());
        }
        scheduler.shutdown().await;
    }
}
