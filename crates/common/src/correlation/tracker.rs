//! Process-wide registry of correlation contexts
//!
//! The tracker owns the `active` map and a bounded `history` of finished
//! contexts behind a single mutex. Mutation entry points return `bool`
//! instead of errors: an unknown id is reported, never raised, so tracking
//! can never abort the operation it observes.
//!
//! Finished contexts are optionally written to `<persistence_dir>/<id>.json`.
//! Snapshot files are written after the lock is released; failures are
//! logged and counted.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::{CorrelationContext, CorrelationStatus, CorrelationUpdate};
use crate::error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
use crate::testing::time::{Clock, SystemClock};
use crate::{impl_error_classification, impl_error_conversion};

static GLOBAL_TRACKER: OnceCell<Arc<CorrelationTracker>> = OnceCell::new();

/// Process-wide tracker, created with default settings on first use
pub fn global_tracker() -> Arc<CorrelationTracker> {
    Arc::clone(GLOBAL_TRACKER.get_or_init(|| Arc::new(CorrelationTracker::with_defaults())))
}

/// Install a configured process-wide tracker
///
/// If a global tracker already exists it is returned unchanged and `config`
/// is ignored.
pub fn init_global_tracker(config: TrackerConfig) -> CommonResult<Arc<CorrelationTracker>> {
    let tracker = Arc::new(CorrelationTracker::new(config)?);
    let installed = GLOBAL_TRACKER.get_or_init(|| tracker);
    Ok(Arc::clone(installed))
}

//==============================================================================
// Errors
//==============================================================================

/// Errors from the tracker's file operations
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("No persisted snapshot for correlation '{0}'")]
    SnapshotMissing(String),

    #[error("Correlation persistence is not configured")]
    PersistenceDisabled,
}

impl_error_conversion!(CorrelationError, Common);

impl_error_classification!(CorrelationError, Common,
    Self::SnapshotMissing(_) => {
        retryable: false,
        severity: ErrorSeverity::Info,
        critical: false,
    },
    Self::PersistenceDisabled => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    }
);

//==============================================================================
// Configuration
//==============================================================================

/// Tracker limits and persistence settings
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Finished contexts retained in memory, oldest evicted first
    pub max_history_size: usize,
    /// Age after which an active correlation is swept as TIMEOUT
    pub correlation_ttl: Duration,
    /// Period of the background sweep
    pub cleanup_interval: Duration,
    /// Directory for `<id>.json` snapshots; `None` disables persistence
    pub persistence_dir: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            correlation_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
            persistence_dir: None,
        }
    }
}

impl TrackerConfig {
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    pub fn validate(&self) -> CommonResult<()> {
        if self.max_history_size == 0 {
            return Err(CommonError::config_field("max_history_size", "must be greater than 0"));
        }
        if self.correlation_ttl.is_zero() {
            return Err(CommonError::config_field("correlation_ttl", "must be greater than 0"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(CommonError::config_field("cleanup_interval", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`TrackerConfig`]
///
/// ```rust
/// use std::time::Duration;
///
/// use warden_common::correlation::TrackerConfig;
///
/// let config = TrackerConfig::builder()
///     .max_history_size(50)
///     .correlation_ttl(Duration::from_secs(120))
///     .cleanup_interval(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_history_size, 50);
/// assert!(config.persistence_dir.is_none());
/// ```
#[derive(Debug, Default)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    /// Number of finished correlations to retain
    pub fn max_history_size(mut self, size: usize) -> Self {
        self.config.max_history_size = size;
        self
    }

    /// Age at which the sweep times out an active correlation
    pub fn correlation_ttl(mut self, ttl: Duration) -> Self {
        self.config.correlation_ttl = ttl;
        self
    }

    /// Period of the background sweep task
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    /// Write a JSON snapshot of every finished correlation into `dir`
    pub fn persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.persistence_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> CommonResult<TrackerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Snapshot of tracker occupancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerStatistics {
    /// Correlations still in progress
    pub active_count: usize,
    /// Finished correlations currently retained
    pub history_size: usize,
    /// Status counts over the retained history
    pub status_distribution: BTreeMap<CorrelationStatus, usize>,
    /// Snapshot writes that failed since creation
    pub persistence_failures: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    active: HashMap<String, CorrelationContext>,
    history: VecDeque<CorrelationContext>,
    persistence_failures: u64,
}

impl TrackerState {
    fn archive(&mut self, context: CorrelationContext, max_history_size: usize) {
        self.history.push_back(context);
        while self.history.len() > max_history_size {
            if let Some(evicted) = self.history.pop_front() {
                debug!(correlation_id = %evicted.correlation_id, "Evicted correlation from history");
            }
        }
    }
}

//==============================================================================
// Tracker
//==============================================================================

/// Registry of active and recently finished correlations
pub struct CorrelationTracker {
    config: TrackerConfig,
    state: Mutex<TrackerState>,
    clock: Arc<dyn Clock>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CorrelationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CorrelationTracker")
            .field("config", &self.config)
            .field("active", &state.active.len())
            .field("history", &state.history.len())
            .finish_non_exhaustive()
    }
}

impl CorrelationTracker {
    pub fn new(config: TrackerConfig) -> CommonResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_defaults() -> Self {
        Self::from_parts(TrackerConfig::default(), Arc::new(SystemClock))
    }

    /// Create a tracker reading time from `clock` (useful for testing)
    pub fn with_clock(config: TrackerConfig, clock: Arc<dyn Clock>) -> CommonResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    fn from_parts(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state: Mutex::new(TrackerState::default()),
            clock,
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start tracking a new operation; the returned copy is IN_PROGRESS
    pub fn create_correlation(
        &self,
        operation_type: &str,
        operation_name: &str,
        user: &str,
        metadata: Option<Map<String, Value>>,
    ) -> CorrelationContext {
        let mut context = CorrelationContext::new(
            operation_type,
            operation_name,
            user,
            metadata.unwrap_or_default(),
            self.clock.now_utc(),
        );
        context.status = CorrelationStatus::InProgress;

        self.state.lock().active.insert(context.correlation_id.clone(), context.clone());
        debug!(
            correlation_id = %context.correlation_id,
            operation_type,
            operation_name,
            "Created correlation"
        );

        context
    }

    /// Look up a correlation, active ones first
    pub fn get_correlation(&self, correlation_id: &str) -> Option<CorrelationContext> {
        let state = self.state.lock();
        state
            .active
            .get(correlation_id)
            .or_else(|| state.history.iter().rev().find(|c| c.correlation_id == correlation_id))
            .cloned()
    }

    /// Apply every field of `update` to an active correlation
    ///
    /// A terminal status completes the correlation. Returns `false` for
    /// unknown or already finished ids.
    pub fn update_correlation(&self, correlation_id: &str, update: CorrelationUpdate) -> bool {
        let finished = {
            let mut state = self.state.lock();
            let Some(context) = state.active.get_mut(correlation_id) else {
                debug!(correlation_id, "Update for unknown correlation");
                return false;
            };

            if let Some(metadata) = update.metadata {
                context.merge_metadata(metadata);
            }
            if let Some(trace) = update.trace {
                context.add_trace(trace);
            }
            if let Some(error) = update.error {
                context.add_error(error);
            }
            if let Some(warning) = update.warning {
                context.add_warning(warning);
            }

            match update.status {
                Some(status) if status.is_terminal() => {
                    self.finish_locked(&mut state, correlation_id, status, None, None)
                }
                Some(status) => {
                    context.status = status;
                    None
                }
                None => None,
            }
        };

        if let Some(context) = finished {
            self.persist(&context);
        }
        true
    }

    pub fn add_checkpoint(&self, correlation_id: &str, name: &str) -> bool {
        self.with_active(correlation_id, |context, _| context.add_checkpoint(name))
    }

    pub fn add_metric(&self, correlation_id: &str, name: &str, value: f64) -> bool {
        self.with_active(correlation_id, |context, _| context.add_metric(name, value))
    }

    pub fn add_event(&self, correlation_id: &str, event_type: &str, data: Value) -> bool {
        self.with_active(correlation_id, |context, now| context.add_event(event_type, data, now))
    }

    /// Finish an active correlation and move it to history
    ///
    /// `status` must be terminal; anything else leaves the correlation
    /// untouched and returns `false`.
    pub fn complete_correlation(
        &self,
        correlation_id: &str,
        status: CorrelationStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        if !status.is_terminal() {
            warn!(correlation_id, %status, "Refusing to complete with non-terminal status");
            return false;
        }

        let finished = {
            let mut state = self.state.lock();
            self.finish_locked(&mut state, correlation_id, status, result, error)
        };

        match finished {
            Some(context) => {
                self.persist(&context);
                true
            }
            None => false,
        }
    }

    /// Counts of active and retained correlations
    pub fn get_statistics(&self) -> TrackerStatistics {
        let state = self.state.lock();
        let mut status_distribution = BTreeMap::new();
        for context in &state.history {
            *status_distribution.entry(context.status).or_insert(0) += 1;
        }

        TrackerStatistics {
            active_count: state.active.len(),
            history_size: state.history.len(),
            status_distribution,
            persistence_failures: state.persistence_failures,
        }
    }

    /// Snapshot of every active correlation
    pub fn active_correlations(&self) -> Vec<CorrelationContext> {
        self.state.lock().active.values().cloned().collect()
    }

    /// Finished correlations, most recent first
    pub fn history(&self, limit: Option<usize>) -> Vec<CorrelationContext> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit.unwrap_or(usize::MAX)).cloned().collect()
    }

    /// Correlations matching `filter`, active ones first
    pub fn query(
        &self,
        filter: impl Fn(&CorrelationContext) -> bool,
        limit: Option<usize>,
    ) -> Vec<CorrelationContext> {
        let state = self.state.lock();
        state
            .active
            .values()
            .chain(state.history.iter().rev())
            .filter(|context| filter(context))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Write the retained history, oldest first, as one JSON array
    pub fn export(&self, path: &Path) -> Result<usize, CorrelationError> {
        let history: Vec<CorrelationContext> = self.state.lock().history.iter().cloned().collect();
        let json = serde_json::to_string_pretty(&history)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;

        info!(path = %path.display(), count = history.len(), "Exported correlation history");
        Ok(history.len())
    }

    /// Read a correlation snapshot back from the persistence directory
    pub fn load_persisted(&self, correlation_id: &str) -> Result<CorrelationContext, CorrelationError> {
        let dir = self.config.persistence_dir.as_ref().ok_or(CorrelationError::PersistenceDisabled)?;
        let path = snapshot_path(dir, correlation_id);
        if !path.exists() {
            return Err(CorrelationError::SnapshotMissing(correlation_id.to_string()));
        }
        let json = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Sweep active correlations older than `correlation_ttl` as TIMEOUT
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_utc();
        let ttl = self.config.correlation_ttl;

        let swept: Vec<CorrelationContext> = {
            let mut state = self.state.lock();
            let expired: Vec<String> = state
                .active
                .values()
                .filter(|context| context.age(now) > ttl)
                .map(|context| context.correlation_id.clone())
                .collect();

            expired
                .iter()
                .filter_map(|id| {
                    self.finish_locked(
                        &mut state,
                        id,
                        CorrelationStatus::Timeout,
                        None,
                        Some(format!("Correlation exceeded TTL of {}s", ttl.as_secs())),
                    )
                })
                .collect()
        };

        for context in &swept {
            self.persist(context);
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "Timed out expired correlations");
        }
        swept.len()
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every
    /// `cleanup_interval` on the current tokio runtime
    ///
    /// Returns `false` when called outside a runtime. The task holds only a
    /// weak reference and exits once the tracker is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; correlation cleanup task not started");
            return false;
        };

        let mut task = self.cleanup_task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return true;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval;
        *task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(tracker) => {
                        tracker.cleanup_expired();
                    }
                    None => break,
                }
            }
        }));

        debug!(?period, "Started correlation cleanup task");
        true
    }

    /// Stop the sweep task and cancel every active correlation
    ///
    /// Returns the number of correlations cancelled.
    pub fn shutdown(&self) -> usize {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }

        let cancelled: Vec<CorrelationContext> = {
            let mut state = self.state.lock();
            let ids: Vec<String> = state.active.keys().cloned().collect();
            ids.iter()
                .filter_map(|id| {
                    self.finish_locked(
                        &mut state,
                        id,
                        CorrelationStatus::Cancelled,
                        None,
                        Some("Tracker shutdown".to_string()),
                    )
                })
                .collect()
        };

        for context in &cancelled {
            self.persist(context);
        }
        info!(cancelled = cancelled.len(), "Correlation tracker shut down");
        cancelled.len()
    }

    fn with_active(
        &self,
        correlation_id: &str,
        apply: impl FnOnce(&mut CorrelationContext, chrono::DateTime<chrono::Utc>),
    ) -> bool {
        let now = self.clock.now_utc();
        match self.state.lock().active.get_mut(correlation_id) {
            Some(context) => {
                apply(context, now);
                true
            }
            None => {
                debug!(correlation_id, "Mutation for unknown correlation");
                false
            }
        }
    }

    /// Finish and archive an active correlation, returning a copy of it
    fn finish_locked(
        &self,
        state: &mut TrackerState,
        correlation_id: &str,
        status: CorrelationStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Option<CorrelationContext> {
        let mut context = state.active.remove(correlation_id)?;
        context.finish(status, self.clock.now_utc(), result, error);
        debug!(correlation_id, %status, duration = ?context.duration, "Completed correlation");

        let finished = context.clone();
        state.archive(context, self.config.max_history_size);
        Some(finished)
    }

    fn persist(&self, context: &CorrelationContext) {
        let Some(dir) = self.config.persistence_dir.as_ref() else {
            return;
        };

        if let Err(e) = write_snapshot(dir, context) {
            error!(
                correlation_id = %context.correlation_id,
                dir = %dir.display(),
                error = %e,
                "Failed to persist correlation snapshot"
            );
            self.state.lock().persistence_failures += 1;
        }
    }
}

impl Drop for CorrelationTracker {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_task.get_mut().take() {
            handle.abort();
        }
    }
}

fn snapshot_path(dir: &Path, correlation_id: &str) -> PathBuf {
    dir.join(format!("{correlation_id}.json"))
}

fn write_snapshot(dir: &Path, context: &CorrelationContext) -> CommonResult<()> {
    fs::create_dir_all(dir).map_err(|e| CommonError::persistence_op("create_dir", e.to_string()))?;
    let json = serde_json::to_string_pretty(context)?;
    fs::write(snapshot_path(dir, &context.correlation_id), json)
        .map_err(|e| CommonError::persistence_op("write_snapshot", e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::MockClock;

    fn tracker_with_clock(config: TrackerConfig) -> (CorrelationTracker, MockClock) {
        let clock = MockClock::new();
        let tracker = CorrelationTracker::with_clock(config, Arc::new(clock.clone())).unwrap();
        (tracker, clock)
    }

    #[test]
    fn test_config_validation() {
        assert!(TrackerConfig::default().validate().is_ok());
        assert!(TrackerConfig::builder().max_history_size(0).build().is_err());
        assert!(TrackerConfig::builder().correlation_ttl(Duration::ZERO).build().is_err());
        assert_eq!(TrackerConfig::default().max_history_size, 1000);
    }

    #[test]
    fn test_create_and_get() {
        let tracker = CorrelationTracker::with_defaults();
        let meta = json!({"repo": "docs"}).as_object().cloned();

        let ctx = tracker.create_correlation("validation", "check_links", "alice", meta);

        assert_eq!(ctx.status, CorrelationStatus::InProgress);
        let fetched = tracker.get_correlation(&ctx.correlation_id).unwrap();
        assert_eq!(fetched, ctx);
        assert_eq!(fetched.metadata["repo"], json!("docs"));
        assert!(tracker.get_correlation("missing").is_none());
    }

    #[test]
    fn test_update_applies_all_fields() {
        let tracker = CorrelationTracker::with_defaults();
        let id = tracker.create_correlation("hook", "pre-commit", "bob", None).correlation_id;

        let applied = tracker.update_correlation(
            &id,
            CorrelationUpdate::new()
                .metadata(json!({"files": 3}).as_object().cloned().unwrap())
                .trace("scanning")
                .error("lint failed")
                .warning("slow"),
        );

        assert!(applied);
        let ctx = tracker.get_correlation(&id).unwrap();
        assert_eq!(ctx.debug_trace, vec!["scanning"]);
        assert_eq!(ctx.errors, vec!["lint failed"]);
        assert_eq!(ctx.warnings, vec!["slow"]);
        assert_eq!(ctx.metadata["files"], json!(3));
        assert_eq!(ctx.status, CorrelationStatus::InProgress);
    }

    #[test]
    fn test_unknown_ids_return_false() {
        let tracker = CorrelationTracker::with_defaults();
        assert!(!tracker.update_correlation("nope", CorrelationUpdate::new().trace("x")));
        assert!(!tracker.add_checkpoint("nope", "a"));
        assert!(!tracker.add_metric("nope", "a", 1.0));
        assert!(!tracker.add_event("nope", "a", Value::Null));
        assert!(!tracker.complete_correlation("nope", CorrelationStatus::Completed, None, None));
    }

    #[test]
    fn test_terminal_update_completes() {
        let tracker = CorrelationTracker::with_defaults();
        let id = tracker.create_correlation("hook", "pre-push", "bob", None).correlation_id;

        assert!(tracker.update_correlation(&id, CorrelationUpdate::new().status(CorrelationStatus::Failed)));

        let ctx = tracker.get_correlation(&id).unwrap();
        assert_eq!(ctx.status, CorrelationStatus::Failed);
        assert!(ctx.end_time.is_some());
        assert_eq!(tracker.get_statistics().active_count, 0);
        assert!(!tracker.update_correlation(&id, CorrelationUpdate::new().trace("late")));
    }

    #[test]
    fn test_complete_sets_duration_and_moves_to_history() {
        let (tracker, clock) = tracker_with_clock(TrackerConfig::default());
        let id = tracker.create_correlation("agent", "spawn", "ci", None).correlation_id;
        assert!(tracker.add_checkpoint(&id, "spawned"));
        assert!(tracker.add_metric(&id, "tokens", 128.0));
        assert!(tracker.add_event(&id, "decision", json!({"allow": true})));

        clock.advance(Duration::from_millis(2500));
        assert!(tracker.complete_correlation(&id, CorrelationStatus::Completed, Some(json!("ok")), None));

        let ctx = tracker.get_correlation(&id).unwrap();
        assert_eq!(ctx.duration, Some(2.5));
        assert_eq!(ctx.checkpoints, vec!["spawned"]);
        assert_eq!(ctx.metrics["tokens"], 128.0);
        assert_eq!(ctx.events[0].event_type, "decision");
        assert_eq!(ctx.result, Some(json!("ok")));

        let stats = tracker.get_statistics();
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.history_size, 1);
        assert_eq!(stats.status_distribution[&CorrelationStatus::Completed], 1);
        assert!(!tracker.complete_correlation(&id, CorrelationStatus::Completed, None, None));
    }

    #[test]
    fn test_non_terminal_completion_rejected() {
        let tracker = CorrelationTracker::with_defaults();
        let id = tracker.create_correlation("agent", "spawn", "ci", None).correlation_id;

        assert!(!tracker.complete_correlation(&id, CorrelationStatus::InProgress, None, None));
        assert_eq!(tracker.get_correlation(&id).unwrap().status, CorrelationStatus::InProgress);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let config = TrackerConfig::builder().max_history_size(10).build().unwrap();
        let tracker = CorrelationTracker::new(config).unwrap();

        let ids: Vec<String> = (0..15)
            .map(|i| {
                let id = tracker.create_correlation("op", &format!("op-{i}"), "u", None).correlation_id;
                tracker.complete_correlation(&id, CorrelationStatus::Completed, None, None);
                id
            })
            .collect();

        assert_eq!(tracker.get_statistics().history_size, 10);
        assert!(tracker.get_correlation(&ids[4]).is_none());
        assert!(tracker.get_correlation(&ids[5]).is_some());
        assert_eq!(tracker.history(Some(1))[0].correlation_id, ids[14]);
    }

    #[test]
    fn test_cleanup_expired_times_out_old_correlations() {
        let config = TrackerConfig::builder().correlation_ttl(Duration::from_secs(60)).build().unwrap();
        let (tracker, clock) = tracker_with_clock(config);

        let old = tracker.create_correlation("op", "old", "u", None).correlation_id;
        clock.advance_secs(45);
        let fresh = tracker.create_correlation("op", "fresh", "u", None).correlation_id;
        clock.advance_secs(30);

        assert_eq!(tracker.cleanup_expired(), 1);

        let swept = tracker.get_correlation(&old).unwrap();
        assert_eq!(swept.status, CorrelationStatus::Timeout);
        assert!(swept.end_time.is_some());
        assert_eq!(tracker.get_correlation(&fresh).unwrap().status, CorrelationStatus::InProgress);
    }

    #[test]
    fn test_shutdown_cancels_all_active() {
        let tracker = CorrelationTracker::with_defaults();
        for i in 0..3 {
            tracker.create_correlation("op", &format!("n{i}"), "u", None);
        }

        assert_eq!(tracker.shutdown(), 3);

        let stats = tracker.get_statistics();
        assert_eq!(stats.active_count, 0);
        assert_eq!(stats.status_distribution[&CorrelationStatus::Cancelled], 3);
    }

    #[test]
    fn test_query_filters_active_and_history() {
        let tracker = CorrelationTracker::with_defaults();
        let a = tracker.create_correlation("validation", "a", "alice", None).correlation_id;
        tracker.create_correlation("hook", "b", "alice", None);
        tracker.complete_correlation(&a, CorrelationStatus::Failed, None, Some("bad".into()));

        let failed = tracker.query(|c| c.status == CorrelationStatus::Failed, None);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].errors, vec!["bad"]);

        let alice = tracker.query(|c| c.user == "alice", Some(1));
        assert_eq!(alice.len(), 1);
    }

    #[test]
    fn test_load_persisted_without_directory() {
        let tracker = CorrelationTracker::with_defaults();
        let err = tracker.load_persisted("x").unwrap_err();
        assert!(matches!(err, CorrelationError::PersistenceDisabled));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_cleanup_task_starts_once() {
        let tracker = Arc::new(CorrelationTracker::with_defaults());
        assert!(tracker.start_cleanup_task());
        assert!(tracker.start_cleanup_task());
        tracker.shutdown();
        assert!(tracker.cleanup_task.lock().is_none());
    }

    #[test]
    fn test_cleanup_task_requires_runtime() {
        let tracker = Arc::new(CorrelationTracker::with_defaults());
        assert!(!tracker.start_cleanup_task());
    }

    #[test]
    fn test_global_tracker_is_shared() {
        let first = global_tracker();
        let id = first.create_correlation("global", "shared", "u", None).correlation_id;
        let second = global_tracker();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.get_correlation(&id).is_some());
    }
}
