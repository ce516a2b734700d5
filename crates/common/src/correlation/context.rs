//! Correlation context: the record of one governed operation

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::CommonError;

/// Lifecycle status of a correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl CorrelationStatus {
    /// Terminal statuses end the correlation and require an `end_time`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for CorrelationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrelationStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "TIMEOUT" => Ok(Self::Timeout),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(CommonError::serialization_format(
                "status",
                format!("unknown correlation status '{other}'"),
            )),
        }
    }
}

/// Timestamped event attached to a correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEvent {
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Everything recorded about one governed operation
///
/// `end_time` and `duration` are set exactly when `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub correlation_id: String,
    pub operation_type: String,
    pub operation_name: String,
    pub user: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: CorrelationStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between `start_time` and `end_time`
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub debug_trace: Vec<String>,
    #[serde(default)]
    pub events: Vec<CorrelationEvent>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub checkpoints: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Value the operation produced, recorded at completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl CorrelationContext {
    /// Create a pending context with a fresh v4 id
    pub fn new(
        operation_type: impl Into<String>,
        operation_name: impl Into<String>,
        user: impl Into<String>,
        metadata: Map<String, Value>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            operation_type: operation_type.into(),
            operation_name: operation_name.into(),
            user: user.into(),
            metadata,
            status: CorrelationStatus::Pending,
            start_time,
            end_time: None,
            duration: None,
            debug_trace: Vec::new(),
            events: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            checkpoints: Vec::new(),
            metrics: BTreeMap::new(),
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time since `start_time`, zero if `now` precedes it
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).to_std().unwrap_or_default()
    }

    /// Recorded duration of a finished correlation
    pub fn elapsed(&self) -> Option<Duration> {
        self.duration.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn add_trace(&mut self, message: impl Into<String>) {
        self.debug_trace.push(message.into());
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn add_checkpoint(&mut self, name: impl Into<String>) {
        self.checkpoints.push(name.into());
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.insert(name.into(), value);
    }

    pub fn add_event(&mut self, event_type: impl Into<String>, data: Value, timestamp: DateTime<Utc>) {
        self.events.push(CorrelationEvent { event_type: event_type.into(), data, timestamp });
    }

    /// Shallow-merge `update` into the metadata, overwriting existing keys
    pub fn merge_metadata(&mut self, update: Map<String, Value>) {
        self.metadata.extend(update);
    }

    /// Move to a terminal status, stamping `end_time` and `duration`
    pub(crate) fn finish(
        &mut self,
        status: CorrelationStatus,
        end_time: DateTime<Utc>,
        result: Option<Value>,
        error: Option<String>,
    ) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.end_time = Some(end_time);
        self.duration = Some((end_time - self.start_time).num_microseconds().unwrap_or(i64::MAX)
            as f64
            / 1_000_000.0);
        if result.is_some() {
            self.result = result;
        }
        if let Some(error) = error {
            self.errors.push(error);
        }
    }
}

/// Optional changes applied by [`CorrelationTracker::update_correlation`]
///
/// [`CorrelationTracker::update_correlation`]: super::CorrelationTracker::update_correlation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelationUpdate {
    pub status: Option<CorrelationStatus>,
    pub metadata: Option<Map<String, Value>>,
    pub trace: Option<String>,
    pub error: Option<String>,
    pub warning: Option<String>,
}

impl CorrelationUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: CorrelationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn trace(mut self, message: impl Into<String>) -> Self {
        self.trace = Some(message.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn warning(mut self, message: impl Into<String>) -> Self {
        self.warning = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn context() -> CorrelationContext {
        CorrelationContext::new("validation", "check_docs", "ci", Map::new(), Utc::now())
    }

    #[test]
    fn test_status_terminal_set() {
        assert!(!CorrelationStatus::Pending.is_terminal());
        assert!(!CorrelationStatus::InProgress.is_terminal());
        assert!(CorrelationStatus::Completed.is_terminal());
        assert!(CorrelationStatus::Failed.is_terminal());
        assert!(CorrelationStatus::Timeout.is_terminal());
        assert!(CorrelationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(CorrelationStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!("in_progress".parse::<CorrelationStatus>().unwrap(), CorrelationStatus::InProgress);
        assert!("DONE".parse::<CorrelationStatus>().is_err());
        assert_eq!(serde_json::to_value(CorrelationStatus::Timeout).unwrap(), json!("TIMEOUT"));
    }

    #[test]
    fn test_new_context_is_pending_with_unique_id() {
        let a = context();
        let b = context();
        assert_eq!(a.status, CorrelationStatus::Pending);
        assert!(a.end_time.is_none());
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(Uuid::parse_str(&a.correlation_id).is_ok());
    }

    #[test]
    fn test_finish_sets_end_time_and_duration() {
        let mut ctx = context();
        let end = ctx.start_time + chrono::Duration::milliseconds(1500);

        ctx.finish(CorrelationStatus::Failed, end, Some(json!({"ok": false})), Some("boom".into()));

        assert_eq!(ctx.end_time, Some(end));
        assert_eq!(ctx.duration, Some(1.5));
        assert_eq!(ctx.elapsed(), Some(Duration::from_millis(1500)));
        assert_eq!(ctx.errors, vec!["boom"]);
        assert_eq!(ctx.result, Some(json!({"ok": false})));
    }

    #[test]
    fn test_merge_metadata_overwrites_keys() {
        let mut ctx = context();
        ctx.merge_metadata(json!({"a": 1, "b": 2}).as_object().cloned().unwrap());
        ctx.merge_metadata(json!({"b": 3}).as_object().cloned().unwrap());
        assert_eq!(Value::Object(ctx.metadata), json!({"a": 1, "b": 3}));
    }

    #[test]
    fn test_age_never_negative() {
        let ctx = context();
        assert_eq!(ctx.age(ctx.start_time - chrono::Duration::seconds(5)), Duration::ZERO);
        assert_eq!(ctx.age(ctx.start_time + chrono::Duration::seconds(5)), Duration::from_secs(5));
    }
}
