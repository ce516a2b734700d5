//! Classified error type for exercising retry conditions and breaker filters

use std::time::Duration;

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Failure raised by simulated governed operations
///
/// `Transient` failures classify as retryable, `Permanent` ones do not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlakyError {
    /// Failure expected to clear on its own
    #[error("transient failure: {0}")]
    Transient(String),

    /// Failure that will repeat on every attempt
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl FlakyError {
    /// Shorthand for a transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Shorthand for a permanent failure
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }
}

impl ErrorClassification for FlakyError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Transient(_) => ErrorSeverity::Warning,
            Self::Permanent(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
