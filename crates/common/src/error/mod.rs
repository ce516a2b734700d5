//! Shared error taxonomy for the governance core
//!
//! Every component error in this crate either *is* a [`CommonError`] or
//! composes one, and every error type implements [`ErrorClassification`] so
//! that retry filters, circuit-breaker filters and audit logging can reason
//! about failures without knowing their concrete types.
//!
//! | Pattern | Variant | Raised by |
//! |---------|---------|-----------|
//! | **Configuration** | `Config` | config builders, settings conversions, env overrides |
//! | **Circuit Breaker** | `CircuitBreakerOpen` | conversions from breaker rejections |
//! | **Serialization** | `Serialization` | JSON/TOML config parsing, snapshot reload, status parsing |
//! | **Persistence** | `Persistence` | correlation snapshots, exports |
//! | **Not Found** | `NotFound` | missing config files |
//!
//! Module errors embed `CommonError` and use [`impl_error_classification!`]
//! to delegate classification:
//!
//! ```rust,ignore
//! #[derive(Debug, Error)]
//! pub enum TrackerError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("Unknown correlation: {0}")]
//!     Unknown(String),
//! }
//!
//! impl_error_classification!(TrackerError, Common,
//!     Self::Unknown(_) => {
//!         retryable: false,
//!         severity: ErrorSeverity::Info,
//!         critical: false,
//!     }
//! );
//! ```

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants shared by every module of the crate
#[derive(Debug, Clone, PartialEq)]
pub enum CommonError {
    /// Configuration-related errors (raised eagerly at construction time)
    Config { message: String, field: Option<String> },

    /// Circuit breaker is open, preventing operations
    CircuitBreakerOpen { service: String, retry_after: Option<Duration> },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// File persistence errors
    Persistence { message: String, operation: Option<String> },

    /// Resource not found errors
    NotFound { resource_type: String, identifier: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => match field {
                Some(field) => write!(f, "Configuration error in field '{}': {}", field, message),
                None => write!(f, "Configuration error: {}", message),
            },
            Self::CircuitBreakerOpen { service, retry_after } => match retry_after {
                Some(retry) => {
                    write!(f, "Circuit breaker open for '{}' (retry in {:?})", service, retry)
                }
                None => write!(f, "Circuit breaker open for '{}'", service),
            },
            Self::Serialization { message, format } => match format {
                Some(format) => write!(f, "Serialization error ({}): {}", format, message),
                None => write!(f, "Serialization error: {}", message),
            },
            Self::Persistence { message, operation } => match operation {
                Some(op) => write!(f, "Persistence error during '{}': {}", op, message),
                None => write!(f, "Persistence error: {}", message),
            },
            Self::NotFound { resource_type, identifier } => match identifier {
                Some(id) => write!(f, "{} not found: '{}'", resource_type, id),
                None => write!(f, "{} not found", resource_type),
            },
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } => ErrorSeverity::Error,
            Self::CircuitBreakerOpen { .. } => ErrorSeverity::Warning,
            Self::Serialization { .. } => ErrorSeverity::Error,
            Self::Persistence { .. } => ErrorSeverity::Error,
            Self::NotFound { .. } => ErrorSeverity::Info,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a circuit breaker error
    pub fn circuit_breaker<S: Into<String>>(service: S) -> Self {
        Self::CircuitBreakerOpen { service: service.into(), retry_after: None }
    }

    /// Create a circuit breaker error with retry timing
    pub fn circuit_breaker_with_retry<S: Into<String>>(service: S, retry_after: Duration) -> Self {
        Self::CircuitBreakerOpen { service: service.into(), retry_after: Some(retry_after) }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<F: Into<String>, S: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a simple persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Create a persistence error for a specific operation
    pub fn persistence_op<O: Into<String>, S: Into<String>>(operation: O, message: S) -> Self {
        Self::Persistence { message: message.into(), operation: Some(operation.into()) }
    }

    /// Create a not found error with identifier
    pub fn not_found_with_id<T: Into<String>, I: Into<String>>(
        resource_type: T,
        identifier: I,
    ) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: Some(identifier.into()) }
    }
}

/// Error classification trait for consistent error handling across modules
///
/// Retry conditions and circuit-breaker failure filters are built on top of
/// this trait (see `RetryCondition::classified` and
/// `CircuitBreakerConfigBuilder::count_classified`), so governed operations
/// map their failures onto it instead of relying on runtime type checks.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: timeouts, contention, an open circuit
    /// on a dependency that will recover.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

/// Macro to implement `From<std error>` for module errors embedding CommonError
///
/// The module error must have a variant wrapping `CommonError`, typically
/// declared with `#[from]`.
#[macro_export]
macro_rules! impl_error_conversion {
    ($error_type:ty, $variant:ident) => {
        impl From<serde_json::Error> for $error_type {
            fn from(err: serde_json::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }

        impl From<std::io::Error> for $error_type {
            fn from(err: std::io::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }
    };
}

/// Macro to implement ErrorClassification by delegating to CommonError
///
/// The embedded `CommonError` variant delegates; every other variant lists
/// its classification explicitly.
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_retryable(),
                    $(
                        $variant => $retryable,
                    )*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => e.severity(),
                    $(
                        $variant => $severity,
                    )*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_critical(),
                    $(
                        $variant => $critical,
                    )*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => e.retry_after(),
                    $(
                        $(
                            $variant => $retry_after,
                        )?
                    )*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    //! Unit tests for the shared error taxonomy

    use super::*;

    #[test]
    fn test_error_config_simple() {
        let err = CommonError::config("invalid configuration");
        assert_eq!(err.to_string(), "Configuration error: invalid configuration");
        assert!(!err.is_retryable());
        assert!(!err.is_critical());
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_error_config_with_field() {
        let err = CommonError::config_field("failure_threshold", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Configuration error in field 'failure_threshold': must be greater than 0"
        );
        assert!(matches!(err, CommonError::Config { field: Some(ref f), .. } if f == "failure_threshold"));
    }

    #[test]
    fn test_circuit_breaker_open_is_retryable_with_hint() {
        let err = CommonError::circuit_breaker_with_retry("validator", Duration::from_secs(5));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(err.to_string().contains("validator"));
    }

    #[test]
    fn test_not_found_is_informational() {
        let err = CommonError::not_found_with_id("config file", "/etc/warden.toml");
        assert_eq!(err.to_string(), "config file not found: '/etc/warden.toml'");
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: CommonError = io.into();
        assert!(matches!(err, CommonError::Persistence { .. }));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: CommonError = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("Serialization error (JSON)"));
    }

    #[test]
    fn test_severity_ordering_and_display() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
    }
}
