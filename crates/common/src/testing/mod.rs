//! Testing utilities and helpers
//!
//! - **[`time`]**: the [`Clock`] abstraction used by breakers and the
//!   correlation tracker, with a controllable [`MockClock`]
//! - **[`errors`]**: a classified error type for exercising retry and
//!   breaker filters
//! - **[`temp`]** (`test-utils`): temporary persistence directories

pub mod errors;
#[cfg(feature = "test-utils")]
pub mod temp;
pub mod time;

pub use errors::FlakyError;
#[cfg(feature = "test-utils")]
pub use temp::persistence_dir;
pub use time::{Clock, MockClock, SystemClock};
