//! Configuration loader
//!
//! ## Loading Strategy
//! 1. `WARDEN_CONFIG` names a file explicitly; otherwise the standard
//!    locations are searched
//! 2. Without a file, built-in defaults are used
//! 3. `WARDEN_*` environment variables override individual fields
//!
//! ## Environment Variables
//! - `WARDEN_CONFIG`: explicit config file path
//! - `WARDEN_MAX_HISTORY_SIZE`, `WARDEN_CORRELATION_TTL_SECONDS`,
//!   `WARDEN_CLEANUP_INTERVAL_SECONDS`, `WARDEN_PERSISTENCE_DIR`
//! - `WARDEN_FAILURE_THRESHOLD`, `WARDEN_RECOVERY_TIMEOUT_SECONDS`,
//!   `WARDEN_SUCCESS_THRESHOLD`, `WARDEN_HALF_OPEN_MAX_CALLS`
//! - `WARDEN_RETRY_MAX_ATTEMPTS`, `WARDEN_RETRY_INITIAL_DELAY_SECONDS`,
//!   `WARDEN_RETRY_MAX_DELAY_SECONDS`, `WARDEN_RETRY_JITTER`
//! - `WARDEN_LOG_LEVEL`, `WARDEN_LOG_JSON`
//!
//! ## File Locations
//! `warden.toml` then `warden.json` in the working directory, its parent
//! and grandparent, then the same names next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use super::WardenConfig;
use crate::error::{CommonError, CommonResult};

const CONFIG_NAMES: [&str; 2] = ["warden.toml", "warden.json"];

/// Load configuration from file (if any) and environment overrides
///
/// # Errors
/// Returns `CommonError::Config` for unreadable or malformed files and for
/// override values that do not parse.
pub fn load() -> CommonResult<WardenConfig> {
    let explicit = std::env::var("WARDEN_CONFIG").ok().map(PathBuf::from);

    let mut config = match explicit.or_else(find_config_file) {
        Some(path) => load_from_file(&path)?,
        None => {
            debug!("No config file found, using defaults");
            WardenConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Load configuration from a `.toml` or `.json` file
///
/// # Errors
/// Returns `CommonError::NotFound` if the file does not exist and
/// `CommonError::Config`/`Serialization` if it cannot be parsed.
pub fn load_from_file(path: &Path) -> CommonResult<WardenConfig> {
    if !path.exists() {
        return Err(CommonError::not_found_with_id("config file", path.display().to_string()));
    }

    info!(path = %path.display(), "Loading configuration from file");
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, path)
}

fn parse_config(contents: &str, path: &Path) -> CommonResult<WardenConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => Ok(serde_json::from_str(contents)?),
        other => Err(CommonError::config(format!("Unsupported config format: {other}"))),
    }
}

/// First existing config file among the standard locations
pub fn find_config_file() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Override fields from `WARDEN_*` environment variables
///
/// # Errors
/// Returns `CommonError::Config` naming the variable whose value does not
/// parse.
pub fn apply_env_overrides(config: &mut WardenConfig) -> CommonResult<()> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

fn apply_overrides(
    config: &mut WardenConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> CommonResult<()> {
    let tracker = &mut config.tracker;
    override_parsed(&lookup, "WARDEN_MAX_HISTORY_SIZE", &mut tracker.max_history_size)?;
    override_parsed(&lookup, "WARDEN_CORRELATION_TTL_SECONDS", &mut tracker.correlation_ttl_seconds)?;
    override_parsed(&lookup, "WARDEN_CLEANUP_INTERVAL_SECONDS", &mut tracker.cleanup_interval_seconds)?;
    if let Some(dir) = lookup("WARDEN_PERSISTENCE_DIR") {
        tracker.persistence_dir = Some(PathBuf::from(dir));
    }

    let breaker = &mut config.circuit_breaker;
    override_parsed(&lookup, "WARDEN_FAILURE_THRESHOLD", &mut breaker.failure_threshold)?;
    override_parsed(&lookup, "WARDEN_RECOVERY_TIMEOUT_SECONDS", &mut breaker.recovery_timeout_seconds)?;
    override_parsed(&lookup, "WARDEN_SUCCESS_THRESHOLD", &mut breaker.success_threshold)?;
    override_parsed(&lookup, "WARDEN_HALF_OPEN_MAX_CALLS", &mut breaker.half_open_max_calls)?;

    let retry = &mut config.retry;
    override_parsed(&lookup, "WARDEN_RETRY_MAX_ATTEMPTS", &mut retry.max_attempts)?;
    override_parsed(&lookup, "WARDEN_RETRY_INITIAL_DELAY_SECONDS", &mut retry.initial_delay_seconds)?;
    override_parsed(&lookup, "WARDEN_RETRY_MAX_DELAY_SECONDS", &mut retry.max_delay_seconds)?;
    if let Some(value) = lookup("WARDEN_RETRY_JITTER") {
        retry.jitter = parse_bool(&value);
    }

    if let Some(level) = lookup("WARDEN_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(value) = lookup("WARDEN_LOG_JSON") {
        config.logging.json = parse_bool(&value);
    }

    Ok(())
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> CommonResult<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| CommonError::config_field(key, format!("invalid value '{raw}': {e}")))?;
    }
    Ok(())
}

/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
