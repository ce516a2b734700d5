//! Temporary persistence directories for correlation snapshots

use std::io;

/// Create a self-deleting directory suitable for `TrackerConfig::persistence_dir`
pub fn persistence_dir() -> io::Result<tempfile::TempDir> {
    tempfile::Builder::new().prefix("warden-correlations-").tempdir()
}
