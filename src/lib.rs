//! calib-registry: build a calibration registry from the MegaCam detrend database
//!
//! The Elixir detrend database is a FITS binary table listing every bias, dark,
//! flat and fringe frame along with its filter and validity window. This crate
//! reads that table and writes a SQLite registry with one table per frame type,
//! so that downstream processing can select the right calibration frame for a
//! given CCD, filter and observation time.

use std::path::PathBuf;
use thiserror::Error;

pub mod codes;
pub mod config;
pub mod detrend;
pub mod fits;
pub mod importer;
pub mod registry;

// Re-export commonly used types
pub use codes::{filter_name, ImageType};
pub use config::ImporterConfig;
pub use detrend::DetrendEntry;
pub use importer::{ImportSummary, RegistryImporter};
pub use registry::Registry;

/// Main error type for the registry importer
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// The file that caused the error
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    #[error("Invalid FITS file: {0}")]
    Fits(String),

    #[error("Missing table column: {0}")]
    MissingColumn(String),

    #[error("Timestamp out of range: {0}")]
    InvalidTimestamp(f64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Helper to attach a path to a std::io::Error
pub fn io_err(path: impl Into<PathBuf>, err: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source: err,
    }
}
