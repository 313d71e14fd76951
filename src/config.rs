//! Importer configuration

use std::path::{Path, PathBuf};

/// Default registry file, relative to the working directory
pub const DEFAULT_REGISTRY_PATH: &str = "calibRegistry.sqlite3";

/// Number of MegaCam CCD extensions sharing one detrend frame
pub const MEGACAM_EXTENSIONS: u32 = 36;

/// HDU holding the detrend table (the first extension)
pub const DEFAULT_TABLE_HDU: usize = 1;

/// Settings for one import run
#[derive(Debug, Clone, PartialEq)]
pub struct ImporterConfig {
    /// Location of the SQLite registry
    pub registry_path: PathBuf,
    /// Rows written per detrend entry, numbered 1..=extensions
    pub extensions: u32,
    /// Index of the BINTABLE HDU in the input file
    pub table_hdu: usize,
    /// Delete any existing registry and create fresh tables
    pub create: bool,
}

impl ImporterConfig {
    /// Create a configuration with the default registry location
    pub fn new() -> Self {
        Self {
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            extensions: MEGACAM_EXTENSIONS,
            table_hdu: DEFAULT_TABLE_HDU,
            create: false,
        }
    }

    /// Set a custom registry path
    pub fn with_registry_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.registry_path = path.as_ref().to_path_buf();
        self
    }

    /// Request a fresh registry
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_extensions(mut self, extensions: u32) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_table_hdu(mut self, hdu: usize) -> Self {
        self.table_hdu = hdu;
        self
    }
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImporterConfig::default();
        assert_eq!(config.registry_path, PathBuf::from("calibRegistry.sqlite3"));
        assert_eq!(config.extensions, 36);
        assert_eq!(config.table_hdu, 1);
        assert!(!config.create);
    }

    #[test]
    fn test_builder() {
        let config = ImporterConfig::new()
            .with_registry_path("/tmp/registry.sqlite3")
            .with_create(true)
            .with_extensions(4)
            .with_table_hdu(2);
        assert_eq!(config.registry_path, PathBuf::from("/tmp/registry.sqlite3"));
        assert!(config.create);
        assert_eq!(config.extensions, 4);
        assert_eq!(config.table_hdu, 2);
    }
}
