//! The import pass: detrend table in, registry rows out

use std::path::Path;

use serde::Serialize;

use crate::config::ImporterConfig;
use crate::detrend::{Decoded, DetrendColumns, DetrendEntry};
use crate::fits::FitsFile;
use crate::registry::Registry;
use crate::Result;

/// Counts gathered during one import pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// DDL run when the registry was (re)created
    pub schema_statements: Vec<String>,
    /// Rows present in the detrend table
    pub rows_read: usize,
    /// Rows written to the registry
    pub entries_imported: usize,
    /// Rows whose IMAGETYP has no registry table
    pub skipped_image_type: usize,
    /// Rows whose FILTER code is not known
    pub skipped_filter: usize,
    /// Registry rows deleted as superseded
    pub rows_purged: usize,
    /// Registry rows inserted
    pub rows_inserted: usize,
}

impl ImportSummary {
    pub fn skipped(&self) -> usize {
        self.skipped_image_type + self.skipped_filter
    }
}

/// Imports the Elixir detrend database into a calibration registry
#[derive(Debug, Clone, Default)]
pub struct RegistryImporter {
    config: ImporterConfig,
}

impl RegistryImporter {
    pub fn new(config: ImporterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    /// Open the configured registry, recreating it first if requested
    pub fn open_registry(&self) -> Result<(Registry, Vec<String>)> {
        if self.config.create {
            Registry::create(&self.config.registry_path)
        } else {
            Ok((Registry::open(&self.config.registry_path)?, Vec::new()))
        }
    }

    /// Run a complete import of `table` and close the registry
    pub fn run<P: AsRef<Path>>(&self, table: P) -> Result<ImportSummary> {
        let (mut registry, schema_statements) = self.open_registry()?;

        let mut summary = self.import_into(&mut registry, table)?;
        summary.schema_statements = schema_statements;

        registry.close()?;
        Ok(summary)
    }

    /// Import every row of `table` into an already open registry
    ///
    /// All changes are committed together once the whole table has been read.
    pub fn import_into<P: AsRef<Path>>(
        &self,
        registry: &mut Registry,
        table: P,
    ) -> Result<ImportSummary> {
        let fits = FitsFile::open(table.as_ref())?;
        let table = fits.bintable(self.config.table_hdu)?;
        let cols = DetrendColumns::locate(&table)?;

        log::info!(
            "Importing {} detrend rows from {} into {}",
            table.len(),
            fits.path.display(),
            registry.path().display()
        );

        let mut summary = ImportSummary {
            rows_read: table.len(),
            ..Default::default()
        };

        let batch = registry.begin()?;
        for (index, row) in table.rows().enumerate() {
            let entry = match DetrendEntry::decode(&row, &cols)? {
                Decoded::Entry(entry) => entry,
                Decoded::UnknownImageType(code) => {
                    log::debug!("Row {}: skipping image type {}", index, code);
                    summary.skipped_image_type += 1;
                    continue;
                }
                Decoded::UnknownFilter(code) => {
                    log::debug!("Row {}: skipping filter {}", index, code);
                    summary.skipped_filter += 1;
                    continue;
                }
            };

            let purged = batch.purge_superseded(&entry)?;
            if purged > 0 {
                log::debug!(
                    "Row {}: purged {} {} rows for {} {}..{} up to version {}",
                    index,
                    purged,
                    entry.image_type,
                    entry.filter,
                    entry.valid_start,
                    entry.valid_end,
                    entry.version
                );
            }
            log::debug!(
                "Row {}: registering {} {} version {} order {} from {}",
                index,
                entry.image_type,
                entry.filter,
                entry.version,
                entry.order,
                entry.path
            );

            summary.rows_purged += purged;
            summary.rows_inserted += batch.insert_entry(&entry, self.config.extensions)?;
            summary.entries_imported += 1;
        }
        batch.commit()?;

        log::info!(
            "Imported {} entries ({} rows), skipped {}, purged {} rows",
            summary.entries_imported,
            summary.rows_inserted,
            summary.skipped(),
            summary.rows_purged
        );

        Ok(summary)
    }
}
