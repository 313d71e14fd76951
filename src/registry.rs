//! SQLite calibration registry
//!
//! The registry holds one table per [`ImageType`], all sharing the same
//! columns. Every detrend entry is written once per CCD extension so that
//! lookups by `extension` find the frame for any chip.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Transaction};

use crate::codes::ImageType;
use crate::detrend::DetrendEntry;
use crate::{io_err, Result};

/// Registry columns and their SQL types, after the `id` key
pub const SCHEMA: [(&str, &str); 10] = [
    ("path", "text"),
    ("ccdNum", "int"),
    ("version", "int"),
    ("expTime", "float"),
    ("filter", "text"),
    ("label", "text"),
    ("validStart", "text"),
    ("validEnd", "text"),
    ("registered", "text"),
    ("extension", "int"),
];

/// DDL for the table holding one image type
pub fn create_table_sql(image_type: ImageType) -> String {
    let columns: Vec<String> = SCHEMA
        .iter()
        .map(|(name, kind)| format!("{} {}", name, kind))
        .collect();
    format!(
        "CREATE TABLE {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
        image_type.table_name(),
        columns.join(", ")
    )
}

/// An open registry database
pub struct Registry {
    conn: Connection,
    path: PathBuf,
}

impl Registry {
    /// Open an existing registry, or an empty database if none exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        log::debug!("Opened registry {}", path.display());
        Ok(Self { conn, path })
    }

    /// Start a fresh registry, deleting any file already at `path`
    ///
    /// Returns the registry and the DDL statements that were run.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<String>)> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Removing existing registry {}", path.display());
            fs::remove_file(path).map_err(|e| io_err(path, e))?;
        }

        let mut registry = Self::open(path)?;
        let statements = registry.create_tables()?;
        Ok((registry, statements))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Direct access to the underlying connection, for queries
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create one table per image type and commit
    pub fn create_tables(&mut self) -> Result<Vec<String>> {
        let tx = self.conn.transaction()?;
        let mut statements = Vec::with_capacity(ImageType::ALL.len());
        for image_type in ImageType::ALL {
            let sql = create_table_sql(image_type);
            log::info!("{}", sql);
            tx.execute(&sql, [])?;
            statements.push(sql);
        }
        tx.commit()?;
        Ok(statements)
    }

    /// Names of the user tables present, sorted
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Number of rows registered for an image type
    pub fn count_rows(&self, image_type: ImageType) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", image_type.table_name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Begin the unit of work for an import pass
    pub fn begin(&mut self) -> Result<ImportBatch<'_>> {
        Ok(ImportBatch {
            tx: self.conn.transaction()?,
        })
    }

    /// Close the connection, reporting any error
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

/// Pending registry changes, applied on [`ImportBatch::commit`]
///
/// Dropping a batch without committing rolls it back.
pub struct ImportBatch<'a> {
    tx: Transaction<'a>,
}

impl ImportBatch<'_> {
    /// Delete rows made obsolete by `entry`
    ///
    /// Rows for the same filter and validity window with a version at or
    /// below the entry's are removed. Returns the number of deleted rows.
    pub fn purge_superseded(&self, entry: &DetrendEntry) -> Result<usize> {
        let sql = format!(
            "DELETE FROM {} WHERE filter = ?1 AND validStart = ?2 AND validEnd = ?3 AND version <= ?4",
            entry.image_type.table_name()
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let deleted = stmt.execute(params![
            entry.filter,
            entry.valid_start,
            entry.valid_end,
            entry.version
        ])?;
        Ok(deleted)
    }

    /// Insert one row per extension, 1..=extensions
    ///
    /// Conflicting rows are ignored. Returns the number of rows inserted.
    pub fn insert_entry(&self, entry: &DetrendEntry, extensions: u32) -> Result<usize> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            entry.image_type.table_name()
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;

        let mut inserted = 0;
        for extension in 1..=extensions {
            inserted += stmt.execute(params![
                entry.path,
                entry.ccd_num,
                entry.version,
                entry.exp_time,
                entry.filter,
                entry.label,
                entry.valid_start,
                entry.valid_end,
                entry.registered,
                extension
            ])?;
        }
        Ok(inserted)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn flat_entry(version: i64, label: &str) -> DetrendEntry {
        DetrendEntry {
            image_type: ImageType::Flat,
            filter: "g",
            path: format!("/detrend/flat.g.v{}.fits", version),
            ccd_num: -1,
            version,
            exp_time: 0.0,
            label: label.to_string(),
            valid_start: "2009-02-01T00:00:00".to_string(),
            valid_end: "2009-08-01T00:00:00".to_string(),
            registered: "2009-02-03T10:11:12".to_string(),
            order: 0,
        }
    }

    #[test]
    fn test_create_table_sql() {
        assert_eq!(
            create_table_sql(ImageType::Bias),
            "CREATE TABLE bias (id INTEGER PRIMARY KEY AUTOINCREMENT, path text, ccdNum int, \
             version int, expTime float, filter text, label text, validStart text, \
             validEnd text, registered text, extension int)"
        );
    }

    #[test]
    fn test_create_makes_four_empty_tables() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("calibRegistry.sqlite3");

        let (registry, statements) = Registry::create(&db_path).unwrap();
        assert_eq!(statements.len(), 4);
        assert_eq!(
            registry.table_names().unwrap(),
            vec!["bias", "dark", "flat", "fringe"]
        );
        for image_type in ImageType::ALL {
            assert_eq!(registry.count_rows(image_type).unwrap(), 0);
        }
        registry.close().unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_insert_fans_out_extensions() {
        let temp_dir = tempdir().unwrap();
        let (mut registry, _) = Registry::create(temp_dir.path().join("reg.sqlite3")).unwrap();

        let batch = registry.begin().unwrap();
        assert_eq!(batch.insert_entry(&flat_entry(1, "a"), 36).unwrap(), 36);
        batch.commit().unwrap();

        assert_eq!(registry.count_rows(ImageType::Flat).unwrap(), 36);
        assert_eq!(registry.count_rows(ImageType::Bias).unwrap(), 0);

        let extensions: Vec<i64> = registry
            .connection()
            .prepare("SELECT extension FROM flat ORDER BY extension")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(extensions, (1..=36).collect::<Vec<i64>>());
    }

    #[test]
    fn test_purge_only_older_or_equal_versions() {
        let temp_dir = tempdir().unwrap();
        let (mut registry, _) = Registry::create(temp_dir.path().join("reg.sqlite3")).unwrap();

        let batch = registry.begin().unwrap();
        batch.insert_entry(&flat_entry(5, "v5"), 2).unwrap();
        assert_eq!(batch.purge_superseded(&flat_entry(4, "v4")).unwrap(), 0);
        assert_eq!(batch.purge_superseded(&flat_entry(5, "again")).unwrap(), 2);

        let mut other_window = flat_entry(9, "other");
        other_window.valid_end = "2010-01-01T00:00:00".to_string();
        batch.insert_entry(&other_window, 2).unwrap();
        assert_eq!(batch.purge_superseded(&flat_entry(9, "v9")).unwrap(), 0);
        batch.commit().unwrap();

        assert_eq!(registry.count_rows(ImageType::Flat).unwrap(), 2);
    }

    #[test]
    fn test_uncommitted_batch_rolls_back() {
        let temp_dir = tempdir().unwrap();
        let (mut registry, _) = Registry::create(temp_dir.path().join("reg.sqlite3")).unwrap();

        {
            let batch = registry.begin().unwrap();
            batch.insert_entry(&flat_entry(1, "lost"), 36).unwrap();
        }

        assert_eq!(registry.count_rows(ImageType::Flat).unwrap(), 0);
    }

    #[test]
    fn test_open_without_tables_fails_on_insert() {
        let temp_dir = tempdir().unwrap();
        let mut registry = Registry::open(temp_dir.path().join("empty.sqlite3")).unwrap();

        let batch = registry.begin().unwrap();
        assert!(batch.purge_superseded(&flat_entry(1, "x")).is_err());
    }
}
