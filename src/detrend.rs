//! Detrend database rows
//!
//! Each row of the Elixir detrend table describes one calibration frame. This
//! module decodes a row into a [`DetrendEntry`] ready for the registry.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::codes::{filter_name, ImageType};
use crate::fits::{BinTable, Row};
use crate::{RegistryError, Result};

/// Column indices of the fields read from the detrend table
#[derive(Debug, Clone, Copy)]
pub struct DetrendColumns {
    pub start_time: usize,
    pub stop_time: usize,
    pub reg_time: usize,
    pub exptime: usize,
    pub imagetyp: usize,
    pub filter: usize,
    pub ccdnum: usize,
    pub version: usize,
    pub order: usize,
    pub label: usize,
    pub path: usize,
}

impl DetrendColumns {
    /// Find every required column; a missing one is an error
    pub fn locate(table: &BinTable<'_>) -> Result<Self> {
        Ok(Self {
            start_time: table.column_index("START_TIME")?,
            stop_time: table.column_index("STOP_TIME")?,
            reg_time: table.column_index("REG_TIME")?,
            exptime: table.column_index("EXPTIME")?,
            imagetyp: table.column_index("IMAGETYP")?,
            filter: table.column_index("FILTER")?,
            ccdnum: table.column_index("CCDNUM")?,
            version: table.column_index("VERSION")?,
            order: table.column_index("ORDER")?,
            label: table.column_index("LABEL")?,
            path: table.column_index("PATH")?,
        })
    }
}

/// One calibration frame, as stored in the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetrendEntry {
    pub image_type: ImageType,
    pub filter: &'static str,
    pub path: String,
    pub ccd_num: i64,
    pub version: i64,
    pub exp_time: f64,
    pub label: String,
    pub valid_start: String,
    pub valid_end: String,
    pub registered: String,
    /// Read from the table but not registered
    pub order: i64,
}

/// Result of decoding one table row
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Entry(DetrendEntry),
    /// IMAGETYP code with no registry table
    UnknownImageType(f64),
    /// FILTER code with no filter name
    UnknownFilter(f64),
}

impl DetrendEntry {
    /// Decode a table row
    ///
    /// Rows with unknown image type or filter codes are reported as such rather
    /// than as errors; only malformed cells fail.
    pub fn decode(row: &Row<'_>, cols: &DetrendColumns) -> Result<Decoded> {
        let type_code = row.get_f64(cols.imagetyp)?;
        let filter_code = row.get_f64(cols.filter)?;

        let image_type = match whole(type_code).and_then(ImageType::from_code) {
            Some(t) => t,
            None => return Ok(Decoded::UnknownImageType(type_code)),
        };
        let filter = match whole(filter_code).and_then(filter_name) {
            Some(f) => f,
            None => return Ok(Decoded::UnknownFilter(filter_code)),
        };

        Ok(Decoded::Entry(DetrendEntry {
            image_type,
            filter,
            path: fix_string(&row.get_string(cols.path)?).to_string(),
            ccd_num: row.get_i64(cols.ccdnum)?,
            version: row.get_i64(cols.version)?,
            exp_time: row.get_f64(cols.exptime)?,
            label: fix_string(&row.get_string(cols.label)?).to_string(),
            valid_start: unix_to_iso(row.get_f64(cols.start_time)?)?,
            valid_end: unix_to_iso(row.get_f64(cols.stop_time)?)?,
            registered: unix_to_iso(row.get_f64(cols.reg_time)?)?,
            order: row.get_i64(cols.order)?,
        }))
    }
}

/// A code value as an integer; codes with a fractional part match nothing
fn whole(code: f64) -> Option<i64> {
    (code.is_finite() && code.fract() == 0.0).then_some(code as i64)
}

/// Cut a string at its first NUL
///
/// Table strings are sometimes NUL terminated inside a wider field, with
/// leftovers of older values after the terminator.
pub fn fix_string(s: &str) -> &str {
    match s.find('\0') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

/// Convert Unix epoch seconds to an ISO-8601 local time string
///
/// Whole seconds format as `2010-01-01T00:00:00`; a fractional part adds
/// microseconds (`2010-01-01T00:00:00.500000`).
pub fn unix_to_iso(seconds: f64) -> Result<String> {
    if !seconds.is_finite() {
        return Err(RegistryError::InvalidTimestamp(seconds));
    }

    let mut whole = seconds.floor();
    let mut micros = ((seconds - whole) * 1e6).round() as u32;
    if micros >= 1_000_000 {
        whole += 1.0;
        micros = 0;
    }

    let utc = DateTime::from_timestamp(whole as i64, micros * 1000)
        .ok_or(RegistryError::InvalidTimestamp(seconds))?;
    let local = utc.with_timezone(&Local).naive_local();

    let format = if micros == 0 {
        "%Y-%m-%dT%H:%M:%S"
    } else {
        "%Y-%m-%dT%H:%M:%S%.6f"
    };
    Ok(local.format(format).to_string())
}
