//! Code tables used by the Elixir detrend database
//!
//! Image types and filters are stored as small integers in the FITS table.
//! Codes missing from these tables (masks, narrow-band filters) are not
//! registered.

use serde::Serialize;
use std::fmt;

/// Calibration frame type, one registry table each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Bias,
    Dark,
    Flat,
    Fringe,
}

impl ImageType {
    /// Every registered image type, in table creation order
    pub const ALL: [ImageType; 4] = [
        ImageType::Dark,
        ImageType::Flat,
        ImageType::Bias,
        ImageType::Fringe,
    ];

    /// Decode the `IMAGETYP` column value
    ///
    /// Code 5 (mask) is deliberately absent.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(ImageType::Dark),
            3 => Some(ImageType::Bias),
            4 => Some(ImageType::Flat),
            6 => Some(ImageType::Fringe),
            _ => None,
        }
    }

    /// The integer used for this type in the detrend database
    pub fn code(self) -> i64 {
        match self {
            ImageType::Dark => 2,
            ImageType::Bias => 3,
            ImageType::Flat => 4,
            ImageType::Fringe => 6,
        }
    }

    /// Name of the registry table holding frames of this type
    pub fn table_name(self) -> &'static str {
        match self {
            ImageType::Bias => "bias",
            ImageType::Dark => "dark",
            ImageType::Flat => "flat",
            ImageType::Fringe => "fringe",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Decode the `FILTER` column value into a MegaCam filter name
///
/// Narrow-band filters are not registered yet.
pub fn filter_name(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("NONE"),
        1 => Some("u"),
        2 => Some("g"),
        3 => Some("r"),
        4 => Some("i"),
        5 => Some("z"),
        6 => Some("i2"),
        _ => None,
    }
}
