//! Minimal FITS reader for binary table extensions
//!
//! FITS files are a sequence of header-data units (HDUs). Each header is a run
//! of 80-byte keyword cards terminated by `END`; headers and data are both
//! padded to 2880-byte blocks and all binary values are big-endian. Only what
//! the detrend database needs is supported: walking HDUs, reading header
//! keywords and decoding BINTABLE rows.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::{io_err, RegistryError, Result};

pub mod bintable;
pub mod writer;

pub use bintable::{BinTable, Column, ColumnFormat, ColumnType, Row};
pub use writer::{BinTableWriter, ColumnData};

/// Size of a FITS logical record (bytes)
pub const BLOCK_SIZE: usize = 2880;
/// Size of a header card (bytes)
pub const CARD_SIZE: usize = 80;

/// Round a byte count up to a whole number of FITS blocks
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Value of a header keyword
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    String(String),
    Logical(bool),
    Integer(i64),
    Float(f64),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Float(f) => Some(*f),
            HeaderValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HeaderValue::Logical(b) => Some(*b),
            _ => None,
        }
    }
}

/// Parsed FITS header, keywords kept in file order
#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a keyword (case-insensitive); the first occurrence wins
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let key = key.to_ascii_uppercase();
        self.cards.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(HeaderValue::as_i64)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    /// Fetch a mandatory integer keyword
    pub fn require_int(&self, key: &str) -> Result<i64> {
        self.get_int(key)
            .ok_or_else(|| RegistryError::Fits(format!("missing required keyword {}", key)))
    }

    /// Number of valued keywords
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Iterate keywords in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Parse a header starting at the beginning of `bytes`
///
/// Returns the header and the number of bytes it occupies, padding included.
pub fn parse_header(bytes: &[u8]) -> Result<(Header, usize)> {
    let mut header = Header::new();
    let mut offset = 0;

    loop {
        let card = bytes.get(offset..offset + CARD_SIZE).ok_or_else(|| {
            RegistryError::Fits("header ends before END card".to_string())
        })?;
        offset += CARD_SIZE;

        let keyword = String::from_utf8_lossy(&card[..8]).trim_end().to_string();
        if keyword == "END" {
            break;
        }

        // Commentary cards (COMMENT, HISTORY, blank) carry no value indicator
        if &card[8..10] != b"= " {
            continue;
        }

        let text = String::from_utf8_lossy(&card[10..]);
        if let Some(value) = parse_value(&text) {
            header.cards.push((keyword.to_ascii_uppercase(), value));
        }
    }

    Ok((header, padded_len(offset)))
}

/// Parse the value field of a header card (the text after `= `)
///
/// Returns `None` for undefined or unsupported values such as complex numbers.
pub fn parse_value(text: &str) -> Option<HeaderValue> {
    let text = text.trim_start();

    if let Some(rest) = text.strip_prefix('\'') {
        // Quotes inside strings are doubled
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    return Some(HeaderValue::String(value.trim_end().to_string()));
                }
            } else {
                value.push(c);
            }
        }
        // Unterminated string
        return None;
    }

    let value = match text.find('/') {
        Some(idx) => text[..idx].trim(),
        None => text.trim(),
    };

    match value {
        "" => None,
        "T" => Some(HeaderValue::Logical(true)),
        "F" => Some(HeaderValue::Logical(false)),
        _ => {
            if let Ok(i) = value.parse::<i64>() {
                return Some(HeaderValue::Integer(i));
            }
            value
                .replace(|c: char| c == 'D' || c == 'd', "E")
                .parse::<f64>()
                .ok()
                .map(HeaderValue::Float)
        }
    }
}

/// One header-data unit located inside a file
#[derive(Debug, Clone)]
pub struct Hdu {
    /// Parsed header
    pub header: Header,
    /// Byte offset of the data section
    pub data_offset: usize,
    /// Declared data size in bytes, without padding
    pub data_len: usize,
}

impl Hdu {
    /// The XTENSION value, or `None` for the primary HDU
    pub fn extension_type(&self) -> Option<&str> {
        self.header.get_str("XTENSION")
    }
}

/// Declared data size of an HDU: |BITPIX|/8 * GCOUNT * (PCOUNT + NAXIS1 * ... * NAXISn)
fn data_size(header: &Header) -> Result<usize> {
    let bitpix = header.require_int("BITPIX")?;
    let naxis = header.require_int("NAXIS")?;
    if naxis == 0 {
        return Ok(0);
    }

    let mut elements: i64 = 1;
    for axis in 1..=naxis {
        let len = header.require_int(&format!("NAXIS{}", axis))?;
        if len < 0 {
            return Err(RegistryError::Fits(format!("negative NAXIS{}", axis)));
        }
        elements = elements
            .checked_mul(len)
            .ok_or_else(|| RegistryError::Fits("data size overflows".to_string()))?;
    }

    let pcount = header.get_int("PCOUNT").unwrap_or(0);
    let gcount = header.get_int("GCOUNT").unwrap_or(1);
    let bytes = (bitpix.abs() / 8)
        .checked_mul(gcount)
        .and_then(|n| pcount.checked_add(elements).and_then(|len| n.checked_mul(len)))
        .ok_or_else(|| RegistryError::Fits("data size overflows".to_string()))?;

    usize::try_from(bytes).map_err(|_| RegistryError::Fits("invalid data size".to_string()))
}

/// Walk every HDU in an in-memory FITS image
///
/// Zero or blank filler after the last HDU is ignored, as is an extension
/// that cannot be parsed. Problems in the primary HDU are errors.
pub fn scan_hdus(bytes: &[u8]) -> Result<Vec<Hdu>> {
    let mut hdus = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if !hdus.is_empty() && rest.iter().all(|&b| b == 0 || b == b' ') {
            log::warn!("Ignoring {} bytes of padding after HDU {}", rest.len(), hdus.len() - 1);
            break;
        }

        match read_hdu(rest, offset, hdus.is_empty()) {
            Ok(hdu) => {
                offset = hdu.data_offset + padded_len(hdu.data_len);
                hdus.push(hdu);
            }
            Err(err) if !hdus.is_empty() => {
                log::warn!("Ignoring data after HDU {}: {}", hdus.len() - 1, err);
                break;
            }
            Err(err) => return Err(err),
        }
    }

    if hdus.is_empty() {
        return Err(RegistryError::Fits("file contains no HDUs".to_string()));
    }

    Ok(hdus)
}

/// Parse the HDU starting `offset` bytes into the file; `rest` begins there
fn read_hdu(rest: &[u8], offset: usize, primary: bool) -> Result<Hdu> {
    let (header, header_len) = parse_header(rest)?;

    let first_key = header.iter().next().map(|(k, _)| k);
    let expected = if primary { "SIMPLE" } else { "XTENSION" };
    if first_key != Some(expected) {
        return Err(RegistryError::Fits(format!(
            "HDU at byte {} does not start with {}",
            offset, expected
        )));
    }

    let data_len = data_size(&header)?;
    if header_len.checked_add(data_len).map_or(true, |end| end > rest.len()) {
        return Err(RegistryError::Fits(format!(
            "HDU at byte {} declares {} data bytes but the file is truncated",
            offset, data_len
        )));
    }

    Ok(Hdu {
        header,
        data_offset: offset + header_len,
        data_len,
    })
}

/// A FITS file mapped into memory
pub struct FitsFile {
    /// Path of the mapped file
    pub path: PathBuf,
    map: Mmap,
    hdus: Vec<Hdu>,
}

impl FitsFile {
    /// Open and index a FITS file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| io_err(&path, e))?;

        let len = file.metadata().map_err(|e| io_err(&path, e))?.len();
        if len == 0 {
            return Err(RegistryError::Fits(format!("{} is empty", path.display())));
        }

        let map = unsafe { MmapOptions::new().map(&file) }.map_err(|e| io_err(&path, e))?;
        let hdus = scan_hdus(&map)?;

        log::debug!("Opened {} with {} HDUs", path.display(), hdus.len());

        Ok(Self { path, map, hdus })
    }

    /// All HDUs in file order
    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn hdu(&self, index: usize) -> Result<&Hdu> {
        self.hdus.get(index).ok_or_else(|| {
            RegistryError::Fits(format!(
                "HDU {} requested but {} has only {}",
                index,
                self.path.display(),
                self.hdus.len()
            ))
        })
    }

    /// Raw (unpadded) data bytes of an HDU
    pub fn data(&self, hdu: &Hdu) -> &[u8] {
        &self.map[hdu.data_offset..hdu.data_offset + hdu.data_len]
    }

    /// Decode the binary table stored in HDU `index`
    pub fn bintable(&self, index: usize) -> Result<BinTable<'_>> {
        let hdu = self.hdu(index)?;
        BinTable::from_hdu(hdu, self.data(hdu))
    }
}
