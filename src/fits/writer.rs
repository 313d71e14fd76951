//! BINTABLE writer
//!
//! Produces a data-less primary HDU followed by a single binary table. Used to
//! build detrend tables for tests and for hand-made registries.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};

use super::{padded_len, ColumnFormat, ColumnType, CARD_SIZE};
use crate::{io_err, RegistryError, Result};

/// Values of one table column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Logical(Vec<bool>),
    Byte(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    /// Fixed-width text; shorter values are NUL padded
    Char { width: usize, values: Vec<Vec<u8>> },
    /// Packed bit arrays of `bits` bits; shorter values are zero padded
    Bits { bits: usize, values: Vec<Vec<u8>> },
}

impl ColumnData {
    /// Text column from string values
    pub fn text<S: AsRef<str>>(width: usize, values: &[S]) -> Self {
        ColumnData::Char {
            width,
            values: values.iter().map(|s| s.as_ref().as_bytes().to_vec()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Logical(v) => v.len(),
            ColumnData::Byte(v) => v.len(),
            ColumnData::Short(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Long(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::Char { values, .. } | ColumnData::Bits { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> ColumnFormat {
        match self {
            ColumnData::Logical(_) => ColumnFormat::new(1, ColumnType::Logical),
            ColumnData::Byte(_) => ColumnFormat::new(1, ColumnType::Byte),
            ColumnData::Short(_) => ColumnFormat::new(1, ColumnType::Short),
            ColumnData::Int(_) => ColumnFormat::new(1, ColumnType::Int),
            ColumnData::Long(_) => ColumnFormat::new(1, ColumnType::Long),
            ColumnData::Float(_) => ColumnFormat::new(1, ColumnType::Float),
            ColumnData::Double(_) => ColumnFormat::new(1, ColumnType::Double),
            ColumnData::Char { width, .. } => ColumnFormat::new(*width, ColumnType::Char),
            ColumnData::Bits { bits, .. } => ColumnFormat::new(*bits, ColumnType::Bit),
        }
    }

    /// Write the cell for `row`
    fn write_cell<W: Write>(&self, row: usize, writer: &mut W) -> std::io::Result<()> {
        match self {
            ColumnData::Logical(v) => writer.write_u8(if v[row] { b'T' } else { b'F' }),
            ColumnData::Byte(v) => writer.write_u8(v[row]),
            ColumnData::Short(v) => writer.write_i16::<BigEndian>(v[row]),
            ColumnData::Int(v) => writer.write_i32::<BigEndian>(v[row]),
            ColumnData::Long(v) => writer.write_i64::<BigEndian>(v[row]),
            ColumnData::Float(v) => writer.write_f32::<BigEndian>(v[row]),
            ColumnData::Double(v) => writer.write_f64::<BigEndian>(v[row]),
            ColumnData::Char { width, values } => {
                let mut cell = vec![0u8; *width];
                cell[..values[row].len()].copy_from_slice(&values[row]);
                writer.write_all(&cell)
            }
            ColumnData::Bits { bits, values } => {
                let mut cell = vec![0u8; bits.div_ceil(8)];
                cell[..values[row].len()].copy_from_slice(&values[row]);
                writer.write_all(&cell)
            }
        }
    }
}

/// Builder for a single-table FITS file
#[derive(Debug, Clone, Default)]
pub struct BinTableWriter {
    columns: Vec<(String, ColumnData)>,
    extname: Option<String>,
}

impl BinTableWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the EXTNAME of the table HDU
    pub fn with_extname(mut self, name: &str) -> Self {
        self.extname = Some(name.to_string());
        self
    }

    /// Builder method to append a column
    pub fn add_column(mut self, name: &str, data: ColumnData) -> Self {
        self.columns.push((name.to_string(), data));
        self
    }

    /// Number of rows, or an error if the columns disagree
    pub fn n_rows(&self) -> Result<usize> {
        let n_rows = self.columns.first().map(|(_, d)| d.len()).unwrap_or(0);
        for (name, data) in &self.columns {
            if data.len() != n_rows {
                return Err(RegistryError::Fits(format!(
                    "column {} has {} rows, expected {}",
                    name,
                    data.len(),
                    n_rows
                )));
            }
            let oversized = match data {
                ColumnData::Char { width, values } => values
                    .iter()
                    .find(|v| v.len() > *width)
                    .map(|v| (v.len(), *width)),
                ColumnData::Bits { bits, values } => {
                    let width = bits.div_ceil(8);
                    values.iter().find(|v| v.len() > width).map(|v| (v.len(), width))
                }
                _ => None,
            };
            if let Some((len, width)) = oversized {
                return Err(RegistryError::Fits(format!(
                    "value of {} bytes does not fit column {} ({} bytes)",
                    len, name, width
                )));
            }
        }
        Ok(n_rows)
    }

    /// Serialize the file to any writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let n_rows = self.n_rows()?;
        let row_len = self.columns.iter().try_fold(0usize, |len, (_, d)| {
            len.checked_add(d.format().width()?)
                .ok_or_else(|| RegistryError::Fits("row length overflows".to_string()))
        })?;

        let mut primary = Vec::new();
        push_card(&mut primary, "SIMPLE", "T");
        push_card(&mut primary, "BITPIX", "8");
        push_card(&mut primary, "NAXIS", "0");
        push_card(&mut primary, "EXTEND", "T");
        finish_header(&mut primary);

        let mut table = Vec::new();
        push_card(&mut table, "XTENSION", &quote("BINTABLE"));
        push_card(&mut table, "BITPIX", "8");
        push_card(&mut table, "NAXIS", "2");
        push_card(&mut table, "NAXIS1", &row_len.to_string());
        push_card(&mut table, "NAXIS2", &n_rows.to_string());
        push_card(&mut table, "PCOUNT", "0");
        push_card(&mut table, "GCOUNT", "1");
        push_card(&mut table, "TFIELDS", &self.columns.len().to_string());
        for (i, (name, data)) in self.columns.iter().enumerate() {
            push_card(&mut table, &format!("TTYPE{}", i + 1), &quote(name));
            push_card(&mut table, &format!("TFORM{}", i + 1), &quote(&data.format().to_string()));
        }
        if let Some(extname) = &self.extname {
            push_card(&mut table, "EXTNAME", &quote(extname));
        }
        finish_header(&mut table);

        let mut rows = Vec::new();
        for row in 0..n_rows {
            for (_, data) in &self.columns {
                data.write_cell(row, &mut rows)
                    .map_err(|e| RegistryError::Fits(format!("failed to encode row {}: {}", row, e)))?;
            }
        }
        rows.resize(padded_len(rows.len()), 0);

        for chunk in [&primary, &table, &rows] {
            writer
                .write_all(chunk)
                .map_err(|e| RegistryError::Fits(format!("failed to write table: {}", e)))?;
        }
        Ok(())
    }

    /// Save the table to a FITS file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| io_err(path, e))?;
        let mut writer = BufWriter::new(file);

        self.write_to(&mut writer)?;
        writer.flush().map_err(|e| io_err(path, e))?;

        Ok(())
    }
}

fn quote(value: &str) -> String {
    // Strings are padded to at least eight characters inside the quotes
    format!("'{:<8}'", value.replace('\'', "''"))
}

/// Append one 80-byte keyword card
fn push_card(buf: &mut Vec<u8>, keyword: &str, value: &str) {
    let text = if value.starts_with('\'') {
        format!("{:<8}= {}", keyword, value)
    } else {
        // Fixed format: numbers and logicals end in column 30
        format!("{:<8}= {:>20}", keyword, value)
    };
    let mut card = text.into_bytes();
    card.resize(CARD_SIZE, b' ');
    buf.extend_from_slice(&card[..CARD_SIZE]);
}

fn finish_header(buf: &mut Vec<u8>) {
    let mut end = b"END".to_vec();
    end.resize(CARD_SIZE, b' ');
    buf.extend_from_slice(&end);
    buf.resize(padded_len(buf.len()), b' ');
}
