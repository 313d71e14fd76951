//! BINTABLE extension decoding
//!
//! A binary table stores NAXIS2 fixed-width rows of NAXIS1 bytes. Column
//! layout comes from the TFORMn keywords; values are big-endian.

use byteorder::{BigEndian, ByteOrder};

use super::Hdu;
use crate::{RegistryError, Result};

/// Element type of a table column (the TFORM letter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `L`: one byte, `T` or `F`
    Logical,
    /// `X`: bit array, packed into whole bytes
    Bit,
    /// `B`: unsigned byte
    Byte,
    /// `I`: 16-bit integer
    Short,
    /// `J`: 32-bit integer
    Int,
    /// `K`: 64-bit integer
    Long,
    /// `E`: 32-bit float
    Float,
    /// `D`: 64-bit float
    Double,
    /// `C`: pair of 32-bit floats
    ComplexFloat,
    /// `M`: pair of 64-bit floats
    ComplexDouble,
    /// `P`: 32-bit descriptor into the heap
    Descriptor,
    /// `Q`: 64-bit descriptor into the heap
    LongDescriptor,
    /// `A`: character
    Char,
}

impl ColumnType {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'L' => Some(ColumnType::Logical),
            'X' => Some(ColumnType::Bit),
            'B' => Some(ColumnType::Byte),
            'I' => Some(ColumnType::Short),
            'J' => Some(ColumnType::Int),
            'K' => Some(ColumnType::Long),
            'E' => Some(ColumnType::Float),
            'D' => Some(ColumnType::Double),
            'C' => Some(ColumnType::ComplexFloat),
            'M' => Some(ColumnType::ComplexDouble),
            'P' => Some(ColumnType::Descriptor),
            'Q' => Some(ColumnType::LongDescriptor),
            'A' => Some(ColumnType::Char),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            ColumnType::Logical => 'L',
            ColumnType::Bit => 'X',
            ColumnType::Byte => 'B',
            ColumnType::Short => 'I',
            ColumnType::Int => 'J',
            ColumnType::Long => 'K',
            ColumnType::Float => 'E',
            ColumnType::Double => 'D',
            ColumnType::ComplexFloat => 'C',
            ColumnType::ComplexDouble => 'M',
            ColumnType::Descriptor => 'P',
            ColumnType::LongDescriptor => 'Q',
            ColumnType::Char => 'A',
        }
    }

    /// Size of one element in bytes; bit arrays are sized by [`ColumnFormat::width`]
    pub const fn size_bytes(self) -> usize {
        match self {
            ColumnType::Logical | ColumnType::Bit | ColumnType::Byte | ColumnType::Char => 1,
            ColumnType::Short => 2,
            ColumnType::Int | ColumnType::Float => 4,
            ColumnType::Long
            | ColumnType::Double
            | ColumnType::ComplexFloat
            | ColumnType::Descriptor => 8,
            ColumnType::ComplexDouble | ColumnType::LongDescriptor => 16,
        }
    }

    fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Byte | ColumnType::Short | ColumnType::Int | ColumnType::Long
        )
    }
}

/// Parsed TFORM value, e.g. `1J` or `80A`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnFormat {
    pub repeat: usize,
    pub kind: ColumnType,
}

impl ColumnFormat {
    pub fn new(repeat: usize, kind: ColumnType) -> Self {
        Self { repeat, kind }
    }

    /// Parse a TFORM string; anything after the type letter is ignored
    pub fn parse(tform: &str) -> Result<Self> {
        let tform = tform.trim();
        let digits = tform.chars().take_while(|c| c.is_ascii_digit()).count();

        let repeat = if digits == 0 {
            1
        } else {
            tform[..digits]
                .parse::<usize>()
                .map_err(|_| RegistryError::Fits(format!("bad repeat count in TFORM '{}'", tform)))?
        };

        let code = tform[digits..]
            .chars()
            .next()
            .ok_or_else(|| RegistryError::Fits(format!("TFORM '{}' has no type", tform)))?;
        let kind = ColumnType::from_code(code).ok_or_else(|| {
            RegistryError::Fits(format!("unknown column type '{}' in TFORM '{}'", code, tform))
        })?;

        Ok(Self { repeat, kind })
    }

    /// Width of a cell in bytes
    pub fn width(&self) -> Result<usize> {
        if self.kind == ColumnType::Bit {
            return Ok(self.repeat.div_ceil(8));
        }
        self.repeat
            .checked_mul(self.kind.size_bytes())
            .ok_or_else(|| RegistryError::Fits(format!("TFORM '{}' is too wide", self)))
    }
}

impl std::fmt::Display for ColumnFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.repeat, self.kind.code())
    }
}

/// One column of a binary table
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// TTYPE value
    pub name: String,
    pub format: ColumnFormat,
    /// Byte offset of the cell inside a row
    pub offset: usize,
    /// Cell size in bytes
    pub width: usize,
    /// TSCAL, applied to numeric values
    pub scale: f64,
    /// TZERO, applied to numeric values
    pub zero: f64,
}

/// Decoded view of a BINTABLE HDU
#[derive(Debug)]
pub struct BinTable<'a> {
    columns: Vec<Column>,
    row_len: usize,
    n_rows: usize,
    data: &'a [u8],
}

impl<'a> BinTable<'a> {
    /// Build a table view from an HDU header and its data bytes
    pub fn from_hdu(hdu: &Hdu, data: &'a [u8]) -> Result<Self> {
        match hdu.extension_type() {
            Some("BINTABLE") => {}
            Some(other) => {
                return Err(RegistryError::Fits(format!(
                    "expected a BINTABLE extension, found {}",
                    other
                )))
            }
            None => {
                return Err(RegistryError::Fits(
                    "expected a BINTABLE extension, found the primary HDU".to_string(),
                ))
            }
        }

        let header = &hdu.header;
        let row_len = non_negative(header.require_int("NAXIS1")?, "NAXIS1")?;
        let n_rows = non_negative(header.require_int("NAXIS2")?, "NAXIS2")?;
        let n_fields = non_negative(header.require_int("TFIELDS")?, "TFIELDS")?;

        let mut columns = Vec::with_capacity(n_fields.min(999));
        let mut offset = 0;
        for i in 1..=n_fields {
            let tform = header
                .get_str(&format!("TFORM{}", i))
                .ok_or_else(|| RegistryError::Fits(format!("missing TFORM{}", i)))?;
            let format = ColumnFormat::parse(tform)?;
            let width = format.width()?;

            // Unnamed columns cannot be looked up but still take space in the row
            let name = header
                .get_str(&format!("TTYPE{}", i))
                .unwrap_or_default()
                .to_string();

            columns.push(Column {
                name,
                format,
                offset,
                width,
                scale: header.get_float(&format!("TSCAL{}", i)).unwrap_or(1.0),
                zero: header.get_float(&format!("TZERO{}", i)).unwrap_or(0.0),
            });
            offset = offset.checked_add(width).ok_or_else(|| {
                RegistryError::Fits(format!("row layout overflows at column {}", i))
            })?;
        }

        if offset > row_len {
            return Err(RegistryError::Fits(format!(
                "columns need {} bytes per row but NAXIS1 is {}",
                offset, row_len
            )));
        }

        let table_len = row_len
            .checked_mul(n_rows)
            .ok_or_else(|| RegistryError::Fits("table size overflows".to_string()))?;
        if data.len() < table_len {
            return Err(RegistryError::Fits(format!(
                "table declares {} rows of {} bytes but only {} bytes are present",
                n_rows,
                row_len,
                data.len()
            )));
        }

        Ok(Self {
            columns,
            row_len,
            n_rows,
            data,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of rows (NAXIS2)
    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Index of the column named `name`, ignoring case
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| RegistryError::MissingColumn(name.to_string()))
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        if index >= self.n_rows {
            return None;
        }
        let start = index * self.row_len;
        Some(Row {
            columns: &self.columns,
            bytes: &self.data[start..start + self.row_len],
        })
    }

    /// Iterate rows in file order
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.n_rows).filter_map(move |i| self.row(i))
    }
}

fn non_negative(value: i64, key: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| RegistryError::Fits(format!("{} is negative", key)))
}

/// One table row
#[derive(Debug, Clone, Copy)]
pub struct Row<'t> {
    columns: &'t [Column],
    bytes: &'t [u8],
}

impl<'t> Row<'t> {
    fn cell(&self, col: usize) -> Result<(&'t Column, &'t [u8])> {
        let column = self
            .columns
            .get(col)
            .ok_or_else(|| RegistryError::Fits(format!("column index {} out of range", col)))?;
        if column.format.repeat == 0 {
            return Err(RegistryError::Fits(format!("column {} is empty", column.name)));
        }
        let bytes = &self.bytes[column.offset..column.offset + column.width];
        Ok((column, bytes))
    }

    /// Unscaled first element of a numeric cell
    fn raw_f64(column: &Column, bytes: &[u8]) -> Result<f64> {
        Ok(match column.format.kind {
            ColumnType::Logical => {
                if bytes[0] == b'T' {
                    1.0
                } else {
                    0.0
                }
            }
            ColumnType::Byte => bytes[0] as f64,
            ColumnType::Short => BigEndian::read_i16(bytes) as f64,
            ColumnType::Int => BigEndian::read_i32(bytes) as f64,
            ColumnType::Long => BigEndian::read_i64(bytes) as f64,
            ColumnType::Float => BigEndian::read_f32(bytes) as f64,
            ColumnType::Double => BigEndian::read_f64(bytes),
            ColumnType::Char => {
                return Err(RegistryError::Fits(format!(
                    "column {} holds text, not a number",
                    column.name
                )))
            }
            other => {
                return Err(RegistryError::Fits(format!(
                    "column {} has type '{}', which cannot be read as a scalar",
                    column.name,
                    other.code()
                )))
            }
        })
    }

    /// First element of a numeric cell, with TSCAL/TZERO applied
    pub fn get_f64(&self, col: usize) -> Result<f64> {
        let (column, bytes) = self.cell(col)?;
        let raw = Self::raw_f64(column, bytes)?;
        Ok(raw * column.scale + column.zero)
    }

    /// First element of a numeric cell as an integer
    ///
    /// Integer columns with unit scale are converted exactly; anything else is
    /// scaled as a float and truncated toward zero.
    pub fn get_i64(&self, col: usize) -> Result<i64> {
        let (column, bytes) = self.cell(col)?;
        let kind = column.format.kind;

        if kind.is_integer() && column.scale == 1.0 && column.zero.fract() == 0.0 {
            let raw = match kind {
                ColumnType::Byte => bytes[0] as i64,
                ColumnType::Short => BigEndian::read_i16(bytes) as i64,
                ColumnType::Int => BigEndian::read_i32(bytes) as i64,
                _ => BigEndian::read_i64(bytes),
            };
            return Ok(raw.wrapping_add(column.zero as i64));
        }

        Ok(self.get_f64(col)? as i64)
    }

    /// Raw bytes of a character cell, padding included
    pub fn get_bytes(&self, col: usize) -> Result<&'t [u8]> {
        let (column, bytes) = self.cell(col)?;
        if column.format.kind != ColumnType::Char {
            return Err(RegistryError::Fits(format!(
                "column {} is numeric, not text",
                column.name
            )));
        }
        Ok(bytes)
    }

    /// Character cell as a string with trailing blanks removed
    ///
    /// Embedded NULs are preserved.
    pub fn get_string(&self, col: usize) -> Result<String> {
        let bytes = self.get_bytes(col)?;
        let text = String::from_utf8_lossy(bytes);
        Ok(text.trim_end_matches(&[' ', '\0'][..]).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::{parse_header, HeaderValue, BLOCK_SIZE, CARD_SIZE};

    fn table_hdu(cards: &[&str]) -> Hdu {
        let mut bytes = Vec::new();
        for text in cards.iter().copied().chain(["END"]) {
            let mut card = text.as_bytes().to_vec();
            card.resize(CARD_SIZE, b' ');
            bytes.extend(card);
        }
        bytes.resize(BLOCK_SIZE, b' ');
        let (header, _) = parse_header(&bytes).unwrap();
        Hdu {
            header,
            data_offset: 0,
            data_len: 0,
        }
    }

    fn sample_hdu() -> Hdu {
        table_hdu(&[
            "XTENSION= 'BINTABLE'",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =                   16",
            "NAXIS2  =                    2",
            "PCOUNT  =                    0",
            "GCOUNT  =                    1",
            "TFIELDS =                    3",
            "TTYPE1  = 'VERSION '",
            "TFORM1  = '1J      '",
            "TTYPE2  = 'UNSIGNED'",
            "TFORM2  = '1I      '",
            "TZERO2  =                32768",
            "TTYPE3  = 'LABEL   '",
            "TFORM3  = '10A     '",
        ])
    }

    fn sample_data() -> Vec<u8> {
        let mut data = Vec::new();
        for (version, raw, label) in [(7i32, -32768i16, &b"FOO\0BAR   "[..]), (-2, 100, &b"flat      "[..])] {
            data.extend(version.to_be_bytes());
            data.extend(raw.to_be_bytes());
            data.extend(label);
        }
        data
    }

    #[test]
    fn test_parse_tform() {
        assert_eq!(
            ColumnFormat::parse("1J").unwrap(),
            ColumnFormat::new(1, ColumnType::Int)
        );
        assert_eq!(
            ColumnFormat::parse("D").unwrap(),
            ColumnFormat::new(1, ColumnType::Double)
        );
        let text = ColumnFormat::parse("80A").unwrap();
        assert_eq!(text.width().unwrap(), 80);
        assert_eq!(text.to_string(), "80A");

        let descriptor = ColumnFormat::parse("1PE(200)").unwrap();
        assert_eq!(descriptor.kind, ColumnType::Descriptor);
        assert_eq!(descriptor.width().unwrap(), 8);

        assert!(ColumnFormat::parse("12").is_err());
        assert!(matches!(
            ColumnFormat::parse("1Z"),
            Err(RegistryError::Fits(msg)) if msg.contains("'Z'")
        ));
    }

    #[test]
    fn test_format_widths() {
        let width = |tform: &str| ColumnFormat::parse(tform).unwrap().width().unwrap();
        assert_eq!(width("1X"), 1);
        assert_eq!(width("8X"), 1);
        assert_eq!(width("9X"), 2);
        assert_eq!(width("32X"), 4);
        assert_eq!(width("2C"), 16);
        assert_eq!(width("M"), 16);
        assert_eq!(width("1QD(10)"), 16);
        assert_eq!(width("0J"), 0);

        let huge = ColumnFormat::new(usize::MAX, ColumnType::Double);
        assert!(matches!(huge.width(), Err(RegistryError::Fits(msg)) if msg.contains("too wide")));
    }

    #[test]
    fn test_unread_column_types_keep_layout() {
        let hdu = table_hdu(&[
            "XTENSION= 'BINTABLE'",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =                   48",
            "NAXIS2  =                    1",
            "TFIELDS =                    6",
            "TTYPE1  = 'FLAGS   '",
            "TFORM1  = '12X     '",
            "TTYPE2  = 'GAIN    '",
            "TFORM2  = '1C      '",
            "TTYPE3  = 'NOISE   '",
            "TFORM3  = '1M      '",
            "TTYPE4  = 'HISTORY '",
            "TFORM4  = '1PJ(4)  '",
            "TTYPE5  = 'VERSION '",
            "TFORM5  = '1J      '",
            "TTYPE6  = 'LABEL   '",
            "TFORM6  = '10A     '",
        ]);
        let mut data = vec![0xffu8; 2];
        data.extend([0u8; 8 + 16 + 8]);
        data.extend(42i32.to_be_bytes());
        data.extend(b"09Am02    ");

        let table = BinTable::from_hdu(&hdu, &data).unwrap();
        let offsets: Vec<usize> = table.columns().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 2, 10, 26, 34, 38]);

        let row = table.row(0).unwrap();
        assert_eq!(row.get_i64(4).unwrap(), 42);
        assert_eq!(row.get_string(5).unwrap(), "09Am02");

        // Only reading the unsupported cells fails
        for col in 0..4 {
            assert!(matches!(row.get_f64(col), Err(RegistryError::Fits(_))));
            assert!(matches!(row.get_i64(col), Err(RegistryError::Fits(_))));
            assert!(row.get_string(col).is_err());
        }
    }

    #[test]
    fn test_rejects_overflowing_layout() {
        let hdu = table_hdu(&[
            "XTENSION= 'BINTABLE'",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =                    8",
            "NAXIS2  =                    1",
            "TFIELDS =                    2",
            "TFORM1  = '1D      '",
            "TFORM2  = '2305843009213693951D'",
        ]);
        let result = BinTable::from_hdu(&hdu, &[0u8; 8]);
        assert!(matches!(result, Err(RegistryError::Fits(_))));

        let hdu = table_hdu(&[
            "XTENSION= 'BINTABLE'",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =  4611686018427387904",
            "NAXIS2  =                    8",
            "TFIELDS =                    0",
        ]);
        let result = BinTable::from_hdu(&hdu, &[]);
        assert!(matches!(result, Err(RegistryError::Fits(msg)) if msg.contains("overflows")));
    }

    #[test]
    fn test_column_layout() {
        let data = sample_data();
        let hdu = sample_hdu();
        let table = BinTable::from_hdu(&hdu, &data).unwrap();

        assert_eq!(table.len(), 2);
        let offsets: Vec<usize> = table.columns().iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 4, 6]);
        assert_eq!(table.column_index("label").unwrap(), 2);
        assert!(matches!(
            table.column_index("PATH"),
            Err(RegistryError::MissingColumn(name)) if name == "PATH"
        ));
    }

    #[test]
    fn test_row_values() {
        let data = sample_data();
        let hdu = sample_hdu();
        let table = BinTable::from_hdu(&hdu, &data).unwrap();

        let rows: Vec<Row> = table.rows().collect();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].get_i64(0).unwrap(), 7);
        assert_eq!(rows[1].get_i64(0).unwrap(), -2);
        assert_eq!(rows[0].get_f64(0).unwrap(), 7.0);

        // TZERO shifts signed shorts into the unsigned range
        assert_eq!(rows[0].get_i64(1).unwrap(), 0);
        assert_eq!(rows[1].get_i64(1).unwrap(), 32868);

        assert_eq!(rows[0].get_string(2).unwrap(), "FOO\0BAR");
        assert_eq!(rows[1].get_string(2).unwrap(), "flat");
        assert_eq!(rows[1].get_bytes(2).unwrap().len(), 10);

        assert!(rows[0].get_f64(2).is_err());
        assert!(rows[0].get_string(0).is_err());
        assert!(table.row(2).is_none());
    }

    #[test]
    fn test_rejects_short_data() {
        let data = sample_data();
        let hdu = sample_hdu();
        let result = BinTable::from_hdu(&hdu, &data[..20]);
        assert!(matches!(result, Err(RegistryError::Fits(msg)) if msg.contains("rows")));
    }

    #[test]
    fn test_rejects_other_extensions() {
        let hdu = table_hdu(&[
            "XTENSION= 'IMAGE   '",
            "BITPIX  =                   16",
            "NAXIS   =                    0",
        ]);
        assert_eq!(
            hdu.header.get("XTENSION"),
            Some(&HeaderValue::String("IMAGE".to_string()))
        );
        let result = BinTable::from_hdu(&hdu, &[]);
        assert!(matches!(result, Err(RegistryError::Fits(msg)) if msg.contains("IMAGE")));
    }

    #[test]
    fn test_rejects_columns_wider_than_row() {
        let hdu = table_hdu(&[
            "XTENSION= 'BINTABLE'",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =                    4",
            "NAXIS2  =                    0",
            "TFIELDS =                    1",
            "TTYPE1  = 'EXPTIME '",
            "TFORM1  = '1D      '",
        ]);
        let result = BinTable::from_hdu(&hdu, &[]);
        assert!(matches!(result, Err(RegistryError::Fits(msg)) if msg.contains("NAXIS1")));
    }
}
