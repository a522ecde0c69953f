//! FITS file I/O
//!
//! Reads and writes the primary HDU of a FITS file:
//! - 2880-byte blocks
//! - Header of 80-character keyword records terminated by `END`
//! - Big-endian data, optionally scaled by BZERO/BSCALE
//!
//! Extensions, tables and compressed images are not supported.

use crate::{ImageData, PixelType};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
#[cfg(any(test, feature = "writer"))]
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

const BLOCK_SIZE: usize = 2880;
const RECORD_SIZE: usize = 80;

/// Keywords owned by the writer; user-supplied values for these are ignored.
#[cfg(any(test, feature = "writer"))]
const STRUCTURAL_KEYWORDS: [&str; 8] = [
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "BZERO", "BSCALE",
];

/// FITS header containing all keywords
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    /// Keyword-value pairs
    pub keywords: HashMap<String, FitsValue>,
    /// Keywords in order (for writing)
    #[cfg(any(test, feature = "writer"))]
    keyword_order: Vec<String>,
}

/// FITS value types
#[derive(Debug, Clone, PartialEq)]
pub enum FitsValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl FitsValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            FitsValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FitsValue::Integer(i) => Some(*i),
            FitsValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FitsValue::Float(f) => Some(*f),
            FitsValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[cfg(any(test, feature = "writer"))]
    fn to_card_value(&self) -> String {
        match self {
            FitsValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            FitsValue::Integer(i) => i.to_string(),
            FitsValue::Float(f) => format!("{:.10E}", f),
            FitsValue::Boolean(b) => if *b { "T".to_string() } else { "F".to_string() },
        }
    }
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, key: &str, value: FitsValue) {
        let key_upper = key.to_uppercase();
        #[cfg(any(test, feature = "writer"))]
        if !self.keyword_order.contains(&key_upper) {
            self.keyword_order.push(key_upper.clone());
        }
        self.keywords.insert(key_upper, value);
    }
}

#[cfg(any(test, feature = "writer"))]
impl FitsHeader {
    pub fn set_string(&mut self, key: &str, value: &str) {
        self.insert(key, FitsValue::String(value.to_string()));
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.insert(key, FitsValue::Integer(value));
    }

    pub fn set_float(&mut self, key: &str, value: f64) {
        self.insert(key, FitsValue::Float(value));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.insert(key, FitsValue::Boolean(value));
    }
}

impl FitsHeader {
    pub fn get(&self, key: &str) -> Option<&FitsValue> {
        self.keywords.get(&key.to_uppercase())
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_string())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }
}

/// FITS file reading errors
#[derive(Debug, Error)]
pub enum FitsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FITS format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported BITPIX: {0}")]
    UnsupportedBitpix(i64),

    #[error("Missing required keyword: {0}")]
    MissingKeyword(String),
}

/// Read a FITS file from disk
pub fn read_fits(path: &Path) -> Result<(ImageData, FitsHeader), FitsError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let result = read_fits_from_reader(&mut reader)?;
    tracing::debug!(
        "Read FITS {}: {}x{}x{} {:?}",
        path.display(),
        result.0.width,
        result.0.height,
        result.0.channels,
        result.0.pixel_type
    );
    Ok(result)
}

/// Read FITS from memory buffer
pub fn read_fits_from_bytes(bytes: &[u8]) -> Result<(ImageData, FitsHeader), FitsError> {
    let mut reader = std::io::Cursor::new(bytes);
    read_fits_from_reader(&mut reader)
}

fn read_fits_from_reader<R: Read>(reader: &mut R) -> Result<(ImageData, FitsHeader), FitsError> {
    let header = read_header(reader)?;

    let bitpix = header
        .get_int("BITPIX")
        .ok_or_else(|| FitsError::MissingKeyword("BITPIX".to_string()))?;
    let naxis = header
        .get_int("NAXIS")
        .ok_or_else(|| FitsError::MissingKeyword("NAXIS".to_string()))?;

    if naxis == 0 {
        // Header-only HDU
        return Ok((ImageData::new(0, 0, 1, PixelType::U16), header));
    }

    let width = header
        .get_int("NAXIS1")
        .ok_or_else(|| FitsError::MissingKeyword("NAXIS1".to_string()))?;
    let height = if naxis >= 2 { header.get_int("NAXIS2").unwrap_or(1) } else { 1 };
    let depth = if naxis >= 3 { header.get_int("NAXIS3").unwrap_or(1) } else { 1 };
    let (width, height, depth) = (axis_length(width)?, axis_length(height)?, axis_length(depth)?);
    let count = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(depth as usize))
        .ok_or_else(|| {
            FitsError::InvalidFormat(format!(
                "image of {}x{}x{} pixels is too large",
                width, height, depth
            ))
        })?;

    let bzero = header.get_float("BZERO").unwrap_or(0.0);
    let bscale = header.get_float("BSCALE").unwrap_or(1.0);
    let scaled = bzero != 0.0 || bscale != 1.0;

    let (pixel_type, data) = match bitpix {
        8 => {
            let raw = read_raw(reader, count, 1)?;
            let data = if scaled {
                raw.iter()
                    .map(|&v| (v as f64 * bscale + bzero).clamp(0.0, 255.0) as u8)
                    .collect()
            } else {
                raw
            };
            (PixelType::U8, data)
        }
        16 => {
            let raw = read_raw(reader, count, 2)?;
            let data = raw
                .chunks_exact(2)
                .flat_map(|c| {
                    let v = i16::from_be_bytes([c[0], c[1]]);
                    // Unsigned 16-bit is stored signed with BZERO=32768
                    let unsigned = if bzero == 32768.0 && bscale == 1.0 {
                        (v as i32 + 32768) as u16
                    } else {
                        (v as f64 * bscale + bzero).clamp(0.0, 65535.0) as u16
                    };
                    unsigned.to_le_bytes()
                })
                .collect();
            (PixelType::U16, data)
        }
        32 => {
            let raw = read_raw(reader, count, 4)?;
            let data = raw
                .chunks_exact(4)
                .flat_map(|c| {
                    let v = i32::from_be_bytes([c[0], c[1], c[2], c[3]]);
                    let unsigned = (v as f64 * bscale + bzero).clamp(0.0, u32::MAX as f64) as u32;
                    unsigned.to_le_bytes()
                })
                .collect();
            (PixelType::U32, data)
        }
        -32 => {
            let raw = read_raw(reader, count, 4)?;
            let data = raw
                .chunks_exact(4)
                .flat_map(|c| {
                    let v = f32::from_be_bytes([c[0], c[1], c[2], c[3]]);
                    (v * bscale as f32 + bzero as f32).to_le_bytes()
                })
                .collect();
            (PixelType::F32, data)
        }
        -64 => {
            let raw = read_raw(reader, count, 8)?;
            let data = raw
                .chunks_exact(8)
                .flat_map(|c| {
                    let v = f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                    (v * bscale + bzero).to_le_bytes()
                })
                .collect();
            (PixelType::F64, data)
        }
        other => return Err(FitsError::UnsupportedBitpix(other)),
    };

    let image = ImageData {
        width,
        height,
        channels: depth,
        pixel_type,
        data,
    };

    Ok((image, header))
}

fn axis_length(value: i64) -> Result<u32, FitsError> {
    u32::try_from(value)
        .map_err(|_| FitsError::InvalidFormat(format!("axis length {} out of range", value)))
}

/// Read the FITS header (80-character records until END) and skip its padding
pub(crate) fn read_header<R: Read>(reader: &mut R) -> Result<FitsHeader, FitsError> {
    let mut header = FitsHeader::new();
    let mut buffer = [0u8; RECORD_SIZE];
    let mut records = 0usize;

    loop {
        reader.read_exact(&mut buffer)?;
        records += 1;

        let record = String::from_utf8_lossy(&buffer);
        if records == 1 && !record.starts_with("SIMPLE") {
            return Err(FitsError::InvalidFormat(
                "first record is not SIMPLE".to_string(),
            ));
        }

        let keyword = record.get(..8).unwrap_or("").trim();
        if keyword == "END" {
            break;
        }
        if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
            continue;
        }

        if record.get(8..10) == Some("= ") {
            let value = parse_fits_value(record.get(10..).unwrap_or(""));
            header.insert(keyword, value);
        }
    }

    let padding = (BLOCK_SIZE - (records * RECORD_SIZE) % BLOCK_SIZE) % BLOCK_SIZE;
    if padding > 0 {
        let mut skip = vec![0u8; padding];
        reader.read_exact(&mut skip)?;
    }

    Ok(header)
}

/// Parse a FITS value from the text after `= `
fn parse_fits_value(s: &str) -> FitsValue {
    let s = s.trim();

    if let Some(rest) = s.strip_prefix('\'') {
        // '' is an escaped quote inside a string
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        return FitsValue::String(value.trim_end().to_string());
    }

    let value_part = match s.find('/') {
        Some(idx) => s[..idx].trim(),
        None => s,
    };

    match value_part {
        "T" => return FitsValue::Boolean(true),
        "F" => return FitsValue::Boolean(false),
        _ => {}
    }

    if let Ok(i) = value_part.parse::<i64>() {
        return FitsValue::Integer(i);
    }

    if let Ok(f) = value_part.replace(|c: char| c == 'D' || c == 'd', "E").parse::<f64>() {
        return FitsValue::Float(f);
    }

    FitsValue::String(value_part.to_string())
}

/// Read `count` samples. The buffer grows with the data actually present, so a
/// header claiming more pixels than the file holds fails without allocating
/// the claimed size.
fn read_raw<R: Read>(
    reader: &mut R,
    count: usize,
    bytes_per_sample: usize,
) -> Result<Vec<u8>, FitsError> {
    let expected = count.checked_mul(bytes_per_sample).ok_or_else(|| {
        FitsError::InvalidFormat(format!(
            "{} samples of {} bytes is too large",
            count, bytes_per_sample
        ))
    })?;

    let mut buffer = Vec::new();
    reader.by_ref().take(expected as u64).read_to_end(&mut buffer)?;
    if buffer.len() < expected {
        return Err(FitsError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("data unit holds {} of {} bytes", buffer.len(), expected),
        )));
    }
    Ok(buffer)
}

/// Write a FITS file to disk
#[cfg(any(test, feature = "writer"))]
pub fn write_fits(path: &Path, image: &ImageData, header: &FitsHeader) -> Result<(), FitsError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let mut records = 0usize;

    let naxis = if image.channels > 1 { 3 } else { 2 };
    write_keyword(&mut writer, "SIMPLE", "T", &mut records)?;
    write_keyword(&mut writer, "BITPIX", &image.pixel_type.bitpix().to_string(), &mut records)?;
    write_keyword(&mut writer, "NAXIS", &naxis.to_string(), &mut records)?;
    write_keyword(&mut writer, "NAXIS1", &image.width.to_string(), &mut records)?;
    write_keyword(&mut writer, "NAXIS2", &image.height.to_string(), &mut records)?;
    if image.channels > 1 {
        write_keyword(&mut writer, "NAXIS3", &image.channels.to_string(), &mut records)?;
    }

    if image.pixel_type == PixelType::U16 {
        write_keyword(&mut writer, "BZERO", "32768", &mut records)?;
        write_keyword(&mut writer, "BSCALE", "1", &mut records)?;
    }

    for key in &header.keyword_order {
        if STRUCTURAL_KEYWORDS.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = header.keywords.get(key) {
            write_keyword(&mut writer, key, &value.to_card_value(), &mut records)?;
        }
    }

    write_keyword(&mut writer, "END", "", &mut records)?;
    let padding = (BLOCK_SIZE - (records * RECORD_SIZE) % BLOCK_SIZE) % BLOCK_SIZE;
    writer.write_all(&vec![b' '; padding])?;

    let bytes = image.pixel_type.bytes_per_sample();
    for chunk in image.data.chunks_exact(bytes) {
        match image.pixel_type {
            PixelType::U8 => writer.write_all(chunk)?,
            PixelType::U16 => {
                let val = u16::from_le_bytes([chunk[0], chunk[1]]);
                let signed = (val as i32 - 32768) as i16;
                writer.write_all(&signed.to_be_bytes())?;
            }
            PixelType::U32 => {
                let val = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                writer.write_all(&(val as i32).to_be_bytes())?;
            }
            PixelType::F32 => {
                let val = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                writer.write_all(&val.to_be_bytes())?;
            }
            PixelType::F64 => {
                let val = f64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]);
                writer.write_all(&val.to_be_bytes())?;
            }
        }
    }

    let data_size = image.data.len();
    let padding = (BLOCK_SIZE - data_size % BLOCK_SIZE) % BLOCK_SIZE;
    writer.write_all(&vec![0u8; padding])?;

    writer.flush()?;
    Ok(())
}

/// Write a single keyword record
#[cfg(any(test, feature = "writer"))]
fn write_keyword<W: Write>(
    writer: &mut W,
    keyword: &str,
    value: &str,
    records: &mut usize,
) -> Result<(), FitsError> {
    let mut record = [b' '; RECORD_SIZE];

    let keyword_bytes = keyword.as_bytes();
    let keyword_len = keyword_bytes.len().min(8);
    record[..keyword_len].copy_from_slice(&keyword_bytes[..keyword_len]);

    if keyword != "END" && !value.is_empty() {
        record[8] = b'=';
        record[9] = b' ';

        // Strings start at column 11, numbers are right-justified to column 30
        let value_bytes = value.as_bytes();
        let value_len = value_bytes.len().min(RECORD_SIZE - 10);
        let start = if value.starts_with('\'') {
            10
        } else {
            30_usize.saturating_sub(value_len).max(10)
        };
        record[start..start + value_len].copy_from_slice(&value_bytes[..value_len]);
    }

    writer.write_all(&record)?;
    *records += 1;
    Ok(())
}
