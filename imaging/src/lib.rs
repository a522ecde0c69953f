//! Frame data for sky flat measurement
//!
//! Holds decoded pixel data for a single calibration frame and reduces it to
//! the scalar statistics the flat sequencer needs. FITS is the only on-disk
//! format handled here.

mod fits;

pub use fits::*;

/// Storage type of a single pixel sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl PixelType {
    /// Size in bytes of one sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
            PixelType::U32 | PixelType::F32 => 4,
            PixelType::F64 => 8,
        }
    }

    /// FITS BITPIX value used when writing this type
    pub fn bitpix(&self) -> i32 {
        match self {
            PixelType::U8 => 8,
            PixelType::U16 => 16,
            PixelType::U32 => 32,
            PixelType::F32 => -32,
            PixelType::F64 => -64,
        }
    }
}

/// Decoded image. Samples are stored little-endian in `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixel_type: PixelType,
    pub data: Vec<u8>,
}

impl ImageData {
    /// Zero-filled image
    pub fn new(width: u32, height: u32, channels: u32, pixel_type: PixelType) -> Self {
        let len = width as usize
            * height as usize
            * channels as usize
            * pixel_type.bytes_per_sample();
        Self {
            width,
            height,
            channels,
            pixel_type,
            data: vec![0u8; len],
        }
    }

    #[cfg(any(test, feature = "writer"))]
    pub fn from_u16(width: u32, height: u32, channels: u32, pixels: &[u16]) -> Self {
        Self {
            width,
            height,
            channels,
            pixel_type: PixelType::U16,
            data: pixels.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    #[cfg(any(test, feature = "writer"))]
    pub fn from_f32(width: u32, height: u32, channels: u32, pixels: &[f32]) -> Self {
        Self {
            width,
            height,
            channels,
            pixel_type: PixelType::F32,
            data: pixels.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// Number of samples actually stored
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.pixel_type.bytes_per_sample()
    }

    /// Iterate over every sample as `f64`
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        let pixel_type = self.pixel_type;
        self.data
            .chunks_exact(pixel_type.bytes_per_sample())
            .map(move |chunk| match pixel_type {
                PixelType::U8 => chunk[0] as f64,
                PixelType::U16 => u16::from_le_bytes([chunk[0], chunk[1]]) as f64,
                PixelType::U32 => {
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
                }
                PixelType::F32 => {
                    f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
                }
                PixelType::F64 => f64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]),
            })
    }

    /// Arithmetic mean over all samples, `None` for an empty image.
    ///
    /// Summation is done in `f64`; a 16-bit frame of 100 megapixels stays well
    /// inside the exact integer range of the mantissa.
    pub fn mean(&self) -> Option<f64> {
        let count = self.sample_count();
        if count == 0 {
            return None;
        }
        let sum: f64 = self.samples().sum();
        Some(sum / count as f64)
    }
}
