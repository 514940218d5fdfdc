//! # Frame encoder
//!
//! Converts one raw frame into one compressed frame, written into a caller supplied buffer. The
//! encoder holds any conversion scratch space itself so that steady-state encoding does not
//! allocate.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::{self, Cursor};

use comms_if::eqpt::cam::{FrameFormat, Geometry, PixelFormat};
use image::{codecs::jpeg, ColorType, ImageError};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::EncoderParams;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A stateful compressor used by the producer.
pub trait FrameEncoder {
    /// The configuration currently in use.
    fn config(&self) -> &EncoderConfig;

    /// Format of the frames produced.
    fn format(&self) -> FrameFormat;

    /// Change the expected input geometry and pixel format.
    fn reconfigure(
        &mut self,
        geometry: Geometry,
        pixel_format: PixelFormat,
    ) -> Result<(), EncoderInitError>;

    /// Change the compression quality used for subsequent frames.
    fn set_quality(&mut self, quality: u8) -> Result<(), EncoderInitError>;

    /// Encode `input` into `output`, returning the number of bytes written.
    ///
    /// On failure the contents of `output` are unspecified but its capacity is never exceeded.
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, EncodeError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub geometry: Geometry,
    pub pixel_format: PixelFormat,
    pub quality: u8,
}

/// Software baseline JPEG encoder.
pub struct JpegEncoder {
    config: EncoderConfig,

    /// RGB conversion buffer for YUYV input, empty for other formats
    rgb: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The encoder cannot be used with the requested configuration.
#[derive(Debug, Error, PartialEq)]
pub enum EncoderInitError {
    #[error("Frame geometry {0} is empty")]
    EmptyGeometry(Geometry),

    #[error("YUYV frames need an even width, got {0}")]
    OddYuyvWidth(u32),

    #[error("Quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),

    #[error("Could not reserve {0} bytes of conversion buffer")]
    AllocFailed(usize),
}

/// A single frame could not be encoded.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Raw frame is {got} bytes, expected at least {expected}")]
    InputTooShort { expected: usize, got: usize },

    #[error("Compressed frame does not fit the {capacity} byte output buffer")]
    OutputOverflow { capacity: usize },

    #[error("Encoder produced no output")]
    EmptyOutput,

    #[error("Encoder error: {0}")]
    Codec(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<&EncoderParams> for EncoderConfig {
    fn from(params: &EncoderParams) -> Self {
        Self {
            geometry: params.geometry(),
            pixel_format: params.pixel_format,
            quality: params.quality,
        }
    }
}

impl EncoderConfig {
    fn validate(&self) -> Result<(), EncoderInitError> {
        if self.geometry.num_pixels() == 0 {
            return Err(EncoderInitError::EmptyGeometry(self.geometry));
        }
        if self.pixel_format == PixelFormat::Yuyv && self.geometry.width % 2 != 0 {
            return Err(EncoderInitError::OddYuyvWidth(self.geometry.width));
        }
        validate_quality(self.quality)
    }
}

impl JpegEncoder {
    pub fn open(config: EncoderConfig) -> Result<Self, EncoderInitError> {
        config.validate()?;

        let mut enc = Self {
            config,
            rgb: Vec::new(),
        };
        enc.size_scratch()?;

        debug!(
            "JPEG encoder opened: {} {:?} quality {}",
            config.geometry, config.pixel_format, config.quality
        );

        Ok(enc)
    }

    fn size_scratch(&mut self) -> Result<(), EncoderInitError> {
        let needed = match self.config.pixel_format {
            PixelFormat::Yuyv => PixelFormat::Rgb24.frame_len(self.config.geometry),
            _ => 0,
        };

        self.rgb.clear();
        self.rgb
            .try_reserve_exact(needed)
            .map_err(|_| EncoderInitError::AllocFailed(needed))?;
        self.rgb.resize(needed, 0);
        Ok(())
    }
}

impl FrameEncoder for JpegEncoder {
    fn config(&self) -> &EncoderConfig {
        &self.config
    }

    fn format(&self) -> FrameFormat {
        FrameFormat::Jpeg
    }

    fn reconfigure(
        &mut self,
        geometry: Geometry,
        pixel_format: PixelFormat,
    ) -> Result<(), EncoderInitError> {
        let config = EncoderConfig {
            geometry,
            pixel_format,
            ..self.config
        };
        config.validate()?;

        self.config = config;
        self.size_scratch()
    }

    fn set_quality(&mut self, quality: u8) -> Result<(), EncoderInitError> {
        validate_quality(quality)?;
        self.config.quality = quality;
        Ok(())
    }

    fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, EncodeError> {
        let EncoderConfig {
            geometry,
            pixel_format,
            quality,
        } = self.config;

        // Drivers may hand over padded buffers, anything past one frame is ignored
        let expected = pixel_format.frame_len(geometry);
        if input.len() < expected {
            return Err(EncodeError::InputTooShort {
                expected,
                got: input.len(),
            });
        }
        let input = &input[..expected];

        let (data, color) = match pixel_format {
            PixelFormat::Yuyv => {
                yuyv_to_rgb(input, &mut self.rgb);
                (&self.rgb[..], ColorType::Rgb8)
            }
            PixelFormat::Rgb24 => (input, ColorType::Rgb8),
            PixelFormat::Gray8 => (input, ColorType::L8),
        };

        let capacity = output.len();
        let mut cursor = Cursor::new(output);

        jpeg::JpegEncoder::new_with_quality(&mut cursor, quality)
            .encode(data, geometry.width, geometry.height, color)
            .map_err(|e| match e {
                // A full cursor refuses further writes, which surfaces as a write-zero error
                ImageError::IoError(ref err) if err.kind() == io::ErrorKind::WriteZero => {
                    EncodeError::OutputOverflow { capacity }
                }
                other => EncodeError::Codec(other.to_string()),
            })?;

        match cursor.position() as usize {
            0 => Err(EncodeError::EmptyOutput),
            n => Ok(n),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn validate_quality(quality: u8) -> Result<(), EncoderInitError> {
    match quality {
        1..=100 => Ok(()),
        q => Err(EncoderInitError::InvalidQuality(q)),
    }
}

/// Convert packed YUYV into packed RGB using the BT.601 integer approximation.
///
/// `rgb` must hold 3 bytes for every 2 bytes of `yuyv`.
pub fn yuyv_to_rgb(yuyv: &[u8], rgb: &mut [u8]) {
    for (pair, out) in yuyv.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let u = pair[1] as i32 - 128;
        let v = pair[3] as i32 - 128;

        for (i, &y) in [pair[0], pair[2]].iter().enumerate() {
            let c = 298 * (y as i32 - 16);
            out[i * 3] = clamp_u8((c + 409 * v + 128) >> 8);
            out[i * 3 + 1] = clamp_u8((c - 100 * u - 208 * v + 128) >> 8);
            out[i * 3 + 2] = clamp_u8((c + 516 * u + 128) >> 8);
        }
    }
}

fn clamp_u8(x: i32) -> u8 {
    x.max(0).min(255) as u8
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
