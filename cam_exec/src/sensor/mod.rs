//! # Frame sensors
//!
//! A sensor lends out raw frames which must be handed back with [`FrameSensor::release_frame`]
//! once the producer is done with them, mirroring a driver's ring of frame buffers.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod test_pattern;

#[cfg(feature = "v4l")]
pub mod v4l;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::cam::{Geometry, PixelFormat};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use test_pattern::TestPatternSensor;

#[cfg(feature = "v4l")]
pub use self::v4l::V4lSensor;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A raw frame lent out by a sensor.
pub trait RawFrame {
    fn data(&self) -> &[u8];

    fn geometry(&self) -> Geometry;

    fn pixel_format(&self) -> PixelFormat;
}

/// A source of raw frames.
pub trait FrameSensor {
    type Frame: RawFrame;

    /// Acquire the next frame, blocking until one is available.
    fn capture_frame(&mut self) -> Result<Self::Frame, SensorError>;

    /// Give a frame back to the sensor.
    fn release_frame(&mut self, frame: Self::Frame);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A raw frame held in an owned buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub geometry: Geometry,
    pub pixel_format: PixelFormat,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Every frame buffer is still held by the caller")]
    NoFreeBuffer,

    #[error("Timed out waiting for a frame")]
    Timeout,

    #[error("Sensor device error: {0}")]
    Device(String),

    #[error("Sensor IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RawFrame for OwnedFrame {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Rotate a packed YUYV frame by 180 degrees in place.
///
/// Pixel pairs are reversed and the two luma samples of each pair swapped. Chroma is shared by
/// the pair so it stays with it.
pub fn rotate_yuyv_180(buf: &mut [u8]) {
    let pairs = buf.len() / 4;
    let (mut lo, mut hi) = (0, pairs);

    while lo + 1 < hi {
        hi -= 1;
        for k in 0..4 {
            buf.swap(lo * 4 + k, hi * 4 + k);
        }
        buf.swap(lo * 4, lo * 4 + 2);
        buf.swap(hi * 4, hi * 4 + 2);
        lo += 1;
    }

    // The middle pair of an odd pair count only needs its luma swapped
    if lo + 1 == hi {
        buf.swap(lo * 4, lo * 4 + 2);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
