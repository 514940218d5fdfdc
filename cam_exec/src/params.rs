//! # Camera Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use comms_if::eqpt::cam::{Geometry, PixelFormat};
use serde::Deserialize;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// All parameters of the camera executable, loaded from `cam_exec.toml`.
#[derive(Deserialize, Default, Debug, Clone)]
#[serde(default)]
pub struct CamExecParams {
    /// Name reported by the `get-name` and `stats` commands
    pub camera_name: String,

    pub pipeline: PipelineParams,

    pub encoder: EncoderParams,

    pub sensor: SensorParams,

    pub stream: StreamParams,

    pub command: CommandParams,
}

/// Frame pool and hand-off queue sizing.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PipelineParams {
    /// Number of slots in the frame pool
    pub pool_size: usize,

    /// Capacity of the queue between the producer and the stream clients
    pub queue_capacity: usize,

    /// Capacity of each slot's compressed buffer in bytes
    pub max_compressed_size: usize,

    /// Capacity of each slot's raw staging buffer in bytes. Zero means one full frame of the
    /// encoder's geometry and pixel format.
    pub max_raw_size: usize,

    /// How long a stream client waits on the queue before checking for shutdown
    pub consumer_poll_ms: u64,

    /// Delay after a failed capture or encode before the next attempt
    pub backoff_ms: u64,
}

/// Compression parameters.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EncoderParams {
    pub width: u32,

    pub height: u32,

    /// Layout of the raw frames fed to the encoder
    pub pixel_format: PixelFormat,

    /// JPEG quality, 1 (smallest) to 100 (best)
    pub quality: u8,
}

/// Sensor selection.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SensorParams {
    pub kind: SensorKind,

    /// Linux device path, used by the `v4l` sensor
    pub device: String,

    /// Time between frames, the test pattern sleeps for this long and V4L2 requests it as the
    /// frame interval
    pub frame_interval_ms: u64,

    /// Number of frame buffers held by the driver
    pub fb_count: usize,

    /// Rotate the image by 180 degrees, for sensors mounted upside down
    pub rotate_180: bool,
}

/// HTTP stream server parameters.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StreamParams {
    /// Address the server listens on
    pub bind: String,

    /// Maximum number of concurrent `/stream` clients
    pub max_clients: usize,

    /// Socket send/receive timeout, must not be zero
    pub socket_timeout_ms: u64,
}

/// Command side channel parameters.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CommandParams {
    pub channel: CommandChannel,

    /// Listen address for the `tcp` channel
    pub bind: String,

    /// Serial device for the `device` channel
    pub device: String,

    /// Line speed of the serial device, which is always 8N1 without flow control
    pub baud_rate: u32,

    /// Longest accepted line including the terminator, further bytes are discarded
    pub line_capacity: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Synthetic moving colour bars
    TestPattern,

    /// Video4Linux capture device (requires the `v4l` feature)
    V4l,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandChannel {
    Stdin,
    Tcp,
    Device,
    /// Side channel disabled
    None,
}

/// Parameter combinations which cannot work.
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("pipeline.pool_size must be at least 1")]
    EmptyPool,

    #[error("pipeline.queue_capacity must be at least 1")]
    EmptyQueue,

    #[error("encoder geometry {0} is empty")]
    EmptyGeometry(Geometry),

    #[error("encoder.quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),

    #[error("command.line_capacity must be at least 2")]
    LineCapacityTooSmall,

    #[error("pipeline.consumer_poll_ms must be at least 1")]
    ZeroConsumerPoll,

    #[error("stream.socket_timeout_ms must be at least 1")]
    ZeroSocketTimeout,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamExecParams {
    /// Check the parameters, returning warnings for combinations which work but are likely to
    /// perform badly.
    pub fn validate(&self) -> Result<Vec<String>, ParamsError> {
        let mut warnings = Vec::new();

        if self.pipeline.pool_size == 0 {
            return Err(ParamsError::EmptyPool);
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ParamsError::EmptyQueue);
        }
        if self.encoder.geometry().num_pixels() == 0 {
            return Err(ParamsError::EmptyGeometry(self.encoder.geometry()));
        }
        if self.encoder.quality == 0 || self.encoder.quality > 100 {
            return Err(ParamsError::InvalidQuality(self.encoder.quality));
        }
        if self.command.line_capacity < 2 {
            return Err(ParamsError::LineCapacityTooSmall);
        }
        if self.pipeline.consumer_poll_ms == 0 {
            return Err(ParamsError::ZeroConsumerPoll);
        }
        if self.stream.socket_timeout_ms == 0 {
            return Err(ParamsError::ZeroSocketTimeout);
        }

        // Every queued frame and every client mid-transmission holds a slot. With a pool of
        // exactly this size the producer only runs out of slots while the queue is full, when the
        // frame would have been dropped anyway.
        let in_flight = self.pipeline.queue_capacity + self.stream.max_clients;
        if self.pipeline.pool_size < in_flight {
            warnings.push(format!(
                "pipeline.pool_size ({}) < queue_capacity + max_clients ({}), the producer will \
                 skip frames while the queue still has room",
                self.pipeline.pool_size, in_flight
            ));
        }

        if self.encoder.pixel_format == PixelFormat::Yuyv && self.encoder.width % 2 != 0 {
            warnings.push(format!(
                "encoder.width ({}) is odd, YUYV frames need an even width",
                self.encoder.width
            ));
        }

        if self.pipeline.raw_capacity(&self.encoder) > 64 * 1024 * 1024 {
            warnings.push("raw staging buffers are larger than 64 MiB each".into());
        }

        Ok(warnings)
    }
}

impl PipelineParams {
    /// Capacity of the raw staging buffers for the given encoder parameters.
    pub fn raw_capacity(&self, encoder: &EncoderParams) -> usize {
        match self.max_raw_size {
            0 => encoder.pixel_format.frame_len(encoder.geometry()),
            n => n,
        }
    }

    pub fn consumer_poll(&self) -> Duration {
        util::time::millis(self.consumer_poll_ms)
    }

    pub fn backoff(&self) -> Duration {
        util::time::millis(self.backoff_ms)
    }
}

impl EncoderParams {
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.width, self.height)
    }
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 3,
            max_compressed_size: 200 * 1024,
            max_raw_size: 0,
            consumer_poll_ms: 10,
            backoff_ms: 15,
        }
    }
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            width: 320,
            height: 320,
            pixel_format: PixelFormat::Yuyv,
            quality: 10,
        }
    }
}

impl Default for SensorParams {
    fn default() -> Self {
        Self {
            kind: SensorKind::TestPattern,
            device: "/dev/video0".into(),
            frame_interval_ms: 33,
            fb_count: 2,
            rotate_180: false,
        }
    }
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            max_clients: 1,
            socket_timeout_ms: 5000,
        }
    }
}

impl Default for CommandParams {
    fn default() -> Self {
        Self {
            channel: CommandChannel::Tcp,
            bind: "127.0.0.1:5001".into(),
            device: "/dev/ttyUSB0".into(),
            baud_rate: 115200,
            line_capacity: 80,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
