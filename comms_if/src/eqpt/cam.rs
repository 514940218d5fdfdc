//! # Camera Equipment Communications Module

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Width and height of a frame in pixels.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

/// Snapshot of the camera pipeline's counters.
///
/// Sent in reply to the `stats` command, served on `/status`, and saved into the session at
/// shutdown.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct StatsReport {
    /// UTC timestamp at which the snapshot was taken
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Operator-assigned camera name
    pub camera_name: String,

    /// Current compression quality (1-100)
    pub quality: u8,

    /// Raw frames acquired from the sensor
    pub frames_captured: u64,

    /// Frames compressed successfully
    pub frames_encoded: u64,

    /// Frames handed to the stream queue
    pub frames_published: u64,

    /// Frames dropped because the stream queue was full
    pub dropped_queue_full: u64,

    /// Cycles skipped because the slot was still referenced by the queue or a client
    pub dropped_slot_busy: u64,

    /// Failed sensor acquisitions
    pub capture_failures: u64,

    /// Failed compressions
    pub encode_failures: u64,

    /// Frames written to stream clients
    pub frames_sent: u64,

    /// Payload bytes written to stream clients
    pub bytes_sent: u64,

    /// Stream clients served since startup
    pub clients_served: u64,

    /// Stream clients currently connected
    pub clients_active: u64,

    /// Command lines handled by a registered handler
    pub commands_handled: u64,

    /// Command lines with an unknown mnemonic
    pub commands_unknown: u64,

    /// Command lines which could not be lexed
    pub commands_malformed: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Format of a compressed frame.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Baseline JPEG
    Jpeg,
}

/// Layout of the raw pixels delivered by a sensor.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Packed YUV 4:2:2, `Y0 U Y1 V` per pixel pair
    Yuyv,

    /// Packed 8 bit RGB
    Rgb24,

    /// 8 bit luminance
    Gray8,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in a frame of this geometry.
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FrameFormat {
    /// The MIME type used for this format on the wire.
    pub fn content_type(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
        }
    }
}

impl PixelFormat {
    /// Number of bytes used by one pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Yuyv => 2,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Number of bytes in a full frame of the given geometry.
    pub fn frame_len(&self, geometry: Geometry) -> usize {
        geometry.num_pixels() * self.bytes_per_pixel()
    }
}

impl StatsReport {
    /// Fraction of encoded frames which never reached the queue, or 0 if nothing was encoded.
    pub fn drop_ratio(&self) -> f64 {
        if self.frames_encoded == 0 {
            return 0.0;
        }

        self.dropped_queue_full as f64 / self.frames_encoded as f64
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frame_len() {
        let geom = Geometry::new(320, 240);
        assert_eq!(PixelFormat::Yuyv.frame_len(geom), 320 * 240 * 2);
        assert_eq!(PixelFormat::Rgb24.frame_len(geom), 320 * 240 * 3);
        assert_eq!(PixelFormat::Gray8.frame_len(geom), 320 * 240);
        assert_eq!(geom.to_string(), "320x240");
    }

    #[test]
    fn test_stats_report_json() {
        let report = StatsReport {
            camera_name: "Front Cam".into(),
            frames_encoded: 10,
            dropped_queue_full: 2,
            ..Default::default()
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"camera_name\":\"Front Cam\""));
        assert!(!json.contains('\n'));

        let back: StatsReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frames_encoded, 10);
        assert!((back.drop_ratio() - 0.2).abs() < 1e-9);
    }
}
