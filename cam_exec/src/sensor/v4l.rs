//! # Video4Linux sensor
//!
//! Captures YUYV frames from a V4L2 device through `rscam`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::cam::{Geometry, PixelFormat};
use log::info;
use rscam::{Camera, Config};

use super::{rotate_yuyv_180, FrameSensor, RawFrame, SensorError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct V4lSensor {
    camera: Camera,

    rotate_180: bool,

    /// Buffer reused for rotated copies, since driver buffers are read-only
    spare: Option<Vec<u8>>,
}

/// A frame still held in the driver's buffer, or a rotated copy of one.
pub struct V4lFrame {
    frame: rscam::Frame,
    rotated: Option<Vec<u8>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl V4lSensor {
    /// Open and start the device.
    pub fn open(
        device: &str,
        geometry: Geometry,
        frame_interval_ms: u64,
        fb_count: usize,
        rotate_180: bool,
    ) -> Result<Self, SensorError> {
        let mut camera = Camera::new(device)?;

        // V4L2 expresses the interval as a fraction of a second
        let interval = (frame_interval_ms.max(1) as u32, 1000);

        camera
            .start(&Config {
                interval,
                resolution: (geometry.width, geometry.height),
                format: b"YUYV",
                nbuffers: fb_count.max(1) as u32,
                ..Default::default()
            })
            .map_err(|e| SensorError::Device(e.to_string()))?;

        info!("V4L2 device {} started at {}", device, geometry);

        Ok(Self {
            camera,
            rotate_180,
            spare: None,
        })
    }
}

impl FrameSensor for V4lSensor {
    type Frame = V4lFrame;

    fn capture_frame(&mut self) -> Result<V4lFrame, SensorError> {
        let frame = self.camera.capture()?;

        let rotated = if self.rotate_180 {
            let mut buf = self.spare.take().unwrap_or_default();
            buf.clear();
            buf.extend_from_slice(&frame[..]);
            rotate_yuyv_180(&mut buf);
            Some(buf)
        } else {
            None
        };

        Ok(V4lFrame { frame, rotated })
    }

    fn release_frame(&mut self, frame: V4lFrame) {
        // Dropping the rscam frame requeues its buffer with the driver
        if let Some(buf) = frame.rotated {
            self.spare = Some(buf);
        }
    }
}

impl RawFrame for V4lFrame {
    fn data(&self) -> &[u8] {
        match &self.rotated {
            Some(buf) => buf.as_slice(),
            None => &self.frame[..],
        }
    }

    fn geometry(&self) -> Geometry {
        Geometry::new(self.frame.resolution.0, self.frame.resolution.1)
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Yuyv
    }
}
