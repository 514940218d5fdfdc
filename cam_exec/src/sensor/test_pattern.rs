//! # Test pattern sensor
//!
//! Generates YUYV colour bars which scroll sideways by a few pixels every frame, paced to a fixed
//! frame interval. Used when no camera is attached and in tests.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::thread;
use std::time::{Duration, Instant};

use comms_if::eqpt::cam::{Geometry, PixelFormat};
use log::trace;

use super::{rotate_yuyv_180, FrameSensor, OwnedFrame, SensorError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// (Y, U, V) of the classic 75% colour bars: white, yellow, cyan, green, magenta, red, blue, black.
const BARS: [(u8, u8, u8); 8] = [
    (180, 128, 128),
    (162, 44, 142),
    (131, 156, 44),
    (112, 72, 58),
    (84, 184, 198),
    (65, 100, 212),
    (35, 212, 114),
    (16, 128, 128),
];

/// Horizontal scroll per frame in pixels.
const SCROLL_PER_FRAME: u64 = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct TestPatternSensor {
    geometry: Geometry,

    frame_interval: Duration,

    rotate_180: bool,

    /// Buffers not currently lent out
    free: Vec<Vec<u8>>,

    /// Number of buffers lent out
    outstanding: usize,

    fb_count: usize,

    frame_number: u64,

    last_capture: Option<Instant>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TestPatternSensor {
    /// Create a sensor with `fb_count` frame buffers (at least one).
    pub fn new(
        geometry: Geometry,
        fb_count: usize,
        frame_interval: Duration,
        rotate_180: bool,
    ) -> Self {
        let fb_count = fb_count.max(1);
        let frame_len = PixelFormat::Yuyv.frame_len(geometry);

        Self {
            geometry,
            frame_interval,
            rotate_180,
            free: (0..fb_count).map(|_| vec![0u8; frame_len]).collect(),
            outstanding: 0,
            fb_count,
            frame_number: 0,
            last_capture: None,
        }
    }

    /// Number of frames generated so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    fn fill(&self, buf: &mut [u8]) {
        let width = self.geometry.width as u64;
        if width == 0 {
            return;
        }
        let shift = self.frame_number * SCROLL_PER_FRAME;

        for (y, row) in buf
            .chunks_exact_mut(self.geometry.width as usize * 2)
            .enumerate()
        {
            // Darken the bottom quarter so the orientation is visible
            let dim = y >= self.geometry.height as usize * 3 / 4;

            for (x, px) in row.chunks_exact_mut(2).enumerate() {
                let bar = (((x as u64 + shift) % width) * BARS.len() as u64 / width) as usize;
                let (luma, u, v) = BARS[bar];

                px[0] = if dim { luma / 2 } else { luma };
                px[1] = if x % 2 == 0 { u } else { v };
            }
        }
    }
}

impl FrameSensor for TestPatternSensor {
    type Frame = OwnedFrame;

    fn capture_frame(&mut self) -> Result<OwnedFrame, SensorError> {
        let mut data = match self.free.pop() {
            Some(d) => d,
            None => return Err(SensorError::NoFreeBuffer),
        };

        if let Some(last) = self.last_capture {
            let due = last + self.frame_interval;
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.last_capture = Some(Instant::now());

        self.fill(&mut data);
        if self.rotate_180 {
            rotate_yuyv_180(&mut data);
        }

        self.frame_number += 1;
        self.outstanding += 1;
        trace!(
            "Test pattern frame {} ({} of {} buffers out)",
            self.frame_number,
            self.outstanding,
            self.fb_count
        );

        Ok(OwnedFrame {
            data,
            geometry: self.geometry,
            pixel_format: PixelFormat::Yuyv,
        })
    }

    fn release_frame(&mut self, frame: OwnedFrame) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.free.len() < self.fb_count {
            self.free.push(frame.data);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sensor::RawFrame;

    #[test]
    fn test_buffers_are_lent_and_returned() {
        let mut sensor = TestPatternSensor::new(Geometry::new(16, 4), 2, Duration::from_millis(0), false);

        let a = sensor.capture_frame().unwrap();
        let b = sensor.capture_frame().unwrap();
        assert!(matches!(
            sensor.capture_frame(),
            Err(SensorError::NoFreeBuffer)
        ));

        assert_eq!(a.data().len(), 16 * 4 * 2);
        assert_eq!(a.geometry(), Geometry::new(16, 4));
        assert_eq!(a.pixel_format(), PixelFormat::Yuyv);

        // Consecutive frames differ since the bars scroll
        assert_ne!(a.data(), b.data());

        sensor.release_frame(a);
        assert!(sensor.capture_frame().is_ok());
        assert_eq!(sensor.frame_number(), 3);
    }

    #[test]
    fn test_pacing() {
        let mut sensor = TestPatternSensor::new(Geometry::new(8, 2), 1, Duration::from_millis(20), false);

        let start = Instant::now();
        for _ in 0..3 {
            let f = sensor.capture_frame().unwrap();
            sensor.release_frame(f);
        }

        // The first frame is immediate, the next two wait one interval each
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_rotation() {
        let geometry = Geometry::new(8, 4);
        let mut upright = TestPatternSensor::new(geometry, 1, Duration::from_millis(0), false);
        let mut rotated = TestPatternSensor::new(geometry, 1, Duration::from_millis(0), true);

        let a = upright.capture_frame().unwrap();
        let mut b = rotated.capture_frame().unwrap();
        rotate_yuyv_180(&mut b.data);

        assert_eq!(a, b);
    }
}
