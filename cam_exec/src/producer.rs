//! # Capture-encode producer
//!
//! The single task feeding the pipeline. Each cycle acquires a raw frame, stages it in the next
//! pool slot, encodes it in place and offers the slot to the hand-off queue. The producer never
//! waits on stream clients: a full queue drops the new frame, and a slot still leased by a client
//! is skipped for this cycle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use thiserror::Error;

use crate::{
    context::PipelineContext,
    encoder::FrameEncoder,
    pool::FramePool,
    queue::HandoffQueue,
    sensor::{FrameSensor, RawFrame},
    shutdown::ShutdownToken,
    stats::{CameraSettings, PipelineStats},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of dropped frames between two warning summaries.
const DROP_WARN_INTERVAL: u64 = 100;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Producer<S: FrameSensor, E: FrameEncoder> {
    sensor: S,
    encoder: E,
    pool: FramePool,
    queue: HandoffQueue,
    stats: Arc<PipelineStats>,
    settings: Arc<CameraSettings>,
    shutdown: ShutdownToken,
    backoff: Duration,

    state: ProducerState,

    /// Sequence number given to the last captured frame
    sequence: u64,

    drops_since_warn: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("The frame pool has already been claimed by another producer")]
    PoolClaimed,
}

/// The step of the cycle the producer is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Capturing,
    Encoding,
    Publishing,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The frame was queued for the stream clients
    Published,

    /// The frame was encoded but the queue was full
    DroppedQueueFull,

    /// The slot due this cycle was still leased, the frame was released unencoded
    SlotBusy,

    /// The sensor gave no frame
    CaptureFailed,

    /// The frame could not be encoded
    EncodeFailed,

    /// The frame does not fit the pool's staging buffers, shutdown has been requested
    FrameTooLarge,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<S: FrameSensor, E: FrameEncoder> Producer<S, E> {
    /// Create the producer, claiming the context's frame pool.
    pub fn new(ctx: &PipelineContext, sensor: S, encoder: E) -> Result<Self, ProducerError> {
        let pool = ctx.take_pool().ok_or(ProducerError::PoolClaimed)?;

        Ok(Self {
            sensor,
            encoder,
            pool,
            queue: ctx.queue.clone(),
            stats: ctx.stats.clone(),
            settings: ctx.settings.clone(),
            shutdown: ctx.shutdown.clone(),
            backoff: ctx.backoff(),
            state: ProducerState::Capturing,
            sequence: 0,
            drops_since_warn: 0,
        })
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Run cycles until shutdown is requested, backing off after failures.
    pub fn run(mut self) {
        info!(
            "Producer started ({} slots, queue capacity {})",
            self.pool.len(),
            self.queue.capacity()
        );

        while !self.shutdown.is_triggered() {
            match self.run_cycle() {
                CycleOutcome::CaptureFailed | CycleOutcome::EncodeFailed => {
                    if self.shutdown.wait(self.backoff) {
                        break;
                    }
                }
                CycleOutcome::DroppedQueueFull | CycleOutcome::SlotBusy => self.note_drop(),
                CycleOutcome::FrameTooLarge => break,
                CycleOutcome::Published => (),
            }
        }

        info!("Producer stopped after {} frames", self.sequence);
    }

    /// Run a single capture, encode and publish cycle.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.sync_quality();

        // ---- CAPTURING ----

        self.state = ProducerState::Capturing;

        let frame = match self.sensor.capture_frame() {
            Ok(f) => f,
            Err(e) => {
                PipelineStats::incr(&self.stats.capture_failures);
                warn!("Frame capture failed: {}", e);
                return CycleOutcome::CaptureFailed;
            }
        };

        PipelineStats::incr(&self.stats.frames_captured);
        self.sequence += 1;

        // The index advances whatever happens to this frame
        let index = self.pool.next_slot_round_robin();

        // ---- ENCODING ----

        self.state = ProducerState::Encoding;

        // The pool is sized once at startup, a bigger frame would fail every cycle from now on
        if frame.data().len() > self.pool.raw_capacity() {
            error!(
                "Sensor delivered a {} byte {} frame but staging buffers hold {} bytes, \
                 increase the encoder geometry or pipeline.max_raw_size",
                frame.data().len(),
                frame.geometry(),
                self.pool.raw_capacity()
            );
            self.sensor.release_frame(frame);
            PipelineStats::incr(&self.stats.encode_failures);
            self.shutdown.trigger();
            return CycleOutcome::FrameTooLarge;
        }

        let geometry = frame.geometry();
        let pixel_format = frame.pixel_format();
        let config = *self.encoder.config();
        if config.geometry != geometry || config.pixel_format != pixel_format {
            info!(
                "Sensor delivered {} {:?}, reconfiguring encoder from {} {:?}",
                geometry, pixel_format, config.geometry, config.pixel_format
            );

            if let Err(e) = self.encoder.reconfigure(geometry, pixel_format) {
                warn!("Could not reconfigure the encoder: {}", e);
                self.sensor.release_frame(frame);
                PipelineStats::incr(&self.stats.encode_failures);
                return CycleOutcome::EncodeFailed;
            }
        }

        let slot = match self.pool.writable(index) {
            Ok(s) => s,
            Err(_) => {
                debug!(
                    "Slot {} still leased, skipping frame {}",
                    index, self.sequence
                );
                self.sensor.release_frame(frame);
                PipelineStats::incr(&self.stats.dropped_slot_busy);
                return CycleOutcome::SlotBusy;
            }
        };

        if let Err(e) = slot.stage(frame.data()) {
            warn!("Could not stage frame {}: {}", self.sequence, e);
            self.sensor.release_frame(frame);
            PipelineStats::incr(&self.stats.encode_failures);
            return CycleOutcome::EncodeFailed;
        }

        let (raw, compressed) = slot.buffers_mut();
        let encoded = self.encoder.process(raw, compressed);
        self.sensor.release_frame(frame);

        let length = match encoded {
            Ok(l) => l,
            Err(e) => {
                warn!("Could not encode frame {}: {}", self.sequence, e);
                PipelineStats::incr(&self.stats.encode_failures);
                return CycleOutcome::EncodeFailed;
            }
        };

        if let Err(e) = slot.commit(length, geometry, self.encoder.format(), self.sequence) {
            warn!("Encoder output rejected for frame {}: {}", self.sequence, e);
            PipelineStats::incr(&self.stats.encode_failures);
            return CycleOutcome::EncodeFailed;
        }

        PipelineStats::incr(&self.stats.frames_encoded);

        // ---- PUBLISHING ----

        self.state = ProducerState::Publishing;

        let handle = match self.pool.handle(index) {
            Ok(h) => h,
            Err(e) => {
                warn!("Could not create a handle to slot {}: {}", index, e);
                return CycleOutcome::EncodeFailed;
            }
        };

        let outcome = if self.queue.try_enqueue(handle) {
            PipelineStats::incr(&self.stats.frames_published);
            trace!(
                "Published frame {} from slot {} ({} bytes)",
                self.sequence,
                index,
                length
            );
            CycleOutcome::Published
        } else {
            PipelineStats::incr(&self.stats.dropped_queue_full);
            debug!("Queue full, dropped frame {}", self.sequence);
            CycleOutcome::DroppedQueueFull
        };

        self.state = ProducerState::Capturing;
        outcome
    }

    /// Apply a quality change made through the command channel.
    fn sync_quality(&mut self) {
        let quality = self.settings.quality();
        if quality != self.encoder.config().quality {
            match self.encoder.set_quality(quality) {
                Ok(()) => info!("Encoder quality set to {}", quality),
                Err(e) => warn!("Could not set encoder quality: {}", e),
            }
        }
    }

    fn note_drop(&mut self) {
        self.drops_since_warn += 1;

        if self.drops_since_warn >= DROP_WARN_INTERVAL {
            warn!(
                "{} frames dropped since last report ({} queue full, {} slot busy in total)",
                self.drops_since_warn,
                self.stats
                    .dropped_queue_full
                    .load(std::sync::atomic::Ordering::Relaxed),
                self.stats
                    .dropped_slot_busy
                    .load(std::sync::atomic::Ordering::Relaxed),
            );
            self.drops_since_warn = 0;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::encoder::{EncodeError, EncoderConfig, EncoderInitError};
    use crate::pool::FramePool;
    use crate::sensor::{OwnedFrame, SensorError};
    use crate::stats::CameraSettings;
    use comms_if::eqpt::cam::{FrameFormat, Geometry, PixelFormat};
    use std::collections::VecDeque;

    /// Sensor replaying a script of frames or failures.
    struct ScriptedSensor {
        script: VecDeque<Result<OwnedFrame, SensorError>>,
        released: usize,
    }

    impl FrameSensor for ScriptedSensor {
        type Frame = OwnedFrame;

        fn capture_frame(&mut self) -> Result<OwnedFrame, SensorError> {
            self.script.pop_front().unwrap_or(Err(SensorError::Timeout))
        }

        fn release_frame(&mut self, _frame: OwnedFrame) {
            self.released += 1;
        }
    }

    /// Encoder copying the raw bytes, failing on frames starting with 0xEE.
    struct CopyEncoder {
        config: EncoderConfig,
    }

    impl FrameEncoder for CopyEncoder {
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
            if geometry.width % 2 != 0 {
                return Err(EncoderInitError::OddYuyvWidth(geometry.width));
            }
            self.config.geometry = geometry;
            self.config.pixel_format = pixel_format;
            Ok(())
        }

        fn set_quality(&mut self, quality: u8) -> Result<(), EncoderInitError> {
            self.config.quality = quality;
            Ok(())
        }

        fn process(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize, EncodeError> {
            if input.first() == Some(&0xEE) {
                return Err(EncodeError::Codec("scripted failure".into()));
            }
            output[..input.len()].copy_from_slice(input);
            Ok(input.len())
        }
    }

    fn frame(byte: u8, width: u32) -> Result<OwnedFrame, SensorError> {
        Ok(OwnedFrame {
            data: vec![byte; width as usize],
            geometry: Geometry::new(width, 1),
            pixel_format: PixelFormat::Gray8,
        })
    }

    fn producer(
        script: Vec<Result<OwnedFrame, SensorError>>,
        pool_size: usize,
        queue_capacity: usize,
    ) -> (PipelineContext, Producer<ScriptedSensor, CopyEncoder>) {
        let ctx = PipelineContext::from_parts(
            FramePool::new(pool_size, 16, 16).unwrap(),
            HandoffQueue::new(queue_capacity).unwrap(),
            CameraSettings::new("test", 10),
            ShutdownToken::new(),
        );
        let sensor = ScriptedSensor {
            script: script.into(),
            released: 0,
        };
        let encoder = CopyEncoder {
            config: EncoderConfig {
                geometry: Geometry::new(4, 1),
                pixel_format: PixelFormat::Gray8,
                quality: 10,
            },
        };
        let producer = Producer::new(&ctx, sensor, encoder).unwrap();

        (ctx, producer)
    }

    #[test]
    fn test_publish_and_release() {
        let (ctx, mut prod) = producer(vec![frame(1, 4), frame(2, 4)], 3, 2);

        assert_eq!(prod.run_cycle(), CycleOutcome::Published);
        assert_eq!(prod.run_cycle(), CycleOutcome::Published);
        assert_eq!(prod.state(), ProducerState::Capturing);
        assert_eq!(prod.sensor.released, 2);

        let a = ctx.queue.try_dequeue().unwrap();
        let b = ctx.queue.try_dequeue().unwrap();
        assert_eq!((a.index(), a.sequence(), a.data()), (0, 1, &[1u8; 4][..]));
        assert_eq!((b.index(), b.sequence(), b.data()), (1, 2, &[2u8; 4][..]));
        assert_eq!(b.geometry(), Geometry::new(4, 1));
    }

    #[test]
    fn test_failures_are_counted_and_recovered() {
        let (ctx, mut prod) = producer(
            vec![Err(SensorError::Timeout), frame(0xEE, 4), frame(3, 4)],
            3,
            2,
        );

        assert_eq!(prod.run_cycle(), CycleOutcome::CaptureFailed);
        assert_eq!(prod.run_cycle(), CycleOutcome::EncodeFailed);
        assert_eq!(prod.run_cycle(), CycleOutcome::Published);

        // The failed encode still used up slot 0
        let h = ctx.queue.try_dequeue().unwrap();
        assert_eq!(h.index(), 1);
        assert_eq!(h.sequence(), 2);

        let report = ctx.stats.snapshot(&ctx.settings);
        assert_eq!(report.capture_failures, 1);
        assert_eq!(report.encode_failures, 1);
        assert_eq!(report.frames_captured, 2);
        assert_eq!(report.frames_published, 1);
        assert_eq!(prod.sensor.released, 2);
    }

    #[test]
    fn test_geometry_change_reconfigures() {
        let (ctx, mut prod) = producer(vec![frame(5, 8)], 2, 1);

        assert_eq!(prod.run_cycle(), CycleOutcome::Published);
        assert_eq!(prod.encoder().config().geometry, Geometry::new(8, 1));
        assert_eq!(ctx.queue.try_dequeue().unwrap().len(), 8);
    }

    #[test]
    fn test_failed_reconfigure_is_an_encode_failure() {
        let (ctx, mut prod) = producer(vec![frame(5, 7), frame(6, 4)], 2, 2);

        assert_eq!(prod.run_cycle(), CycleOutcome::EncodeFailed);
        assert_eq!(prod.encoder().config().geometry, Geometry::new(4, 1));
        assert_eq!(prod.sensor.released, 1);

        // The pipeline carries on with frames the encoder accepts
        assert_eq!(prod.run_cycle(), CycleOutcome::Published);
        assert!(!ctx.shutdown.is_triggered());
        assert_eq!(ctx.stats.snapshot(&ctx.settings).encode_failures, 1);
    }

    #[test]
    fn test_frame_larger_than_pool_stops_pipeline() {
        let (ctx, mut prod) = producer(vec![frame(5, 32), frame(5, 32), frame(5, 32)], 2, 2);

        assert_eq!(prod.run_cycle(), CycleOutcome::FrameTooLarge);
        assert!(ctx.shutdown.is_triggered());
        assert_eq!(prod.sensor.released, 1);

        // The encoder keeps the geometry the pool was sized for
        assert_eq!(prod.encoder().config().geometry, Geometry::new(4, 1));

        // run returns straight away once shutdown is requested
        prod.run();
        assert_eq!(ctx.stats.snapshot(&ctx.settings).frames_published, 0);
    }

    #[test]
    fn test_quality_follows_settings() {
        let (ctx, mut prod) = producer(vec![frame(1, 4)], 2, 1);

        ctx.settings.set_quality(80).unwrap();
        prod.run_cycle();
        assert_eq!(prod.encoder().config().quality, 80);
    }

    #[test]
    fn test_second_producer_rejected() {
        let (ctx, _prod) = producer(vec![], 2, 1);

        let again = Producer::new(
            &ctx,
            ScriptedSensor {
                script: VecDeque::new(),
                released: 0,
            },
            CopyEncoder {
                config: EncoderConfig {
                    geometry: Geometry::new(4, 1),
                    pixel_format: PixelFormat::Gray8,
                    quality: 10,
                },
            },
        );
        assert!(matches!(again, Err(ProducerError::PoolClaimed)));
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let (ctx, prod) = producer(vec![frame(1, 4)], 2, 1);
        let shutdown = ctx.shutdown.clone();

        let handle = std::thread::spawn(move || prod.run());
        std::thread::sleep(Duration::from_millis(30));
        shutdown.trigger();
        handle.join().unwrap();

        let report = ctx.stats.snapshot(&ctx.settings);
        assert_eq!(report.frames_published, 1);
        assert!(report.capture_failures >= 1);
    }
}
