//! # Pipeline context
//!
//! Everything the producer, stream clients and command channel share. Built once at startup and
//! passed by reference to each component's constructor.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::{
    params::{CamExecParams, ParamsError},
    pool::{FramePool, PoolError},
    queue::{HandoffQueue, QueueError},
    shutdown::ShutdownToken,
    stats::{CameraSettings, PipelineStats},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default wait on the queue before a stream client rechecks for shutdown.
pub const DEFAULT_CONSUMER_POLL: Duration = Duration::from_millis(10);

/// Default delay after a failed capture or encode.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(15);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct PipelineContext {
    pub queue: HandoffQueue,

    pub stats: Arc<PipelineStats>,

    pub settings: Arc<CameraSettings>,

    pub shutdown: ShutdownToken,

    /// The pool, until the producer claims it
    pool: Mutex<Option<FramePool>>,

    consumer_poll: Duration,

    backoff: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("Could not create the frame pool: {0}")]
    Pool(#[from] PoolError),

    #[error("Could not create the hand-off queue: {0}")]
    Queue(#[from] QueueError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PipelineContext {
    /// Build the context from the executable's parameters, allocating the pool.
    pub fn new(params: &CamExecParams, shutdown: ShutdownToken) -> Result<Self, ContextError> {
        params.validate()?;

        let pool = FramePool::new(
            params.pipeline.pool_size,
            params.pipeline.raw_capacity(&params.encoder),
            params.pipeline.max_compressed_size,
        )?;
        let queue = HandoffQueue::new(params.pipeline.queue_capacity)?;
        let settings = CameraSettings::new(&params.camera_name, params.encoder.quality);

        Ok(Self::from_parts(pool, queue, settings, shutdown)
            .with_timing(params.pipeline.consumer_poll(), params.pipeline.backoff()))
    }

    /// Build a context from already constructed parts, with default timings.
    pub fn from_parts(
        pool: FramePool,
        queue: HandoffQueue,
        settings: CameraSettings,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            queue,
            stats: Arc::new(PipelineStats::new()),
            settings: Arc::new(settings),
            shutdown,
            pool: Mutex::new(Some(pool)),
            consumer_poll: DEFAULT_CONSUMER_POLL,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_timing(mut self, consumer_poll: Duration, backoff: Duration) -> Self {
        self.consumer_poll = consumer_poll;
        self.backoff = backoff;
        self
    }

    /// Take the pool. Only the first call returns it, so only one producer can exist.
    pub fn take_pool(&self) -> Option<FramePool> {
        match self.pool.lock() {
            Ok(mut p) => p.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn consumer_poll(&self) -> Duration {
        self.consumer_poll
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_from_params() {
        let mut params = CamExecParams::default();
        params.camera_name = "Mast".into();
        params.pipeline.consumer_poll_ms = 25;

        let ctx = PipelineContext::new(&params, ShutdownToken::new()).unwrap();
        assert_eq!(ctx.queue.capacity(), 3);
        assert_eq!(ctx.settings.name(), "Mast");
        assert_eq!(ctx.consumer_poll(), Duration::from_millis(25));

        let pool = ctx.take_pool().unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.compressed_capacity(), 200 * 1024);

        assert!(ctx.take_pool().is_none());
    }

    #[test]
    fn test_invalid_params() {
        let mut params = CamExecParams::default();
        params.pipeline.queue_capacity = 0;

        assert!(matches!(
            PipelineContext::new(&params, ShutdownToken::new()),
            Err(ContextError::Params(ParamsError::EmptyQueue))
        ));
    }
}
