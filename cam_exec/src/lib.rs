//! # Camera Library
//!
//! The frame pipeline behind the camera executable. A single producer captures raw frames from a
//! sensor, compresses them into slots of a fixed pool and publishes slot handles on a bounded
//! queue. Stream clients take handles off the queue and write the frames to their connection as a
//! multipart HTTP response. A line based command channel runs alongside.
//!
//! ```text
//! Sensor -> Producer -> FramePool slot -> HandoffQueue -> StreamConsumer -> network
//! ```

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod cmd_handlers;
pub mod cmd_server;
pub mod connectivity;
pub mod consumer;
pub mod context;
pub mod encoder;
pub mod params;
pub mod pool;
pub mod producer;
pub mod queue;
pub mod sensor;
pub mod shutdown;
pub mod stats;
pub mod stream_server;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use context::PipelineContext;
pub use params::CamExecParams;
pub use shutdown::ShutdownToken;
