//! # Streaming consumer
//!
//! Serves one client connection: takes frames off the hand-off queue and writes them as parts of
//! the multipart stream until the client goes away or shutdown is requested.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use comms_if::net::MjpegWriter;
use log::{debug, info, trace};

use crate::{
    context::PipelineContext, queue::HandoffQueue, shutdown::ShutdownToken, stats::PipelineStats,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct StreamConsumer {
    queue: HandoffQueue,
    stats: Arc<PipelineStats>,
    shutdown: ShutdownToken,
    poll: Duration,

    /// Peer description used in log messages
    client: String,
}

/// Summary of one served connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub end: ConsumerEnd,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Why a connection stopped being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEnd {
    Shutdown,

    /// Writing to the client failed, normally because it disconnected
    Disconnected(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StreamConsumer {
    pub fn new(ctx: &PipelineContext, client: &str) -> Self {
        Self {
            queue: ctx.queue.clone(),
            stats: ctx.stats.clone(),
            shutdown: ctx.shutdown.clone(),
            poll: ctx.consumer_poll(),
            client: client.to_string(),
        }
    }

    /// Stream frames into `writer` until a write fails or shutdown is requested, then terminate
    /// the stream.
    ///
    /// Frames are only read, the slot is released when the handle is dropped after writing.
    pub fn serve<W: Write>(&self, writer: &mut MjpegWriter<W>) -> ConsumerReport {
        let mut frames_sent = 0;
        let mut bytes_sent = 0;

        let end = loop {
            if self.shutdown.is_triggered() {
                break ConsumerEnd::Shutdown;
            }

            let handle = match self.queue.dequeue_with_timeout(self.poll) {
                Some(h) => h,
                None => continue,
            };

            if let Err(e) = writer.write_frame(handle.format(), handle.data()) {
                info!("Client {} disconnected: {}", self.client, e);
                break ConsumerEnd::Disconnected(e.to_string());
            }

            frames_sent += 1;
            bytes_sent += handle.len() as u64;
            PipelineStats::incr(&self.stats.frames_sent);
            PipelineStats::add(&self.stats.bytes_sent, handle.len() as u64);
            trace!(
                "Sent frame {} ({} bytes) to {}",
                handle.sequence(),
                handle.len(),
                self.client
            );
        };

        if let Err(e) = writer.finish() {
            debug!("Could not terminate stream to {}: {}", self.client, e);
        }

        ConsumerReport {
            frames_sent,
            bytes_sent,
            end,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
