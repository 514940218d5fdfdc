//! # Stream server
//!
//! HTTP listener handing `/stream` connections to a [`StreamConsumer`] each, and answering
//! `/status` with the current statistics.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use comms_if::net::{parse_request_head, write_response, MjpegWriter, Status};
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    consumer::StreamConsumer, context::PipelineContext, params::StreamParams, stats::PipelineStats,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Sleep between two accept attempts when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

pub const STREAM_PATH: &str = "/stream";
pub const STATUS_PATH: &str = "/status";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct StreamServer {
    listener: TcpListener,
    ctx: Arc<PipelineContext>,
    max_clients: usize,
    socket_timeout: Duration,
}

/// Holds one of the `max_clients` stream places, giving it back when dropped.
struct ClientGuard {
    stats: Arc<PipelineStats>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StreamServerError {
    #[error("Could not bind the stream server to {0}: {1}")]
    Bind(String, io::Error),

    #[error("The socket timeout must not be zero")]
    ZeroTimeout,

    #[error("Could not configure the listener: {0}")]
    Listener(io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StreamServer {
    pub fn bind(params: &StreamParams, ctx: Arc<PipelineContext>) -> Result<Self, StreamServerError> {
        // Without a timeout an idle client would hold up shutdown forever
        if params.socket_timeout_ms == 0 {
            return Err(StreamServerError::ZeroTimeout);
        }
        let socket_timeout = util::time::millis(params.socket_timeout_ms);

        let listener = TcpListener::bind(&params.bind)
            .map_err(|e| StreamServerError::Bind(params.bind.clone(), e))?;
        listener
            .set_nonblocking(true)
            .map_err(StreamServerError::Listener)?;

        Ok(Self {
            listener,
            ctx,
            max_clients: params.max_clients,
            socket_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StreamServerError> {
        self.listener.local_addr().map_err(StreamServerError::Listener)
    }

    /// Accept connections until shutdown, then wait for every connection thread to finish.
    ///
    /// Failed accepts are logged and retried after a short wait.
    pub fn run(self) {
        info!("Stream server listening on {:?}", self.listener.local_addr());

        let mut connections: Vec<JoinHandle<()>> = Vec::new();

        while !self.ctx.shutdown.is_triggered() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    connections.retain(|c| !c.is_finished());

                    let ctx = self.ctx.clone();
                    let max_clients = self.max_clients;
                    let timeout = self.socket_timeout;
                    let spawned = thread::Builder::new()
                        .name("stream_client".into())
                        .spawn(move || {
                            if let Err(e) =
                                handle_connection(stream, peer, &ctx, max_clients, timeout)
                            {
                                debug!("Connection from {} ended with error: {}", peer, e);
                            }
                        });

                    match spawned {
                        Ok(handle) => connections.push(handle),
                        Err(e) => warn!("Could not start a thread for {}: {}", peer, e),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.ctx.shutdown.wait(ACCEPT_POLL);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => {
                    warn!("Accepting a stream connection failed: {}", e);
                    self.ctx.shutdown.wait(ACCEPT_POLL);
                }
            }
        }

        for c in connections {
            if c.join().is_err() {
                warn!("A stream client thread panicked");
            }
        }

        info!("Stream server stopped");
    }
}

impl ClientGuard {
    /// Take a place if fewer than `max_clients` are taken.
    fn acquire(stats: &Arc<PipelineStats>, max_clients: usize) -> Option<Self> {
        stats
            .clients_active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if (n as usize) < max_clients {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .ok()
            .map(|_| Self {
                stats: stats.clone(),
            })
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.stats.clients_active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &PipelineContext,
    max_clients: usize,
    timeout: Duration,
) -> io::Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode on some platforms
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let head = {
        let mut reader = BufReader::new(&stream);
        match parse_request_head(&mut reader) {
            Ok(h) => h,
            Err(e) => {
                debug!("Bad request from {}: {}", peer, e);
                return write_response(&mut stream, Status::BadRequest, "text/plain", b"");
            }
        }
    };

    debug!("{} {} {}", peer, head.method, head.path);

    match (head.method.as_str(), head.path.as_str()) {
        ("GET", STREAM_PATH) => {
            let _guard = match ClientGuard::acquire(&ctx.stats, max_clients) {
                Some(g) => g,
                None => {
                    info!("Refusing stream client {}, {} already active", peer, max_clients);
                    return write_response(
                        &mut stream,
                        Status::ServiceUnavailable,
                        "text/plain",
                        b"Too many stream clients\n",
                    );
                }
            };

            PipelineStats::incr(&ctx.stats.clients_served);
            info!(
                "Stream client {} connected ({})",
                peer,
                head.header("user-agent").unwrap_or("no user agent")
            );

            let mut writer = MjpegWriter::start(stream)?;
            let report = StreamConsumer::new(ctx, &peer.to_string()).serve(&mut writer);

            info!(
                "Stream client {} finished: {} frames, {} bytes ({:?})",
                peer, report.frames_sent, report.bytes_sent, report.end
            );
            Ok(())
        }
        ("GET", STATUS_PATH) => {
            let report = ctx.stats.snapshot(&ctx.settings);
            let body = serde_json::to_vec(&report)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            write_response(&mut stream, Status::Ok, "application/json", &body)
        }
        (_, STREAM_PATH) | (_, STATUS_PATH) => write_response(
            &mut stream,
            Status::MethodNotAllowed,
            "text/plain",
            b"Method not allowed\n",
        ),
        _ => write_response(&mut stream, Status::NotFound, "text/plain", b"Not found\n"),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
