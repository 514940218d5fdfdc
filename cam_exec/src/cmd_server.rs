//! # Command server
//!
//! Reads the command side channel byte by byte, assembles lines and dispatches them through the
//! command table. Handler replies are written back on the same channel, nothing else is.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use comms_if::cmd::{CommandTable, DispatchOutcome};
use log::{debug, info, warn};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;

use crate::{
    context::PipelineContext,
    params::{CommandChannel, CommandParams},
    shutdown::ShutdownToken,
    stats::PipelineStats,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Read timeout on TCP clients and the serial device, bounds how long shutdown can go unnoticed.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Sleep between two accept attempts when no client is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Accumulates bytes into lines terminated by `\r` or `\n`.
///
/// At most `capacity - 1` bytes are kept per line, the rest of an over-long line is discarded up
/// to its terminator.
pub struct LineAssembler {
    buf: Vec<u8>,
    capacity: usize,
    overflowed: bool,
}

pub struct CmdServer {
    table: Arc<CommandTable>,
    stats: Arc<PipelineStats>,
    shutdown: ShutdownToken,
    line_capacity: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CmdServerError {
    #[error("Could not bind the command listener to {0}: {1}")]
    Bind(String, io::Error),

    #[error("Could not open command device {0}: {1}")]
    Device(String, serialport::Error),

    #[error("Command channel IO error: {0}")]
    Io(#[from] io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LineAssembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity: capacity.max(2),
            overflowed: false,
        }
    }

    /// Feed one byte, returning a line when a terminator completes a non-empty one.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if byte == b'\r' || byte == b'\n' {
            if self.overflowed {
                debug!("Command line longer than {} bytes truncated", self.capacity - 1);
                self.overflowed = false;
            }

            if self.buf.is_empty() {
                return None;
            }

            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            return Some(line);
        }

        if self.buf.len() < self.capacity - 1 {
            self.buf.push(byte);
        } else {
            self.overflowed = true;
        }

        None
    }
}

impl CmdServer {
    pub fn new(table: Arc<CommandTable>, ctx: &PipelineContext, line_capacity: usize) -> Self {
        Self {
            table,
            stats: ctx.stats.clone(),
            shutdown: ctx.shutdown.clone(),
            line_capacity,
        }
    }

    /// Dispatch one line, logging and counting anything no handler ran for.
    pub fn handle_line(&self, line: &str, out: &mut dyn Write) -> DispatchOutcome {
        let outcome = self.table.dispatch(line, out);

        match &outcome {
            DispatchOutcome::Handled(status) => {
                PipelineStats::incr(&self.stats.commands_handled);
                debug!("Command {:?} returned {}", line, status);
            }
            DispatchOutcome::Empty => (),
            DispatchOutcome::Unknown(mnemonic) => {
                PipelineStats::incr(&self.stats.commands_unknown);
                warn!("Unknown command {:?}", mnemonic);
            }
            DispatchOutcome::Malformed(mnemonic) => {
                PipelineStats::incr(&self.stats.commands_malformed);
                warn!("Malformed command line for {:?}: {:?}", mnemonic, line);
            }
        }

        outcome
    }

    /// Serve a single reader/writer pair until end of input, an IO error or shutdown.
    ///
    /// Read timeouts are treated as a chance to check for shutdown.
    pub fn serve<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<(), CmdServerError> {
        let mut assembler = LineAssembler::new(self.line_capacity);
        let mut buf = [0u8; 64];

        while !self.shutdown.is_triggered() {
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted => continue,
                    _ => return Err(e.into()),
                },
            };

            for &byte in &buf[..n] {
                if let Some(line) = assembler.push(byte) {
                    self.handle_line(&line, &mut writer);
                }
            }
        }

        Ok(())
    }

    /// Run the channel selected in the parameters until shutdown.
    pub fn run(self, params: &CommandParams) -> Result<(), CmdServerError> {
        match params.channel {
            CommandChannel::None => {
                info!("Command channel disabled");
                Ok(())
            }
            CommandChannel::Stdin => {
                info!("Command channel on stdin");
                self.serve(io::stdin(), io::stdout())
            }
            CommandChannel::Device => {
                let port = open_serial(&params.device, params.baud_rate)?;
                let reader = port
                    .try_clone()
                    .map_err(|e| CmdServerError::Device(params.device.clone(), e))?;

                info!(
                    "Command channel on {} at {} baud",
                    params.device, params.baud_rate
                );
                self.serve(reader, port)
            }
            CommandChannel::Tcp => self.run_tcp(&params.bind),
        }
    }

    /// Accept TCP command clients one at a time.
    fn run_tcp(&self, bind: &str) -> Result<(), CmdServerError> {
        let listener =
            TcpListener::bind(bind).map_err(|e| CmdServerError::Bind(bind.to_string(), e))?;
        listener.set_nonblocking(true)?;

        info!("Command channel listening on {:?}", listener.local_addr());

        while !self.shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    info!("Command client {} connected", peer);

                    match self.serve_client(stream) {
                        Ok(()) => info!("Command client {} disconnected", peer),
                        Err(e) => warn!("Command client {} dropped: {}", peer, e),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.shutdown.wait(ACCEPT_POLL);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => {
                    warn!("Accepting a command client failed: {}", e);
                    self.shutdown.wait(ACCEPT_POLL);
                }
            }
        }

        Ok(())
    }

    fn serve_client(&self, stream: TcpStream) -> Result<(), CmdServerError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let reader = stream.try_clone()?;

        self.serve(reader, stream)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open a serial device as 8N1 without flow control.
fn open_serial(device: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, CmdServerError> {
    serialport::new(device, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| CmdServerError::Device(device.to_string(), e))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
