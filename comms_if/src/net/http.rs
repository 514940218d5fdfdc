//! # HTTP codec
//!
//! Just enough HTTP/1.1 to serve a long-lived streaming response: parse a request head, write a
//! response head, and write a chunked body.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::{self, BufRead, Read, Write};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum size of a request head (request line plus headers) in bytes.
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Maximum number of request headers accepted.
pub const MAX_HEADERS: usize = 32;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A parsed HTTP request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,

    /// Request target with any query string removed
    pub path: String,

    pub version: String,

    /// Headers in the order received, names lowercased
    pub headers: Vec<(String, String)>,
}

/// Writes an HTTP/1.1 chunked body.
///
/// Every call to [`ChunkedWriter::write_chunk`] emits one chunk. [`ChunkedWriter::finish`] writes
/// the terminating zero-length chunk.
pub struct ChunkedWriter<W: Write> {
    inner: W,
    finished: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("Connection closed before a full request head was received")]
    ConnectionClosed,

    #[error("Request head is larger than {0} bytes")]
    HeadTooLarge(usize),

    #[error("Request has more than {0} headers")]
    TooManyHeaders(usize),

    #[error("Malformed request line: {0:?}")]
    BadRequestLine(String),

    #[error("Malformed header line: {0:?}")]
    BadHeader(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Response status codes used by the stream server.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    ServiceUnavailable,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RequestHead {
    /// Get the value of a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// Write `data` as a single chunk and flush it.
    ///
    /// Empty data is skipped since a zero-length chunk terminates the body.
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "chunked body already finished",
            ));
        }

        if data.is_empty() {
            return Ok(());
        }

        write!(self.inner, "{:X}\r\n", data.len())?;
        self.inner.write_all(data)?;
        self.inner.write_all(b"\r\n")?;
        self.inner.flush()
    }

    /// Write the terminating zero-length chunk. Calling this more than once has no effect.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }

        self.finished = true;
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read and parse a request head from `reader`, consuming up to and including the blank line.
pub fn parse_request_head<R: BufRead>(reader: &mut R) -> Result<RequestHead, HttpError> {
    let mut consumed = 0usize;

    let request_line = read_line(reader, &mut consumed)?.ok_or(HttpError::ConnectionClosed)?;

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if v.starts_with("HTTP/") => (m, t, v),
        _ => return Err(HttpError::BadRequestLine(request_line)),
    };

    let path = target.split('?').next().unwrap_or(target).to_string();
    let method = method.to_string();
    let version = version.to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader, &mut consumed)?.ok_or(HttpError::ConnectionClosed)?;

        if line.is_empty() {
            break;
        }

        if headers.len() == MAX_HEADERS {
            return Err(HttpError::TooManyHeaders(MAX_HEADERS));
        }

        let (name, value) = match line.find(':') {
            Some(i) if i > 0 => (&line[..i], &line[i + 1..]),
            _ => return Err(HttpError::BadHeader(line)),
        };

        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method,
        path,
        version,
        headers,
    })
}

/// Write a response status line and headers, followed by the blank line ending the head.
pub fn write_response_head<W: Write>(
    writer: &mut W,
    status: Status,
    headers: &[(&str, &str)],
) -> io::Result<()> {
    write!(writer, "HTTP/1.1 {} {}\r\n", status.code(), status.reason())?;
    for (name, value) in headers {
        write!(writer, "{}: {}\r\n", name, value)?;
    }
    writer.write_all(b"\r\n")?;
    writer.flush()
}

/// Write a complete, non-streaming response with the given body.
pub fn write_response<W: Write>(
    writer: &mut W,
    status: Status,
    content_type: &str,
    body: &[u8],
) -> io::Result<()> {
    let len = body.len().to_string();
    write_response_head(
        writer,
        status,
        &[
            ("Content-Type", content_type),
            ("Content-Length", len.as_str()),
            ("Connection", "close"),
        ],
    )?;
    writer.write_all(body)?;
    writer.flush()
}

/// Read one CRLF (or LF) terminated line, without the terminator. `Ok(None)` on EOF before any
/// byte was read.
fn read_line<R: BufRead>(reader: &mut R, consumed: &mut usize) -> Result<Option<String>, HttpError> {
    let mut buf = Vec::new();

    // Never read more than what is left of the head budget, plus one byte to detect overflow
    let remaining = (MAX_HEAD_LEN - *consumed) as u64 + 1;
    let n = Read::take(&mut *reader, remaining).read_until(b'\n', &mut buf)?;

    if n == 0 {
        return Ok(None);
    }

    *consumed += n;
    if *consumed > MAX_HEAD_LEN {
        return Err(HttpError::HeadTooLarge(MAX_HEAD_LEN));
    }

    if buf.last() != Some(&b'\n') {
        return Err(HttpError::ConnectionClosed);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
