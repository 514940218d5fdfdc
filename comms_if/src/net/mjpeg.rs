//! # MJPEG multipart stream
//!
//! Frames are sent as parts of a `multipart/x-mixed-replace` body. Each part is written as two
//! HTTP chunks, the part header and then the compressed payload:
//!
//! ```text
//! \r\n--<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <length>\r\n
//! \r\n
//! <length bytes of payload>
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Write as _;
use std::io::{self, Write};

use crate::eqpt::cam::FrameFormat;

use super::http::{write_response_head, ChunkedWriter, Status};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Multipart boundary shared by the server and its clients.
pub const BOUNDARY: &str = "123456789000000000000987654321";

/// Longest part header that can be produced, used to size the reusable header buffer.
const MAX_PART_HEADER_LEN: usize = 128;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Writes frames as a chunked multipart stream.
pub struct MjpegWriter<W: Write> {
    chunked: ChunkedWriter<W>,

    /// Reused for every part header so steady-state streaming does not allocate
    header_buf: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<W: Write> MjpegWriter<W> {
    /// Wrap a connection whose response head has already been written.
    pub fn new(inner: W) -> Self {
        Self {
            chunked: ChunkedWriter::new(inner),
            header_buf: String::with_capacity(MAX_PART_HEADER_LEN),
        }
    }

    /// Write the streaming response head to `inner` and wrap it.
    pub fn start(mut inner: W) -> io::Result<Self> {
        let content_type = multipart_content_type();
        write_response_head(
            &mut inner,
            Status::Ok,
            &[
                ("Content-Type", content_type.as_str()),
                ("Transfer-Encoding", "chunked"),
                ("Cache-Control", "no-cache"),
                ("Connection", "close"),
            ],
        )?;

        Ok(Self::new(inner))
    }

    /// Write one frame: the part header chunk followed by the payload chunk.
    pub fn write_frame(&mut self, format: FrameFormat, payload: &[u8]) -> io::Result<()> {
        self.header_buf.clear();
        write_part_header(&mut self.header_buf, format, payload.len());

        self.chunked.write_chunk(self.header_buf.as_bytes())?;
        self.chunked.write_chunk(payload)
    }

    /// Terminate the stream with a zero-length chunk.
    pub fn finish(&mut self) -> io::Result<()> {
        self.chunked.finish()
    }

    pub fn into_inner(self) -> W {
        self.chunked.into_inner()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// The `Content-Type` of the whole streaming response.
pub fn multipart_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// Format the header preceding one part into `buf`.
pub fn write_part_header(buf: &mut String, format: FrameFormat, length: usize) {
    // Writing into a String cannot fail
    let _ = write!(
        buf,
        "\r\n--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        format.content_type(),
        length
    );
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_part_header() {
        let mut buf = String::new();
        write_part_header(&mut buf, FrameFormat::Jpeg, 1234);

        assert_eq!(
            buf,
            "\r\n--123456789000000000000987654321\r\n\
             Content-Type: image/jpeg\r\n\
             Content-Length: 1234\r\n\r\n"
        );
        assert!(buf.len() <= MAX_PART_HEADER_LEN);
    }

    #[test]
    fn test_write_frame_chunks() {
        let mut writer = MjpegWriter::new(Vec::new());
        writer.write_frame(FrameFormat::Jpeg, &[0xff, 0xd8, 0xff, 0xd9]).unwrap();
        writer.finish().unwrap();

        let mut header = String::new();
        write_part_header(&mut header, FrameFormat::Jpeg, 4);

        let mut expected = format!("{:X}\r\n{}\r\n", header.len(), header).into_bytes();
        expected.extend_from_slice(b"4\r\n\xff\xd8\xff\xd9\r\n0\r\n\r\n");

        assert_eq!(writer.into_inner(), expected);
    }

    #[test]
    fn test_start_writes_head() {
        let writer = MjpegWriter::start(Vec::new()).unwrap();
        let head = String::from_utf8(writer.into_inner()).unwrap();

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains(
            "Content-Type: multipart/x-mixed-replace; boundary=123456789000000000000987654321\r\n"
        ));
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }
}
