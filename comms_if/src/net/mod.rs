//! # Network Module
//!
//! This module provides the wire codecs used by the camera's stream server: a minimal HTTP/1.1
//! request/response head codec, HTTP chunked transfer coding, and the MJPEG multipart framing
//! written inside the chunked body.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod http;
pub mod mjpeg;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use http::{
    parse_request_head, write_response, write_response_head, ChunkedWriter, HttpError, RequestHead,
    Status,
};
pub use mjpeg::{MjpegWriter, BOUNDARY};
