//! Wire framing for multiplexed streams.
//!
//! Every entry on a job's frame queue is `name:body`. The split is on the
//! first `:` only, so bodies may contain any byte value. Two control shapes
//! share the format:
//!
//! - `name:` (ordinary name, empty body) is the end-of-job terminator: no
//!   further streams will ever be written for this job.
//! - `-name:` (close marker prefix, empty body) closes only stream `name`.
//!
//! Ordinary data frames always have a non-empty body. Empty-body data frames
//! are reserved for the controls above, so a zero-length payload cannot be
//! represented on the wire; [`Frame::data`] rejects it.

use crate::error::{JobwireError, Result};

/// Byte separating the stream name from the body.
pub const SEPARATOR: u8 = b':';

/// Prefix marking a per-stream close frame.
pub const CLOSE_MARKER: u8 = b'-';

/// Name carried by the end-of-job terminator frame.
pub const TERMINATOR_NAME: &str = "x";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Bytes for the named stream. `body` is never empty.
    Data { name: String, body: Vec<u8> },
    /// Close exactly the named stream.
    CloseStream { name: String },
    /// No more streams will ever open for this job; tear everything down.
    Terminator,
}

impl Frame {
    /// Build a data frame. Fails on an empty body, which would collide with
    /// the terminator encoding on the wire.
    pub fn data(name: impl Into<String>, body: Vec<u8>) -> Result<Frame> {
        if body.is_empty() {
            return Err(JobwireError::MalformedFrame);
        }
        Ok(Frame::Data {
            name: name.into(),
            body,
        })
    }

    pub fn close_stream(name: impl Into<String>) -> Frame {
        Frame::CloseStream { name: name.into() }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Data { name, body } => {
                let mut out = Vec::with_capacity(name.len() + 1 + body.len());
                out.extend_from_slice(name.as_bytes());
                out.push(SEPARATOR);
                out.extend_from_slice(body);
                out
            }
            Frame::CloseStream { name } => {
                let mut out = Vec::with_capacity(name.len() + 2);
                out.push(CLOSE_MARKER);
                out.extend_from_slice(name.as_bytes());
                out.push(SEPARATOR);
                out
            }
            Frame::Terminator => {
                let mut out = Vec::with_capacity(TERMINATOR_NAME.len() + 1);
                out.extend_from_slice(TERMINATOR_NAME.as_bytes());
                out.push(SEPARATOR);
                out
            }
        }
    }

    /// Decode one wire entry. Fails with [`JobwireError::MalformedFrame`] if
    /// the separator is missing or the name is not valid UTF-8.
    pub fn decode(raw: &[u8]) -> Result<Frame> {
        let sep = raw
            .iter()
            .position(|&b| b == SEPARATOR)
            .ok_or(JobwireError::MalformedFrame)?;
        let name = std::str::from_utf8(&raw[..sep]).map_err(|_| JobwireError::MalformedFrame)?;
        let body = &raw[sep + 1..];

        if let Some(stripped) = name.strip_prefix(CLOSE_MARKER as char) {
            if body.is_empty() {
                return Ok(Frame::CloseStream {
                    name: stripped.to_string(),
                });
            }
        }
        if body.is_empty() {
            if name.is_empty() {
                // `:` alone names no stream and no control.
                return Err(JobwireError::MalformedFrame);
            }
            return Ok(Frame::Terminator);
        }
        Ok(Frame::Data {
            name: name.to_string(),
            body: body.to_vec(),
        })
    }
}
