//! VXL0 frame codec.
//!
//! Wire format, repeated until the connection closes:
//!
//! ```text
//! +---------+----------------------+------------------+
//! | "VXL0"  | u32 big-endian len N | N bytes of image |
//! +---------+----------------------+------------------+
//! ```
//!
//! There is no acknowledgement and no resynchronisation. Any framing error
//! ends the stream.

use anyhow::{Context, Result};
use std::io::{ErrorKind, Read, Write};
use std::time::SystemTime;

use crate::error::PipelineError;
use crate::frame::Frame;

pub const MAGIC: [u8; 4] = *b"VXL0";
pub const HEADER_LEN: usize = 8;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// Fills `buf` from `reader`, blocking until it is full or the stream ends.
///
/// Returns the number of bytes read, which is less than `buf.len()` only at
/// end of stream. Interrupted reads are retried.
pub fn read_exact_or_eof<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Parses a header, returning the payload length.
pub fn parse_header(header: &[u8; HEADER_LEN], max_frame_bytes: usize) -> Result<usize> {
    if header[..4] != MAGIC {
        return Err(PipelineError::protocol(format!(
            "bad magic {:02x?}, expected {:02x?}",
            &header[..4],
            MAGIC
        )));
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len == 0 {
        return Err(PipelineError::protocol("zero-length frame"));
    }
    if len > max_frame_bytes {
        return Err(PipelineError::protocol(format!(
            "frame length {} exceeds limit {}",
            len, max_frame_bytes
        )));
    }
    Ok(len)
}

/// Stateful decoder for one connection. Numbers frames from 1.
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_bytes: usize,
    next_sequence: u64,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_sequence: 1,
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Frames decoded so far.
    pub fn decoded(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Reads one frame.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly between
    /// frames. Everything else that stops short of a full image is a
    /// `FrameProtocol` error.
    pub fn decode_next<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<Option<Frame>> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_exact_or_eof(reader, &mut header)
            .map_err(|err| PipelineError::protocol(format!("header read failed: {}", err)))?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(PipelineError::protocol(format!(
                "connection closed after {} of {} header bytes",
                got, HEADER_LEN
            )));
        }

        let len = parse_header(&header, self.max_frame_bytes)?;
        let mut payload = vec![0u8; len];
        let got = read_exact_or_eof(reader, &mut payload)
            .map_err(|err| PipelineError::protocol(format!("payload read failed: {}", err)))?;
        if got < len {
            return Err(PipelineError::protocol(format!(
                "connection closed after {} of {} payload bytes",
                got, len
            )));
        }
        let received_at = SystemTime::now();

        let image = image::load_from_memory(&payload)
            .map_err(|err| PipelineError::protocol(format!("undecodable image ({} bytes): {}", len, err)))?
            .into_rgb8();

        let frame = Frame::with_timestamp(image, self.next_sequence, received_at);
        self.next_sequence += 1;
        Ok(Some(frame))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Writes one encoded image with its header.
pub fn encode_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8], max_frame_bytes: usize) -> Result<()> {
    if payload.is_empty() {
        return Err(PipelineError::protocol("refusing to send an empty frame"));
    }
    if payload.len() > max_frame_bytes {
        return Err(PipelineError::protocol(format!(
            "frame of {} bytes exceeds limit {}",
            payload.len(),
            max_frame_bytes
        )));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| PipelineError::protocol("frame length does not fit in u32"))?;
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&MAGIC);
    header[4..].copy_from_slice(&len.to_be_bytes());
    writer.write_all(&header).context("write frame header")?;
    writer.write_all(payload).context("write frame payload")?;
    Ok(())
}
