//! Length-prefixed frame codec.
//!
//! Wire format, one frame per message:
//!   [4-byte LE length][protobuf bytes]
//!
//! Rules:
//!   - Zero-length frames are invalid
//!   - Frames above the configured limit are rejected before buffering
//!   - A decoder error poisons nothing: the caller drops the connection
//!     or the frame and carries on

use crate::error::WireError;

const LEN_PREFIX: usize = 4;

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8], max_len: usize) -> Result<Vec<u8>, WireError> {
    if payload.is_empty() {
        return Err(WireError::EmptyFrame);
    }
    if payload.len() > max_len || u32::try_from(payload.len()).is_err() {
        return Err(WireError::FrameTooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    let mut out = Vec::with_capacity(LEN_PREFIX + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Incremental decoder for a byte stream of frames.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, `Ok(None)` when more bytes are needed.
    ///
    /// On error the offending prefix is discarded along with everything
    /// buffered, since the stream can no longer be resynchronised.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if self.buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut len_buf = [0u8; LEN_PREFIX];
        len_buf.copy_from_slice(&self.buf[..LEN_PREFIX]);
        let len = u32::from_le_bytes(len_buf) as usize;

        if len == 0 {
            self.buf.clear();
            return Err(WireError::EmptyFrame);
        }
        if len > self.max_len {
            self.buf.clear();
            return Err(WireError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }
        if self.buf.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        let frame = self.buf[LEN_PREFIX..LEN_PREFIX + len].to_vec();
        self.buf.drain(..LEN_PREFIX + len);
        Ok(Some(frame))
    }
}
