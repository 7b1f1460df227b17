//! Frame encoding and the streaming frame decoder

use alloc::vec::Vec;

use super::opcodes;
use crate::error::FrameError;

/// Largest payload a frame can carry (one-byte length field)
pub const MAX_PAYLOAD: usize = 255;

/// Byte terminating every frame
pub const FRAME_END: u8 = 0x0A;

/// Bytes of framing around the payload (opcode, tag, length, terminator)
pub const FRAME_OVERHEAD: usize = 4;

/// Tag carried by write-only commands
pub const NO_REPLY_TAG: u8 = 0;

/// One wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Operation code
    pub opcode: u8,
    /// Correlation tag
    pub tag: u8,
    /// Operation-specific payload
    pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

/// A frame sent from the host to the board
pub type CommandFrame = Frame;

/// A frame sent from the board to the host
pub type ReplyFrame = Frame;

impl Frame {
    /// Build a frame, failing if the payload does not fit
    pub fn new(opcode: u8, tag: u8, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = heapless::Vec::from_slice(payload)
            .map_err(|_| FrameError::PayloadTooLong { len: payload.len() })?;
        Ok(Self {
            opcode,
            tag,
            payload,
        })
    }

    /// Size of the encoded frame in bytes
    pub fn encoded_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }

    /// Append the wire encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.push(self.opcode);
        out.push(self.tag);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
        out.push(FRAME_END);
    }

    /// Wire encoding of the frame
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }
}

/// Output of [`FrameDecoder::next_frame`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A well-formed frame
    Frame(Frame),
    /// A known opcode whose frame did not end with the terminator
    ///
    /// Only the opcode byte is dropped so a real frame starting inside the
    /// bogus one can still be found.
    Malformed {
        /// Opcode of the rejected frame
        opcode: u8,
    },
}

/// Streaming decoder reassembling frames from arbitrarily chunked bytes
///
/// Bytes that cannot start a frame (boot banners, debug prints) are skipped
/// and counted. Until the first well-formed frame, a candidate that is still
/// incomplete is abandoned as soon as a complete frame follows it, so a
/// noise byte that happens to look like a header cannot hold back real
/// replies.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    discarded: usize,
    synced: bool,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Return and reset the count of skipped noise bytes
    pub fn take_discarded(&mut self) -> usize {
        core::mem::take(&mut self.discarded)
    }

    /// Drop all buffered bytes and wait for a new first frame
    pub fn clear(&mut self) {
        self.discarded += self.buf.len();
        self.buf.clear();
        self.synced = false;
    }

    /// Whether a well-formed frame has been decoded since the last clear
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Whether a whole frame with its terminator starts at `at`
    fn complete_at(&self, at: usize) -> bool {
        let rest = &self.buf[at..];
        if rest.len() < 3 || !opcodes::is_known(rest[0]) {
            return false;
        }
        let total = rest[2] as usize + FRAME_OVERHEAD;
        rest.len() >= total && rest[total - 1] == FRAME_END
    }

    fn drop_front(&mut self, count: usize) {
        self.discarded += count;
        self.buf.drain(..count);
    }

    /// Extract the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Decoded> {
        let start = self
            .buf
            .iter()
            .position(|&b| opcodes::is_known(b))
            .unwrap_or(self.buf.len());
        if start > 0 {
            self.drop_front(start);
        }

        if self.buf.len() < 3 {
            return None;
        }
        let len = self.buf[2] as usize;
        let total = len + FRAME_OVERHEAD;
        if self.buf.len() < total {
            if self.synced {
                return None;
            }
            let resync = (1..self.buf.len()).find(|&at| self.complete_at(at))?;
            self.drop_front(resync);
            return self.next_frame();
        }

        let opcode = self.buf[0];
        if self.buf[total - 1] != FRAME_END {
            self.drop_front(1);
            return Some(Decoded::Malformed { opcode });
        }

        let mut payload = heapless::Vec::new();
        // len <= 255 always fits
        let _ = payload.extend_from_slice(&self.buf[3..3 + len]);
        let frame = Frame {
            opcode,
            tag: self.buf[1],
            payload,
        };
        self.buf.drain(..total);
        self.synced = true;
        Some(Decoded::Frame(frame))
    }
}
