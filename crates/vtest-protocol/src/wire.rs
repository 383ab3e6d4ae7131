//! Framing for the vtest stream.
//!
//! Every frame is a two-word header `{length, command}` followed by a payload
//! of little-endian 32-bit words. 64-bit fields are split low word first.

use crate::command::CommandId;
use crate::error::ProtocolError;

/// Number of 32-bit words in a frame header.
pub const HEADER_WORDS: usize = 2;

/// Frame header size in bytes: length(4) + command(4) = 8
pub const HEADER_SIZE: usize = HEADER_WORDS * WORD_SIZE;

/// Size of one payload word in bytes.
pub const WORD_SIZE: usize = std::mem::size_of::<u32>();

/// The fixed header that starts every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in 32-bit words. `CreateRenderer` is the exception and
    /// carries a byte count.
    pub length: u32,
    /// Raw command id. Kept raw so that a header from a newer host still decodes.
    pub command: u32,
}

impl FrameHeader {
    pub fn new(command: CommandId, length: u32) -> Self {
        Self {
            length,
            command: command as u32,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..].copy_from_slice(&self.command.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            command: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn command_id(&self) -> Result<CommandId, ProtocolError> {
        CommandId::try_from(self.command)
    }

    /// Whether this header carries `command`.
    pub fn is(&self, command: CommandId) -> bool {
        self.command == command as u32
    }

    /// Number of payload bytes that follow this header on the stream.
    pub fn payload_len(&self) -> usize {
        if self.is(CommandId::CreateRenderer) {
            self.length as usize
        } else {
            self.length as usize * WORD_SIZE
        }
    }
}

/// Split a 64-bit value into `(lo, hi)` words.
pub fn split_u64(value: u64) -> (u32, u32) {
    (value as u32, (value >> 32) as u32)
}

/// Rebuild a 64-bit value from `(lo, hi)` words.
pub fn join_u64(lo: u32, hi: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Builds one frame: header first, payload appended word by word.
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    /// Start a frame whose payload is `length_words` words long.
    pub fn new(command: CommandId, length_words: usize) -> Result<Self, ProtocolError> {
        Self::with_length(command, length_words, length_words * WORD_SIZE)
    }

    /// Start a frame whose header carries `length` verbatim and whose payload
    /// is `payload_bytes` long.
    pub fn with_length(
        command: CommandId,
        length: usize,
        payload_bytes: usize,
    ) -> Result<Self, ProtocolError> {
        let length =
            u32::try_from(length).map_err(|_| ProtocolError::FrameTooLarge(payload_bytes))?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_bytes);
        buf.extend_from_slice(&FrameHeader::new(command, length).encode());
        Ok(Self { buf })
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a 64-bit value as two words, low word first.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        let (lo, hi) = split_u64(value);
        self.put_u32(lo).put_u32(hi)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode a frame whose payload is a plain list of words.
pub fn encode_words(command: CommandId, words: &[u32]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + words.len() * WORD_SIZE);
    frame.extend_from_slice(&FrameHeader::new(command, words.len() as u32).encode());
    for word in words {
        frame.extend_from_slice(&word.to_le_bytes());
    }
    frame
}

/// Cursor over a received payload.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let available = self.remaining();
        if len > available {
            return Err(ProtocolError::Truncated {
                needed: len,
                available,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.get_bytes(WORD_SIZE)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 64-bit value stored low word first.
    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        let lo = self.get_u32()?;
        let hi = self.get_u32()?;
        Ok(join_u64(lo, hi))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
