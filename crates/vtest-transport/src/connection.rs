//! The stream socket to the rendering server and the lock that serializes it.
//!
//! Every round-trip holds the [`Channel`] guard from the first request byte to
//! the last response byte (descriptor included). The protocol has no request
//! ids, so responses are matched to requests by order alone.

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use vtest_protocol::command::CommandId;
use vtest_protocol::wire::{FrameHeader, HEADER_SIZE, WORD_SIZE};

use crate::fd_channel;

/// Log and abort the process.
///
/// Used when the framing with the host can no longer be trusted: a short read,
/// a failed write or a malformed response. There is no way to resynchronize
/// the stream and every object the driver holds lives on the host.
#[cold]
pub fn terminate(reason: fmt::Arguments<'_>) -> ! {
    error!("lost connection to rendering server: {}", reason);
    std::process::abort()
}

/// Owning handle over the connected socket.
pub struct Connection {
    stream: Mutex<UnixStream>,
}

impl Connection {
    /// Connect to the server socket at `path`. The socket is close-on-exec.
    pub fn connect(path: &str) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        debug!("connected to rendering server at {}", path);
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    /// Acquire the socket for one request/response exchange.
    pub fn lock(&self) -> Channel<'_> {
        Channel {
            stream: self.stream.lock(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let stream = self.stream.get_mut();
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!("socket shutdown: {}", e);
        }
        debug!("rendering server connection closed");
    }
}

/// Exclusive access to the socket. Dropping it releases the lock.
pub struct Channel<'a> {
    stream: MutexGuard<'a, UnixStream>,
}

impl Channel<'_> {
    /// Write a complete, already encoded frame.
    pub fn write_frame(&mut self, frame: &[u8]) {
        if let Some(bytes) = frame.first_chunk::<HEADER_SIZE>() {
            let header = FrameHeader::decode(bytes);
            trace!("send cmd={} len={}", header.command, header.length);
        }
        self.write_exact(frame);
    }

    pub fn write_exact(&mut self, buf: &[u8]) {
        if let Err(e) = self.stream.write_all(buf) {
            terminate(format_args!("write of {} bytes failed: {}", buf.len(), e));
        }
    }

    pub fn read_exact(&mut self, mut buf: &mut [u8]) {
        let size = buf.len();
        while !buf.is_empty() {
            match self.stream.read(buf) {
                Ok(0) => terminate(format_args!(
                    "stream closed with {} of {} bytes unread",
                    buf.len(),
                    size
                )),
                Ok(n) => buf = &mut buf[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => terminate(format_args!("read of {} bytes failed: {}", size, e)),
            }
        }
    }

    pub fn read_header(&mut self) -> FrameHeader {
        let mut buf = [0u8; HEADER_SIZE];
        self.read_exact(&mut buf);
        let header = FrameHeader::decode(&buf);
        trace!("recv cmd={} len={}", header.command, header.length);
        header
    }

    /// Read a response header and check it answers `command`, with a payload
    /// of `length` words when the length is fixed.
    pub fn expect_header(&mut self, command: CommandId, length: Option<usize>) -> FrameHeader {
        let header = self.read_header();
        if !header.is(command) {
            terminate(format_args!(
                "expected response to {:?}, got command {}",
                command, header.command
            ));
        }
        if let Some(expected) = length {
            if header.length as usize != expected {
                terminate(format_args!(
                    "{:?} response is {} words, expected {}",
                    command, header.length, expected
                ));
            }
        }
        header
    }

    pub fn read_u32(&mut self) -> u32 {
        let mut buf = [0u8; WORD_SIZE];
        self.read_exact(&mut buf);
        u32::from_le_bytes(buf)
    }

    /// Read a 64-bit value stored low word first.
    pub fn read_u64(&mut self) -> u64 {
        let lo = self.read_u32();
        let hi = self.read_u32();
        vtest_protocol::wire::join_u64(lo, hi)
    }

    /// Consume and discard `len` bytes.
    pub fn skip(&mut self, mut len: usize) {
        let mut scratch = [0u8; 256];
        while len > 0 {
            let chunk = len.min(scratch.len());
            self.read_exact(&mut scratch[..chunk]);
            len -= chunk;
        }
    }

    /// Receive the descriptor that accompanies the current response.
    pub fn recv_fd(&mut self) -> OwnedFd {
        fd_channel::recv_fd(&self.stream)
    }
}
