//! Descriptor passing over the stream socket (SCM_RIGHTS).
//!
//! The host attaches exactly one descriptor to a one-byte message that
//! follows certain response headers.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};
use tracing::trace;

use crate::connection::terminate;

/// Receive one descriptor from `stream`.
///
/// The descriptor is created close-on-exec. Anything other than exactly one
/// descriptor riding on a non-empty message ends the process.
pub fn recv_fd(stream: &UnixStream) -> OwnedFd {
    let mut cover = [0u8; 1];
    let mut iovs = [IoSliceMut::new(&mut cover)];
    let mut cmsg_fds = nix::cmsg_space!([RawFd; 1]);

    let msg = match socket::recvmsg::<socket::UnixAddr>(
        stream.as_raw_fd(),
        &mut iovs,
        Some(&mut cmsg_fds),
        MsgFlags::MSG_CMSG_CLOEXEC,
    ) {
        Ok(msg) => msg,
        Err(e) => terminate(format_args!("recvmsg failed: {}", e)),
    };
    if msg.bytes == 0 {
        terminate(format_args!("stream closed while waiting for a descriptor"));
    }

    let cmsgs = match msg.cmsgs() {
        Ok(cmsgs) => cmsgs,
        Err(e) => terminate(format_args!("bad control message: {}", e)),
    };

    let mut received: Vec<OwnedFd> = Vec::new();
    for cmsg in cmsgs {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            for fd in fds {
                // SAFETY: the kernel just installed `fd` in our table and
                // nothing else refers to it.
                received.push(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }

    if received.len() != 1 {
        terminate(format_args!(
            "expected one descriptor, received {}",
            received.len()
        ));
    }
    let fd = received.remove(0);
    trace!("received fd {}", fd.as_raw_fd());
    fd
}

/// Send `fd` on `stream` with a one-byte cover message.
///
/// This is the host side of [`recv_fd`]; the client never sends descriptors.
pub fn send_fd(stream: &UnixStream, fd: impl AsFd) -> std::io::Result<()> {
    let raw = [fd.as_fd().as_raw_fd()];
    let cover = [0u8; 1];
    let iovs = [IoSlice::new(&cover)];
    let cmsgs = [ControlMessage::ScmRights(&raw)];
    socket::sendmsg::<()>(stream.as_raw_fd(), &iovs, &cmsgs, MsgFlags::empty(), None)?;
    Ok(())
}
