//! Timed waits on sets of timeline points.
//!
//! The host answers a wait request with a descriptor that becomes readable
//! once the condition holds. The descriptor is polled after the session lock
//! has been dropped.

use std::os::fd::{AsFd, OwnedFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace};

use vtest_protocol::command::{
    CommandId, Request, SyncPoint, SyncWaitFlags, SYNC_WAIT_RESPONSE_SIZE,
};

use crate::connection::Connection;
use crate::error::RendererError;

/// Poll timeout meaning "block until ready".
pub const INFINITE_TIMEOUT: i32 = -1;

const NS_PER_MS: u64 = 1_000_000;

/// Map a driver timeout in nanoseconds to a poll timeout in milliseconds.
///
/// Zero polls once. Anything shorter than a millisecond blocks. The rest is
/// rounded up and clamped to `i32::MAX`.
pub fn timeout_to_poll_ms(timeout_ns: u64) -> i32 {
    if timeout_ns == 0 {
        return 0;
    }
    if timeout_ns < NS_PER_MS {
        return INFINITE_TIMEOUT;
    }
    let ms = timeout_ns / NS_PER_MS + u64::from(timeout_ns % NS_PER_MS != 0);
    ms.min(i32::MAX as u64) as i32
}

/// The wire form of a poll timeout. Negative values become `u32::MAX`.
pub fn poll_timeout_to_wire(poll_ms: i32) -> u32 {
    u32::try_from(poll_ms).unwrap_or(u32::MAX)
}

/// Interpret one `poll` call on the notification descriptor.
///
/// Returns `None` when the call should be repeated.
pub fn classify_poll(ret: i32, errno: i32, revents: i16) -> Option<Result<(), RendererError>> {
    if ret < 0 {
        return match errno {
            libc::EINTR | libc::EAGAIN => None,
            libc::ENOMEM => Some(Err(RendererError::OutOfHostMemory)),
            _ => Some(Err(RendererError::DeviceLost)),
        };
    }
    if ret == 0 {
        return Some(Err(RendererError::Timeout));
    }
    if revents & libc::POLLIN == 0 {
        return Some(Err(RendererError::DeviceLost));
    }
    Some(Ok(()))
}

fn poll_readable(fd: &OwnedFd, poll_ms: i32) -> Result<(), RendererError> {
    let timeout = PollTimeout::try_from(poll_ms).unwrap_or(PollTimeout::NONE);
    loop {
        let mut pfds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
        let outcome = match poll(&mut pfds, timeout) {
            Ok(ready) => {
                let revents = pfds[0].revents().map_or(0, |r| r.bits());
                classify_poll(ready, 0, revents)
            }
            Err(errno) => classify_poll(-1, errno as i32, 0),
        };
        if let Some(result) = outcome {
            return result;
        }
        trace!("poll interrupted, retrying");
    }
}

/// Wait until every point (or, with `any`, one point) has been reached.
pub fn wait(
    conn: &Connection,
    points: &[SyncPoint],
    any: bool,
    timeout_ns: u64,
) -> Result<(), RendererError> {
    let poll_ms = timeout_to_poll_ms(timeout_ns);
    let flags = if any {
        SyncWaitFlags::ANY
    } else {
        SyncWaitFlags::empty()
    };
    let frame = Request::SyncWait {
        flags,
        timeout_ms: poll_timeout_to_wire(poll_ms),
        points: points.to_vec(),
    }
    .encode()?;

    let fd = {
        let mut chan = conn.lock();
        chan.write_frame(&frame);
        chan.expect_header(CommandId::SyncWait, Some(SYNC_WAIT_RESPONSE_SIZE));
        chan.recv_fd()
    };

    let result = poll_readable(&fd, poll_ms);
    drop(fd);
    debug!(
        "wait on {} points (any={}, {} ms): {:?}",
        points.len(),
        any,
        poll_ms,
        result
    );
    result
}
