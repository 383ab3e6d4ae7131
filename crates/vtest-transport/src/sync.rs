//! Host timeline syncs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use vtest_protocol::command::{
    CommandId, Request, SyncPoint, SYNC_CREATE_RESPONSE_SIZE, SYNC_READ_RESPONSE_SIZE,
};

use crate::connection::Connection;
use crate::error::RendererError;

/// A live 64-bit counter on the host. Released on drop.
pub struct TimelineSync {
    conn: Arc<Connection>,
    sync_id: AtomicU32,
}

impl TimelineSync {
    pub fn create(conn: &Arc<Connection>, initial_value: u64) -> Result<Self, RendererError> {
        let frame = Request::SyncCreate { initial_value }.encode()?;
        let sync_id = {
            let mut chan = conn.lock();
            chan.write_frame(&frame);
            chan.expect_header(CommandId::SyncCreate, Some(SYNC_CREATE_RESPONSE_SIZE));
            chan.read_u32()
        };
        debug!("created sync {} at {}", sync_id, initial_value);

        Ok(Self {
            conn: Arc::clone(conn),
            sync_id: AtomicU32::new(sync_id),
        })
    }

    /// Host id, 0 once released.
    pub fn sync_id(&self) -> u32 {
        self.sync_id.load(Ordering::Acquire)
    }

    /// The pair `(self, value)` for signal and wait lists.
    pub fn point(&self, value: u64) -> SyncPoint {
        SyncPoint::new(self.sync_id(), value)
    }

    pub fn read(&self) -> Result<u64, RendererError> {
        let frame = Request::SyncRead {
            sync_id: self.sync_id(),
        }
        .encode()?;
        let mut chan = self.conn.lock();
        chan.write_frame(&frame);
        chan.expect_header(CommandId::SyncRead, Some(SYNC_READ_RESPONSE_SIZE));
        Ok(chan.read_u64())
    }

    /// Set the counter. Values may go backwards.
    pub fn write(&self, value: u64) -> Result<(), RendererError> {
        let frame = Request::SyncWrite {
            sync_id: self.sync_id(),
            value,
        }
        .encode()?;
        self.conn.lock().write_frame(&frame);
        Ok(())
    }

    pub fn reset(&self, value: u64) -> Result<(), RendererError> {
        self.write(value)
    }

    /// Drop the host counter. Later calls do nothing.
    pub fn release(&self) {
        let sync_id = self.sync_id.swap(0, Ordering::AcqRel);
        if sync_id == 0 {
            return;
        }
        match (Request::SyncUnref { sync_id }).encode() {
            Ok(frame) => self.conn.lock().write_frame(&frame),
            Err(e) => error!("failed to encode unref for sync {}: {}", sync_id, e),
        }
        debug!("released sync {}", sync_id);
    }
}

impl Drop for TimelineSync {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TimelineSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineSync")
            .field("sync_id", &self.sync_id())
            .finish()
    }
}
